//! Remote command execution.
//!
//! Every remote action a plugin takes goes through one of the four
//! primitives of [`RemoteTransport`]. Commands are argument vectors; an
//! implementation that needs a shell string quotes each argument itself.

use std::{fmt, future::Future};

use anyhow::Result;

use crate::{Node, Server};

mod recording;
pub use recording::{Action, ActionKind, RecordingTransport};

mod ssh;
pub use ssh::SshTransport;

/// Where a command runs.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// On the server itself.
    Host(&'a Server),
    /// Inside the container of a node.
    Node { server: &'a Server, node: Node },
}

impl<'a> Target<'a> {
    pub fn server(&self) -> &'a Server {
        match self {
            Target::Host(server) => server,
            Target::Node { server, .. } => server,
        }
    }

    pub fn node(&self) -> Option<Node> {
        match self {
            Target::Host(_) => None,
            Target::Node { node, .. } => Some(*node),
        }
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Host(server) => write!(f, "host {}", server.host),
            Target::Node { server, node } => {
                write!(f, "node {} on {}", node.absolute_index, server.host)
            }
        }
    }
}

/// The remote primitives a build is expressed in.
pub trait RemoteTransport: Send + Sync {
    /// Run a command to completion and return its combined output.
    fn run(
        &self,
        target: Target<'_>,
        argv: &[String],
    ) -> impl Future<Output = Result<String>> + Send;

    /// Start a command in the background and return once it is launched.
    fn run_detached(
        &self,
        target: Target<'_>,
        argv: &[String],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Start a command inside a persistent session of a node, with its output
    /// appended to `log_file` inside the node.
    fn run_detached_interactive(
        &self,
        server: &Server,
        node: Node,
        session: &str,
        argv: &[String],
        log_file: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write `content` to `dest` on a server, creating parent directories.
    fn copy_to_host(
        &self,
        server: &Server,
        content: &str,
        dest: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Build an argument vector from string slices.
pub fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

/// Quote `arg` for a POSIX shell. Arguments made only of safe characters
/// are left as they are.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Quote and join an argument vector into one shell command line.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("geth"), "geth");
        assert_eq!(shell_quote("/geth/passwd"), "/geth/passwd");
        assert_eq!(shell_quote("--rpcapi=web3,eth"), "--rpcapi=web3,eth");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
    }

    #[test]
    fn test_shell_join() {
        let command = argv(["sh", "-c", "cat /geth/keystore/* | head -n 1"]);
        assert_eq!(shell_join(&command), "sh -c 'cat /geth/keystore/* | head -n 1'");
    }

    #[test]
    fn test_target_display() {
        let server = Server {
            id: 1,
            host: "172.16.0.1".to_string(),
            ips: vec!["10.0.0.2".parse().unwrap()],
            subnet_id: 0,
        };
        let node = Node {
            server_index: 0,
            local_index: 0,
            absolute_index: 0,
            ip: server.ips[0],
        };

        assert_eq!(Target::Host(&server).to_string(), "host 172.16.0.1");
        assert_eq!(
            Target::Node {
                server: &server,
                node
            }
            .to_string(),
            "node 0 on 172.16.0.1"
        );
        assert_eq!(Target::Node { server: &server, node }.node(), Some(node));
    }
}
