//! In-memory transport that records every action instead of running it.

use std::sync::{Mutex, PoisonError};

use anyhow::Result;

use super::{RemoteTransport, Target};
use crate::{Node, Server};

/// Which primitive an [`Action`] went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Run,
    RunDetached,
    RunDetachedInteractive { session: String, log_file: String },
    CopyToHost { dest: String, content: String },
}

/// One recorded remote action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    /// Host address of the server the action targeted.
    pub host: String,
    /// The node, for actions run inside a node container.
    pub node: Option<Node>,
    pub argv: Vec<String>,
}

impl Action {
    /// The command line, space separated and unquoted.
    pub fn command(&self) -> String {
        self.argv.join(" ")
    }

    /// Whether the command starts with the given arguments.
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.argv.len() >= prefix.len() && self.argv.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

type Responder = Box<dyn Fn(&Action) -> Result<String> + Send + Sync>;

/// A transport that answers commands through a responder closure.
///
/// Every action is recorded before the responder sees it, so failed actions
/// show up in [`RecordingTransport::actions`] too.
pub struct RecordingTransport {
    actions: Mutex<Vec<Action>>,
    responder: Responder,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTransport")
            .field("actions", &self.len())
            .finish_non_exhaustive()
    }
}

impl RecordingTransport {
    /// A transport on which every action succeeds with empty output.
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(String::new()))
    }

    pub fn with_responder(responder: impl Fn(&Action) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// All actions so far, in the order they were issued.
    pub fn actions(&self) -> Vec<Action> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of actions so far.
    pub fn len(&self) -> usize {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, action: Action) -> Result<String> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action.clone());
        (self.responder)(&action)
    }
}

impl RemoteTransport for RecordingTransport {
    async fn run(&self, target: Target<'_>, argv: &[String]) -> Result<String> {
        self.record(Action {
            kind: ActionKind::Run,
            host: target.server().host.clone(),
            node: target.node(),
            argv: argv.to_vec(),
        })
    }

    async fn run_detached(&self, target: Target<'_>, argv: &[String]) -> Result<()> {
        self.record(Action {
            kind: ActionKind::RunDetached,
            host: target.server().host.clone(),
            node: target.node(),
            argv: argv.to_vec(),
        })?;
        Ok(())
    }

    async fn run_detached_interactive(
        &self,
        server: &Server,
        node: Node,
        session: &str,
        argv: &[String],
        log_file: &str,
    ) -> Result<()> {
        self.record(Action {
            kind: ActionKind::RunDetachedInteractive {
                session: session.to_string(),
                log_file: log_file.to_string(),
            },
            host: server.host.clone(),
            node: Some(node),
            argv: argv.to_vec(),
        })?;
        Ok(())
    }

    async fn copy_to_host(&self, server: &Server, content: &str, dest: &str) -> Result<()> {
        self.record(Action {
            kind: ActionKind::CopyToHost {
                dest: dest.to_string(),
                content: content.to_string(),
            },
            host: server.host.clone(),
            node: None,
            argv: Vec::new(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::argv;

    fn server() -> Server {
        Server {
            id: 1,
            host: "172.16.0.1".to_string(),
            ips: vec!["10.0.0.2".parse().unwrap()],
            subnet_id: 0,
        }
    }

    #[tokio::test]
    async fn test_records_in_order() {
        let transport = RecordingTransport::new();
        let server = server();

        transport
            .run(Target::Host(&server), &argv(["uptime"]))
            .await
            .unwrap();
        transport
            .copy_to_host(&server, "secret", "/tmp/netbake/passwd")
            .await
            .unwrap();

        let actions = transport.actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, ActionKind::Run);
        assert!(actions[0].starts_with(&["uptime"]));
        assert_eq!(
            actions[1].kind,
            ActionKind::CopyToHost {
                dest: "/tmp/netbake/passwd".to_string(),
                content: "secret".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_responder_failures_are_recorded() {
        let transport = RecordingTransport::with_responder(|action| {
            if action.starts_with(&["false"]) {
                anyhow::bail!("exit status 1");
            }
            Ok("ok".to_string())
        });
        let server = server();

        let output = transport
            .run(Target::Host(&server), &argv(["true"]))
            .await
            .unwrap();
        assert_eq!(output, "ok");

        assert!(
            transport
                .run_detached(Target::Host(&server), &argv(["false"]))
                .await
                .is_err()
        );
        assert_eq!(transport.len(), 2);
    }
}
