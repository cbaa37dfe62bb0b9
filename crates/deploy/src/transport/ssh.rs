//! SSH transport: commands run on servers over `ssh`, and inside node
//! containers through `docker exec`.

use std::{process::Stdio, time::Duration};

use anyhow::Result;
use tokio::{io::AsyncWriteExt, process::Command};

use super::{RemoteTransport, Target, argv, shell_join, shell_quote};
use crate::{Node, Server, Settings, error::RemoteError};

/// Runs remote commands with the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshTransport {
    settings: Settings,
}

impl SshTransport {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Arguments of the `ssh` invocation running `remote` on `server`.
    fn ssh_args(&self, server: &Server, remote: String) -> Vec<String> {
        let ssh = &self.settings.ssh;
        let mut args = argv([
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
        ]);
        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={}", ssh.connect_timeout_secs));
        args.push("-p".to_string());
        args.push(ssh.port.to_string());
        if let Some(identity) = &ssh.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{}", ssh.user, server.host));
        args.push("--".to_string());
        args.push(remote);
        args
    }

    /// Shell command line running `command` at `target`.
    fn remote_command(&self, target: &Target<'_>, docker_flags: &[&str], command: &[String]) -> String {
        match target {
            Target::Host(_) => shell_join(command),
            Target::Node { node, .. } => {
                let mut full = argv(["docker", "exec"]);
                full.extend(docker_flags.iter().map(|flag| flag.to_string()));
                full.push(self.settings.node_container(node));
                full.extend_from_slice(command);
                shell_join(&full)
            }
        }
    }

    async fn execute(
        &self,
        target: &str,
        server: &Server,
        remote: String,
        stdin: Option<&str>,
    ) -> Result<String, RemoteError> {
        let program = remote
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        tracing::debug!(target, command = %remote, "Running remote command");

        let mut child = Command::new("ssh")
            .args(self.ssh_args(server, remote))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RemoteError::Spawn {
                target: target.to_string(),
                program: program.clone(),
                source,
            })?;

        if let (Some(content), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let written = pipe.write_all(content.as_bytes()).await;
            drop(pipe);
            written.map_err(|source| RemoteError::Spawn {
                target: target.to_string(),
                program: program.clone(),
                source,
            })?;
        }

        let output = match self.settings.ssh.command_timeout_secs {
            Some(seconds) => {
                tokio::time::timeout(Duration::from_secs(seconds), child.wait_with_output())
                    .await
                    .map_err(|_| RemoteError::Timeout {
                        target: target.to_string(),
                        program: program.clone(),
                        seconds,
                    })?
            }
            None => child.wait_with_output().await,
        }
        .map_err(|source| RemoteError::Spawn {
            target: target.to_string(),
            program: program.clone(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                target: target.to_string(),
                program,
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            });
        }

        Ok(combined)
    }
}

impl RemoteTransport for SshTransport {
    async fn run(&self, target: Target<'_>, argv: &[String]) -> Result<String> {
        let remote = self.remote_command(&target, &[], argv);
        Ok(self
            .execute(&target.to_string(), target.server(), remote, None)
            .await?)
    }

    async fn run_detached(&self, target: Target<'_>, argv: &[String]) -> Result<()> {
        let remote = match target {
            Target::Host(_) => format!("nohup {} > /dev/null 2>&1 &", shell_join(argv)),
            Target::Node { .. } => self.remote_command(&target, &["-d"], argv),
        };
        self.execute(&target.to_string(), target.server(), remote, None)
            .await?;
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
        let target = Target::Node { server, node };
        let name = target.to_string();

        let open = self.remote_command(&target, &["-d"], &super::argv(["tmux", "new", "-s", session, "-d"]));
        self.execute(&name, server, open, None).await?;

        let keys = format!("{} 2>&1 | tee {}", shell_join(argv), shell_quote(log_file));
        let send = self.remote_command(
            &target,
            &[],
            &super::argv(["tmux", "send-keys", "-t", session, keys.as_str(), "C-m"]),
        );
        self.execute(&name, server, send, None).await?;
        Ok(())
    }

    async fn copy_to_host(&self, server: &Server, content: &str, dest: &str) -> Result<()> {
        let dir = dest.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".");
        let remote = format!(
            "mkdir -p {} && cat > {}",
            shell_quote(if dir.is_empty() { "/" } else { dir }),
            shell_quote(dest)
        );
        self.execute(&Target::Host(server).to_string(), server, remote, Some(content))
            .await?;
        tracing::debug!(host = %server.host, dest, bytes = content.len(), "Copied to host");
        Ok(())
    }
}
