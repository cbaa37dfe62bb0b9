//! Engine settings shared by the transport and the protocol plugins.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Node;

/// Default prefix of node container names.
pub const DEFAULT_NODE_PREFIX: &str = "netbake-node";

/// Default prefix of service container names.
pub const DEFAULT_SERVICE_PREFIX: &str = "netbake-service";

/// Settings of the build engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The container of local node `k` on a server is `<node_prefix><k>`.
    pub node_prefix: String,
    /// The service container `k` on a server is `<service_prefix><k>`.
    pub service_prefix: String,
    /// Directory on every server that receives distributed artifacts.
    pub staging_dir: String,
    /// Name of the persistent session long-running node processes live in.
    pub session_name: String,
    /// File inside each node the long-running process logs to.
    pub node_output_file: String,
    /// Local directory where build artifacts and records are kept.
    pub artifacts_dir: Option<PathBuf>,
    /// Address of the monitoring collector. Defaults to the first server's host.
    pub stats_collector_host: Option<String>,
    pub ssh: SshSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_prefix: DEFAULT_NODE_PREFIX.to_string(),
            service_prefix: DEFAULT_SERVICE_PREFIX.to_string(),
            staging_dir: "/tmp/netbake".to_string(),
            session_name: "netbake".to_string(),
            node_output_file: "/output.log".to_string(),
            artifacts_dir: None,
            stats_collector_host: None,
            ssh: SshSettings::default(),
        }
    }
}

impl Settings {
    /// Container name of `node` on its server.
    pub fn node_container(&self, node: &Node) -> String {
        format!("{}{}", self.node_prefix, node.local_index)
    }

    /// Container name of service `index` on a server.
    pub fn service_container(&self, index: usize) -> String {
        format!("{}{}", self.service_prefix, index)
    }

    /// Deployment-wide name of `node`, used to label it in monitoring.
    pub fn node_name(&self, node: &Node) -> String {
        format!("{}{}", self.node_prefix, node.absolute_index)
    }

    /// Path on a server where the artifact `name` of `deployment` is staged.
    pub fn staged_path(&self, deployment: &str, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.staging_dir.trim_end_matches('/'),
            deployment,
            name
        )
    }
}

/// How servers are reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    /// Deadline of a single remote command. Unbounded when unset.
    pub command_timeout_secs: Option<u64>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "netbake".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            command_timeout_secs: None,
        }
    }
}
