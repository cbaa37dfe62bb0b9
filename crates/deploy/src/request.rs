//! Declarative deployment requests.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-node resource limits.
///
/// Empty `cpus` / `memory` strings mean "unspecified".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub cpus: String,
    pub memory: String,
    pub volumes: Vec<String>,
    pub ports: Vec<String>,
}

impl Resources {
    /// Resources with no limits set.
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// A request to provision one test network.
///
/// `servers` and `images` are optional so a missing list can be told apart
/// from an empty one during validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Deployment identifier. Generated when left empty.
    #[serde(default)]
    pub id: String,
    /// The protocol to bootstrap (the plugin name).
    #[serde(alias = "blockchain")]
    pub protocol: String,
    /// Number of nodes to provision.
    pub nodes: usize,
    /// Ids of the servers to place nodes on, in placement order.
    #[serde(default)]
    pub servers: Option<Vec<u64>>,
    /// Container images.
    #[serde(default)]
    pub images: Option<Vec<String>>,
    /// Protocol parameters, merged over the plugin defaults.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Per-node resource limits.
    #[serde(default)]
    pub resources: Vec<Resources>,
    /// Per-node environment variables.
    #[serde(default)]
    pub environments: Vec<BTreeMap<String, String>>,
    /// Per-node file attachments (file name -> content).
    #[serde(default)]
    pub files: Vec<BTreeMap<String, String>>,
    /// Per-node log path overrides (log name -> path).
    #[serde(default)]
    pub logs: Vec<BTreeMap<String, String>>,
    /// Anything else the caller attached.
    #[serde(default)]
    pub extras: Map<String, Value>,
}

impl DeploymentRequest {
    /// Create a minimal request for `nodes` nodes of `protocol`.
    pub fn new(protocol: impl Into<String>, nodes: usize) -> Self {
        Self {
            protocol: protocol.into(),
            nodes,
            ..Default::default()
        }
    }

    /// Set the server ids.
    pub fn servers(mut self, servers: Vec<u64>) -> Self {
        self.servers = Some(servers);
        self
    }

    /// Set the container images.
    pub fn images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }

    /// Set a protocol parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Fill in a memorable id (e.g. `nb-happy-turtle`) if none was given.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            let name = names::Generator::default()
                .next()
                .unwrap_or_else(|| "unnamed-deployment".to_string());
            self.id = format!("nb-{}", name);
        }
        &self.id
    }

    /// Look up a file attachment, searching the first node's attachments.
    pub fn attachment(&self, name: &str) -> Option<&str> {
        self.files
            .first()
            .and_then(|files| files.get(name))
            .map(String::as_str)
    }

    /// Load a request from a TOML or JSON file (chosen by extension).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read request from {}", path.display()))?;

        let request = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).context("Failed to parse request file as JSON")?
        } else {
            toml::from_str(&content).context("Failed to parse request file as TOML")?
        };

        tracing::debug!(path = %path.display(), "Deployment request loaded");
        Ok(request)
    }

    /// Save the request as pretty JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize request to JSON")?;
        std::fs::write(path, content)
            .context(format!("Failed to write request to {}", path.display()))?;
        Ok(())
    }
}
