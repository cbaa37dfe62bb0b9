//! Persisted build records.
//!
//! When an artifacts directory is configured, every build leaves a
//! `build-record.json` next to its artifacts, whether it succeeded or not.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BuildState, DeploymentRequest};

/// File name of the record inside a deployment's artifacts directory.
pub const BUILD_RECORD_FILE: &str = "build-record.json";

/// SHA-256 of the request, hex encoded.
///
/// The request is serialized to JSON first. Parameter maps are sorted, so the
/// same request always yields the same fingerprint.
pub fn fingerprint(request: &DeploymentRequest) -> Result<String> {
    let json = serde_json::to_string(request).context("Failed to serialize request")?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Audit trail of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub deployment_id: String,
    pub protocol: String,
    /// Fingerprint of the request that was built.
    pub request_hash: String,
    /// Last stage label reached.
    pub stage: String,
    pub progress: usize,
    pub total_steps: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Rendered error chain if the build failed.
    pub error: Option<String>,
    /// netbake version that ran the build.
    pub netbake_version: String,
}

impl BuildRecord {
    /// Snapshot `state` at the end of a build of `request`.
    pub fn finish(
        request: &DeploymentRequest,
        state: &BuildState,
        error: Option<&anyhow::Error>,
    ) -> Result<Self> {
        Ok(Self {
            deployment_id: state.deployment_id().to_string(),
            protocol: request.protocol.clone(),
            request_hash: fingerprint(request)?,
            stage: state.stage(),
            progress: state.progress(),
            total_steps: state.total_steps(),
            started_at: state.started_at(),
            finished_at: Utc::now(),
            error: error.map(|e| format!("{e:#}")),
            netbake_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Whether the build completed without error.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Save the record as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize build record")?;

        std::fs::write(path, json).context(format!(
            "Failed to write build record to {}",
            path.display()
        ))?;

        Ok(())
    }

    /// Load a record from a file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Build record file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path).context(format!(
            "Failed to read build record from {}",
            path.display()
        ))?;

        serde_json::from_str(&content).context("Failed to parse build record JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn request() -> DeploymentRequest {
        DeploymentRequest::new("geth", 5)
            .servers(vec![1, 2, 3])
            .images(vec!["ethereum/client-go:v1.8.27".to_string()])
            .param("networkId", 15468)
            .param("difficulty", 100)
    }

    #[test]
    fn test_fingerprint_determinism() {
        let hash1 = fingerprint(&request()).unwrap();
        let hash2 = fingerprint(&request()).unwrap();

        assert_eq!(hash1, hash2, "Fingerprint should be deterministic");
        assert_eq!(hash1.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_fingerprint_ignores_param_insertion_order() {
        let reordered = DeploymentRequest::new("geth", 5)
            .servers(vec![1, 2, 3])
            .images(vec!["ethereum/client-go:v1.8.27".to_string()])
            .param("difficulty", 100)
            .param("networkId", 15468);

        assert_eq!(
            fingerprint(&request()).unwrap(),
            fingerprint(&reordered).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_changes_with_node_count() {
        let mut other = request();
        other.nodes = 6;

        assert_ne!(
            fingerprint(&request()).unwrap(),
            fingerprint(&other).unwrap(),
            "Fingerprint should change when the node count changes"
        );
    }

    #[test]
    fn test_record_save_and_load() {
        let temp_dir = TempDir::new("netbake-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join(BUILD_RECORD_FILE);

        let state = BuildState::new("nb-test");
        state.set_total_steps(3);
        state.increment_progress();
        state.set_stage("Starting geth");

        let error = anyhow::anyhow!("exit status 1").context("geth init failed on node 2");
        let record = BuildRecord::finish(&request(), &state, Some(&error)).unwrap();

        assert!(!record.succeeded());
        assert_eq!(record.stage, "Starting geth");
        assert_eq!(
            record.error.as_deref(),
            Some("geth init failed on node 2: exit status 1")
        );

        record.save_to_file(&path).expect("Failed to save record");
        let loaded = BuildRecord::load_from_file(&path).expect("Failed to load record");
        assert_eq!(record, loaded);
    }

    #[test]
    fn test_record_load_missing_file() {
        let temp_dir = TempDir::new("netbake-test").expect("Failed to create temp dir");
        let result = BuildRecord::load_from_file(&temp_dir.path().join("nonexistent.json"));
        assert!(result.is_err(), "Loading missing file should return error");
    }
}
