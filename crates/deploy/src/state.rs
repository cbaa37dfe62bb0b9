//! Build progress tracking and the per-deployment artifact store.
//!
//! A [`BuildState`] is shared by reference between every task of one build.
//! All operations take `&self`.

use std::{
    collections::BTreeMap,
    fmt,
    path::PathBuf,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fs::FsHandler;

/// Stage label of a build that has not started a phase yet.
pub const INITIAL_STAGE: &str = "Initializing";

/// Progress, stage and artifacts of one in-flight build.
#[derive(Debug)]
pub struct BuildState {
    deployment_id: String,
    total_steps: AtomicUsize,
    progress: AtomicUsize,
    stage: Mutex<String>,
    artifacts: Mutex<BTreeMap<String, String>>,
    artifacts_dir: Option<PathBuf>,
    started_at: DateTime<Utc>,
}

impl BuildState {
    /// Create the state of a fresh build, kept in memory only.
    pub fn new(deployment_id: impl Into<String>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            total_steps: AtomicUsize::new(0),
            progress: AtomicUsize::new(0),
            stage: Mutex::new(INITIAL_STAGE.to_string()),
            artifacts: Mutex::new(BTreeMap::new()),
            artifacts_dir: None,
            started_at: Utc::now(),
        }
    }

    /// Also mirror every artifact to `dir` as it is written.
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn artifacts_dir(&self) -> Option<&PathBuf> {
        self.artifacts_dir.as_ref()
    }

    /// Declare the step budget of the whole build.
    pub fn set_total_steps(&self, steps: usize) {
        self.total_steps.store(steps, Ordering::SeqCst);
        tracing::debug!(deployment = %self.deployment_id, steps, "Build steps declared");
    }

    /// Advance the progress counter by one, never past the declared total.
    ///
    /// Returns `false` if the counter was already saturated.
    pub fn increment_progress(&self) -> bool {
        let total = self.total_steps.load(Ordering::SeqCst);
        let advanced = self
            .progress
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < total).then_some(current + 1)
            });

        match advanced {
            Ok(previous) => {
                tracing::trace!(
                    deployment = %self.deployment_id,
                    progress = previous + 1,
                    total,
                    "Build progress"
                );
                true
            }
            Err(current) => {
                tracing::warn!(
                    deployment = %self.deployment_id,
                    progress = current,
                    total,
                    "Progress increment past the declared total ignored"
                );
                false
            }
        }
    }

    /// Record the current human-readable phase. Last writer wins.
    pub fn set_stage(&self, stage: impl Into<String>) {
        let stage = stage.into();
        tracing::info!(deployment = %self.deployment_id, stage = %stage, "Build stage");
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner) = stage;
    }

    pub fn stage(&self) -> String {
        self.stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn progress(&self) -> usize {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps.load(Ordering::SeqCst)
    }

    /// Store a named artifact, replacing any previous content under that name.
    pub fn write(&self, name: &str, content: impl Into<String>) -> Result<()> {
        let content = content.into();

        if let Some(dir) = &self.artifacts_dir {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                FsHandler::create_dir(parent)?;
            }
            std::fs::write(&path, &content)
                .context(format!("Failed to write artifact {}", path.display()))?;
        }

        tracing::debug!(
            deployment = %self.deployment_id,
            artifact = name,
            bytes = content.len(),
            "Artifact written"
        );

        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), content);
        Ok(())
    }

    /// Content of the artifact `name`, if written.
    pub fn read(&self, name: &str) -> Option<String> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all artifacts written so far.
    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Point-in-time view for operator status.
    pub fn status(&self) -> BuildStatus {
        BuildStatus {
            deployment_id: self.deployment_id.clone(),
            stage: self.stage(),
            progress: self.progress(),
            total_steps: self.total_steps(),
        }
    }
}

/// Snapshot of a build's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub deployment_id: String,
    pub stage: String,
    pub progress: usize,
    pub total_steps: usize,
}

impl BuildStatus {
    /// Completion percentage, 0 when no budget was declared.
    pub fn percent(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.progress as f64 * 100.0 / self.total_steps as f64
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}/{}, {:.0}%)",
            self.deployment_id,
            self.stage,
            self.progress,
            self.total_steps,
            self.percent()
        )
    }
}
