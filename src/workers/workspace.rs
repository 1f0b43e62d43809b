//! Temporary workspace for one file decomposition run.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::workspace::{SLIDES_DIR, USERS_DIR};
use crate::error::{PipelineError, PipelineResult};

/// Allocates per-file working directories under a root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/users/{userId}/{fileId}/slides`
    pub fn primary_path(&self, user_id: &str, file_id: Uuid) -> PathBuf {
        self.root
            .join(USERS_DIR)
            .join(user_id)
            .join(file_id.to_string())
            .join(SLIDES_DIR)
    }

    /// `{root}/user_{userId}_{fileId}_slides`
    pub fn fallback_path(&self, user_id: &str, file_id: Uuid) -> PathBuf {
        self.root
            .join(format!("user_{user_id}_{file_id}_{SLIDES_DIR}"))
    }

    /// Create the working directory for `(user_id, file_id)`.
    ///
    /// Tries the nested layout first and falls back to the flat one; failing
    /// both is a file-level `Workspace` error.
    pub async fn create(&self, user_id: &str, file_id: Uuid) -> PipelineResult<PathBuf> {
        let primary = self.primary_path(user_id, file_id);
        let primary_err = match tokio::fs::create_dir_all(&primary).await {
            Ok(()) => {
                debug!(path = %primary.display(), "Workspace created");
                return Ok(primary);
            }
            Err(e) => e,
        };

        let fallback = self.fallback_path(user_id, file_id);
        warn!(
            path = %primary.display(),
            fallback = %fallback.display(),
            error = %primary_err,
            "Primary workspace unavailable, using fallback"
        );
        match tokio::fs::create_dir_all(&fallback).await {
            Ok(()) => Ok(fallback),
            Err(e) => Err(PipelineError::workspace(
                fallback.display().to_string(),
                format!("primary failed ({primary_err}), fallback failed ({e})"),
            )),
        }
    }
}
