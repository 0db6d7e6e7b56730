// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Data handoff between object storage and the run's local files.
//!
//! Inputs are fetched into `{staging_dir}/{run_id}/input` before submission;
//! results are read from inside `results_dir` and pushed after the workload
//! concludes.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clients::{StorageClient, StorageError};
use crate::run::Credential;

/// Name of the staged input file inside a run's staging directory.
pub const INPUT_FILE_NAME: &str = "input";

/// Input could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Storage call failed.
    #[error("Fetch failed: {0}")]
    Storage(#[from] StorageError),
    /// Storage call exceeded the request timeout.
    #[error("Fetch timed out")]
    Timeout,
}

/// Result could not be pushed.
#[derive(Debug, Error)]
pub enum PushError {
    /// The local result artifact is missing, unreadable or outside the results root.
    #[error("Result artifact unreadable: {0}")]
    Unreadable(String),
    /// Storage call failed.
    #[error("Push failed: {0}")]
    Storage(#[from] StorageError),
    /// Storage call exceeded the request timeout.
    #[error("Push timed out")]
    Timeout,
}

/// Generate the storage name for a pushed result: `result_{4 hex}_{yymmddHHMMSS}`.
pub fn artifact_name() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("result_{}_{}", &suffix[..4], Utc::now().format("%y%m%d%H%M%S"))
}

/// Moves run data in and out of object storage.
#[derive(Clone)]
pub struct DataHandoff {
    storage: Arc<dyn StorageClient>,
    staging_dir: PathBuf,
    results_dir: PathBuf,
    request_timeout: Duration,
}

impl DataHandoff {
    /// Create a handoff over `storage` with the given local roots.
    pub fn new(
        storage: Arc<dyn StorageClient>,
        staging_dir: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            staging_dir: staging_dir.into(),
            results_dir: results_dir.into(),
            request_timeout,
        }
    }

    /// Root of all staging directories.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Staging directory of a run.
    pub fn staging_path(&self, run_id: &str) -> PathBuf {
        self.staging_dir.join(run_id)
    }

    /// Download input data.
    pub async fn fetch(
        &self,
        input_location: &str,
        credential: &Credential,
    ) -> Result<Vec<u8>, FetchError> {
        tokio::time::timeout(
            self.request_timeout,
            self.storage.get(input_location, credential),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::from)
    }

    /// Upload result bytes, returning the storage reference.
    pub async fn push(&self, bytes: Vec<u8>, credential: &Credential) -> Result<String, PushError> {
        let name = artifact_name();
        tokio::time::timeout(
            self.request_timeout,
            self.storage.put(&name, bytes, credential),
        )
        .await
        .map_err(|_| PushError::Timeout)?
        .map_err(PushError::from)
    }

    /// Write fetched input to the run's staging directory.
    pub async fn stage_input(&self, run_id: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let dir = self.staging_path(run_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(INPUT_FILE_NAME);
        tokio::fs::write(&path, bytes).await?;
        debug!(run_id = %run_id, path = ?path, bytes = bytes.len(), "Input staged");
        Ok(path)
    }

    /// Resolve a reported result location inside the results root.
    ///
    /// Relative locations are joined onto the root; absolute ones must
    /// already lie inside it. The location must name an entry below the root:
    /// `.`, `..` and the root itself are refused.
    pub fn resolve_result_path(&self, location: &str) -> Option<PathBuf> {
        let path = Path::new(location);
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.results_dir).ok()?
        } else {
            path
        };

        let mut named = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => named = true,
                _ => return None,
            }
        }
        named.then(|| self.results_dir.join(relative))
    }

    /// Read the result artifact at `location`.
    ///
    /// A file is returned as-is. A directory (what a pipeline's `--outdir`
    /// produces) is returned as an uncompressed tar archive rooted at the
    /// directory's name; symlinks inside it are archived as links, never
    /// followed. A symlink at `location` itself is refused.
    pub async fn read_result(&self, location: &str) -> Result<Vec<u8>, PushError> {
        let path = self
            .resolve_result_path(location)
            .ok_or_else(|| PushError::Unreadable(format!("{} is outside the results root", location)))?;

        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| unreadable(&path, e))?;
        if meta.file_type().is_symlink() {
            return Err(PushError::Unreadable(format!("{:?} is a symlink", path)));
        }
        if !meta.is_dir() {
            return tokio::fs::read(&path).await.map_err(|e| unreadable(&path, e));
        }

        let dir = path.clone();
        let archived = tokio::task::spawn_blocking(move || archive_dir(&dir))
            .await
            .map_err(|e| PushError::Unreadable(format!("{:?}: archiving aborted: {}", path, e)))?
            .map_err(|e| unreadable(&path, e))?;
        debug!(path = ?path, bytes = archived.len(), "Result directory archived");
        Ok(archived)
    }

    /// Remove the result artifact at `location`. Missing artifacts are fine.
    pub async fn discard_result(&self, location: &str) {
        let Some(path) = self.resolve_result_path(location) else {
            return;
        };
        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        log_removal(&path, result);
    }

    /// Remove the run's staging directory. Missing directories are fine.
    pub async fn discard_staging(&self, run_id: &str) {
        let path = self.staging_path(run_id);
        let result = tokio::fs::remove_dir_all(&path).await;
        log_removal(&path, result);
    }
}

fn unreadable(path: &Path, e: std::io::Error) -> PushError {
    PushError::Unreadable(format!("{:?}: {}", path, e))
}

fn archive_dir(dir: &Path) -> std::io::Result<Vec<u8>> {
    let name = dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("result"));
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(&name, dir)?;
    builder.into_inner()
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(path = ?path, "Removed local artifact"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove local artifact"),
    }
}
