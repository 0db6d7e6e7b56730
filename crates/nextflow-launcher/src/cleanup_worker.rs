// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for sweeping orphaned staging directories.
//!
//! Staging directories (`{staging_dir}/{run_id}/`) are normally removed when a
//! run concludes, fails or is stopped. A crash between those steps leaves
//! them behind, so this worker periodically removes directories older than
//! the configured age whose run is terminal or no longer known to the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::store::RunStore;

/// Configuration for the cleanup worker.
#[derive(Debug, Clone)]
pub struct CleanupWorkerConfig {
    /// Root of per-run staging directories.
    pub staging_dir: PathBuf,
    /// How often to scan.
    pub poll_interval: Duration,
    /// Minimum age before a directory is considered.
    pub max_age: Duration,
}

impl Default for CleanupWorkerConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(".data/staging"),
            poll_interval: Duration::from_secs(3600), // 1 hour
            max_age: Duration::from_secs(24 * 3600),  // 24 hours
        }
    }
}

/// Background worker that removes orphaned staging directories.
pub struct CleanupWorker {
    store: Arc<dyn RunStore>,
    config: CleanupWorkerConfig,
    shutdown: Arc<Notify>,
}

impl CleanupWorker {
    /// Create a new cleanup worker.
    pub fn new(store: Arc<dyn RunStore>, config: CleanupWorkerConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the cleanup loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            staging_dir = %self.config.staging_dir.display(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_secs = self.config.max_age.as_secs(),
            "Cleanup worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Cleanup worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Failed to sweep staging directories");
                    }
                }
            }
        }

        info!("Cleanup worker stopped");
    }

    /// Scan the staging root once. Returns how many directories were removed.
    pub async fn sweep(&self) -> std::io::Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.max_age)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let mut cleaned = 0u64;
        let mut errors = 0u64;

        let mut entries = match tokio::fs::read_dir(&self.config.staging_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Staging directory does not exist, nothing to clean");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            match modified_at(&path).await {
                Some(modified) if modified <= cutoff => {}
                Some(_) => continue,
                None => {
                    errors += 1;
                    continue;
                }
            }

            let run_id = entry.file_name().to_string_lossy().into_owned();
            match self.store.get(&run_id).await {
                Ok(Some(run)) if !run.state.is_terminal() => {
                    debug!(run_id = %run_id, state = %run.state, "Keeping staging directory of active run");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Failed to look up run, keeping directory");
                    errors += 1;
                    continue;
                }
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed orphaned staging directory");
                    cleaned += 1;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove staging directory"
                    );
                    errors += 1;
                }
            }
        }

        if cleaned > 0 || errors > 0 {
            info!(cleaned, errors, "Cleanup cycle completed");
        } else {
            debug!("Cleanup cycle completed, nothing to remove");
        }

        Ok(cleaned)
    }
}

async fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| debug!(path = %path.display(), error = %e, "Failed to read metadata"))
        .ok()?;
    metadata.modified().ok().map(DateTime::<Utc>::from)
}
