// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for failing runs stuck in `concluding`.
//!
//! A launcher that crashes between claiming a conclusion and writing the
//! terminal state leaves the run in `concluding` forever, since every later
//! conclude is rejected. The reconciler periodically fails such runs once
//! they have been untouched for longer than the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::orchestrator::Orchestrator;

/// Configuration for the stale-run reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to check for stale runs.
    pub poll_interval: Duration,
    /// Time in `concluding` after which a run is considered stale.
    ///
    /// Must comfortably exceed the worst-case conclusion time, which is
    /// dominated by the notification retry schedule.
    pub stale_after: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(900), // 15 minutes
        }
    }
}

/// Background worker that fails runs abandoned mid-conclusion.
pub struct StaleRunReconciler {
    orchestrator: Arc<Orchestrator>,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl StaleRunReconciler {
    /// Create a new reconciler.
    pub fn new(orchestrator: Arc<Orchestrator>, config: ReconcilerConfig) -> Self {
        Self {
            orchestrator,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reconciler loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "Stale run reconciler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Stale run reconciler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.tick().await;
                }
            }
        }

        info!("Stale run reconciler stopped");
    }

    async fn tick(&self) {
        match self.orchestrator.reconcile_stale(self.config.stale_after).await {
            Ok(0) => debug!("No stale runs found"),
            Ok(failed) => info!(failed, "Failed stale concluding runs"),
            Err(e) => error!(error = %e, "Failed to reconcile stale runs"),
        }
    }
}
