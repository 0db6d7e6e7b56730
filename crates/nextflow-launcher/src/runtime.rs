// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for nextflow-launcher.
//!
//! [`LauncherRuntime`] wires the orchestrator to its collaborators and runs
//! the HTTP server, stale-run reconciler and staging sweeper as tasks on
//! the caller's tokio runtime.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nextflow_launcher::runtime::LauncherRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = nextflow_launcher::store::connect("sqlite:launcher.db").await?;
//!
//!     let runtime = LauncherRuntime::builder()
//!         .store(store)
//!         .backend(backend)
//!         .storage(storage)
//!         .analysis(analysis)
//!         .bind_addr("0.0.0.0:8000".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backend::{JobBackend, JobTemplateConfig};
use crate::cleanup_worker::{CleanupWorker, CleanupWorkerConfig};
use crate::clients::{AnalysisClient, StorageClient};
use crate::config::Config;
use crate::handoff::DataHandoff;
use crate::notify::{NotificationSender, RetryPolicy};
use crate::orchestrator::Orchestrator;
use crate::reconciler::{ReconcilerConfig, StaleRunReconciler};
use crate::server::run_server_with_shutdown;
use crate::store::RunStore;

/// Builder for creating a [`LauncherRuntime`].
pub struct LauncherRuntimeBuilder {
    store: Option<Arc<dyn RunStore>>,
    backend: Option<Arc<dyn JobBackend>>,
    storage: Option<Arc<dyn StorageClient>>,
    analysis: Option<Arc<dyn AnalysisClient>>,
    bind_addr: SocketAddr,
    staging_dir: PathBuf,
    results_dir: PathBuf,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    job_template: JobTemplateConfig,
    reconcile_poll_interval: Duration,
    stale_concluding_after: Duration,
    cleanup_poll_interval: Duration,
    staging_max_age: Duration,
}

impl Default for LauncherRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            backend: None,
            storage: None,
            analysis: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            staging_dir: PathBuf::from(".data/staging"),
            results_dir: PathBuf::from(".data/results"),
            request_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            job_template: JobTemplateConfig::default(),
            reconcile_poll_interval: Duration::from_secs(60),
            stale_concluding_after: Duration::from_secs(900), // 15 minutes
            cleanup_poll_interval: Duration::from_secs(3600), // 1 hour
            staging_max_age: Duration::from_secs(24 * 3600),  // 24 hours
        }
    }
}

impl LauncherRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every setting carried by a loaded [`Config`].
    ///
    /// Collaborators (store, backend, clients) still have to be set.
    pub fn config(self, config: &Config) -> Self {
        self.bind_addr(config.http_addr)
            .staging_dir(&config.staging_dir)
            .results_dir(&config.results_dir)
            .request_timeout(config.request_timeout)
            .retry_policy(config.retry_policy.clone())
            .job_template(config.job_template.clone())
            .stale_concluding_after(config.stale_concluding_after)
            .staging_max_age(config.staging_max_age)
    }

    /// Set the run record store (required).
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the job backend (required).
    pub fn backend(mut self, backend: Arc<dyn JobBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the storage client (required).
    pub fn storage(mut self, storage: Arc<dyn StorageClient>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the analysis client used for completion notifications (required).
    pub fn analysis(mut self, analysis: Arc<dyn AnalysisClient>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// Set the bind address for the HTTP server.
    ///
    /// Default: `0.0.0.0:8000`. Port `0` picks a free port, see
    /// [`LauncherRuntime::local_addr`].
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the root of per-run staging directories.
    ///
    /// Default: `.data/staging`
    pub fn staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_dir = path.into();
        self
    }

    /// Set the root that result locations must resolve inside.
    ///
    /// Default: `.data/results`
    pub fn results_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_dir = path.into();
        self
    }

    /// Set the upper bound for every collaborator call.
    ///
    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the notification retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the fixed part of every job description.
    pub fn job_template(mut self, template: JobTemplateConfig) -> Self {
        self.job_template = template;
        self
    }

    /// Set the reconciler poll interval.
    ///
    /// Default: 60 seconds
    pub fn reconcile_poll_interval(mut self, interval: Duration) -> Self {
        self.reconcile_poll_interval = interval;
        self
    }

    /// Set how long a run may sit in `concluding` before it is failed.
    ///
    /// Default: 15 minutes
    pub fn stale_concluding_after(mut self, age: Duration) -> Self {
        self.stale_concluding_after = age;
        self
    }

    /// Set the staging sweeper poll interval.
    ///
    /// Default: 1 hour
    pub fn cleanup_poll_interval(mut self, interval: Duration) -> Self {
        self.cleanup_poll_interval = interval;
        self
    }

    /// Set the age after which orphaned staging directories are removed.
    ///
    /// Default: 24 hours
    pub fn staging_max_age(mut self, max_age: Duration) -> Self {
        self.staging_max_age = max_age;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<LauncherRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let backend = self
            .backend
            .ok_or_else(|| anyhow::anyhow!("backend is required"))?;
        let storage = self
            .storage
            .ok_or_else(|| anyhow::anyhow!("storage is required"))?;
        let analysis = self
            .analysis
            .ok_or_else(|| anyhow::anyhow!("analysis is required"))?;

        Ok(LauncherRuntimeConfig {
            store,
            backend,
            storage,
            analysis,
            bind_addr: self.bind_addr,
            staging_dir: self.staging_dir,
            results_dir: self.results_dir,
            request_timeout: self.request_timeout,
            retry_policy: self.retry_policy,
            job_template: self.job_template,
            reconcile_poll_interval: self.reconcile_poll_interval,
            stale_concluding_after: self.stale_concluding_after,
            cleanup_poll_interval: self.cleanup_poll_interval,
            staging_max_age: self.staging_max_age,
        })
    }
}

/// Configuration for a [`LauncherRuntime`].
pub struct LauncherRuntimeConfig {
    store: Arc<dyn RunStore>,
    backend: Arc<dyn JobBackend>,
    storage: Arc<dyn StorageClient>,
    analysis: Arc<dyn AnalysisClient>,
    bind_addr: SocketAddr,
    staging_dir: PathBuf,
    results_dir: PathBuf,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    job_template: JobTemplateConfig,
    reconcile_poll_interval: Duration,
    stale_concluding_after: Duration,
    cleanup_poll_interval: Duration,
    staging_max_age: Duration,
}

impl LauncherRuntimeConfig {
    /// Start the runtime, spawning the HTTP server and background workers.
    pub async fn start(self) -> Result<LauncherRuntime> {
        let handoff = DataHandoff::new(
            self.storage,
            self.staging_dir.clone(),
            self.results_dir,
            self.request_timeout,
        );
        let notifier =
            NotificationSender::new(self.analysis, self.retry_policy, self.request_timeout);
        let orchestrator = Arc::new(Orchestrator::new(
            self.store.clone(),
            self.backend,
            handoff,
            notifier,
            self.job_template,
            self.request_timeout,
        ));

        // Create stale-run reconciler
        let reconciler = StaleRunReconciler::new(
            orchestrator.clone(),
            ReconcilerConfig {
                poll_interval: self.reconcile_poll_interval,
                stale_after: self.stale_concluding_after,
            },
        );
        let reconciler_shutdown = reconciler.shutdown_handle();
        let reconciler_handle = tokio::spawn(async move {
            reconciler.run().await;
        });

        // Create staging sweeper
        let cleanup_worker = CleanupWorker::new(
            self.store,
            CleanupWorkerConfig {
                staging_dir: self.staging_dir,
                poll_interval: self.cleanup_poll_interval,
                max_age: self.staging_max_age,
            },
        );
        let cleanup_shutdown = cleanup_worker.shutdown_handle();
        let cleanup_handle = tokio::spawn(async move {
            cleanup_worker.run().await;
        });

        // Bind before spawning so the caller learns the real port
        let listener = match TcpListener::bind(self.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                reconciler_shutdown.notify_one();
                cleanup_shutdown.notify_one();
                return Err(anyhow::anyhow!("failed to bind {}: {}", self.bind_addr, e));
            }
        };
        let local_addr = listener.local_addr()?;

        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(run_server_with_shutdown(
            listener,
            orchestrator.clone(),
            server_shutdown_rx,
        ));

        info!(
            bind_addr = %local_addr,
            store = orchestrator.store().store_type(),
            "LauncherRuntime started"
        );

        Ok(LauncherRuntime {
            server_handle,
            reconciler_handle,
            cleanup_handle,
            server_shutdown_tx,
            reconciler_shutdown,
            cleanup_shutdown,
            orchestrator,
            local_addr,
        })
    }
}

/// A running launcher that can be embedded in an application.
///
/// The runtime manages:
/// - HTTP server for the `/nextflow` routes
/// - Stale-run reconciler for runs abandoned in `concluding`
/// - Cleanup worker for orphaned staging directories
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct LauncherRuntime {
    server_handle: JoinHandle<std::io::Result<()>>,
    reconciler_handle: JoinHandle<()>,
    cleanup_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    reconciler_shutdown: Arc<Notify>,
    cleanup_shutdown: Arc<Notify>,
    orchestrator: Arc<Orchestrator>,
    local_addr: SocketAddr,
}

impl LauncherRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> LauncherRuntimeBuilder {
        LauncherRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the shared orchestrator.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting requests, lets in-flight ones finish, then waits for
    /// the background workers.
    pub async fn shutdown(self) -> Result<()> {
        info!("LauncherRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.reconciler_shutdown.notify_one();
        self.cleanup_shutdown.notify_one();

        if let Err(e) = self.reconciler_handle.await {
            error!("Reconciler task panicked: {}", e);
        }

        if let Err(e) = self.cleanup_handle.await {
            error!("Cleanup worker task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("LauncherRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("LauncherRuntime server error during shutdown: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("LauncherRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
            && !self.reconciler_handle.is_finished()
            && !self.cleanup_handle.is_finished()
    }
}
