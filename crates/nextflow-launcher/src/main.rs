// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Nextflow Launcher - Run Lifecycle Server
//!
//! An HTTP server responsible for:
//! - Staging pipeline input and submitting Nextflow jobs
//! - Concluding runs (result push, analysis notification, job teardown)
//! - Stopping the runs of an analysis on request

use std::sync::Arc;
use tracing::{info, warn};

use nextflow_launcher::backend::{JobBackend, KubernetesBackend};
use nextflow_launcher::clients::{HttpAnalysisClient, HttpStorageClient};
use nextflow_launcher::config::Config;
use nextflow_launcher::runtime::LauncherRuntime;
use nextflow_launcher::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nextflow_launcher=info,tower_http=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        namespace = %config.job_template.namespace,
        staging_dir = %config.staging_dir.display(),
        "Starting Nextflow Launcher"
    );

    let store = store::connect(&config.database_url).await?;
    info!(store_type = store.store_type(), "Run store ready");

    let backend = Arc::new(KubernetesBackend::in_cluster(
        &config.kubernetes_api_url,
        &config.job_template.namespace,
        config.request_timeout,
    )?);
    info!(backend_type = backend.backend_type(), "Job backend initialized");

    let storage = Arc::new(HttpStorageClient::new(
        &config.storage_url,
        config.request_timeout,
    )?);
    let analysis = Arc::new(HttpAnalysisClient::new(
        &config.analysis_url_template,
        config.request_timeout,
    )?);

    let runtime = LauncherRuntime::builder()
        .config(&config)
        .store(store)
        .backend(backend)
        .storage(storage)
        .analysis(analysis)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Launcher server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Nextflow Launcher shut down");

    Ok(())
}
