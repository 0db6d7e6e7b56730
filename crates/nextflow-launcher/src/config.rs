// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for nextflow-launcher.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::job::JobTemplateConfig;
use crate::notify::RetryPolicy;

/// Where Kubernetes mounts the pod's namespace.
const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Launcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Run record store URL (`postgres://...` or `sqlite:...`)
    pub database_url: String,
    /// HTTP server address
    pub http_addr: SocketAddr,
    /// Root of per-run staging directories
    pub staging_dir: PathBuf,
    /// Root that reported result locations must resolve inside
    pub results_dir: PathBuf,
    /// Upper bound for every collaborator call
    pub request_timeout: Duration,
    /// Storage service base URL
    pub storage_url: String,
    /// Analysis service base URL, `{analysis_id}` is substituted
    pub analysis_url_template: String,
    /// Notification retry policy
    pub retry_policy: RetryPolicy,
    /// Kubernetes API server URL
    pub kubernetes_api_url: String,
    /// Fixed part of every job description
    pub job_template: JobTemplateConfig,
    /// Age after which a run stuck in `concluding` is failed by the reconciler
    pub stale_concluding_after: Duration,
    /// Age after which orphaned staging directories are swept
    pub staging_max_age: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let namespace_file = std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_FILE)
            .ok()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        Self::from_lookup(
            |key| std::env::var(key).ok(),
            namespace_file.as_deref(),
        )
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// `default_namespace` is used when `NF_NAMESPACE` is unset; `default`
    /// applies when both are missing.
    pub fn from_lookup<F>(lookup: F, default_namespace: Option<&str>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = lookup("LAUNCHER_DATABASE_URL")
            .ok_or(ConfigError::MissingEnvVar("LAUNCHER_DATABASE_URL"))?;

        let port: u16 = var("LAUNCHER_HTTP_PORT", "8000")
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let request_timeout =
            Duration::from_secs(parse_number(&lookup, "LAUNCHER_REQUEST_TIMEOUT_SECS", 30)?);

        let max_attempts = parse_number(&lookup, "LAUNCHER_NOTIFY_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidNumber("LAUNCHER_NOTIFY_MAX_ATTEMPTS"));
        }
        let retry_policy = RetryPolicy {
            max_attempts: u32::try_from(max_attempts)
                .map_err(|_| ConfigError::InvalidNumber("LAUNCHER_NOTIFY_MAX_ATTEMPTS"))?,
            base_delay: Duration::from_millis(parse_number(
                &lookup,
                "LAUNCHER_NOTIFY_BASE_DELAY_MS",
                1000,
            )?),
        };

        let conclude_url = var(
            "LAUNCHER_CONCLUDE_URL",
            "http://nextflow-launcher:8000/nextflow/conclude",
        );
        let namespace = lookup("NF_NAMESPACE")
            .or_else(|| default_namespace.map(str::to_string))
            .unwrap_or_else(|| "default".to_string());

        let job_template = JobTemplateConfig {
            namespace,
            image: var("NF_IMAGE", "nextflow/nextflow:24.10.0"),
            image_pull_policy: var("NF_IMAGE_PULL_POLICY", "IfNotPresent"),
            service_account: var("NF_SERVICE_ACCOUNT", "nextflow-sa"),
            work_pvc: var("NF_PVC", "nextflow-work"),
            config_map: var("NF_CONFIGMAP", "nextflow-config"),
            config_map_key: var("NF_CONFIGMAP_KEY", "nextflow.config"),
            work_mount: var("NF_WORK_MOUNT", "/workspace"),
            conf_mount: var("NF_CONF_MOUNT", "/conf"),
            backoff_limit: i32::try_from(parse_number(&lookup, "NF_BACKOFF_LIMIT", 0)?)
                .map_err(|_| ConfigError::InvalidNumber("NF_BACKOFF_LIMIT"))?,
            conclude_url,
            conclude_retry: retry_policy.clone(),
        };

        Ok(Self {
            database_url,
            http_addr,
            staging_dir: PathBuf::from(var("LAUNCHER_STAGING_DIR", ".data/staging")),
            results_dir: PathBuf::from(var("LAUNCHER_RESULTS_DIR", ".data/results")),
            request_timeout,
            storage_url: var(
                "LAUNCHER_STORAGE_URL",
                "http://flame-result-service:8080/storage",
            ),
            analysis_url_template: var(
                "LAUNCHER_ANALYSIS_URL_TEMPLATE",
                "http://nginx-{analysis_id}:80/analysis",
            ),
            retry_policy,
            kubernetes_api_url: var("KUBERNETES_API_URL", "https://kubernetes.default.svc"),
            job_template,
            stale_concluding_after: Duration::from_secs(parse_number(
                &lookup,
                "LAUNCHER_STALE_CONCLUDING_SECS",
                900,
            )?),
            staging_max_age: Duration::from_secs(parse_number(
                &lookup,
                "LAUNCHER_STAGING_MAX_AGE_SECS",
                86400,
            )?),
        })
    }
}

fn parse_number<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(key)),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A numeric variable could not be parsed or is out of range.
    #[error("Invalid numeric value for {0}")]
    InvalidNumber(&'static str),
}
