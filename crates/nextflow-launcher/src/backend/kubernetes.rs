// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes job backend.
//!
//! Creates and deletes `batch/v1` Jobs through the API server's REST
//! interface. Inside a cluster the service-account token and CA bundle are
//! picked up from the standard mount.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::{BackendError, CancelOutcome, JobBackend, JobDescription};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// How the bearer token for API calls is obtained.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// No authentication header.
    None,
    /// Fixed token.
    Static(String),
    /// Token re-read from a file on every call (projected tokens rotate).
    File(PathBuf),
}

/// Kubernetes [`JobBackend`] bound to one namespace.
pub struct KubernetesBackend {
    client: reqwest::Client,
    api_url: String,
    namespace: String,
    token: TokenSource,
}

impl KubernetesBackend {
    /// Create a backend for `api_url` managing jobs in `namespace`.
    pub fn new(
        api_url: impl Into<String>,
        namespace: impl Into<String>,
        token: TokenSource,
        ca_pem: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(pem) = ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            token,
        })
    }

    /// Create a backend using the pod's service-account credentials.
    ///
    /// Falls back to unauthenticated calls when the service-account mount is
    /// absent (e.g. `kubectl proxy` during development).
    pub fn in_cluster(
        api_url: impl Into<String>,
        namespace: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token_path = dir.join("token");
        let ca = std::fs::read(dir.join("ca.crt")).ok();

        let token = if token_path.exists() {
            TokenSource::File(token_path)
        } else {
            warn!("Service-account token not found, Kubernetes API calls are unauthenticated");
            TokenSource::None
        };

        Self::new(api_url, namespace, token, ca.as_deref(), timeout)
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.api_url, self.namespace
        )
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, BackendError> {
        match &self.token {
            TokenSource::None => Ok(request),
            TokenSource::Static(token) => Ok(request.bearer_auth(token)),
            TokenSource::File(path) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    BackendError::Transport(format!("failed to read token {:?}: {}", path, e))
                })?;
                Ok(request.bearer_auth(token.trim()))
            }
        }
    }
}

#[async_trait]
impl JobBackend for KubernetesBackend {
    fn backend_type(&self) -> &'static str {
        "kubernetes"
    }

    async fn submit(&self, description: &JobDescription) -> Result<(), BackendError> {
        let request = self.client.post(self.jobs_url()).json(&description.manifest);
        let response = self.authorize(request).await?.send().await?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                info!(
                    run_id = %description.run_id,
                    namespace = %self.namespace,
                    "Job created"
                );
                Ok(())
            }
            StatusCode::CONFLICT => Err(BackendError::AlreadyExists(description.run_id.clone())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(BackendError::Rejected(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body.chars().take(512).collect::<String>()
                )))
            }
        }
    }

    async fn cancel(&self, run_id: &str) -> Result<CancelOutcome, BackendError> {
        let url = format!("{}/{}?propagationPolicy=Background", self.jobs_url(), run_id);
        let response = self
            .authorize(self.client.delete(&url))
            .await?
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                info!(run_id = %run_id, "Job deleted");
                Ok(CancelOutcome::Cancelled)
            }
            StatusCode::NOT_FOUND => {
                debug!(run_id = %run_id, "Job already gone");
                Ok(CancelOutcome::NotFound)
            }
            _ => Err(BackendError::Rejected(format!(
                "delete returned HTTP {}",
                status.as_u16()
            ))),
        }
    }
}
