// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Analysis-service notification client.

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;

use crate::notify::CompletionReport;
use crate::run::Credential;

/// Everything but RFC 3986 unreserved characters.
const ID_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A single failed notification attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifyError {
    /// The analysis service answered with a non-success status.
    #[error("Analysis service returned HTTP {0}")]
    Status(u16),

    /// The attempt did not complete in time.
    #[error("Notification timed out")]
    Timeout,

    /// Connection or protocol failure.
    #[error("Notification transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NotifyError::Timeout
        } else {
            NotifyError::Transport(e.to_string())
        }
    }
}

/// Delivers completion reports to the owning analysis.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Deliver one report. Exactly one HTTP attempt; retries belong to the caller.
    async fn post(
        &self,
        analysis_id: &str,
        credential: &Credential,
        report: &CompletionReport,
    ) -> Result<(), NotifyError>;
}

/// reqwest-backed [`AnalysisClient`].
#[derive(Clone)]
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    url_template: String,
}

impl HttpAnalysisClient {
    /// Create a client. `url_template` may contain `{analysis_id}`.
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    /// Notification endpoint for an analysis.
    ///
    /// The ID is percent-encoded before substitution, so it can never add
    /// userinfo, a port or path segments to the URL. An ID that is not a
    /// valid host label when substituted into the host fails to parse.
    pub fn endpoint(&self, analysis_id: &str) -> Result<reqwest::Url, NotifyError> {
        let encoded = utf8_percent_encode(analysis_id, ID_ENCODE_SET).to_string();
        let raw = format!(
            "{}/nextflow",
            self.url_template
                .replace("{analysis_id}", &encoded)
                .trim_end_matches('/')
        );
        reqwest::Url::parse(&raw)
            .map_err(|e| NotifyError::Transport(format!("invalid endpoint for analysis {}: {}", analysis_id, e)))
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn post(
        &self,
        analysis_id: &str,
        credential: &Credential,
        report: &CompletionReport,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.endpoint(analysis_id)?)
            .bearer_auth(credential.expose())
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}
