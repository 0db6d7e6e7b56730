// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object-storage client.
//!
//! Talks to the result service's local bucket: `GET {base}/local/{id}` for
//! inputs and a multipart `PUT {base}/local/` for results, authenticated with
//! the run's bearer credential.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::run::Credential;

/// Errors from storage calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The service answered with a non-success status.
    #[error("Storage returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Upload succeeded but the response carried no object ID.
    #[error("Storage response is missing an object id")]
    MissingId,

    /// The request did not complete in time.
    #[error("Storage request timed out")]
    Timeout,

    /// Connection or protocol failure.
    #[error("Storage transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StorageError::Timeout
        } else {
            StorageError::Transport(e.to_string())
        }
    }
}

/// Storage operations used by the data handoff.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Download the object at `location`.
    async fn get(&self, location: &str, credential: &Credential) -> Result<Vec<u8>, StorageError>;

    /// Upload `bytes` as `name`, returning the new object's ID.
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        credential: &Credential,
    ) -> Result<String, StorageError>;
}

#[derive(Deserialize)]
struct PutResponse {
    id: Option<serde_json::Value>,
}

/// reqwest-backed [`StorageClient`].
#[derive(Clone)]
pub struct HttpStorageClient {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpStorageClient {
    /// Create a client for `base_url` (e.g. `http://flame-result-service:8080/storage`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StorageError> {
        let raw = base_url.into();
        let base_url = reqwest::Url::parse(&raw)
            .map_err(|e| StorageError::Transport(format!("invalid base URL {}: {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::Transport(format!("invalid base URL {}", raw)));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `{base}/local/{segments...}`, each segment percent-encoded.
    ///
    /// Empty, `.` and `..` segments of `location` are dropped.
    pub fn local_url(&self, location: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("local");
            segments.extend(
                location
                    .split('/')
                    .filter(|s| !s.is_empty() && *s != "." && *s != ".."),
            );
        }
        url
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn get(&self, location: &str, credential: &Credential) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get(self.local_url(location))
            .bearer_auth(credential.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        credential: &Credential,
    ) -> Result<String, StorageError> {
        let mut url = self.local_url("");
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push("");
        }
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .put(url)
            .bearer_auth(credential.expose())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        let body: PutResponse = response
            .json()
            .await
            .map_err(|_| StorageError::MissingId)?;

        match body.id {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            _ => Err(StorageError::MissingId),
        }
    }
}

async fn status_error(status: reqwest::StatusCode, response: reqwest::Response) -> StorageError {
    let body = response.text().await.unwrap_or_default();
    StorageError::Status {
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    }
}
