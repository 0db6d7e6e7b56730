// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job backend - where pipeline workloads execute.

pub mod job;
pub mod kubernetes;
pub mod mock;

pub use job::{JobDescription, JobTemplateConfig, build_job_description};
pub use kubernetes::KubernetesBackend;
pub use mock::MockJobBackend;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from job backend operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend refused the job description.
    #[error("Job rejected: {0}")]
    Rejected(String),

    /// A job with this name already exists.
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    /// The backend did not answer in time.
    #[error("Job backend timed out")]
    Timeout,

    /// Connection or protocol failure.
    #[error("Job backend transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Successful result of [`JobBackend::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job existed and was torn down.
    Cancelled,
    /// No job with this name exists.
    NotFound,
}

/// Job backend interface.
///
/// A job is named by its `run_id`; at most one job per name may be active.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Backend identifier (e.g., "kubernetes", "mock").
    fn backend_type(&self) -> &'static str;

    /// Submit a job. Returns once the backend has accepted or rejected it.
    async fn submit(&self, description: &JobDescription) -> Result<(), BackendError>;

    /// Tear down the job named `run_id` and its pods.
    async fn cancel(&self, run_id: &str) -> Result<CancelOutcome, BackendError>;
}
