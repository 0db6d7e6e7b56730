// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for nextflow-launcher.
//!
//! Only errors that fail a request are represented here. Problems that occur
//! after a workload has finished (result push, notification, job cleanup) are
//! recorded on the run as [`RunIssues`](crate::run::RunIssues) instead.

use thiserror::Error;

use crate::run::RunState;

/// Launcher errors surfaced to callers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Run request is missing required fields.
    #[error("Invalid run request: {0}")]
    Validation(String),

    /// Input data could not be fetched or staged.
    #[error("Input staging failed for run {run_id}: {reason}")]
    Staging {
        /// Run whose staging failed.
        run_id: String,
        /// Underlying failure.
        reason: String,
    },

    /// Job backend rejected (or never acknowledged) the job description.
    #[error("Job submission failed for run {run_id}: {reason}")]
    Submission {
        /// Run whose submission failed.
        run_id: String,
        /// Underlying failure.
        reason: String,
    },

    /// Run is not in a state that allows the requested operation.
    #[error("Run {run_id} cannot be concluded in state '{state}'")]
    Conflict {
        /// Run that was addressed.
        run_id: String,
        /// State the run was found in.
        state: RunState,
    },

    /// Run does not exist.
    #[error("Run not found: {0}")]
    NotFound(String),

    /// Run record store failed.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Result type using launcher Error.
pub type Result<T> = std::result::Result<T, Error>;
