// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run entity and its lifecycle states.
//!
//! # Run State Machine
//!
//! ```text
//!     ┌─────────┐  fetch ok   ┌──────────────┐  submit ok  ┌───────────┐
//!     │ CREATED │────────────►│ INPUT_STAGED │────────────►│ SUBMITTED │
//!     └────┬────┘             └──────┬───────┘             └─────┬─────┘
//!          │ fetch failed            │ rejected                  │ conclude
//!          ▼                         ▼                           ▼
//!     ┌────────┐                ┌────────┐               ┌────────────┐
//!     │ FAILED │◄───────────────│ FAILED │               │ CONCLUDING │
//!     └────────┘                └────────┘               └─────┬──────┘
//!                                                              │
//!                                                   ┌──────────┴─────────┐
//!                                                   ▼                    ▼
//!                                             ┌───────────┐         ┌────────┐
//!                                             │ SUCCEEDED │         │ FAILED │
//!                                             └───────────┘         └────────┘
//!
//!     CREATED | INPUT_STAGED | SUBMITTED ──interrupt──► STOPPED
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every generated run identifier.
pub const RUN_ID_PREFIX: &str = "nf-run-";

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Record persisted, input not yet staged.
    Created,
    /// Input fetched and written to the staging directory.
    InputStaged,
    /// Job accepted by the backend; waiting for the workload to conclude.
    Submitted,
    /// Conclusion in progress (result push, notification, cleanup).
    Concluding,
    /// Workload reported success and conclusion finished.
    Succeeded,
    /// Staging, submission or the workload failed.
    Failed,
    /// Interrupted before the workload concluded.
    Stopped,
}

impl RunState {
    /// Persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::InputStaged => "input_staged",
            RunState::Submitted => "submitted",
            RunState::Concluding => "concluding",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Stopped => "stopped",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Stopped
        )
    }

    /// Whether an interrupt may move this run to [`RunState::Stopped`].
    pub fn is_interruptible(&self) -> bool {
        matches!(
            self,
            RunState::Created | RunState::InputStaged | RunState::Submitted
        )
    }

    /// Forward-only transition graph.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Created, InputStaged | Failed | Stopped)
                | (InputStaged, Submitted | Failed | Stopped)
                | (Submitted, Concluding | Stopped)
                | (Concluding, Succeeded | Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown run state: {0}")]
pub struct UnknownRunState(pub String);

impl FromStr for RunState {
    type Err = UnknownRunState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunState::Created),
            "input_staged" => Ok(RunState::InputStaged),
            "submitted" => Ok(RunState::Submitted),
            "concluding" => Ok(RunState::Concluding),
            "succeeded" => Ok(RunState::Succeeded),
            "failed" => Ok(RunState::Failed),
            "stopped" => Ok(RunState::Stopped),
            other => Err(UnknownRunState(other.to_string())),
        }
    }
}

/// Outcome reported by a finished workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Pipeline exited successfully.
    #[serde(rename = "succeeded", alias = "success")]
    Succeeded,
    /// Pipeline exited with an error.
    #[serde(rename = "failed", alias = "fail", alias = "failure")]
    Failed,
}

impl RunStatus {
    /// Terminal run state corresponding to this outcome.
    pub fn terminal_state(&self) -> RunState {
        match self {
            RunStatus::Succeeded => RunState::Succeeded,
            RunStatus::Failed => RunState::Failed,
        }
    }

    /// Wire string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque bearer token scoped to the requesting analysis.
///
/// Not `Serialize`; `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for building an `Authorization` header or persisting.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Non-fatal conclusion problems recorded on the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIssues {
    /// Result upload failed; the analysis was notified without a storage reference.
    pub push_failed: bool,
    /// Every notification attempt failed.
    pub notification_exhausted: bool,
    /// Job-backend cleanup failed after the run concluded.
    pub cancellation_failed: bool,
}

impl RunIssues {
    /// True when no issue was recorded.
    pub fn is_clean(&self) -> bool {
        !(self.push_failed || self.notification_exhausted || self.cancellation_failed)
    }
}

/// One execution attempt of a named pipeline for an analysis.
#[derive(Debug, Clone)]
pub struct Run {
    /// Globally unique identifier, also used as the job name.
    pub run_id: String,
    /// Owning analysis.
    pub analysis_id: String,
    /// Pipeline to execute.
    pub pipeline_name: String,
    /// Opaque pipeline arguments, in order.
    pub run_args: Vec<String>,
    /// Token used for storage and notification calls on behalf of this run.
    pub credential: Credential,
    /// Current lifecycle state.
    pub state: RunState,
    /// Storage reference of the pushed result, if any.
    pub storage_id: Option<String>,
    /// Problems recorded during conclusion.
    pub issues: RunIssues,
    /// Notification attempts used during conclusion.
    pub notification_attempts: u32,
    /// When the run was created.
    pub time_created: DateTime<Utc>,
    /// When the run last changed state.
    pub time_updated: DateTime<Utc>,
}

impl Run {
    /// Create a new run in [`RunState::Created`] with a freshly generated ID.
    pub fn new(
        analysis_id: impl Into<String>,
        pipeline_name: impl Into<String>,
        run_args: Vec<String>,
        credential: Credential,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: generate_run_id(),
            analysis_id: analysis_id.into(),
            pipeline_name: pipeline_name.into(),
            run_args,
            credential,
            state: RunState::Created,
            storage_id: None,
            issues: RunIssues::default(),
            notification_attempts: 0,
            time_created: now,
            time_updated: now,
        }
    }
}

/// Generate a new run identifier (`nf-run-{uuid}`).
///
/// The result is a valid Kubernetes object name (lowercase, `-`, <= 63 chars).
pub fn generate_run_id() -> String {
    format!("{}{}", RUN_ID_PREFIX, uuid::Uuid::new_v4())
}
