// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run record store interface and backends.
//!
//! The store is the only place run state lives. Every state change goes
//! through [`RunStore::transition`], a compare-and-swap on the persisted
//! `state` column, which makes it safe to run several stateless launcher
//! instances against the same database.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresRunStore;
pub use self::sqlite::SqliteRunStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::run::{Credential, Run, RunIssues, RunState};

/// Errors from the run record store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A persisted row could not be decoded into a run.
    #[error("Corrupt record for run {run_id}: {reason}")]
    Corrupt {
        /// Run whose row is corrupt.
        run_id: String,
        /// What failed to decode.
        reason: String,
    },

    /// The requested transition is not part of the state graph.
    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Expected current state.
        from: RunState,
        /// Requested next state.
        to: RunState,
    },

    /// The store did not answer within the request timeout.
    #[error("Store operation '{0}' timed out")]
    Timeout(&'static str),
}

/// Fields written together with a state transition.
///
/// `None` / `false` leave the persisted value untouched; issue flags are
/// only ever set, never cleared.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    /// Storage reference of the pushed result.
    pub storage_id: Option<String>,
    /// Issues to record.
    pub issues: RunIssues,
    /// Notification attempts used.
    pub notification_attempts: Option<u32>,
}

/// Durable mapping `run_id -> run`.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Backend identifier (e.g., "postgres", "sqlite").
    fn store_type(&self) -> &'static str;

    /// Persist a new run. Fails if the `run_id` already exists.
    async fn insert(&self, run: &Run) -> Result<(), StoreError>;

    /// Look up a run by ID.
    async fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError>;

    /// All runs of an analysis, oldest first.
    async fn list_by_analysis(&self, analysis_id: &str) -> Result<Vec<Run>, StoreError>;

    /// Atomically move a run from `from` to `to`.
    ///
    /// Returns `Ok(false)` without writing anything when the run is not
    /// currently in `from` (or does not exist). Transitions outside the state
    /// graph are rejected with [`StoreError::InvalidTransition`].
    async fn transition(
        &self,
        run_id: &str,
        from: RunState,
        to: RunState,
        update: &TransitionUpdate,
    ) -> Result<bool, StoreError>;

    /// Delete a run record. Returns whether a row was removed.
    async fn delete(&self, run_id: &str) -> Result<bool, StoreError>;

    /// Runs in `state` whose last update is older than `updated_before`.
    async fn list_stale(
        &self,
        state: RunState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Run>, StoreError>;

    /// Whether the backing database answers.
    async fn health_check(&self) -> Result<bool, StoreError>;
}

/// Open a store from a database URL.
///
/// `sqlite:` URLs open (and create) an SQLite database, anything else is
/// treated as a PostgreSQL connection string. Migrations are applied in
/// both cases.
pub async fn connect(database_url: &str) -> Result<Arc<dyn RunStore>, StoreError> {
    if database_url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteRunStore::connect(database_url).await?))
    } else {
        Ok(Arc::new(PostgresRunStore::connect(database_url).await?))
    }
}

/// Column list shared by both backends.
pub(crate) const RUN_COLUMNS: &str = "run_id, analysis_id, pipeline_name, run_args, credential, \
     state, storage_id, push_failed, notification_exhausted, cancellation_failed, \
     notification_attempts, time_created, time_updated";

/// Raw persisted row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct RunRow {
    pub run_id: String,
    pub analysis_id: String,
    pub pipeline_name: String,
    /// JSON array of strings.
    pub run_args: String,
    pub credential: String,
    pub state: String,
    pub storage_id: Option<String>,
    pub push_failed: bool,
    pub notification_exhausted: bool,
    pub cancellation_failed: bool,
    pub notification_attempts: i64,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

impl TryFrom<RunRow> for Run {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let state = row.state.parse::<RunState>().map_err(|e| StoreError::Corrupt {
            run_id: row.run_id.clone(),
            reason: e.to_string(),
        })?;
        let run_args: Vec<String> =
            serde_json::from_str(&row.run_args).map_err(|e| StoreError::Corrupt {
                run_id: row.run_id.clone(),
                reason: format!("run_args: {}", e),
            })?;

        Ok(Run {
            run_id: row.run_id,
            analysis_id: row.analysis_id,
            pipeline_name: row.pipeline_name,
            run_args,
            credential: Credential::new(row.credential),
            state,
            storage_id: row.storage_id,
            issues: RunIssues {
                push_failed: row.push_failed,
                notification_exhausted: row.notification_exhausted,
                cancellation_failed: row.cancellation_failed,
            },
            notification_attempts: u32::try_from(row.notification_attempts).unwrap_or(0),
            time_created: row.time_created,
            time_updated: row.time_updated,
        })
    }
}

/// Serialize run arguments for the `run_args` column.
pub(crate) fn encode_run_args(run: &Run) -> Result<String, StoreError> {
    serde_json::to_string(&run.run_args).map_err(|e| StoreError::Corrupt {
        run_id: run.run_id.clone(),
        reason: format!("run_args: {}", e),
    })
}

/// Reject transitions that are not part of the state graph.
pub(crate) fn check_transition(from: RunState, to: RunState) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { from, to })
    }
}

fn rows_to_runs(rows: Vec<RunRow>) -> Result<Vec<Run>, StoreError> {
    rows.into_iter().map(Run::try_from).collect()
}
