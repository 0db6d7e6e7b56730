// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed run store.
//!
//! Intended for single-instance deployments and tests. In-memory databases
//! are pinned to one long-lived connection so every query sees the same data.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::run::{Run, RunState};

use super::{
    RUN_COLUMNS, RunRow, RunStore, StoreError, TransitionUpdate, check_transition,
    encode_run_args, rows_to_runs,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed run store.
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Wrap an existing pool. Migrations are not applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a `sqlite:` URL, creating the database if missing, and
    /// apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Open (and create) a database file, creating parent directories as needed.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(e.into()))?;
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Fresh, migrated in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    fn store_type(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO nextflow_runs (
                run_id, analysis_id, pipeline_name, run_args, credential, state,
                storage_id, push_failed, notification_exhausted, cancellation_failed,
                notification_attempts, time_created, time_updated
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.analysis_id)
        .bind(&run.pipeline_name)
        .bind(encode_run_args(run)?)
        .bind(run.credential.expose())
        .bind(run.state.as_str())
        .bind(&run.storage_id)
        .bind(run.issues.push_failed)
        .bind(run.issues.notification_exhausted)
        .bind(run.issues.cancellation_failed)
        .bind(i64::from(run.notification_attempts))
        .bind(run.time_created)
        .bind(run.time_updated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM nextflow_runs WHERE run_id = ?",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Run::try_from).transpose()
    }

    async fn list_by_analysis(&self, analysis_id: &str) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM nextflow_runs WHERE analysis_id = ? ORDER BY time_created, run_id",
            RUN_COLUMNS
        ))
        .bind(analysis_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_runs(rows)
    }

    async fn transition(
        &self,
        run_id: &str,
        from: RunState,
        to: RunState,
        update: &TransitionUpdate,
    ) -> Result<bool, StoreError> {
        check_transition(from, to)?;

        let result = sqlx::query(
            r#"
            UPDATE nextflow_runs
            SET state = ?,
                storage_id = COALESCE(?, storage_id),
                push_failed = (push_failed OR ?),
                notification_exhausted = (notification_exhausted OR ?),
                cancellation_failed = (cancellation_failed OR ?),
                notification_attempts = COALESCE(?, notification_attempts),
                time_updated = ?
            WHERE run_id = ? AND state = ?
            "#,
        )
        .bind(to.as_str())
        .bind(&update.storage_id)
        .bind(update.issues.push_failed)
        .bind(update.issues.notification_exhausted)
        .bind(update.issues.cancellation_failed)
        .bind(update.notification_attempts.map(i64::from))
        .bind(Utc::now())
        .bind(run_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, run_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM nextflow_runs WHERE run_id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_stale(
        &self,
        state: RunState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM nextflow_runs WHERE state = ? ORDER BY time_updated",
            RUN_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        // Timestamps are TEXT here; compare parsed values rather than strings.
        let runs = rows_to_runs(rows)?;
        Ok(runs
            .into_iter()
            .filter(|run| run.time_updated < updated_before)
            .collect())
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
