// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed run store.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::run::{Run, RunState};

use super::{
    RUN_COLUMNS, RunRow, RunStore, StoreError, TransitionUpdate, check_transition,
    encode_run_args, rows_to_runs,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// PostgreSQL-backed run store.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Wrap an existing pool. Migrations are not applied.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl RunStore for PostgresRunStore {
    fn store_type(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO nextflow_runs (
                run_id, analysis_id, pipeline_name, run_args, credential, state,
                storage_id, push_failed, notification_exhausted, cancellation_failed,
                notification_attempts, time_created, time_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
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
            "SELECT {} FROM nextflow_runs WHERE run_id = $1",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Run::try_from).transpose()
    }

    async fn list_by_analysis(&self, analysis_id: &str) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM nextflow_runs WHERE analysis_id = $1 ORDER BY time_created, run_id",
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
            SET state = $3,
                storage_id = COALESCE($4, storage_id),
                push_failed = push_failed OR $5,
                notification_exhausted = notification_exhausted OR $6,
                cancellation_failed = cancellation_failed OR $7,
                notification_attempts = COALESCE($8, notification_attempts),
                time_updated = NOW()
            WHERE run_id = $1 AND state = $2
            "#,
        )
        .bind(run_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&update.storage_id)
        .bind(update.issues.push_failed)
        .bind(update.issues.notification_exhausted)
        .bind(update.issues.cancellation_failed)
        .bind(update.notification_attempts.map(i64::from))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, run_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM nextflow_runs WHERE run_id = $1")
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
            "SELECT {} FROM nextflow_runs WHERE state = $1 AND time_updated < $2 ORDER BY time_updated",
            RUN_COLUMNS
        ))
        .bind(state.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;

        rows_to_runs(rows)
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        let (one,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
