// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP entrypoint.
//!
//! Thin mapping of the `/nextflow` routes onto [`Orchestrator`] operations.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::Error;
use crate::orchestrator::{ConcludeOutcome, CreateRunRequest, Health, Orchestrator};
use crate::run::{Run, RunIssues, RunState, RunStatus};

/// Error body: `{"error": {"error_code": ..., "message": ...}}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Error code and message.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable code.
    pub error_code: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// Launcher error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Staging { .. } => (StatusCode::BAD_GATEWAY, "STAGING_FAILED"),
            Error::Submission { .. } => (StatusCode::BAD_GATEWAY, "SUBMISSION_FAILED"),
            Error::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: ErrorDetail {
                    error_code,
                    message: self.0.to_string(),
                },
            }),
        )
            .into_response()
    }
}

/// Body of `POST /nextflow/conclude`.
#[derive(Debug, Deserialize)]
pub struct ConcludeRequest {
    /// Run being concluded.
    pub run_id: String,
    /// Workload outcome.
    pub run_status: RunStatus,
    /// Result artifact, relative to the results root.
    #[serde(default)]
    pub result_location: Option<String>,
}

/// Response of `POST /nextflow/run`.
#[derive(Debug, Serialize)]
pub struct RunSubmitted {
    /// Always `job submitted`.
    pub status: &'static str,
    /// ID of the new run.
    pub run_id: String,
}

/// Response of `POST /nextflow/conclude`.
#[derive(Debug, Serialize)]
pub struct RunConcluded {
    /// Human-readable acknowledgement.
    pub status: String,
    /// Conclusion details.
    #[serde(flatten)]
    pub outcome: ConcludeOutcome,
}

/// Response of `POST /nextflow/stop/{analysis_id}`.
#[derive(Debug, Serialize)]
pub struct RunsStopped {
    /// Human-readable acknowledgement.
    pub status: String,
    /// Number of runs moved to `stopped`.
    pub stopped: usize,
}

/// Response of `GET /nextflow/healthz`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`.
    pub status: Health,
}

/// Public view of a run. The credential is never included.
#[derive(Debug, Serialize)]
pub struct RunView {
    /// Run ID.
    pub run_id: String,
    /// Owning analysis.
    pub analysis_id: String,
    /// Pipeline.
    pub pipeline_name: String,
    /// Pipeline arguments.
    pub run_args: Vec<String>,
    /// Lifecycle state.
    pub state: RunState,
    /// Storage reference of the pushed result.
    pub storage_id: Option<String>,
    /// Recorded conclusion problems.
    pub issues: RunIssues,
    /// Notification attempts used.
    pub notification_attempts: u32,
    /// Creation time.
    pub time_created: DateTime<Utc>,
    /// Last state change.
    pub time_updated: DateTime<Utc>,
}

impl From<Run> for RunView {
    fn from(run: Run) -> Self {
        Self {
            run_id: run.run_id,
            analysis_id: run.analysis_id,
            pipeline_name: run.pipeline_name,
            run_args: run.run_args,
            state: run.state,
            storage_id: run.storage_id,
            issues: run.issues,
            notification_attempts: run.notification_attempts,
            time_created: run.time_created,
            time_updated: run.time_updated,
        }
    }
}

/// Build the `/nextflow` router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let routes = Router::new()
        .route("/run", post(create_run))
        .route("/conclude", post(conclude_run))
        .route("/stop/{analysis_id}", post(stop_runs))
        .route("/healthz", get(health))
        .route("/runs/{run_id}", get(get_run));

    Router::new()
        .nest("/nextflow", routes)
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

async fn create_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Result<Json<CreateRunRequest>, JsonRejection>,
) -> Result<Json<RunSubmitted>, ApiError> {
    let Json(request) = body?;
    let run_id = orchestrator.create(request).await?;
    Ok(Json(RunSubmitted {
        status: "job submitted",
        run_id,
    }))
}

async fn conclude_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Result<Json<ConcludeRequest>, JsonRejection>,
) -> Result<Json<RunConcluded>, ApiError> {
    let Json(request) = body?;
    let outcome = orchestrator
        .conclude(
            &request.run_id,
            request.run_status,
            request.result_location.as_deref(),
        )
        .await?;
    Ok(Json(RunConcluded {
        status: format!("Nextflow run with id={} concluded.", request.run_id),
        outcome,
    }))
}

async fn stop_runs(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(analysis_id): Path<String>,
) -> Result<Json<RunsStopped>, ApiError> {
    let stopped = orchestrator.interrupt(&analysis_id).await?;
    Ok(Json(RunsStopped {
        status: format!("Stopped {} run(s) of analysis {}", stopped, analysis_id),
        stopped,
    }))
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> (StatusCode, Json<HealthResponse>) {
    let status = orchestrator.health().await;
    let code = match status {
        Health::Ok => StatusCode::OK,
        Health::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(HealthResponse { status }))
}

async fn get_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunView>, ApiError> {
    let run = orchestrator.get(&run_id).await?;
    Ok(Json(run.into()))
}

/// Serve `router` on `listener` until `shutdown_rx` flips to `true`.
pub async fn run_server_with_shutdown(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server starting");

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            info!("HTTP server received shutdown signal");
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
