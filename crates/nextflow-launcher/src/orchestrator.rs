// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle orchestration.
//!
//! The orchestrator owns every run state change. Side effects are ordered
//! fetch → submit on the way in and push → notify → cancel → cleanup on the
//! way out. Mutual exclusion per run comes solely from the store's
//! compare-and-swap; no in-process locks are held across collaborator calls,
//! so several orchestrator instances may share one store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::{
    BackendError, CancelOutcome, JobBackend, JobTemplateConfig, build_job_description,
};
use crate::error::{Error, Result};
use crate::handoff::DataHandoff;
use crate::notify::{CompletionReport, DeliveryOutcome, NotificationSender};
use crate::run::{Credential, Run, RunIssues, RunState, RunStatus};
use crate::store::{RunStore, StoreError, TransitionUpdate};

/// Request to start a new run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRunRequest {
    /// Owning analysis.
    #[serde(default)]
    pub analysis_id: String,
    /// Pipeline to execute.
    #[serde(default)]
    pub pipeline_name: Option<String>,
    /// Pipeline arguments; required, may be empty.
    #[serde(default)]
    pub run_args: Option<Vec<String>>,
    /// Bearer token for storage and notification calls.
    #[serde(default)]
    pub credential: Option<Credential>,
    /// Storage location of the input data.
    #[serde(default)]
    pub input_location: String,
}

struct ValidRequest {
    analysis_id: String,
    pipeline_name: String,
    run_args: Vec<String>,
    credential: Credential,
    input_location: String,
}

impl CreateRunRequest {
    fn validate(self) -> Result<ValidRequest> {
        if self.analysis_id.trim().is_empty() {
            return Err(Error::Validation("analysis_id is required".to_string()));
        }
        let pipeline_name = match self.pipeline_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(Error::Validation("pipeline_name is required".to_string())),
        };
        let run_args = self
            .run_args
            .ok_or_else(|| Error::Validation("run_args is required".to_string()))?;
        let credential = self
            .credential
            .ok_or_else(|| Error::Validation("credential is required".to_string()))?;

        Ok(ValidRequest {
            analysis_id: self.analysis_id,
            pipeline_name,
            run_args,
            credential,
            input_location: self.input_location,
        })
    }
}

/// What `conclude` did.
#[derive(Debug, Clone, Serialize)]
pub struct ConcludeOutcome {
    /// Concluded run.
    pub run_id: String,
    /// Terminal state reached.
    pub state: RunState,
    /// Storage reference of the pushed result.
    pub storage_id: Option<String>,
    /// Problems recorded during conclusion.
    pub issues: RunIssues,
    /// Notification attempts used.
    pub notification_attempts: u32,
}

/// Service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Record store reachable.
    Ok,
    /// Record store unreachable or slow.
    Degraded,
}

/// Drives runs through their lifecycle.
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    backend: Arc<dyn JobBackend>,
    handoff: DataHandoff,
    notifier: NotificationSender,
    job_template: JobTemplateConfig,
    request_timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators.
    pub fn new(
        store: Arc<dyn RunStore>,
        backend: Arc<dyn JobBackend>,
        handoff: DataHandoff,
        notifier: NotificationSender,
        job_template: JobTemplateConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            handoff,
            notifier,
            job_template,
            request_timeout,
        }
    }

    /// Data handoff in use.
    pub fn handoff(&self) -> &DataHandoff {
        &self.handoff
    }

    /// Record store in use.
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Validate, stage input and submit a new run. Returns the run ID.
    pub async fn create(&self, request: CreateRunRequest) -> Result<String> {
        let request = request.validate()?;
        let run = Run::new(
            request.analysis_id,
            request.pipeline_name,
            request.run_args,
            request.credential,
        );
        let run_id = run.run_id.clone();

        self.timed("insert", self.store.insert(&run)).await?;
        info!(
            run_id = %run_id,
            analysis_id = %run.analysis_id,
            pipeline = %run.pipeline_name,
            "Run created"
        );

        let staged = match self
            .handoff
            .fetch(&request.input_location, &run.credential)
            .await
        {
            Ok(bytes) => self
                .handoff
                .stage_input(&run_id, &bytes)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(reason) = staged {
            warn!(run_id = %run_id, error = %reason, "Input staging failed");
            self.mark_failed(&run_id, RunState::Created).await;
            self.handoff.discard_staging(&run_id).await;
            return Err(Error::Staging { run_id, reason });
        }

        if !self
            .transition(&run_id, RunState::Created, RunState::InputStaged, &TransitionUpdate::default())
            .await?
        {
            self.handoff.discard_staging(&run_id).await;
            return Err(Error::Submission {
                run_id,
                reason: "run was stopped before submission".to_string(),
            });
        }

        let description = build_job_description(
            &run_id,
            &run.pipeline_name,
            &run.run_args,
            &self.job_template,
        );

        let submitted = tokio::time::timeout(self.request_timeout, self.backend.submit(&description))
            .await
            .unwrap_or(Err(BackendError::Timeout));

        if let Err(e) = submitted {
            error!(run_id = %run_id, error = %e, "Job submission failed");
            // A timed-out submit may still have been accepted.
            if matches!(e, BackendError::Timeout) {
                self.cancel_job(&run_id).await;
            }
            self.mark_failed(&run_id, RunState::InputStaged).await;
            self.handoff.discard_staging(&run_id).await;
            return Err(Error::Submission {
                run_id,
                reason: e.to_string(),
            });
        }

        match self
            .transition(&run_id, RunState::InputStaged, RunState::Submitted, &TransitionUpdate::default())
            .await
        {
            Ok(true) => {
                info!(run_id = %run_id, "Run submitted");
                Ok(run_id)
            }
            Ok(false) => {
                warn!(run_id = %run_id, "Run stopped during submission, cancelling job");
                self.cancel_job(&run_id).await;
                Err(Error::Submission {
                    run_id,
                    reason: "run was stopped during submission".to_string(),
                })
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to record submission, cancelling job");
                self.cancel_job(&run_id).await;
                Err(e.into())
            }
        }
    }

    /// Handle the workload's completion report.
    ///
    /// Only the first call for a `Submitted` run has effects; every later
    /// call is rejected with [`Error::Conflict`].
    pub async fn conclude(
        &self,
        run_id: &str,
        run_status: RunStatus,
        result_location: Option<&str>,
    ) -> Result<ConcludeOutcome> {
        let run = self
            .timed("get", self.store.get(run_id))
            .await?
            .ok_or_else(|| Error::NotFound(run_id.to_string()))?;

        if run.state != RunState::Submitted
            || !self
                .transition(run_id, RunState::Submitted, RunState::Concluding, &TransitionUpdate::default())
                .await?
        {
            let state = self.current_state(run_id).await.unwrap_or(run.state);
            debug!(run_id = %run_id, state = %state, "Conclude rejected");
            return Err(Error::Conflict {
                run_id: run_id.to_string(),
                state,
            });
        }

        info!(run_id = %run_id, status = %run_status, "Concluding run");
        let mut issues = RunIssues::default();

        let storage_id = if run_status == RunStatus::Succeeded {
            match self.push_result(&run, result_location).await {
                Ok(id) => Some(id),
                Err(reason) => {
                    warn!(run_id = %run_id, error = %reason, "Result push failed");
                    issues.push_failed = true;
                    None
                }
            }
        } else {
            None
        };

        let report = CompletionReport {
            run_id: run_id.to_string(),
            run_status,
            storage_id: storage_id.clone(),
            push_failed: issues.push_failed,
        };
        let delivery = self
            .notifier
            .send(&run.analysis_id, &run.credential, &report)
            .await;
        if let DeliveryOutcome::Exhausted { .. } = delivery {
            issues.notification_exhausted = true;
        }

        if !self.cancel_job(run_id).await {
            issues.cancellation_failed = true;
        }

        let state = run_status.terminal_state();
        let update = TransitionUpdate {
            storage_id: storage_id.clone(),
            issues,
            notification_attempts: Some(delivery.attempts()),
        };
        let recorded = self
            .transition(run_id, RunState::Concluding, state, &update)
            .await;

        if let Some(location) = result_location {
            self.handoff.discard_result(location).await;
        }
        self.handoff.discard_staging(run_id).await;

        match recorded {
            Ok(true) => info!(
                run_id = %run_id,
                state = %state,
                push_failed = issues.push_failed,
                notification_exhausted = issues.notification_exhausted,
                cancellation_failed = issues.cancellation_failed,
                "Run concluded"
            ),
            Ok(false) => warn!(run_id = %run_id, "Run left concluding state before terminal write"),
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to record terminal state");
                return Err(e.into());
            }
        }

        Ok(ConcludeOutcome {
            run_id: run_id.to_string(),
            state,
            storage_id,
            issues,
            notification_attempts: delivery.attempts(),
        })
    }

    /// Stop every active run of an analysis. Returns how many runs were stopped.
    pub async fn interrupt(&self, analysis_id: &str) -> Result<usize> {
        let runs = self
            .timed("list_by_analysis", self.store.list_by_analysis(analysis_id))
            .await?;
        let mut stopped = 0;

        for run in runs {
            let mut state = run.state;
            loop {
                if state == RunState::Concluding {
                    // Terminal write belongs to conclude; only tear the job down.
                    self.cancel_job(&run.run_id).await;
                    break;
                }
                if !state.is_interruptible() {
                    break;
                }
                match self
                    .transition(&run.run_id, state, RunState::Stopped, &TransitionUpdate::default())
                    .await
                {
                    Ok(true) => {
                        info!(run_id = %run.run_id, analysis_id = %analysis_id, from = %state, "Run stopped");
                        stopped += 1;
                        self.cancel_job(&run.run_id).await;
                        self.handoff.discard_staging(&run.run_id).await;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!(run_id = %run.run_id, error = %e, "Failed to stop run");
                        break;
                    }
                }
                // Lost a race; retry against the fresh state.
                match self.current_state(&run.run_id).await {
                    Some(fresh) => state = fresh,
                    None => break,
                }
            }
        }

        info!(analysis_id = %analysis_id, stopped, "Interrupt handled");
        Ok(stopped)
    }

    /// Report whether the record store answers.
    pub async fn health(&self) -> Health {
        match self.timed("health_check", self.store.health_check()).await {
            Ok(true) => Health::Ok,
            Ok(false) => Health::Degraded,
            Err(e) => {
                warn!(error = %e, "Health check failed");
                Health::Degraded
            }
        }
    }

    /// Current record of a run.
    pub async fn get(&self, run_id: &str) -> Result<Run> {
        self.timed("get", self.store.get(run_id))
            .await?
            .ok_or_else(|| Error::NotFound(run_id.to_string()))
    }

    /// Fail runs stuck in `Concluding` for longer than `older_than`.
    ///
    /// Used after a crash mid-conclusion. Requests job teardown but does not
    /// notify again. Returns the number of runs failed.
    pub async fn reconcile_stale(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let stale = self
            .timed("list_stale", self.store.list_stale(RunState::Concluding, cutoff))
            .await?;
        let mut failed = 0;

        for run in stale {
            let issues = RunIssues {
                cancellation_failed: !self.cancel_job(&run.run_id).await,
                ..RunIssues::default()
            };
            let update = TransitionUpdate {
                issues,
                ..TransitionUpdate::default()
            };
            if self
                .transition(&run.run_id, RunState::Concluding, RunState::Failed, &update)
                .await?
            {
                warn!(
                    run_id = %run.run_id,
                    analysis_id = %run.analysis_id,
                    since = %run.time_updated,
                    "Stale concluding run marked failed"
                );
                self.handoff.discard_staging(&run.run_id).await;
                failed += 1;
            }
        }

        Ok(failed)
    }

    async fn push_result(
        &self,
        run: &Run,
        result_location: Option<&str>,
    ) -> std::result::Result<String, String> {
        let location = result_location.ok_or_else(|| "no result location reported".to_string())?;
        let bytes = self
            .handoff
            .read_result(location)
            .await
            .map_err(|e| e.to_string())?;
        self.handoff
            .push(bytes, &run.credential)
            .await
            .map_err(|e| e.to_string())
    }

    /// Request job teardown. Returns `false` only when the backend failed.
    async fn cancel_job(&self, run_id: &str) -> bool {
        let result = tokio::time::timeout(self.request_timeout, self.backend.cancel(run_id))
            .await
            .unwrap_or(Err(BackendError::Timeout));
        match result {
            Ok(CancelOutcome::Cancelled) => {
                debug!(run_id = %run_id, "Job cancelled");
                true
            }
            Ok(CancelOutcome::NotFound) => {
                debug!(run_id = %run_id, "No job to cancel");
                true
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Job cancellation failed");
                false
            }
        }
    }

    async fn mark_failed(&self, run_id: &str, from: RunState) {
        match self
            .transition(run_id, from, RunState::Failed, &TransitionUpdate::default())
            .await
        {
            Ok(true) => info!(run_id = %run_id, from = %from, "Run failed"),
            Ok(false) => debug!(run_id = %run_id, from = %from, "Run already moved on"),
            Err(e) => error!(run_id = %run_id, error = %e, "Failed to mark run failed"),
        }
    }

    async fn current_state(&self, run_id: &str) -> Option<RunState> {
        match self.timed("get", self.store.get(run_id)).await {
            Ok(run) => run.map(|r| r.state),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to re-read run state");
                None
            }
        }
    }

    async fn transition(
        &self,
        run_id: &str,
        from: RunState,
        to: RunState,
        update: &TransitionUpdate,
    ) -> std::result::Result<bool, StoreError> {
        self.timed("transition", self.store.transition(run_id, from, to, update))
            .await
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<T, StoreError> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(operation))?
    }
}
