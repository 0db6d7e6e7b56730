// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Completion notification with bounded retry.
//!
//! The sender makes up to `max_attempts` attempts and sleeps
//! `base_delay * 2^(n-1)` after failed attempt `n` when another attempt
//! follows. Exhaustion is returned as an outcome, never as an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::clients::{AnalysisClient, NotifyError};
use crate::run::{Credential, RunStatus};

/// Attempt budget and backoff base for notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Full delay schedule, one entry per attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|n| self.delay_after(n)).collect()
    }
}

/// Report delivered to the analysis service when a run concludes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReport {
    /// Concluded run.
    pub run_id: String,
    /// Workload outcome.
    pub run_status: RunStatus,
    /// Storage reference of the pushed result, `null` if none.
    pub storage_id: Option<String>,
    /// Whether the result push failed.
    pub push_failed: bool,
}

/// Result of [`NotificationSender::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the analysis service.
    Delivered {
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// Attempts used.
        attempts: u32,
        /// Error of the last attempt.
        last_error: String,
    },
}

impl DeliveryOutcome {
    /// Attempts used.
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Whether delivery failed.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, DeliveryOutcome::Exhausted { .. })
    }
}

/// Sends completion reports with retry and backoff.
#[derive(Clone)]
pub struct NotificationSender {
    client: Arc<dyn AnalysisClient>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl NotificationSender {
    /// Create a sender. Each attempt is bounded by `attempt_timeout`.
    pub fn new(client: Arc<dyn AnalysisClient>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            client,
            policy,
            attempt_timeout,
        }
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `report` to `analysis_id`.
    pub async fn send(
        &self,
        analysis_id: &str,
        credential: &Credential,
        report: &CompletionReport,
    ) -> DeliveryOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let result = tokio::time::timeout(
                self.attempt_timeout,
                self.client.post(analysis_id, credential, report),
            )
            .await
            .unwrap_or(Err(NotifyError::Timeout));

            match result {
                Ok(()) => {
                    debug!(
                        run_id = %report.run_id,
                        analysis_id = %analysis_id,
                        attempt,
                        "Completion notification delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let delay = self.policy.delay_after(attempt);
                        warn!(
                            run_id = %report.run_id,
                            analysis_id = %analysis_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Completion notification failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(
            run_id = %report.run_id,
            analysis_id = %analysis_id,
            attempts = max_attempts,
            error = %last_error,
            "Completion notification exhausted all attempts"
        );

        DeliveryOutcome::Exhausted {
            attempts: max_attempts,
            last_error,
        }
    }
}
