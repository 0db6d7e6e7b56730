// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock job backend for testing.
//!
//! Records submissions and cancellations in memory and enforces the
//! one-active-job-per-name rule of a real backend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BackendError, CancelOutcome, JobBackend, JobDescription};

/// In-memory [`JobBackend`].
#[derive(Default)]
pub struct MockJobBackend {
    submissions: Mutex<Vec<JobDescription>>,
    cancellations: Mutex<Vec<String>>,
    active: Mutex<HashSet<String>>,
    reject_submissions: AtomicBool,
    fail_cancels: AtomicBool,
    /// Delay applied before a submission is accepted
    pub submit_delay: Option<Duration>,
}

impl MockJobBackend {
    /// Create a backend that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that rejects every submission.
    pub fn rejecting() -> Self {
        let backend = Self::default();
        backend.reject_submissions.store(true, Ordering::SeqCst);
        backend
    }

    /// Make every cancel fail with a transport error.
    pub fn set_fail_cancels(&self, fail: bool) {
        self.fail_cancels.store(fail, Ordering::SeqCst);
    }

    /// Accepted submissions, in order.
    pub async fn submissions(&self) -> Vec<JobDescription> {
        self.submissions.lock().await.clone()
    }

    /// Run IDs passed to `cancel`, in order, failed calls included.
    pub async fn cancellations(&self) -> Vec<String> {
        self.cancellations.lock().await.clone()
    }

    /// Whether a job named `run_id` is currently active.
    pub async fn is_active(&self, run_id: &str) -> bool {
        self.active.lock().await.contains(run_id)
    }
}

#[async_trait]
impl JobBackend for MockJobBackend {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn submit(&self, description: &JobDescription) -> Result<(), BackendError> {
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }

        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("mock rejection".to_string()));
        }

        let mut active = self.active.lock().await;
        if !active.insert(description.run_id.clone()) {
            return Err(BackendError::AlreadyExists(description.run_id.clone()));
        }
        self.submissions.lock().await.push(description.clone());
        Ok(())
    }

    async fn cancel(&self, run_id: &str) -> Result<CancelOutcome, BackendError> {
        self.cancellations.lock().await.push(run_id.to_string());

        if self.fail_cancels.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("mock cancel failure".to_string()));
        }

        if self.active.lock().await.remove(run_id) {
            Ok(CancelOutcome::Cancelled)
        } else {
            Ok(CancelOutcome::NotFound)
        }
    }
}
