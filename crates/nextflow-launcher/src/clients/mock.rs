// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory storage and analysis clients for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::analysis::{AnalysisClient, NotifyError};
use super::storage::{StorageClient, StorageError};
use crate::notify::CompletionReport;
use crate::run::Credential;

/// Storage stub backed by a map of objects; records every upload.
#[derive(Default)]
pub struct MockStorageClient {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    gets: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MockStorageClient {
    /// Empty storage; every `get` returns 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object that `get(location)` will return.
    pub fn with_object(mut self, location: &str, bytes: &[u8]) -> Self {
        self.objects
            .get_mut()
            .insert(location.to_string(), bytes.to_vec());
        self
    }

    /// Make every `put` fail with HTTP 500.
    pub fn failing_puts(self) -> Self {
        self.fail_puts.store(true, Ordering::SeqCst);
        self
    }

    /// Number of `get` calls made.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Successful uploads as `(name, bytes)`, in order.
    pub async fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().await.clone()
    }
}

#[async_trait]
impl StorageClient for MockStorageClient {
    async fn get(&self, location: &str, _credential: &Credential) -> Result<Vec<u8>, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| StorageError::Status {
                status: 404,
                body: format!("no object {}", location),
            })
    }

    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        _credential: &Credential,
    ) -> Result<String, StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                status: 500,
                body: "mock upload failure".to_string(),
            });
        }

        let mut uploads = self.uploads.lock().await;
        uploads.push((name.to_string(), bytes));
        Ok(format!("storage-{}", uploads.len()))
    }
}

/// Analysis stub that can be scripted to fail.
#[derive(Default)]
pub struct MockAnalysisClient {
    attempts: Mutex<Vec<(String, CompletionReport)>>,
    delivered: Mutex<Vec<(String, CompletionReport)>>,
    failures_remaining: AtomicU32,
    always_fail: bool,
    latency: Option<Duration>,
}

impl MockAnalysisClient {
    /// Accepts every report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `n` attempts with HTTP 503, then accepts.
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// Fails every attempt with HTTP 503.
    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    /// Delay every attempt by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of attempts received, failed ones included.
    pub async fn call_count(&self) -> usize {
        self.attempts.lock().await.len()
    }

    /// Accepted reports as `(analysis_id, report)`.
    pub async fn delivered(&self) -> Vec<(String, CompletionReport)> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl AnalysisClient for MockAnalysisClient {
    async fn post(
        &self,
        analysis_id: &str,
        _credential: &Credential,
        report: &CompletionReport,
    ) -> Result<(), NotifyError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.attempts
            .lock()
            .await
            .push((analysis_id.to_string(), report.clone()));

        if self.always_fail {
            return Err(NotifyError::Status(503));
        }
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(NotifyError::Status(503));
        }

        self.delivered
            .lock()
            .await
            .push((analysis_id.to_string(), report.clone()));
        Ok(())
    }
}
