// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the run lifecycle orchestrator.
//!
//! These run against an in-memory SQLite store and mock collaborators, so
//! they need no external services.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Harness, HarnessOptions, INPUT_LOCATION, request};
use nextflow_launcher::Error;
use nextflow_launcher::backend::{JobTemplateConfig, MockJobBackend};
use nextflow_launcher::clients::{MockAnalysisClient, MockStorageClient};
use nextflow_launcher::handoff::DataHandoff;
use nextflow_launcher::notify::{NotificationSender, RetryPolicy};
use nextflow_launcher::orchestrator::{CreateRunRequest, Health, Orchestrator};
use nextflow_launcher::run::{Credential, Run, RunState, RunStatus};
use nextflow_launcher::store::{RunStore, SqliteRunStore, StoreError, TransitionUpdate};

// ============================================================================
// create
// ============================================================================

#[tokio::test]
async fn test_create_yields_unique_submitted_runs() {
    let harness = Harness::new().await;
    let mut ids = HashSet::new();

    for _ in 0..10 {
        let run_id = harness.submitted_run("a1").await;
        assert_eq!(harness.state_of(&run_id).await, RunState::Submitted);
        assert!(ids.insert(run_id), "run_id issued twice");
    }

    assert_eq!(harness.backend.submissions().await.len(), 10);
}

#[tokio::test]
async fn test_create_stages_input_and_submits_described_job() {
    let harness = Harness::with_options(HarnessOptions {
        storage: MockStorageClient::new().with_object("loc://in", b"DATA"),
        ..HarnessOptions::default()
    })
    .await;

    let run_id = harness
        .orchestrator
        .create(CreateRunRequest {
            analysis_id: "a1".to_string(),
            pipeline_name: Some("rnaseq".to_string()),
            run_args: Some(vec!["--foo".to_string(), "bar".to_string()]),
            credential: Some(Credential::new("cred")),
            input_location: "loc://in".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(harness.state_of(&run_id).await, RunState::Submitted);
    assert_eq!(
        std::fs::read(harness.staging_dir.join(&run_id).join("input")).unwrap(),
        b"DATA"
    );

    let submissions = harness.backend.submissions().await;
    assert_eq!(submissions.len(), 1);
    let job = &submissions[0];
    assert_eq!(job.run_id, run_id);
    assert_eq!(job.pipeline_name, "rnaseq");
    assert_eq!(job.run_args, vec!["--foo", "bar"]);
    assert!(job.command.contains(&"rnaseq".to_string()));
    assert!(job.command.ends_with(&["--foo".to_string(), "bar".to_string()]));
}

#[tokio::test]
async fn test_create_accepts_empty_run_args() {
    let harness = Harness::new().await;
    let mut req = request("a1", "rnaseq");
    req.run_args = Some(vec![]);

    let run_id = harness.orchestrator.create(req).await.unwrap();
    assert_eq!(harness.state_of(&run_id).await, RunState::Submitted);
}

#[tokio::test]
async fn test_create_rejects_missing_fields() {
    let harness = Harness::new().await;

    let mut no_pipeline = request("a1", "rnaseq");
    no_pipeline.pipeline_name = None;
    let mut no_args = request("a1", "rnaseq");
    no_args.run_args = None;
    let mut no_credential = request("a1", "rnaseq");
    no_credential.credential = None;

    for req in [no_pipeline, no_args, no_credential] {
        let result = harness.orchestrator.create(req).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    // Nothing was persisted or fetched.
    assert!(harness.store.list_by_analysis("a1").await.unwrap().is_empty());
    assert_eq!(harness.storage.get_count(), 0);
}

#[tokio::test]
async fn test_create_staging_failure_marks_failed_without_submitting() {
    let harness = Harness::new().await;
    let mut req = request("a1", "rnaseq");
    req.input_location = "missing/object".to_string();

    let run_id = match harness.orchestrator.create(req).await {
        Err(Error::Staging { run_id, .. }) => run_id,
        other => panic!("expected staging error, got {:?}", other),
    };

    assert_eq!(harness.state_of(&run_id).await, RunState::Failed);
    assert!(harness.backend.submissions().await.is_empty());
    assert!(!harness.staging_dir.join(&run_id).exists());
}

#[tokio::test]
async fn test_create_submission_rejected_marks_failed() {
    let harness = Harness::with_options(HarnessOptions {
        backend: MockJobBackend::rejecting(),
        ..HarnessOptions::default()
    })
    .await;

    let run_id = match harness.orchestrator.create(request("a1", "rnaseq")).await {
        Err(Error::Submission { run_id, .. }) => run_id,
        other => panic!("expected submission error, got {:?}", other),
    };

    assert_eq!(harness.state_of(&run_id).await, RunState::Failed);
    assert!(!harness.staging_dir.join(&run_id).exists());
    // A rejection needs no compensating cancel.
    assert!(harness.backend.cancellations().await.is_empty());
}

#[tokio::test]
async fn test_create_submission_timeout_cancels_job() {
    let mut backend = MockJobBackend::new();
    backend.submit_delay = Some(Duration::from_millis(500));
    let harness = Harness::with_options(HarnessOptions {
        backend,
        request_timeout: Duration::from_millis(50),
        ..HarnessOptions::default()
    })
    .await;

    let run_id = match harness.orchestrator.create(request("a1", "rnaseq")).await {
        Err(Error::Submission { run_id, .. }) => run_id,
        other => panic!("expected submission error, got {:?}", other),
    };

    assert_eq!(harness.state_of(&run_id).await, RunState::Failed);
    assert_eq!(harness.backend.cancellations().await, vec![run_id]);
}

// ============================================================================
// conclude
// ============================================================================

#[tokio::test]
async fn test_conclude_success_pushes_notifies_and_cleans_up() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;
    harness.write_result(&run_id, b"counts-matrix");

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, Some(&run_id))
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(outcome.storage_id.as_deref(), Some("storage-1"));
    assert!(outcome.issues.is_clean());
    assert_eq!(outcome.notification_attempts, 1);

    let uploads = harness.storage.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, b"counts-matrix");

    let delivered = harness.analysis.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "a1");
    assert_eq!(delivered[0].1.run_status, RunStatus::Succeeded);
    assert_eq!(delivered[0].1.storage_id.as_deref(), Some("storage-1"));
    assert!(!delivered[0].1.push_failed);

    assert_eq!(harness.backend.cancellations().await, vec![run_id.clone()]);
    assert!(!harness.backend.is_active(&run_id).await);

    let stored = harness.store.get(&run_id).await.unwrap().unwrap();
    assert_eq!(stored.state, RunState::Succeeded);
    assert_eq!(stored.storage_id.as_deref(), Some("storage-1"));
    assert_eq!(stored.notification_attempts, 1);

    assert!(!harness.results_dir.join(&run_id).exists());
    assert!(!harness.staging_dir.join(&run_id).exists());
}

#[tokio::test]
async fn test_conclude_failure_skips_push() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;
    harness.write_result(&run_id, b"partial");

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Failed, Some(&run_id))
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.storage_id, None);
    assert!(!outcome.issues.push_failed);
    assert!(harness.storage.uploads().await.is_empty());

    let delivered = harness.analysis.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1.run_status, RunStatus::Failed);
    assert_eq!(delivered[0].1.storage_id, None);

    // The consumed artifact is removed regardless of outcome.
    assert!(!harness.results_dir.join(&run_id).exists());
}

#[tokio::test]
async fn test_conclude_unknown_run_is_not_found_without_side_effects() {
    let harness = Harness::new().await;

    let result = harness
        .orchestrator
        .conclude("nf-run-unknown", RunStatus::Succeeded, Some("nf-run-unknown"))
        .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(harness.analysis.call_count().await, 0);
    assert!(harness.storage.uploads().await.is_empty());
    assert!(harness.backend.cancellations().await.is_empty());
}

#[tokio::test]
async fn test_second_conclude_conflicts_without_repeating_effects() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;
    harness.write_result(&run_id, b"counts");

    harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, Some(&run_id))
        .await
        .unwrap();
    harness.write_result(&run_id, b"counts");

    let second = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, Some(&run_id))
        .await;

    match second {
        Err(Error::Conflict { state, .. }) => assert_eq!(state, RunState::Succeeded),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(harness.analysis.call_count().await, 1);
    assert_eq!(harness.storage.uploads().await.len(), 1);
    assert_eq!(harness.backend.cancellations().await.len(), 1);
    // A rejected conclude does not consume the artifact.
    assert!(harness.results_dir.join(&run_id).exists());
}

#[tokio::test]
async fn test_concurrent_concludes_apply_once() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;

    let (first, second) = tokio::join!(
        harness
            .orchestrator
            .conclude(&run_id, RunStatus::Failed, None),
        harness
            .orchestrator
            .conclude(&run_id, RunStatus::Failed, None),
    );

    let oks = [&first, &second].iter().filter(|r| r.is_ok()).count();
    let conflicts = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(Error::Conflict { .. })))
        .count();
    assert_eq!((oks, conflicts), (1, 1));
    assert_eq!(harness.analysis.call_count().await, 1);
    assert_eq!(harness.state_of(&run_id).await, RunState::Failed);
}

#[tokio::test]
async fn test_conclude_delivers_on_fifth_attempt() {
    let harness = Harness::with_options(HarnessOptions {
        analysis: MockAnalysisClient::failing_first(4),
        ..HarnessOptions::default()
    })
    .await;
    let run_id = harness.submitted_run("a1").await;

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Failed, None)
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.notification_attempts, 5);
    assert!(!outcome.issues.notification_exhausted);
    assert_eq!(harness.analysis.call_count().await, 5);
    assert_eq!(harness.analysis.delivered().await.len(), 1);

    let stored = harness.store.get(&run_id).await.unwrap().unwrap();
    assert_eq!(stored.notification_attempts, 5);
    assert!(!stored.issues.notification_exhausted);
}

#[tokio::test]
async fn test_conclude_records_exhausted_notification() {
    let harness = Harness::with_options(HarnessOptions {
        analysis: MockAnalysisClient::always_failing(),
        ..HarnessOptions::default()
    })
    .await;
    let run_id = harness.submitted_run("a1").await;
    harness.write_result(&run_id, b"counts");

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, Some(&run_id))
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Succeeded);
    assert!(outcome.issues.notification_exhausted);
    assert_eq!(harness.analysis.call_count().await, 5);
    // Job teardown still happens.
    assert_eq!(harness.backend.cancellations().await, vec![run_id.clone()]);

    let stored = harness.store.get(&run_id).await.unwrap().unwrap();
    assert_eq!(stored.state, RunState::Succeeded);
    assert!(stored.issues.notification_exhausted);
}

#[tokio::test]
async fn test_conclude_push_failure_is_flagged_not_fatal() {
    let harness = Harness::with_options(HarnessOptions {
        storage: MockStorageClient::new()
            .with_object(INPUT_LOCATION, b"fastq")
            .failing_puts(),
        ..HarnessOptions::default()
    })
    .await;
    let run_id = harness.submitted_run("a1").await;
    harness.write_result(&run_id, b"counts");

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, Some(&run_id))
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(outcome.storage_id, None);
    assert!(outcome.issues.push_failed);

    let delivered = harness.analysis.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].1.push_failed);
    assert_eq!(delivered[0].1.storage_id, None);
}

#[tokio::test]
async fn test_conclude_without_result_location_flags_push() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, None)
        .await
        .unwrap();

    assert!(outcome.issues.push_failed);
    assert!(harness.storage.uploads().await.is_empty());
}

#[tokio::test]
async fn test_conclude_refuses_result_outside_results_root() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, Some("../../etc/passwd"))
        .await
        .unwrap();

    assert!(outcome.issues.push_failed);
    assert!(harness.storage.uploads().await.is_empty());
}

#[tokio::test]
async fn test_conclude_with_root_location_keeps_other_results() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;
    let sibling = harness.submitted_run("a1").await;
    harness.write_result(&sibling, b"sibling-counts");

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Failed, Some("."))
        .await
        .unwrap();
    assert_eq!(outcome.state, RunState::Failed);

    assert!(harness.results_dir.exists());
    assert_eq!(
        std::fs::read(harness.results_dir.join(&sibling)).unwrap(),
        b"sibling-counts"
    );

    let outcome = harness
        .orchestrator
        .conclude(&sibling, RunStatus::Succeeded, Some(&sibling))
        .await
        .unwrap();
    assert!(outcome.issues.is_clean());
    assert_eq!(harness.storage.uploads().await[0].1, b"sibling-counts");
}

#[tokio::test]
async fn test_conclude_pushes_published_directory_as_archive() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;
    let out_dir = harness.results_dir.join(&run_id);
    std::fs::create_dir_all(out_dir.join("star_salmon")).unwrap();
    std::fs::write(out_dir.join("star_salmon/salmon.merged.gene_counts.tsv"), b"counts").unwrap();

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, Some(&run_id))
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Succeeded);
    assert!(outcome.issues.is_clean());
    let uploads = harness.storage.uploads().await;
    assert_eq!(uploads.len(), 1);

    let mut archive = tar::Archive::new(std::io::Cursor::new(uploads[0].1.clone()));
    let paths: Vec<std::path::PathBuf> = archive
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap().path().unwrap().into_owned())
        .collect();
    assert!(paths.contains(
        &std::path::Path::new(&run_id).join("star_salmon/salmon.merged.gene_counts.tsv")
    ));
    assert!(!out_dir.exists());
}

#[tokio::test]
async fn test_conclude_cancel_failure_still_reaches_terminal_state() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;
    harness.backend.set_fail_cancels(true);

    let outcome = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Failed, None)
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert!(outcome.issues.cancellation_failed);
    let stored = harness.store.get(&run_id).await.unwrap().unwrap();
    assert!(stored.issues.cancellation_failed);
}

// ============================================================================
// interrupt
// ============================================================================

#[tokio::test]
async fn test_interrupt_stops_only_active_runs() {
    let harness = Harness::new().await;

    let finished = harness.submitted_run("a1").await;
    harness
        .orchestrator
        .conclude(&finished, RunStatus::Failed, None)
        .await
        .unwrap();

    let mut active = Vec::new();
    for _ in 0..3 {
        active.push(harness.submitted_run("a1").await);
    }
    let other_analysis = harness.submitted_run("a2").await;
    let notifications_before = harness.analysis.call_count().await;

    let stopped = harness.orchestrator.interrupt("a1").await.unwrap();

    assert_eq!(stopped, 3);
    for run_id in &active {
        assert_eq!(harness.state_of(run_id).await, RunState::Stopped);
        assert!(!harness.backend.is_active(run_id).await);
        assert!(!harness.staging_dir.join(run_id).exists());
    }
    assert_eq!(harness.state_of(&finished).await, RunState::Failed);
    assert_eq!(harness.state_of(&other_analysis).await, RunState::Submitted);
    assert_eq!(harness.analysis.call_count().await, notifications_before);
    assert!(harness.storage.uploads().await.is_empty());
}

#[tokio::test]
async fn test_interrupt_unknown_analysis_stops_nothing() {
    let harness = Harness::new().await;
    assert_eq!(harness.orchestrator.interrupt("nobody").await.unwrap(), 0);
}

#[tokio::test]
async fn test_conclude_after_interrupt_conflicts() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;
    harness.orchestrator.interrupt("a1").await.unwrap();

    let result = harness
        .orchestrator
        .conclude(&run_id, RunStatus::Succeeded, Some(&run_id))
        .await;

    match result {
        Err(Error::Conflict { state, .. }) => assert_eq!(state, RunState::Stopped),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(harness.analysis.call_count().await, 0);
}

#[tokio::test]
async fn test_interrupt_stops_created_and_staged_runs() {
    let harness = Harness::new().await;

    let created = Run::new("a1", "rnaseq", Vec::new(), Credential::new("t"));
    let mut staged = Run::new("a1", "rnaseq", Vec::new(), Credential::new("t"));
    staged.state = RunState::InputStaged;
    harness.store.insert(&created).await.unwrap();
    harness.store.insert(&staged).await.unwrap();
    std::fs::create_dir_all(harness.staging_dir.join(&staged.run_id)).unwrap();

    let stopped = harness.orchestrator.interrupt("a1").await.unwrap();

    assert_eq!(stopped, 2);
    assert_eq!(harness.state_of(&created.run_id).await, RunState::Stopped);
    assert_eq!(harness.state_of(&staged.run_id).await, RunState::Stopped);
    assert!(!harness.staging_dir.join(&staged.run_id).exists());
}

#[tokio::test]
async fn test_interrupt_during_notification_tears_down_but_leaves_terminal_write() {
    let harness = Harness::with_options(HarnessOptions {
        analysis: MockAnalysisClient::new().with_latency(Duration::from_millis(300)),
        ..HarnessOptions::default()
    })
    .await;
    let run_id = harness.submitted_run("a1").await;

    let orchestrator = harness.orchestrator.clone();
    let concluding_id = run_id.clone();
    let conclude = tokio::spawn(async move {
        orchestrator
            .conclude(&concluding_id, RunStatus::Failed, None)
            .await
    });

    while harness.state_of(&run_id).await != RunState::Concluding {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stopped = harness.orchestrator.interrupt("a1").await.unwrap();

    assert_eq!(stopped, 0);
    assert_eq!(harness.backend.cancellations().await, vec![run_id.clone()]);
    assert!(!harness.backend.is_active(&run_id).await);
    assert_eq!(harness.state_of(&run_id).await, RunState::Concluding);

    let outcome = conclude.await.unwrap().unwrap();
    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(harness.state_of(&run_id).await, RunState::Failed);
    assert_eq!(harness.analysis.call_count().await, 1);
}

/// Store whose transitions fail for one chosen run or into one chosen state.
struct FailingTransitions {
    inner: SqliteRunStore,
    failing_run: std::sync::Mutex<Option<String>>,
    failing_target: std::sync::Mutex<Option<RunState>>,
}

impl FailingTransitions {
    async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteRunStore::in_memory().await.unwrap(),
            failing_run: std::sync::Mutex::new(None),
            failing_target: std::sync::Mutex::new(None),
        })
    }
}

fn orchestrator_over(
    store: Arc<FailingTransitions>,
    backend: Arc<MockJobBackend>,
    temp_dir: &tempfile::TempDir,
) -> Orchestrator {
    let storage = Arc::new(MockStorageClient::new().with_object(INPUT_LOCATION, b"reads"));
    Orchestrator::new(
        store,
        backend,
        DataHandoff::new(
            storage,
            temp_dir.path().join("staging"),
            temp_dir.path().join("results"),
            Duration::from_secs(5),
        ),
        NotificationSender::new(
            Arc::new(MockAnalysisClient::new()),
            RetryPolicy::default(),
            Duration::from_secs(5),
        ),
        JobTemplateConfig::default(),
        Duration::from_secs(5),
    )
}

#[async_trait]
impl RunStore for FailingTransitions {
    fn store_type(&self) -> &'static str {
        "failing"
    }

    async fn insert(&self, run: &Run) -> Result<(), StoreError> {
        self.inner.insert(run).await
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        self.inner.get(run_id).await
    }

    async fn list_by_analysis(&self, analysis_id: &str) -> Result<Vec<Run>, StoreError> {
        self.inner.list_by_analysis(analysis_id).await
    }

    async fn transition(
        &self,
        run_id: &str,
        from: RunState,
        to: RunState,
        update: &TransitionUpdate,
    ) -> Result<bool, StoreError> {
        let failing_run = self.failing_run.lock().unwrap().clone();
        let failing_target = *self.failing_target.lock().unwrap();
        if failing_run.as_deref() == Some(run_id) || failing_target == Some(to) {
            return Err(StoreError::Timeout("transition"));
        }
        self.inner.transition(run_id, from, to, update).await
    }

    async fn delete(&self, run_id: &str) -> Result<bool, StoreError> {
        self.inner.delete(run_id).await
    }

    async fn list_stale(
        &self,
        state: RunState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Run>, StoreError> {
        self.inner.list_stale(state, updated_before).await
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn test_interrupt_continues_past_store_error() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let store = FailingTransitions::new().await;
    let backend = Arc::new(MockJobBackend::new());
    let orchestrator = orchestrator_over(store.clone(), backend.clone(), &temp_dir);

    let mut run_ids = Vec::new();
    for _ in 0..3 {
        run_ids.push(orchestrator.create(request("a1", "rnaseq")).await.unwrap());
    }
    *store.failing_run.lock().unwrap() = Some(run_ids[0].clone());

    let stopped = orchestrator.interrupt("a1").await.unwrap();

    assert_eq!(stopped, 2);
    let state = |run_id: &String| {
        let store = store.clone();
        let run_id = run_id.clone();
        async move { store.inner.get(&run_id).await.unwrap().unwrap().state }
    };
    assert_eq!(state(&run_ids[0]).await, RunState::Submitted);
    assert_eq!(state(&run_ids[1]).await, RunState::Stopped);
    assert_eq!(state(&run_ids[2]).await, RunState::Stopped);
    assert!(backend.is_active(&run_ids[0]).await);
}

#[tokio::test]
async fn test_create_cancels_job_when_submission_cannot_be_recorded() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let store = FailingTransitions::new().await;
    *store.failing_target.lock().unwrap() = Some(RunState::Submitted);
    let backend = Arc::new(MockJobBackend::new());
    let orchestrator = orchestrator_over(store.clone(), backend.clone(), &temp_dir);

    let result = orchestrator.create(request("a1", "rnaseq")).await;

    assert!(matches!(result, Err(Error::Store(StoreError::Timeout("transition")))));
    let submissions = backend.submissions().await;
    assert_eq!(submissions.len(), 1);
    let run_id = &submissions[0].run_id;
    assert_eq!(backend.cancellations().await, vec![run_id.clone()]);
    assert!(!backend.is_active(run_id).await);
    let stored = store.inner.get(run_id).await.unwrap().unwrap();
    assert_eq!(stored.state, RunState::InputStaged);
}

// ============================================================================
// reconcile / health / get
// ============================================================================

#[tokio::test]
async fn test_reconcile_fails_stale_concluding_runs() {
    let harness = Harness::new().await;
    let stuck = harness.submitted_run("a1").await;
    let healthy = harness.submitted_run("a1").await;
    harness
        .store
        .transition(
            &stuck,
            RunState::Submitted,
            RunState::Concluding,
            &TransitionUpdate::default(),
        )
        .await
        .unwrap();

    let failed = harness
        .orchestrator
        .reconcile_stale(Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(failed, 1);
    assert_eq!(harness.state_of(&stuck).await, RunState::Failed);
    assert_eq!(harness.state_of(&healthy).await, RunState::Submitted);
    assert!(harness.backend.cancellations().await.contains(&stuck));
    assert_eq!(harness.analysis.call_count().await, 0);
}

#[tokio::test]
async fn test_reconcile_leaves_recent_concluding_runs() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;
    harness
        .store
        .transition(
            &run_id,
            RunState::Submitted,
            RunState::Concluding,
            &TransitionUpdate::default(),
        )
        .await
        .unwrap();

    let failed = harness
        .orchestrator
        .reconcile_stale(Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(failed, 0);
    assert_eq!(harness.state_of(&run_id).await, RunState::Concluding);
}

#[tokio::test]
async fn test_health_ok_with_reachable_store() {
    let harness = Harness::new().await;
    assert_eq!(harness.orchestrator.health().await, Health::Ok);
}

#[tokio::test]
async fn test_get_returns_run_or_not_found() {
    let harness = Harness::new().await;
    let run_id = harness.submitted_run("a1").await;

    let run = harness.orchestrator.get(&run_id).await.unwrap();
    assert_eq!(run.analysis_id, "a1");
    assert_eq!(run.pipeline_name, "rnaseq");
    assert_eq!(run.credential.expose(), "token-abc");

    assert!(matches!(
        harness.orchestrator.get("nf-run-missing").await,
        Err(Error::NotFound(_))
    ));
}
