// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for nextflow-launcher integration tests.
//!
//! Provides [`Harness`], an orchestrator wired to an in-memory SQLite store,
//! mock collaborators and a temporary directory for staging and results.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nextflow_launcher::backend::{JobTemplateConfig, MockJobBackend};
use nextflow_launcher::clients::{MockAnalysisClient, MockStorageClient};
use nextflow_launcher::handoff::DataHandoff;
use nextflow_launcher::notify::{NotificationSender, RetryPolicy};
use nextflow_launcher::orchestrator::{CreateRunRequest, Orchestrator};
use nextflow_launcher::run::Credential;
use nextflow_launcher::store::{RunStore, SqliteRunStore};

/// Storage location every default request fetches from.
pub const INPUT_LOCATION: &str = "analysis-input/reads.tar";

/// Orchestrator plus handles on every collaborator it talks to.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<SqliteRunStore>,
    pub backend: Arc<MockJobBackend>,
    pub storage: Arc<MockStorageClient>,
    pub analysis: Arc<MockAnalysisClient>,
    pub staging_dir: PathBuf,
    pub results_dir: PathBuf,
    _temp_dir: tempfile::TempDir,
}

/// Builder-style knobs for [`Harness`].
pub struct HarnessOptions {
    pub backend: MockJobBackend,
    pub storage: MockStorageClient,
    pub analysis: MockAnalysisClient,
    pub request_timeout: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            backend: MockJobBackend::new(),
            storage: MockStorageClient::new().with_object(INPUT_LOCATION, b"fastq-bytes"),
            analysis: MockAnalysisClient::new(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Harness {
    /// Harness with accepting collaborators.
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    /// Harness with the given collaborators.
    pub async fn with_options(options: HarnessOptions) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let staging_dir = temp_dir.path().join("staging");
        let results_dir = temp_dir.path().join("results");
        std::fs::create_dir_all(&results_dir).expect("Failed to create results dir");

        let store = Arc::new(
            SqliteRunStore::in_memory()
                .await
                .expect("Failed to open in-memory store"),
        );
        let backend = Arc::new(options.backend);
        let storage = Arc::new(options.storage);
        let analysis = Arc::new(options.analysis);

        let handoff = DataHandoff::new(
            storage.clone(),
            staging_dir.clone(),
            results_dir.clone(),
            options.request_timeout,
        );
        // Millisecond backoff keeps the retry tests fast.
        let notifier = NotificationSender::new(
            analysis.clone(),
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
            },
            options.request_timeout,
        );

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            backend.clone(),
            handoff,
            notifier,
            JobTemplateConfig::default(),
            options.request_timeout,
        ));

        Self {
            orchestrator,
            store,
            backend,
            storage,
            analysis,
            staging_dir,
            results_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Write a result artifact named `name` under the results root.
    pub fn write_result(&self, name: &str, bytes: &[u8]) {
        std::fs::write(self.results_dir.join(name), bytes).expect("Failed to write result");
    }

    /// Create a run and return its ID, panicking on failure.
    pub async fn submitted_run(&self, analysis_id: &str) -> String {
        self.orchestrator
            .create(request(analysis_id, "rnaseq"))
            .await
            .expect("Failed to create run")
    }

    /// Current state of a run as stored.
    pub async fn state_of(&self, run_id: &str) -> nextflow_launcher::run::RunState {
        self.store
            .get(run_id)
            .await
            .expect("Store lookup failed")
            .expect("Run missing")
            .state
    }
}

/// A complete, valid create request.
pub fn request(analysis_id: &str, pipeline_name: &str) -> CreateRunRequest {
    CreateRunRequest {
        analysis_id: analysis_id.to_string(),
        pipeline_name: Some(pipeline_name.to_string()),
        run_args: Some(vec!["--genome".to_string(), "GRCh38".to_string()]),
        credential: Some(Credential::new("token-abc")),
        input_location: INPUT_LOCATION.to_string(),
    }
}
