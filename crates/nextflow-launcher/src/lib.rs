// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Nextflow Launcher - Run Lifecycle Orchestration
//!
//! This crate launches, tracks and concludes isolated Nextflow pipeline runs
//! on behalf of requesting analyses. Input is staged from object storage
//! before submission, results are pushed back after execution, and the
//! owning analysis is notified of completion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Analysis services / Nextflow jobs                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ HTTP
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   nextflow-launcher (This Crate)                         │
//! │                         Port 8000                                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │    Data     │  │     Run     │  │Notification │  │ Reconciler  │     │
//! │  │   Handoff   │  │Orchestrator │  │   Sender    │  │  + Sweeper  │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                 │                │
//!           ▼                 ▼                ▼
//!   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!   │    Object    │  │  Kubernetes  │  │   Analysis   │
//!   │   storage    │  │   batch/v1   │  │   service    │
//!   └──────────────┘  └──────────────┘  └──────────────┘
//!                             │
//!                             ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                     PostgreSQL / SQLite                                │
//! │                        (Run records)                                   │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # HTTP Routes
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /nextflow/run` | Create a run, stage its input and submit the job |
//! | `POST /nextflow/conclude` | Completion report from the job; pushes, notifies, cleans up |
//! | `POST /nextflow/stop/{analysis_id}` | Stop every active run of an analysis |
//! | `GET /nextflow/healthz` | `ok` when the record store answers |
//! | `GET /nextflow/runs/{run_id}` | Current run record (credential omitted) |
//!
//! # Run State Machine
//!
//! ```text
//!   ┌─────────┐  fetch ok  ┌──────────────┐  submit ok  ┌───────────┐
//!   │ CREATED │───────────►│ INPUT_STAGED │────────────►│ SUBMITTED │
//!   └────┬────┘            └──────┬───────┘             └─────┬─────┘
//!        │ fetch failed           │ submit failed             │ conclude
//!        ▼                        ▼                           ▼
//!   ┌────────┐               ┌────────┐               ┌────────────┐
//!   │ FAILED │◄──────────────│ FAILED │               │ CONCLUDING │
//!   └────────┘   stale       └────────┘               └─────┬──────┘
//!                                                 ┌─────────┴────────┐
//!   Created / InputStaged / Submitted             ▼                  ▼
//!          ── interrupt ──► STOPPED         ┌───────────┐       ┌────────┐
//!                                           │ SUCCEEDED │       │ FAILED │
//!                                           └───────────┘       └────────┘
//! ```
//!
//! Every transition is a compare-and-swap in the record store, so concurrent
//! requests for the same run (and several launcher instances) never apply
//! side effects twice.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `LAUNCHER_DATABASE_URL` | Yes | - | `postgres://...` or `sqlite:...` |
//! | `LAUNCHER_HTTP_PORT` | No | `8000` | HTTP server port |
//! | `LAUNCHER_STAGING_DIR` | No | `.data/staging` | Per-run input staging root |
//! | `LAUNCHER_RESULTS_DIR` | No | `.data/results` | Root for reported result locations |
//! | `LAUNCHER_REQUEST_TIMEOUT_SECS` | No | `30` | Timeout for every collaborator call |
//! | `LAUNCHER_STORAGE_URL` | No | `http://flame-result-service:8080/storage` | Storage service |
//! | `LAUNCHER_ANALYSIS_URL_TEMPLATE` | No | `http://nginx-{analysis_id}:80/analysis` | Analysis service |
//! | `LAUNCHER_CONCLUDE_URL` | No | `http://nextflow-launcher:8000/nextflow/conclude` | Passed to jobs |
//! | `LAUNCHER_NOTIFY_MAX_ATTEMPTS` | No | `5` | Notification attempts |
//! | `LAUNCHER_NOTIFY_BASE_DELAY_MS` | No | `1000` | Notification backoff base |
//! | `LAUNCHER_STALE_CONCLUDING_SECS` | No | `900` | Reconciler threshold |
//! | `LAUNCHER_STAGING_MAX_AGE_SECS` | No | `86400` | Staging sweeper threshold |
//! | `KUBERNETES_API_URL` | No | `https://kubernetes.default.svc` | Kubernetes API server |
//! | `NF_*` | No | see [`config`] | Job template (image, namespace, volumes) |
//!
//! # Modules
//!
//! - [`backend`]: Job submission and cancellation (Kubernetes, mock)
//! - [`clients`]: Storage and analysis service clients
//! - [`config`]: Configuration from environment variables
//! - [`handoff`]: Input staging and result push
//! - [`notify`]: Completion notification with retry
//! - [`orchestrator`]: The run state machine
//! - [`server`]: HTTP routes
//! - [`store`]: Run record persistence
//! - [`runtime`]: Embeddable runtime tying it all together

#![deny(missing_docs)]

/// Job backends: job description building, Kubernetes adapter and mock.
pub mod backend;

/// Background worker for sweeping orphaned staging directories.
pub mod cleanup_worker;

/// HTTP clients for the storage and analysis services.
pub mod clients;

/// Launcher configuration loaded from environment variables.
pub mod config;

/// Error types for launcher operations.
pub mod error;

/// Moving run data between object storage and local files.
pub mod handoff;

/// Completion notification with bounded retry.
pub mod notify;

/// Run lifecycle orchestration.
pub mod orchestrator;

/// Background worker for failing runs stuck in `concluding`.
pub mod reconciler;

/// Run entity, states and identifiers.
pub mod run;

/// Embeddable runtime for nextflow-launcher.
pub mod runtime;

/// HTTP server for the `/nextflow` routes.
pub mod server;

/// Run record persistence (PostgreSQL, SQLite).
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
