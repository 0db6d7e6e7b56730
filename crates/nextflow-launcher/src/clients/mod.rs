// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP clients for the storage and analysis services.

pub mod analysis;
pub mod mock;
pub mod storage;

pub use analysis::{AnalysisClient, HttpAnalysisClient, NotifyError};
pub use mock::{MockAnalysisClient, MockStorageClient};
pub use storage::{HttpStorageClient, StorageClient, StorageError};
