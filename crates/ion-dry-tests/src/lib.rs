// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for ion crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`stores`] - In-memory versioned dataset store and resource registry
//! - [`blobs`] - In-memory blob store for remote chunk payloads
//! - [`events`] - Outcome event recorder
//! - [`settings`] - In-memory settings store
//! - [`fixtures`] - Supplement stream builders

pub mod blobs;
pub mod events;
pub mod fixtures;
pub mod settings;
pub mod stores;

pub use blobs::MemoryBlobStore;
pub use events::RecordingPublisher;
pub use fixtures::{done_ok, done_with, temp_at, SupplementStream, DEPTH, UNITS};
pub use settings::InMemorySettingsStore;
pub use stores::{InMemoryDatasetStore, InMemoryResourceStore};

use std::sync::Arc;

use ion_dataset::{AggregationRule, DataSourceDescriptor, DatasetId};
use ion_proto::PerformIngest;
use ion_session::{IngestContext, IngestSettings, IngestionController};

/// Data source id registered by [`Harness::new`].
pub const SOURCE_ID: &str = "src-1";

/// One of each fake, wired into an [`IngestContext`].
#[derive(Clone, Default)]
pub struct Harness {
    /// Dataset store.
    pub datasets: InMemoryDatasetStore,
    /// Resource registry.
    pub resources: InMemoryResourceStore,
    /// Blob store.
    pub blobs: MemoryBlobStore,
    /// Event recorder.
    pub events: RecordingPublisher,
    /// Settings handed to the context.
    pub settings: IngestSettings,
}

impl Harness {
    /// Fakes with one data source using `rule` along `time`.
    pub fn new(rule: AggregationRule) -> Self {
        Self::with_source(DataSourceDescriptor::new(SOURCE_ID, rule))
    }

    /// Fakes with `source` registered.
    pub fn with_source(source: DataSourceDescriptor) -> Self {
        Self {
            resources: InMemoryResourceStore::with_data_source(source),
            ..Self::default()
        }
    }

    /// Context over the fakes.
    pub fn context(&self) -> IngestContext {
        IngestContext {
            resources: Arc::new(self.resources.clone()),
            datasets: Arc::new(self.datasets.clone()),
            blobs: Arc::new(self.blobs.clone()),
            events: Arc::new(self.events.clone()),
            settings: self.settings.clone(),
        }
    }

    /// Controller over the fakes.
    pub fn controller(&self) -> IngestionController {
        IngestionController::new(self.context())
    }
}

/// Ingest request for `dataset_id` from [`SOURCE_ID`].
pub fn perform_ingest(dataset_id: &str, timeout_seconds: u64) -> PerformIngest {
    PerformIngest {
        dataset_id: DatasetId::from(dataset_id),
        datasource_id: SOURCE_ID.to_string(),
        reply_to: "producer".to_string(),
        timeout_seconds,
    }
}
