// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Collaborator ports consumed by ingestion sessions.
//!
//! All ports are synchronous and take `&self`; implementations guard their own
//! state. Sessions hold them as `Arc<dyn ...>` inside an [`IngestContext`].

use std::sync::Arc;

use ion_dataset::{DataSourceDescriptor, Dataset, DatasetId};
use ion_proto::{BlobKey, OutcomeEvent};
use serde::{Deserialize, Serialize};

use crate::config::IngestSettings;
use crate::error::StoreError;

/// Dataset resource metadata maintained alongside the stored dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetResource {
    /// Dataset id.
    pub id: DatasetId,
    /// Human readable title.
    pub title: Option<String>,
    /// Upstream url.
    pub url: Option<String>,
    /// Data source feeding the dataset.
    pub data_source_id: String,
    /// Last committed revision.
    pub revision: u64,
}

/// Registry resources the session reads and updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    /// Data source descriptor (merge policy).
    DataSource(DataSourceDescriptor),
    /// Dataset metadata.
    Dataset(DatasetResource),
}

impl Resource {
    /// Registry id of the resource.
    pub fn id(&self) -> &str {
        match self {
            Resource::DataSource(d) => &d.id,
            Resource::Dataset(d) => d.id.as_str(),
        }
    }
}

/// Resource registry.
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource by id.
    fn get(&self, id: &str) -> Result<Resource, StoreError>;
    /// Create or replace a resource.
    fn put(&self, resource: Resource) -> Result<(), StoreError>;
}

/// Opaque branch handle issued by a [`DatasetStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchKey(pub String);

impl std::fmt::Display for BranchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Versioned dataset store (commit/branch/merge/checkout contract only).
pub trait DatasetStore: Send + Sync {
    /// Take exclusive checkout of a dataset; fails while another checkout is
    /// outstanding.
    fn checkout(&self, id: &DatasetId) -> Result<Dataset, StoreError>;
    /// Open a speculative branch off the checked-out head.
    fn create_branch(&self, id: &DatasetId) -> Result<BranchKey, StoreError>;
    /// Fold `branch`, carrying `merged` as its content, into the head. The
    /// branch no longer exists afterwards.
    fn merge_branch(
        &self,
        id: &DatasetId,
        branch: &BranchKey,
        merged: Dataset,
    ) -> Result<(), StoreError>;
    /// Number of branches, the head included.
    fn branch_count(&self, id: &DatasetId) -> Result<usize, StoreError>;
    /// Persist the head; returns the new revision.
    fn commit(&self, id: &DatasetId, message: &str) -> Result<u64, StoreError>;
    /// Drop a speculative branch.
    fn remove_branch(&self, id: &DatasetId, branch: &BranchKey) -> Result<(), StoreError>;
    /// Give up the checkout.
    fn release(&self, id: &DatasetId) -> Result<(), StoreError>;
}

/// Blob store holding remote chunk payloads.
pub trait BlobStore: Send + Sync {
    /// Fetch every key, in order. Missing keys are an error.
    fn fetch(&self, keys: &[BlobKey]) -> Result<Vec<Vec<u8>>, StoreError>;
}

/// Outcome event sink.
pub trait EventPublisher: Send + Sync {
    /// Publish an event; delivery is fire-and-forget.
    fn publish(&self, event: OutcomeEvent) -> Result<(), StoreError>;
}

/// Collaborators and settings shared by every session of a controller.
#[derive(Clone)]
pub struct IngestContext {
    /// Resource registry.
    pub resources: Arc<dyn ResourceStore>,
    /// Versioned dataset store.
    pub datasets: Arc<dyn DatasetStore>,
    /// Remote payload store.
    pub blobs: Arc<dyn BlobStore>,
    /// Outcome event sink.
    pub events: Arc<dyn EventPublisher>,
    /// Tunables.
    pub settings: IngestSettings,
}

impl std::fmt::Debug for IngestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl IngestContext {
    /// Fetch a data source descriptor.
    pub fn data_source(&self, id: &str) -> Result<DataSourceDescriptor, StoreError> {
        match self.resources.get(id)? {
            Resource::DataSource(d) => Ok(d),
            Resource::Dataset(_) => Err(StoreError::WrongKind {
                id: id.to_string(),
                expected: "data source",
            }),
        }
    }

    /// Fetch dataset metadata; `None` when the registry has no entry yet.
    pub fn dataset_resource(&self, id: &DatasetId) -> Result<Option<DatasetResource>, StoreError> {
        match self.resources.get(id.as_str()) {
            Ok(Resource::Dataset(d)) => Ok(Some(d)),
            Ok(Resource::DataSource(_)) => Err(StoreError::WrongKind {
                id: id.to_string(),
                expected: "dataset",
            }),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
