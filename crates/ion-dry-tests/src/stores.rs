// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory dataset and resource stores.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use ion_dataset::{DataSourceDescriptor, Dataset, DatasetId};
use ion_session::{BranchKey, DatasetStore, Resource, ResourceStore, StoreError};

/// Versioned dataset store fake.
///
/// Each dataset has a committed version and, while checked out, a working
/// head. `release` drops anything not committed. Unknown datasets check out
/// as empty datasets so a first ingest needs no seeding.
#[derive(Clone, Default)]
pub struct InMemoryDatasetStore {
    inner: Arc<Mutex<DatasetStoreInner>>,
}

#[derive(Default)]
struct DatasetStoreInner {
    entries: HashMap<DatasetId, Entry>,
    next_branch: u64,
    fail_on_commit: bool,
    leak_branch: bool,
}

#[derive(Default)]
struct Entry {
    committed: Option<Dataset>,
    head: Option<Dataset>,
    branches: BTreeSet<String>,
    checked_out: bool,
    revision: u64,
    messages: Vec<String>,
}

impl InMemoryDatasetStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut DatasetStoreInner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    /// Store `dataset` as the committed version of its id.
    pub fn seed(&self, dataset: Dataset) {
        self.with_inner(|inner| {
            let entry = inner.entries.entry(dataset.id.clone()).or_default();
            entry.committed = Some(dataset);
        });
    }

    /// Committed version of `id`, if any.
    pub fn committed(&self, id: &DatasetId) -> Option<Dataset> {
        self.with_inner(|inner| inner.entries.get(id).and_then(|e| e.committed.clone()))
    }

    /// Number of commits made to `id`.
    pub fn revision(&self, id: &DatasetId) -> u64 {
        self.with_inner(|inner| inner.entries.get(id).map_or(0, |e| e.revision))
    }

    /// Commit messages for `id`, oldest first.
    pub fn commit_messages(&self, id: &DatasetId) -> Vec<String> {
        self.with_inner(|inner| {
            inner
                .entries
                .get(id)
                .map(|e| e.messages.clone())
                .unwrap_or_default()
        })
    }

    /// Branches of `id` including the head.
    pub fn branches(&self, id: &DatasetId) -> usize {
        self.with_inner(|inner| 1 + inner.entries.get(id).map_or(0, |e| e.branches.len()))
    }

    /// True while a session holds the checkout of `id`.
    pub fn is_checked_out(&self, id: &DatasetId) -> bool {
        self.with_inner(|inner| inner.entries.get(id).is_some_and(|e| e.checked_out))
    }

    /// Make `commit` fail.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.with_inner(|inner| inner.fail_on_commit = fail);
    }

    /// Make `create_branch` open a second, stray branch alongside the one it
    /// returns.
    pub fn set_leak_branch(&self, leak: bool) {
        self.with_inner(|inner| inner.leak_branch = leak);
    }
}

fn checked_out<'a>(
    entries: &'a mut HashMap<DatasetId, Entry>,
    id: &DatasetId,
) -> Result<&'a mut Entry, StoreError> {
    entries
        .get_mut(id)
        .filter(|e| e.checked_out)
        .ok_or_else(|| StoreError::Unavailable(format!("dataset {id} is not checked out")))
}

impl DatasetStore for InMemoryDatasetStore {
    fn checkout(&self, id: &DatasetId) -> Result<Dataset, StoreError> {
        self.with_inner(|inner| {
            let entry = inner.entries.entry(id.clone()).or_default();
            if entry.checked_out {
                return Err(StoreError::CheckoutConflict(id.clone()));
            }
            let head = entry
                .committed
                .clone()
                .unwrap_or_else(|| Dataset::new(id.clone()));
            entry.checked_out = true;
            entry.head = Some(head.clone());
            Ok(head)
        })
    }

    fn create_branch(&self, id: &DatasetId) -> Result<BranchKey, StoreError> {
        self.with_inner(|inner| {
            inner.next_branch += 1;
            let key = format!("{id}/branch-{}", inner.next_branch);
            let stray = format!("{id}/stray-{}", inner.next_branch);
            let leak = inner.leak_branch;
            let entry = checked_out(&mut inner.entries, id)?;
            entry.branches.insert(key.clone());
            if leak {
                entry.branches.insert(stray);
            }
            Ok(BranchKey(key))
        })
    }

    fn merge_branch(
        &self,
        id: &DatasetId,
        branch: &BranchKey,
        merged: Dataset,
    ) -> Result<(), StoreError> {
        self.with_inner(|inner| {
            let entry = checked_out(&mut inner.entries, id)?;
            if !entry.branches.remove(&branch.0) {
                return Err(StoreError::UnknownBranch(branch.0.clone()));
            }
            entry.head = Some(merged);
            Ok(())
        })
    }

    fn branch_count(&self, id: &DatasetId) -> Result<usize, StoreError> {
        self.with_inner(|inner| Ok(1 + checked_out(&mut inner.entries, id)?.branches.len()))
    }

    fn commit(&self, id: &DatasetId, message: &str) -> Result<u64, StoreError> {
        self.with_inner(|inner| {
            if inner.fail_on_commit {
                return Err(StoreError::Unavailable("commit refused".into()));
            }
            let entry = checked_out(&mut inner.entries, id)?;
            entry.committed = entry.head.clone();
            entry.revision += 1;
            entry.messages.push(message.to_string());
            Ok(entry.revision)
        })
    }

    fn remove_branch(&self, id: &DatasetId, branch: &BranchKey) -> Result<(), StoreError> {
        self.with_inner(|inner| {
            let entry = checked_out(&mut inner.entries, id)?;
            if entry.branches.remove(&branch.0) {
                Ok(())
            } else {
                Err(StoreError::UnknownBranch(branch.0.clone()))
            }
        })
    }

    fn release(&self, id: &DatasetId) -> Result<(), StoreError> {
        self.with_inner(|inner| {
            let entry = checked_out(&mut inner.entries, id)?;
            entry.checked_out = false;
            entry.head = None;
            Ok(())
        })
    }
}

/// Resource registry fake.
#[derive(Clone, Default)]
pub struct InMemoryResourceStore {
    inner: Arc<Mutex<HashMap<String, Resource>>>,
}

impl InMemoryResourceStore {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding one data source.
    pub fn with_data_source(source: DataSourceDescriptor) -> Self {
        let store = Self::new();
        store.insert(Resource::DataSource(source));
        store
    }

    /// Insert or replace a resource.
    pub fn insert(&self, resource: Resource) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource.id().to_string(), resource);
    }

    /// Resource stored under `id`.
    pub fn resource(&self, id: &str) -> Option<Resource> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl ResourceStore for InMemoryResourceStore {
    fn get(&self, id: &str) -> Result<Resource, StoreError> {
        self.resource(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn put(&self, resource: Resource) -> Result<(), StoreError> {
        self.insert(resource);
        Ok(())
    }
}
