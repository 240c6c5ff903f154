// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory blob store for remote chunk payloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ion_dataset::ArrayValues;
use ion_proto::{encode_values, BlobError, BlobKey};
use ion_session::{BlobStore, StoreError};

/// Content-addressed blob store fake. Tracks how many `fetch` batches it
/// served.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<BlobInner>>,
}

#[derive(Default)]
struct BlobInner {
    blobs: HashMap<BlobKey, Vec<u8>>,
    fetch_count: usize,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode and store `values`, returning their key.
    pub fn put_values(&self, values: &ArrayValues) -> Result<BlobKey, BlobError> {
        let (key, bytes) = encode_values(values)?;
        self.put_raw(key, bytes);
        Ok(key)
    }

    /// Store `bytes` under `key` without checking the hash.
    pub fn put_raw(&self, key: BlobKey, bytes: Vec<u8>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .blobs
            .insert(key, bytes);
    }

    /// Number of `fetch` calls served.
    pub fn fetch_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fetch_count
    }
}

impl BlobStore for MemoryBlobStore {
    fn fetch(&self, keys: &[BlobKey]) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.fetch_count += 1;
        keys.iter()
            .map(|key| {
                inner
                    .blobs
                    .get(key)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(key.to_string()))
            })
            .collect()
    }
}
