// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Assembles a [`Supplement`] from a header and its chunks.
//!
//! Chunks may arrive in any order and interleave across variables. Resident
//! blocks are validated and stored on arrival; remote blocks are only checked
//! for rank and fetched in one batch by [`ChunkRouter::materialize`].

use std::collections::BTreeMap;

use ion_dataset::{Bound, BoundedArray, DatasetError, Supplement};
use ion_proto::{decode_values, BlobKey, ChunkPayload, DatasetHeader, SupplementChunk};
use tracing::debug;

use crate::error::{IngestionError, StoreError};
use crate::ports::BlobStore;

#[derive(Debug, Clone)]
struct PendingBlob {
    variable: String,
    bounds: Vec<Bound>,
    key: BlobKey,
}

/// Per-session chunk assembly.
#[derive(Debug, Default)]
pub struct ChunkRouter {
    supplement: Option<Supplement>,
    pending: Vec<PendingBlob>,
    counts: BTreeMap<String, usize>,
}

impl ChunkRouter {
    /// Empty router awaiting a header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the supplement skeleton from `header`. The descriptor must
    /// declare unique dimension and variable names, and every shape entry
    /// must name a declared dimension.
    pub fn install_header(&mut self, header: &DatasetHeader) -> Result<&Supplement, IngestionError> {
        if self.supplement.is_some() {
            return Err(IngestionError::UnexpectedMessage {
                state: "awaiting_chunks",
                kind: "dataset_header",
            });
        }
        let supplement =
            Supplement::from_descriptor(header.dataset_id.clone(), &header.shape_descriptor)?;
        Ok(self.supplement.insert(supplement))
    }

    /// Chunks received per variable.
    pub fn chunk_counts(&self) -> &BTreeMap<String, usize> {
        &self.counts
    }

    /// Store one chunk under its variable.
    pub fn route(&mut self, chunk: &SupplementChunk) -> Result<(), IngestionError> {
        let supplement = self
            .supplement
            .as_mut()
            .ok_or(IngestionError::UnexpectedMessage {
                state: "awaiting_header",
                kind: "supplement_chunk",
            })?;
        let variable = supplement
            .root
            .variable_mut(&chunk.variable_name)
            .ok_or_else(|| IngestionError::UnknownVariable(chunk.variable_name.clone()))?;

        match &chunk.payload {
            ChunkPayload::Resident(block) => variable.push_array(block.clone())?,
            ChunkPayload::Remote { bounds, key } => {
                if bounds.len() != variable.shape.len() {
                    return Err(DatasetError::RankMismatch {
                        variable: variable.name.clone(),
                        expected: variable.shape.len(),
                        got: bounds.len(),
                    }
                    .into());
                }
                BoundedArray::checked_len(bounds)?;
                self.pending.push(PendingBlob {
                    variable: chunk.variable_name.clone(),
                    bounds: bounds.clone(),
                    key: *key,
                });
            }
        }
        *self.counts.entry(chunk.variable_name.clone()).or_default() += 1;
        Ok(())
    }

    /// Fetch and decode remote blocks, then hand over the finished supplement.
    pub fn materialize(&mut self, blobs: &dyn BlobStore) -> Result<Supplement, IngestionError> {
        let mut supplement = self
            .supplement
            .take()
            .ok_or_else(|| IngestionError::Invariant("merge requested before header".into()))?;
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(supplement);
        }

        let keys: Vec<BlobKey> = pending.iter().map(|p| p.key).collect();
        let payloads = blobs.fetch(&keys)?;
        if payloads.len() != keys.len() {
            return Err(StoreError::Unavailable(format!(
                "blob store returned {} of {} payloads",
                payloads.len(),
                keys.len()
            ))
            .into());
        }
        debug!(blobs = keys.len(), "materialized remote chunks");

        for (blob, bytes) in pending.into_iter().zip(payloads) {
            let block = decode_values(blob.key, blob.bounds, &bytes)?;
            supplement
                .root
                .variable_mut(&blob.variable)
                .ok_or(IngestionError::UnknownVariable(blob.variable))?
                .push_array(block)?;
        }
        Ok(supplement)
    }
}
