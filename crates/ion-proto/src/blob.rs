// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content-addressed chunk payloads.
//!
//! Array values not carried inline travel as CBOR blobs keyed by the BLAKE3
//! hash of their encoded bytes. No domain prefix; the bytes are the identity.

use ion_dataset::{ArrayValues, Bound, BoundedArray};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// BLAKE3 hash of an encoded value blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobKey(pub [u8; 32]);

impl BlobKey {
    /// Key of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// View the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors materializing a remote payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// Blob bytes did not hash to the referenced key.
    #[error("blob hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        /// Key the chunk referenced.
        expected: BlobKey,
        /// Key of the bytes actually received.
        computed: BlobKey,
    },
    /// CBOR encoding failed.
    #[error("blob encode failed: {0}")]
    Encode(String),
    /// CBOR decoding failed.
    #[error("blob decode failed: {0}")]
    Decode(String),
    /// Decoded values do not fit the declared bounds.
    #[error("blob {key} does not fit its bounds: {reason}")]
    Shape {
        /// Offending blob.
        key: BlobKey,
        /// Model error text.
        reason: String,
    },
}

/// Encode values as CBOR and return them with their key.
pub fn encode_values(values: &ArrayValues) -> Result<(BlobKey, Vec<u8>), BlobError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(values, &mut bytes).map_err(|e| BlobError::Encode(e.to_string()))?;
    Ok((BlobKey::of(&bytes), bytes))
}

/// Verify `bytes` against `key`, decode them and rebuild the bounded array.
pub fn decode_values(
    key: BlobKey,
    bounds: Vec<Bound>,
    bytes: &[u8],
) -> Result<BoundedArray, BlobError> {
    let computed = BlobKey::of(bytes);
    if computed != key {
        return Err(BlobError::HashMismatch {
            expected: key,
            computed,
        });
    }
    let values: ArrayValues =
        ciborium::de::from_reader(bytes).map_err(|e| BlobError::Decode(e.to_string()))?;
    BoundedArray::new(bounds, values).map_err(|e| BlobError::Shape {
        key,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn key_displays_as_lowercase_hex() {
        let key = BlobKey([0xab; 32]);
        let shown = key.to_string();
        assert_eq!(shown.len(), 64);
        assert!(shown.starts_with("abab"));
    }

    #[test]
    fn decode_rebuilds_block() {
        let values = ArrayValues::Int32(vec![1, 2, 3]);
        let (key, bytes) = encode_values(&values).unwrap();
        let block = decode_values(key, vec![Bound::new(7, 3)], &bytes).unwrap();
        assert_eq!(block.values, values);
        assert_eq!(block.bounds[0].origin, 7);
    }

    #[test]
    fn tampered_bytes_are_rejected() {
        let (key, mut bytes) = encode_values(&ArrayValues::Float64(vec![1.0])).unwrap();
        if let Some(last) = bytes.last_mut() {
            *last ^= 0xff;
        }
        assert!(matches!(
            decode_values(key, vec![Bound::new(0, 1)], &bytes),
            Err(BlobError::HashMismatch { .. })
        ));
    }

    #[test]
    fn wrong_bounds_are_a_shape_error() {
        let (key, bytes) = encode_values(&ArrayValues::Float64(vec![1.0, 2.0])).unwrap();
        assert!(matches!(
            decode_values(key, vec![Bound::new(0, 3)], &bytes),
            Err(BlobError::Shape { .. })
        ));
    }
}
