// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical hierarchical dataset representation shared across ion crates.
//! Pure data (dimensions, variables, bounded arrays, attributes) with
//! deterministic hashing and the index arithmetic used to read blocks back in
//! index order.

mod array;
mod attribute;
mod group;

pub use array::{ArrayValues, Bound, BoundedArray};
pub use attribute::{Attribute, AttributeValue};
pub use group::{Dimension, Group, Variable};

use ciborium::ser::into_writer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Blake3 content hash (32 bytes).
pub type Hash32 = [u8; 32];

/// Identifier of a canonical dataset resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl DatasetId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Element type of a variable, array block or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// IEEE 754 double.
    Float64,
    /// IEEE 754 single.
    Float32,
    /// Signed 64-bit integer.
    Int64,
    /// Signed 32-bit integer.
    Int32,
    /// UTF-8 string.
    Text,
}

impl DataType {
    /// True for every type that can be read back as `f64`.
    pub fn is_numeric(self) -> bool {
        !matches!(self, DataType::Text)
    }
}

/// Errors raised by structural operations on the dataset model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    /// `values.len()` disagrees with the product of the bound sizes.
    #[error("value count {got} does not match bounds product {expected}")]
    ValueCountMismatch {
        /// Product of all bound sizes.
        expected: u64,
        /// Number of values supplied.
        got: u64,
    },
    /// A bounded array's rank disagrees with the owning variable's shape.
    #[error("rank {got} does not match variable '{variable}' rank {expected}")]
    RankMismatch {
        /// Variable name.
        variable: String,
        /// `shape.len()` of the variable.
        expected: usize,
        /// Rank of the offending block.
        got: usize,
    },
    /// Two dimensions with the same name in one group.
    #[error("duplicate dimension '{0}'")]
    DuplicateDimension(String),
    /// Two variables with the same name in one group.
    #[error("duplicate variable '{0}'")]
    DuplicateVariable(String),
    /// A shape references a dimension the group does not declare.
    #[error("unknown dimension '{0}'")]
    UnknownDimension(String),
    /// Lookup of a variable the group does not contain.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    /// Element types disagree.
    #[error("type mismatch: expected {expected:?}, got {got:?}")]
    TypeMismatch {
        /// Type required by the operation.
        expected: DataType,
        /// Type actually found.
        got: DataType,
    },
    /// An axis index beyond the block rank.
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange {
        /// Requested axis.
        axis: usize,
        /// Rank of the block.
        rank: usize,
    },
    /// Origin arithmetic left the representable index range.
    #[error("index arithmetic overflow on axis {axis}")]
    IndexOverflow {
        /// Axis being shifted.
        axis: usize,
    },
    /// The product of bound sizes (of a block or a read region) does not fit
    /// in a `u64`.
    #[error("bounds product overflows")]
    ElementCountOverflow,
    /// Canonical encoding failed.
    #[error("canonical encoding failed: {0}")]
    Encode(String),
}

/// A canonical dataset: one root group, addressed by id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Resource identifier.
    pub id: DatasetId,
    /// Root group.
    pub root: Group,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new(id: impl Into<DatasetId>) -> Self {
        Self {
            id: id.into(),
            root: Group::default(),
        }
    }

    /// Canonical CBOR serialization for hashing/comparison.
    ///
    /// Bounded arrays are sorted by origin per variable so two datasets with the
    /// same blocks in a different arrival order hash identically.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, DatasetError> {
        let mut root = self.root.clone();
        for var in &mut root.variables {
            var.content.sort_by(|a, b| {
                let ka: Vec<u64> = a.bounds.iter().map(|b| b.origin).collect();
                let kb: Vec<u64> = b.bounds.iter().map(|b| b.origin).collect();
                ka.cmp(&kb)
            });
        }
        let mut bytes = Vec::new();
        into_writer(&(&self.id, &root), &mut bytes)
            .map_err(|err| DatasetError::Encode(err.to_string()))?;
        Ok(bytes)
    }

    /// Compute the blake3 hash of the canonical form.
    pub fn content_hash(&self) -> Result<Hash32, DatasetError> {
        Ok(blake3::hash(&self.to_canonical_bytes()?).into())
    }
}

impl From<String> for DatasetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Merge policy governing how supplements fold into a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationRule {
    /// Append; leading supplement steps may repeat stored trailing steps exactly.
    Overlap,
    /// Replace the stored steps covered by the supplement's time range.
    Overwrite,
    /// Forecast model run collection: normalize run/forecast time bases, then
    /// append with overlap detection.
    Fmrc,
}

/// Data source resource: selects the merge policy for a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    /// Data source identifier.
    pub id: String,
    /// Merge policy.
    pub aggregation_rule: AggregationRule,
    /// Axis supplements are appended/overwritten along.
    pub aggregation_dimension: String,
    /// Forecast lead-time axis (Fmrc only).
    pub forecast_dimension: Option<String>,
}

impl DataSourceDescriptor {
    /// Descriptor aggregating along `time` with no forecast axis.
    pub fn new(id: impl Into<String>, aggregation_rule: AggregationRule) -> Self {
        Self {
            id: id.into(),
            aggregation_rule,
            aggregation_dimension: "time".to_string(),
            forecast_dimension: None,
        }
    }

    /// Set the forecast axis name.
    pub fn with_forecast_dimension(mut self, name: impl Into<String>) -> Self {
        self.forecast_dimension = Some(name.into());
        self
    }
}

/// A transient, newly arrived dataset increment. Never persisted standalone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Supplement {
    /// Dataset the increment is destined for.
    pub dataset_id: DatasetId,
    /// Shape, attributes and assembled content.
    pub root: Group,
}

impl Supplement {
    /// Build a supplement from a header shape descriptor (no content).
    /// Fails when the descriptor breaks the group naming rules.
    pub fn from_descriptor(dataset_id: DatasetId, descriptor: &Group) -> Result<Self, DatasetError> {
        Ok(Self {
            dataset_id,
            root: descriptor.shape_only()?,
        })
    }

    /// Text value of a global attribute, if present.
    pub fn declared(&self, name: &str) -> Option<&str> {
        self.root.attribute(name).and_then(Attribute::as_text)
    }
}
