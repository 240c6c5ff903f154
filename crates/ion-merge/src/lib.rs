// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Folding supplements into canonical time-series datasets.
//!
//! Three layers, leaves first:
//! - [`offsets`]: where along the aggregation axis a supplement lands
//!   ([`plan_offsets`]), including forecast-run time base normalization
//!   ([`fmrc_offsets`]).
//! - [`attributes`]: the per-attribute merge policy table for global metadata.
//! - [`engine`]: the structural splice itself ([`merge`], [`merge_supplement`]).
//!
//! Everything here is synchronous and side-effect free apart from mutating the
//! working copy handed to [`merge`]; callers own rollback.

pub mod attributes;
pub mod engine;
pub mod offsets;
pub mod time_units;

pub use attributes::{
    merge_global_attributes, rule_for, AttributeConflict, GlobalAttribute, MergeRule,
    VerticalPositive,
};
pub use engine::{merge, merge_supplement, MergeContext, MergeOptions, MergeReport, MergeSummary};
pub use offsets::{fmrc_offsets, locate, plan_offsets, OffsetInputs, OffsetPlan};
pub use time_units::{parse_timestamp, TimeBase, TimeUnit};

use ion_dataset::DatasetError;
use thiserror::Error;

/// Fatal merge failures. Any of these aborts the session and rolls back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// Supplement does not declare the aggregation dimension.
    #[error("aggregation dimension '{0}' missing from supplement")]
    MissingAggregationDimension(String),
    /// No coordinate variable carries the aggregation axis values.
    #[error("aggregation coordinate variable '{0}' missing")]
    MissingAggregationVariable(String),
    /// Supplement carries no aggregation steps.
    #[error("supplement has no values along '{0}'")]
    EmptySupplement(String),
    /// A non-aggregation dimension differs in length between the two sides.
    #[error("dimension '{name}' length mismatch: dataset {current}, supplement {supplement}")]
    DimensionMismatch {
        /// Dimension name.
        name: String,
        /// Stored length.
        current: u64,
        /// Supplement length.
        supplement: u64,
    },
    /// Type, shape or coverage of a variable is incompatible.
    #[error("variable '{variable}': {reason}")]
    StructuralMismatch {
        /// Variable name.
        variable: String,
        /// What disagreed.
        reason: String,
    },
    /// A non-mergeable variable attribute differs.
    #[error("variable '{variable}' attribute '{attribute}' differs from stored value")]
    AttributeMismatch {
        /// Variable name.
        variable: String,
        /// Attribute name.
        attribute: String,
    },
    /// Leading supplement data disagrees with the stored trailing data.
    #[error("overlap mismatch on '{variable}' at index {index}")]
    OverlapMismatch {
        /// Variable whose overlap window disagreed.
        variable: String,
        /// Absolute aggregation index of the first disagreement.
        index: u64,
    },
    /// A time coordinate lacks the attribute needed to normalize it.
    #[error("variable '{variable}' lacks time attribute '{attribute}'")]
    MissingTimeAttribute {
        /// Variable name.
        variable: String,
        /// Missing attribute.
        attribute: String,
    },
    /// `units` is not of the form `<unit> since <timestamp>`.
    #[error("invalid time units '{0}'")]
    InvalidTimeUnits(String),
    /// Aggregation coordinate decreases at `index` (index order).
    #[error("aggregation coordinate not monotonic at index {index}")]
    NonMonotonic {
        /// Position (dense, index order) of the first decrease.
        index: u64,
    },
    /// Supplement repeats an aggregation value at `index`.
    #[error("supplement repeats aggregation value at index {index}")]
    RepeatedStep {
        /// Supplement position of the repeat.
        index: u64,
    },
    /// Underlying dataset model rejected an operation.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}
