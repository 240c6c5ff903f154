// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Offset calculator: where a supplement lands along the aggregation axis.
//!
//! All comparisons on aggregation values use an absolute tolerance; stored
//! coordinates round-trip through producers that may perturb the last bits.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use ion_dataset::{AggregationRule, Group};
use serde::{Deserialize, Serialize};

use crate::time_units::TimeBase;
use crate::MergeError;

/// Everything [`plan_offsets`] needs, gathered by the caller.
#[derive(Debug, Clone, Copy)]
pub struct OffsetInputs<'a> {
    /// Merge policy.
    pub policy: AggregationRule,
    /// Stored aggregation values, dense in index order (NaN for gaps). Empty
    /// for a dataset that has never been ingested into.
    pub current_times: &'a [f64],
    /// Stored aggregation dimension `min_offset`.
    pub current_min_offset: u64,
    /// Supplement aggregation values in index order.
    pub supplement_times: &'a [f64],
    /// Run-time shift applied to supplement times before comparison (Fmrc).
    pub runtime_offset: f64,
    /// Forecast-time shift (Fmrc); carried into the plan untouched.
    pub forecast_offset: f64,
    /// Absolute equality tolerance on aggregation values.
    pub tolerance: f64,
}

/// Where and how the supplement is spliced in. Indices are absolute
/// (already shifted by the stored `min_offset`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetPlan {
    /// First absolute index the supplement occupies after the merge.
    pub sup_start_index: i64,
    /// Last stored index covered by the supplement's time range; one below
    /// `sup_start_index` when nothing stored is covered.
    pub sup_end_index: i64,
    /// Net growth of the aggregation dimension.
    pub insertion_offset: i64,
    /// Leading supplement steps that repeat stored steps (Overlap/Fmrc).
    pub overlap_count: u64,
    /// Shift applied to run-time coordinate values (Fmrc).
    pub runtime_offset: f64,
    /// Shift applied to forecast-time coordinate values (Fmrc).
    pub forecast_offset: f64,
    /// Number of supplement steps.
    pub supplement_length: u64,
    /// True when stored steps in `[sup_start_index, sup_end_index]` are
    /// replaced (Overwrite).
    pub replaces: bool,
}

/// Linear search for `target` in index-ordered `values`.
///
/// Returns the index of the first value equal within `tolerance`, otherwise
/// the insertion point `i` encoded as `-(i + 1)`. NaN cells are skipped.
pub fn locate(values: &[f64], target: f64, tolerance: f64) -> i64 {
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if (v - target).abs() <= tolerance {
            return i as i64;
        }
        if v > target {
            return -(i as i64) - 1;
        }
    }
    -(values.len() as i64) - 1
}

/// Compute the splice plan for one supplement.
pub fn plan_offsets(inputs: &OffsetInputs<'_>) -> Result<OffsetPlan, MergeError> {
    let tol = inputs.tolerance;
    let sup: Vec<f64> = inputs
        .supplement_times
        .iter()
        .map(|t| t + inputs.runtime_offset)
        .collect();
    let n = sup.len() as i64;
    let (Some(&sup_start), Some(&sup_end)) = (sup.first(), sup.last()) else {
        return Err(MergeError::EmptySupplement("aggregation".to_string()));
    };
    if let Some(index) = first_decrease(&sup) {
        return Err(MergeError::NonMonotonic { index });
    }
    if let Some(index) = first_repeat(&sup, tol) {
        return Err(MergeError::RepeatedStep { index });
    }

    let cur = inputs.current_times;
    let len = cur.len() as i64;
    let base = inputs.current_min_offset as i64;
    let mut plan = OffsetPlan {
        sup_start_index: 0,
        sup_end_index: -1,
        insertion_offset: n,
        overlap_count: 0,
        runtime_offset: inputs.runtime_offset,
        forecast_offset: inputs.forecast_offset,
        supplement_length: n as u64,
        replaces: false,
    };

    let Some(cur_end) = cur.iter().rev().copied().find(|v| !v.is_nan()) else {
        // nothing stored yet
        plan.sup_start_index = base;
        plan.sup_end_index = base - 1;
        return Ok(plan);
    };

    let (start, end) = if sup_start > cur_end + tol {
        (len, len - 1)
    } else {
        match inputs.policy {
            AggregationRule::Overwrite => {
                let s = match locate(cur, sup_start, tol) {
                    i if i >= 0 => i,
                    i => -i - 1,
                };
                let e = match locate(cur, sup_end, tol) {
                    i if i >= 0 => i,
                    i => -i - 2,
                };
                let replaced = (e - s + 1).max(0);
                plan.insertion_offset = n - replaced;
                plan.replaces = replaced > 0;
                (s, s + replaced - 1)
            }
            AggregationRule::Overlap | AggregationRule::Fmrc => {
                let k = if (sup_start - cur_end).abs() <= tol {
                    1
                } else {
                    sup.iter().take_while(|&&t| t <= cur_end + tol).count() as i64
                };
                check_overlap(cur, &sup[..k as usize], tol, base)?;
                plan.overlap_count = k as u64;
                plan.insertion_offset = n - k;
                (len - k, len - 1)
            }
        }
    };
    plan.sup_start_index = base + start;
    plan.sup_end_index = base + end;
    Ok(plan)
}

/// The `k` leading supplement times must equal the `k` trailing stored times.
fn check_overlap(cur: &[f64], leading: &[f64], tol: f64, base: i64) -> Result<(), MergeError> {
    let k = leading.len();
    if k > cur.len() {
        return Err(MergeError::OverlapMismatch {
            variable: "aggregation".to_string(),
            index: base as u64,
        });
    }
    let tail = &cur[cur.len() - k..];
    match tail
        .iter()
        .zip(leading)
        .position(|(stored, new)| stored.is_nan() || (stored - new).abs() > tol)
    {
        Some(j) => Err(MergeError::OverlapMismatch {
            variable: "aggregation".to_string(),
            index: (base + (cur.len() - k + j) as i64) as u64,
        }),
        None => Ok(()),
    }
}

/// Position of the first value smaller than its predecessor (NaN skipped).
pub(crate) fn first_decrease(values: &[f64]) -> Option<u64> {
    let mut prev = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if v < prev {
            return Some(i as u64);
        }
        prev = v;
    }
    None
}

/// Position of the first value equal (within `tolerance`) to its predecessor.
fn first_repeat(values: &[f64], tolerance: f64) -> Option<u64> {
    values
        .windows(2)
        .position(|w| (w[1] - w[0]).abs() <= tolerance)
        .map(|i| i as u64 + 1)
}

/// Run-time and forecast-time offsets of a forecast-run supplement, i.e. the
/// distance between the supplement's and the stored coordinates' `units`
/// epochs, in the stored unit. Zero for a dataset without stored coordinates.
pub fn fmrc_offsets(
    current: &Group,
    supplement: &Group,
    aggregation: &str,
    forecast: Option<&str>,
) -> Result<(f64, f64), MergeError> {
    let runtime = coordinate_offset(current, supplement, aggregation)?;
    let forecast = match forecast {
        Some(name) => coordinate_offset(current, supplement, name)?,
        None => 0.0,
    };
    Ok((runtime, forecast))
}

fn coordinate_offset(current: &Group, supplement: &Group, name: &str) -> Result<f64, MergeError> {
    let Some(stored) = current.variable(name).filter(|v| !v.content.is_empty()) else {
        return Ok(0.0);
    };
    let incoming = supplement
        .variable(name)
        .ok_or_else(|| MergeError::MissingAggregationVariable(name.to_string()))?;
    let base_of = |var: &ion_dataset::Variable| -> Result<TimeBase, MergeError> {
        var.attribute("units")
            .and_then(ion_dataset::Attribute::as_text)
            .ok_or_else(|| MergeError::MissingTimeAttribute {
                variable: var.name.clone(),
                attribute: "units".to_string(),
            })?
            .parse()
    };
    base_of(stored)?.offset_to(&base_of(incoming)?)
}
