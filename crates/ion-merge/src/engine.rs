// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Time-series merge engine.
//!
//! [`merge`] works in two phases against the caller's working copy: every
//! check runs first against the untouched stored group, then dimensions grow,
//! stored blocks are split/shifted and supplement blocks are appended. A
//! failure in the second phase can leave the working copy half-spliced; the
//! session discards it on any error.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use ion_dataset::{
    AggregationRule, ArrayValues, Attribute, AttributeValue, BoundedArray, DataSourceDescriptor,
    Dataset, DatasetId, Dimension, Group, Supplement, Variable,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::attributes::{
    merge_global_attributes, AttributeConflict, TIME_COVERAGE_END, TIME_COVERAGE_START,
};
use crate::offsets::{first_decrease, fmrc_offsets, plan_offsets, OffsetInputs, OffsetPlan};
use crate::time_units::TimeBase;
use crate::MergeError;

/// Variable attributes that must agree between stored and supplement.
const NON_MERGEABLE: [&str; 3] = ["units", "standard_name", "_FillValue"];

/// Tunables for [`merge_supplement`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Absolute tolerance for aggregation value and overlap comparisons.
    pub tolerance: f64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { tolerance: 1e-6 }
    }
}

/// Inputs to [`merge`] other than the two groups and the plan.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    /// Merge policy.
    pub policy: AggregationRule,
    /// Aggregation dimension (and coordinate variable) name.
    pub aggregation_dimension: &'a str,
    /// Forecast dimension name (Fmrc).
    pub forecast_dimension: Option<&'a str>,
    /// Data source the supplement came from.
    pub data_source_id: &'a str,
    /// Target dataset.
    pub dataset_id: &'a DatasetId,
    /// Absolute comparison tolerance.
    pub tolerance: f64,
}

/// What a successful merge added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Supplement `title` attribute.
    pub title: Option<String>,
    /// Supplement `url` attribute.
    pub url: Option<String>,
    /// Originating data source.
    pub data_source_id: String,
    /// Target dataset.
    pub dataset_id: DatasetId,
    /// Start of the supplement's time coverage.
    pub start_time: Option<String>,
    /// End of the supplement's time coverage.
    pub end_time: Option<String>,
    /// Timesteps carried by the supplement.
    pub timestep_count: u64,
}

/// Merge result: summary plus any global attribute conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// What was merged.
    pub summary: MergeSummary,
    /// Global attributes that could not be merged.
    pub conflicts: Vec<AttributeConflict>,
}

impl MergeReport {
    /// True when no attribute conflicts were recorded.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Splice `supplement` into `current` according to `plan`.
pub fn merge(
    ctx: &MergeContext<'_>,
    current: &mut Group,
    supplement: &Group,
    plan: &OffsetPlan,
) -> Result<MergeReport, MergeError> {
    let agg = ctx.aggregation_dimension;
    if supplement.dimension(agg).is_none() {
        return Err(MergeError::MissingAggregationDimension(agg.to_string()));
    }
    let first_ingest = current.dimension(agg).is_none()
        || current.variables.iter().all(|v| v.content.is_empty());
    let sup_origin = supplement_origin(supplement, agg);

    // phase 1: checks against the stored group
    check_dimensions(current, supplement, agg)?;
    let steps = (sup_origin, sup_origin.saturating_add(plan.supplement_length));
    for incoming in &supplement.variables {
        check_coverage(incoming, agg, steps)?;
        let Some(stored) = current.variable(&incoming.name) else {
            continue;
        };
        check_variable(ctx, stored, incoming)?;
        match incoming.axis_of(agg) {
            Some(axis) if plan.overlap_count > 0 && incoming.data_type.is_numeric() => {
                check_overlap_data(ctx, current, supplement, incoming, axis, plan, sup_origin)?;
            }
            None if is_forecast(ctx, &incoming.name) => {
                check_forecast_axis(ctx, current, supplement, &incoming.name, plan)?;
            }
            _ => {}
        }
    }

    // phase 2: mutate
    grow_dimensions(current, supplement, agg, plan)?;
    if ctx.policy == AggregationRule::Overwrite {
        for var in &mut current.variables {
            if let Some(axis) = var.axis_of(agg) {
                cut_and_shift(var, axis, plan)?;
            }
        }
    }
    for incoming in &supplement.variables {
        if current.variable(&incoming.name).is_none() {
            let mut fresh = incoming.without_content();
            if incoming.axis_of(agg).is_none() {
                for block in &incoming.content {
                    fresh.push_array(normalize_values(ctx, &incoming.name, block.clone(), plan)?)?;
                }
            }
            current.add_variable(fresh)?;
            debug!(variable = %incoming.name, "added variable");
        }
        let Some(axis) = incoming.axis_of(agg) else {
            continue;
        };
        let Some(target) = current.variable_mut(&incoming.name) else {
            continue;
        };
        let appended = append_blocks(ctx, target, incoming, axis, plan, sup_origin)?;
        debug!(variable = %incoming.name, blocks = appended, "appended supplement blocks");
    }
    recompute_min_offset(current, agg);

    if current.variable(agg).is_some() {
        if let Some(index) = first_decrease(&current.read_dense(agg)?) {
            return Err(MergeError::NonMonotonic { index });
        }
    }

    let conflicts =
        merge_global_attributes(&mut current.attributes, &supplement.attributes, first_ingest);
    let (start_time, end_time) = coverage(supplement, agg, sup_origin, plan);
    let summary = MergeSummary {
        title: text_attribute(supplement, "title"),
        url: text_attribute(supplement, "url"),
        data_source_id: ctx.data_source_id.to_string(),
        dataset_id: ctx.dataset_id.clone(),
        start_time,
        end_time,
        timestep_count: plan.supplement_length,
    };
    info!(
        dataset_id = %ctx.dataset_id,
        policy = ?ctx.policy,
        sup_start_index = plan.sup_start_index,
        insertion_offset = plan.insertion_offset,
        overlap_count = plan.overlap_count,
        conflicts = conflicts.len(),
        "merged supplement"
    );
    Ok(MergeReport { summary, conflicts })
}

/// Plan offsets for `supplement` against `current` and merge it.
pub fn merge_supplement(
    current: &mut Dataset,
    supplement: &Supplement,
    source: &DataSourceDescriptor,
    options: &MergeOptions,
) -> Result<MergeReport, MergeError> {
    let agg = source.aggregation_dimension.as_str();
    let fcst = source.forecast_dimension.as_deref();
    if supplement.root.dimension(agg).is_none() {
        return Err(MergeError::MissingAggregationDimension(agg.to_string()));
    }
    let coordinate = supplement
        .root
        .variable(agg)
        .ok_or_else(|| MergeError::MissingAggregationVariable(agg.to_string()))?;
    let axis = coordinate
        .axis_of(agg)
        .ok_or_else(|| MergeError::MissingAggregationVariable(agg.to_string()))?;
    let (lo, hi) = coordinate
        .origin_range(axis)
        .ok_or_else(|| MergeError::EmptySupplement(agg.to_string()))?;
    let supplement_times = supplement.root.read_hyperslab(agg, axis, lo, hi - lo)?;
    if let Some(gap) = supplement_times.iter().position(|v| v.is_nan()) {
        return Err(MergeError::StructuralMismatch {
            variable: agg.to_string(),
            reason: format!("no aggregation value at supplement offset {gap}"),
        });
    }

    let (runtime_offset, forecast_offset) = if source.aggregation_rule == AggregationRule::Fmrc {
        fmrc_offsets(&current.root, &supplement.root, agg, fcst)?
    } else {
        (0.0, 0.0)
    };
    let current_times = match current.root.variable(agg) {
        Some(v) if !v.content.is_empty() => current.root.read_dense(agg)?,
        _ => Vec::new(),
    };
    let plan = plan_offsets(&OffsetInputs {
        policy: source.aggregation_rule,
        current_times: &current_times,
        current_min_offset: current.root.dimension(agg).map_or(0, |d| d.min_offset),
        supplement_times: &supplement_times,
        runtime_offset,
        forecast_offset,
        tolerance: options.tolerance,
    })?;
    debug!(dataset_id = %current.id, ?plan, "offset plan");

    let ctx = MergeContext {
        policy: source.aggregation_rule,
        aggregation_dimension: agg,
        forecast_dimension: fcst,
        data_source_id: &source.id,
        dataset_id: &current.id,
        tolerance: options.tolerance,
    };
    merge(&ctx, &mut current.root, &supplement.root, &plan)
}

/// Smallest aggregation origin in the supplement, preferring the coordinate.
fn supplement_origin(supplement: &Group, agg: &str) -> u64 {
    let lo = |v: &Variable| v.axis_of(agg).and_then(|a| v.origin_range(a)).map(|(lo, _)| lo);
    supplement
        .variable(agg)
        .and_then(lo)
        .or_else(|| supplement.variables.iter().filter_map(lo).min())
        .unwrap_or(0)
}

fn is_runtime(ctx: &MergeContext<'_>, name: &str) -> bool {
    ctx.policy == AggregationRule::Fmrc && name == ctx.aggregation_dimension
}

fn is_forecast(ctx: &MergeContext<'_>, name: &str) -> bool {
    ctx.policy == AggregationRule::Fmrc && ctx.forecast_dimension == Some(name)
}

fn check_dimensions(current: &Group, supplement: &Group, agg: &str) -> Result<(), MergeError> {
    for dim in supplement.dimensions.iter().filter(|d| d.name != agg) {
        if let Some(stored) = current.dimension(&dim.name) {
            if stored.length != dim.length {
                return Err(MergeError::DimensionMismatch {
                    name: dim.name.clone(),
                    current: stored.length,
                    supplement: dim.length,
                });
            }
        }
    }
    Ok(())
}

/// Aggregated blocks must stay inside the supplement's own steps
/// `[first, end)`.
fn check_coverage(incoming: &Variable, agg: &str, (first, end): (u64, u64)) -> Result<(), MergeError> {
    let Some(range) = incoming
        .axis_of(agg)
        .and_then(|axis| incoming.origin_range(axis))
    else {
        return Ok(());
    };
    if range.0 < first || range.1 > end {
        return Err(MergeError::StructuralMismatch {
            variable: incoming.name.clone(),
            reason: format!(
                "coverage [{}, {}) outside supplement steps [{first}, {end})",
                range.0, range.1
            ),
        });
    }
    Ok(())
}

fn check_variable(
    ctx: &MergeContext<'_>,
    stored: &Variable,
    incoming: &Variable,
) -> Result<(), MergeError> {
    let mismatch = |reason: String| MergeError::StructuralMismatch {
        variable: incoming.name.clone(),
        reason,
    };
    if stored.data_type != incoming.data_type {
        return Err(mismatch(format!(
            "data type {:?} does not match stored {:?}",
            incoming.data_type, stored.data_type
        )));
    }
    if stored.shape != incoming.shape {
        return Err(mismatch(format!(
            "shape {:?} does not match stored {:?}",
            incoming.shape, stored.shape
        )));
    }
    let time_coordinate = is_runtime(ctx, &incoming.name) || is_forecast(ctx, &incoming.name);
    for name in NON_MERGEABLE {
        if name == "units" && time_coordinate {
            continue;
        }
        if let (Some(a), Some(b)) = (stored.attribute(name), incoming.attribute(name)) {
            if !same_value(&a.value, &b.value) {
                return Err(MergeError::AttributeMismatch {
                    variable: incoming.name.clone(),
                    attribute: name.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn same_value(a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::Float64(x), AttributeValue::Float64(y)) => {
            (x.is_nan() && y.is_nan()) || x == y
        }
        _ => a == b,
    }
}

/// Stored data in the overlap window must match the supplement's leading steps.
fn check_overlap_data(
    ctx: &MergeContext<'_>,
    current: &Group,
    supplement: &Group,
    incoming: &Variable,
    axis: usize,
    plan: &OffsetPlan,
    sup_origin: u64,
) -> Result<(), MergeError> {
    let shift = value_shift(ctx, &incoming.name, plan);
    let start = plan.sup_start_index as u64;
    for step in 0..plan.overlap_count {
        let stored = current.read_hyperslab(&incoming.name, axis, start + step, 1)?;
        let repeated = supplement.read_hyperslab(&incoming.name, axis, sup_origin + step, 1)?;
        if !same_within(stored, repeated, shift, ctx.tolerance) {
            return Err(MergeError::OverlapMismatch {
                variable: incoming.name.clone(),
                index: start + step,
            });
        }
    }
    Ok(())
}

/// Dense reads compared after moving `incoming` by `shift`; NaN cells match.
fn same_within(stored: Vec<f64>, incoming: Vec<f64>, shift: f64, tolerance: f64) -> bool {
    let shifted = incoming.into_iter().map(|v| v + shift).collect();
    ArrayValues::Float64(stored).value_eq_within(&ArrayValues::Float64(shifted), tolerance)
}

/// A static forecast axis, once normalized, must equal the stored one.
fn check_forecast_axis(
    ctx: &MergeContext<'_>,
    current: &Group,
    supplement: &Group,
    name: &str,
    plan: &OffsetPlan,
) -> Result<(), MergeError> {
    let stored = current.read_dense(name)?;
    let incoming = supplement.read_dense(name)?;
    if same_within(stored, incoming, plan.forecast_offset, ctx.tolerance) {
        Ok(())
    } else {
        Err(MergeError::StructuralMismatch {
            variable: name.to_string(),
            reason: "forecast axis differs after normalization".to_string(),
        })
    }
}

fn grow_dimensions(
    current: &mut Group,
    supplement: &Group,
    agg: &str,
    plan: &OffsetPlan,
) -> Result<(), MergeError> {
    for dim in supplement.dimensions.iter().filter(|d| d.name != agg) {
        if current.dimension(&dim.name).is_none() {
            current.add_dimension(dim.clone())?;
        }
    }
    match current.dimension_mut(agg) {
        Some(dim) => {
            dim.length = (dim.length as i64 + plan.insertion_offset).max(0) as u64;
        }
        None => current.add_dimension(Dimension {
            name: agg.to_string(),
            length: plan.insertion_offset.max(0) as u64,
            min_offset: plan.sup_start_index.max(0) as u64,
        })?,
    }
    Ok(())
}

/// Overwrite splice of one stored variable: blocks inside the replaced range
/// go, blocks straddling it are split, blocks after it move by
/// `insertion_offset`.
fn cut_and_shift(var: &mut Variable, axis: usize, plan: &OffsetPlan) -> Result<(), MergeError> {
    let (lo, hi) = (plan.sup_start_index, plan.sup_end_index);
    let mut kept = Vec::with_capacity(var.content.len());
    for block in var.content.drain(..) {
        let (origin, end) = block.axis_range(axis)?;
        let (first, last) = (origin as i64, end as i64 - 1);
        if last < lo {
            kept.push(block);
        } else if first > hi {
            let mut moved = block;
            moved.shift_axis(axis, plan.insertion_offset)?;
            kept.push(moved);
        } else if first >= lo && last <= hi {
            // fully replaced
        } else {
            if first < lo {
                if let Some(before) = block.slice_axis(axis, origin, lo as u64)? {
                    kept.push(before);
                }
            }
            if last > hi {
                if let Some(mut after) = block.slice_axis(axis, (hi + 1) as u64, end)? {
                    after.shift_axis(axis, plan.insertion_offset)?;
                    kept.push(after);
                }
            }
        }
    }
    var.content = kept;
    Ok(())
}

/// Remap supplement blocks onto the stored index space and append them.
/// Steps already stored (overlap) are trimmed off.
fn append_blocks(
    ctx: &MergeContext<'_>,
    target: &mut Variable,
    incoming: &Variable,
    axis: usize,
    plan: &OffsetPlan,
    sup_origin: u64,
) -> Result<usize, MergeError> {
    let delta = plan.sup_start_index - sup_origin as i64;
    let keep_from = plan.sup_start_index as u64 + plan.overlap_count;
    let mut appended = 0;
    for block in &incoming.content {
        let mut placed = block.clone();
        placed.shift_axis(axis, delta)?;
        let Some(placed) = placed.slice_axis(axis, keep_from, u64::MAX)? else {
            continue;
        };
        target.push_array(normalize_values(ctx, &incoming.name, placed, plan)?)?;
        appended += 1;
    }
    Ok(appended)
}

fn value_shift(ctx: &MergeContext<'_>, name: &str, plan: &OffsetPlan) -> f64 {
    if is_runtime(ctx, name) {
        plan.runtime_offset
    } else if is_forecast(ctx, name) {
        plan.forecast_offset
    } else {
        0.0
    }
}

/// Move Fmrc time coordinate values onto the stored time base.
fn normalize_values(
    ctx: &MergeContext<'_>,
    name: &str,
    mut block: BoundedArray,
    plan: &OffsetPlan,
) -> Result<BoundedArray, MergeError> {
    block.values.shift_by(value_shift(ctx, name, plan))?;
    Ok(block)
}

fn recompute_min_offset(current: &mut Group, agg: &str) {
    let lowest = current
        .variables
        .iter()
        .filter_map(|v| v.axis_of(agg).and_then(|a| v.origin_range(a)))
        .map(|(lo, _)| lo)
        .min();
    if let (Some(lo), Some(dim)) = (lowest, current.dimension_mut(agg)) {
        dim.min_offset = lo;
    }
}

fn text_attribute(group: &Group, name: &str) -> Option<String> {
    group
        .attribute(name)
        .and_then(Attribute::as_text)
        .map(str::to_string)
}

/// Supplement time coverage: declared attributes, else the coordinate's first
/// and last values rendered through its `units`.
fn coverage(
    supplement: &Group,
    agg: &str,
    sup_origin: u64,
    plan: &OffsetPlan,
) -> (Option<String>, Option<String>) {
    let declared = (
        text_attribute(supplement, TIME_COVERAGE_START),
        text_attribute(supplement, TIME_COVERAGE_END),
    );
    if declared.0.is_some() && declared.1.is_some() {
        return declared;
    }
    let Some(coordinate) = supplement.variable(agg) else {
        return declared;
    };
    let Ok(times) = supplement.read_hyperslab(agg, 0, sup_origin, plan.supplement_length) else {
        return declared;
    };
    let base = coordinate
        .attribute("units")
        .and_then(Attribute::as_text)
        .and_then(|u| u.parse::<TimeBase>().ok());
    let render = |v: Option<&f64>| {
        let v = *v?;
        match &base {
            Some(base) => base.timestamp_at(v),
            None => Some(v.to_string()),
        }
    };
    (
        declared.0.or_else(|| render(times.first())),
        declared.1.or_else(|| render(times.last())),
    )
}
