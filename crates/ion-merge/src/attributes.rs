// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Global attribute merge policy table.
//!
//! Each known attribute kind maps to one [`MergeRule`]. Unknown attributes
//! take the supplement's value. Problems with individual attributes are
//! collected as [`AttributeConflict`]s instead of aborting the merge.

use std::cmp::Ordering;

use ion_dataset::Attribute;
use serde::{Deserialize, Serialize};

use crate::time_units::parse_timestamp;

/// Earliest time covered by the dataset (ISO 8601).
pub const TIME_COVERAGE_START: &str = "ion_time_coverage_start";
/// Latest time covered by the dataset (ISO 8601).
pub const TIME_COVERAGE_END: &str = "ion_time_coverage_end";
/// Southern bound.
pub const LAT_MIN: &str = "ion_geospatial_lat_min";
/// Northern bound.
pub const LAT_MAX: &str = "ion_geospatial_lat_max";
/// Western bound.
pub const LON_MIN: &str = "ion_geospatial_lon_min";
/// Eastern bound.
pub const LON_MAX: &str = "ion_geospatial_lon_max";
/// Lower vertical bound.
pub const VERTICAL_MIN: &str = "ion_geospatial_vertical_min";
/// Upper vertical bound.
pub const VERTICAL_MAX: &str = "ion_geospatial_vertical_max";
/// `"up"` or `"down"`.
pub const VERTICAL_POSITIVE: &str = "ion_geospatial_vertical_positive";
/// Processing history, one entry per line.
pub const HISTORY: &str = "history";

/// Known global attribute kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalAttribute {
    /// [`TIME_COVERAGE_START`]
    TimeCoverageStart,
    /// [`TIME_COVERAGE_END`]
    TimeCoverageEnd,
    /// [`LAT_MIN`]
    LatMin,
    /// [`LAT_MAX`]
    LatMax,
    /// [`LON_MIN`]
    LonMin,
    /// [`LON_MAX`]
    LonMax,
    /// [`VERTICAL_MIN`]
    VerticalMin,
    /// [`VERTICAL_MAX`]
    VerticalMax,
    /// [`VERTICAL_POSITIVE`]
    VerticalPositive,
    /// [`HISTORY`]
    History,
    /// Anything else.
    Other(String),
}

impl GlobalAttribute {
    /// Classify an attribute name.
    pub fn from_name(name: &str) -> Self {
        match name {
            TIME_COVERAGE_START => Self::TimeCoverageStart,
            TIME_COVERAGE_END => Self::TimeCoverageEnd,
            LAT_MIN => Self::LatMin,
            LAT_MAX => Self::LatMax,
            LON_MIN => Self::LonMin,
            LON_MAX => Self::LonMax,
            VERTICAL_MIN => Self::VerticalMin,
            VERTICAL_MAX => Self::VerticalMax,
            VERTICAL_POSITIVE => Self::VerticalPositive,
            HISTORY => Self::History,
            other => Self::Other(other.to_string()),
        }
    }

    /// Attribute name on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::TimeCoverageStart => TIME_COVERAGE_START,
            Self::TimeCoverageEnd => TIME_COVERAGE_END,
            Self::LatMin => LAT_MIN,
            Self::LatMax => LAT_MAX,
            Self::LonMin => LON_MIN,
            Self::LonMax => LON_MAX,
            Self::VerticalMin => VERTICAL_MIN,
            Self::VerticalMax => VERTICAL_MAX,
            Self::VerticalPositive => VERTICAL_POSITIVE,
            Self::History => HISTORY,
            Self::Other(name) => name,
        }
    }

    fn is_vertical_bound(&self) -> bool {
        matches!(self, Self::VerticalMin | Self::VerticalMax)
    }

    fn is_time(&self) -> bool {
        matches!(self, Self::TimeCoverageStart | Self::TimeCoverageEnd)
    }
}

/// How two values of one attribute combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeRule {
    /// Keep the smaller value.
    TakeLesser,
    /// Keep the larger value.
    TakeGreater,
    /// Supplement wins when it has a value.
    PreferSource,
    /// Newline-joined concatenation, stored first.
    ConcatenateHistory,
}

/// Direction of the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerticalPositive {
    /// Values grow downwards (depth).
    #[default]
    Down,
    /// Values grow upwards (height); min/max semantics invert.
    Up,
}

impl VerticalPositive {
    fn from_attribute(attr: Option<&Attribute>) -> Self {
        match attr.and_then(Attribute::as_text).map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("up") => Self::Up,
            _ => Self::Down,
        }
    }
}

/// Rule for one attribute kind.
pub fn rule_for(kind: &GlobalAttribute, positive: VerticalPositive) -> MergeRule {
    match (kind, positive) {
        (GlobalAttribute::TimeCoverageStart | GlobalAttribute::LatMin, _)
        | (GlobalAttribute::VerticalMin, VerticalPositive::Down)
        | (GlobalAttribute::VerticalMax, VerticalPositive::Up) => MergeRule::TakeLesser,
        (GlobalAttribute::TimeCoverageEnd | GlobalAttribute::LatMax, _)
        | (GlobalAttribute::VerticalMax, VerticalPositive::Down)
        | (GlobalAttribute::VerticalMin, VerticalPositive::Up) => MergeRule::TakeGreater,
        (GlobalAttribute::History, _) => MergeRule::ConcatenateHistory,
        // longitude wraps at the antimeridian, so bounds are not widened
        (
            GlobalAttribute::LonMin
            | GlobalAttribute::LonMax
            | GlobalAttribute::VerticalPositive
            | GlobalAttribute::Other(_),
            _,
        ) => MergeRule::PreferSource,
    }
}

/// One attribute that could not be merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeConflict {
    /// Attribute name.
    pub name: String,
    /// What went wrong.
    pub reason: String,
}

/// Merge `supplement` global attributes into `current` in place.
///
/// On a first ingest (`first_ingest`) every supplement attribute is copied
/// verbatim. Returns every conflict encountered; conflicting attributes keep
/// their stored value.
pub fn merge_global_attributes(
    current: &mut Vec<Attribute>,
    supplement: &[Attribute],
    first_ingest: bool,
) -> Vec<AttributeConflict> {
    if first_ingest {
        for attr in supplement {
            upsert(current, attr.clone());
        }
        return Vec::new();
    }

    let positive = VerticalPositive::from_attribute(
        find(supplement, VERTICAL_POSITIVE).or_else(|| find(current.as_slice(), VERTICAL_POSITIVE)),
    );
    let mut conflicts = Vec::new();
    for incoming in supplement {
        let kind = GlobalAttribute::from_name(&incoming.name);
        if kind.is_vertical_bound() {
            continue;
        }
        let rule = rule_for(&kind, positive);
        let merged = match find(current.as_slice(), &incoming.name) {
            None => Ok(incoming.clone()),
            Some(stored) => apply(rule, &kind, stored, incoming),
        };
        match merged {
            Ok(attr) => upsert(current, attr),
            Err(reason) => conflicts.push(AttributeConflict {
                name: incoming.name.clone(),
                reason,
            }),
        }
    }
    merge_vertical(current, supplement, positive, &mut conflicts);
    conflicts
}

fn merge_vertical(
    current: &mut Vec<Attribute>,
    supplement: &[Attribute],
    positive: VerticalPositive,
    conflicts: &mut Vec<AttributeConflict>,
) {
    let stored = current.as_slice();
    let both_present = [VERTICAL_MIN, VERTICAL_MAX]
        .iter()
        .all(|name| valid_bound(stored, name).is_some() && valid_bound(supplement, name).is_some());
    if !both_present {
        let mentioned = [VERTICAL_MIN, VERTICAL_MAX]
            .iter()
            .any(|name| find(stored, name).is_some() || find(supplement, name).is_some());
        if mentioned {
            upsert(current, Attribute::float(VERTICAL_MIN, f64::NAN));
            upsert(current, Attribute::float(VERTICAL_MAX, f64::NAN));
        }
        return;
    }
    for kind in [GlobalAttribute::VerticalMin, GlobalAttribute::VerticalMax] {
        let (Some(stored), Some(incoming)) = (
            find(current.as_slice(), kind.name()),
            find(supplement, kind.name()),
        ) else {
            continue;
        };
        match apply(rule_for(&kind, positive), &kind, stored, incoming) {
            Ok(attr) => upsert(current, attr),
            Err(reason) => conflicts.push(AttributeConflict {
                name: kind.name().to_string(),
                reason,
            }),
        }
    }
}

fn valid_bound(attrs: &[Attribute], name: &str) -> Option<f64> {
    find(attrs, name)
        .and_then(Attribute::as_f64)
        .filter(|v| !v.is_nan())
}

fn apply(
    rule: MergeRule,
    kind: &GlobalAttribute,
    stored: &Attribute,
    incoming: &Attribute,
) -> Result<Attribute, String> {
    match rule {
        MergeRule::PreferSource => Ok(incoming.clone()),
        MergeRule::ConcatenateHistory => match (stored.as_text(), incoming.as_text()) {
            (Some(a), Some(b)) if a.is_empty() => Ok(Attribute::text(&incoming.name, b)),
            (Some(a), Some(b)) => Ok(Attribute::text(&incoming.name, format!("{a}\n{b}"))),
            _ => Err("history is not text".to_string()),
        },
        MergeRule::TakeLesser | MergeRule::TakeGreater => {
            let ordering = compare(kind, stored, incoming)?;
            let keep_incoming = match rule {
                MergeRule::TakeLesser => ordering == Ordering::Greater,
                _ => ordering == Ordering::Less,
            };
            Ok(if keep_incoming {
                incoming.clone()
            } else {
                stored.clone()
            })
        }
    }
}

fn compare(kind: &GlobalAttribute, a: &Attribute, b: &Attribute) -> Result<Ordering, String> {
    if kind.is_time() {
        let parse = |attr: &Attribute| {
            attr.as_text()
                .and_then(parse_timestamp)
                .ok_or_else(|| format!("unparsable timestamp {:?}", attr.value))
        };
        return Ok(parse(a)?.cmp(&parse(b)?));
    }
    let number = |attr: &Attribute| {
        attr.as_f64()
            .ok_or_else(|| format!("non-numeric value {:?}", attr.value))
    };
    number(a)?
        .partial_cmp(&number(b)?)
        .ok_or_else(|| "NaN bound".to_string())
}

fn find<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
    attrs.iter().find(|a| a.name == name)
}

fn upsert(attrs: &mut Vec<Attribute>, attr: Attribute) {
    match attrs.iter_mut().find(|a| a.name == attr.name) {
        Some(slot) => *slot = attr,
        None => attrs.push(attr),
    }
}
