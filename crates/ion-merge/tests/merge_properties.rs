// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end merge properties over realistic time series.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use common::{empty_dataset, supplement, temp_at, temp_row, timeseries_with, with_bounds, UNITS};
use ion_dataset::{AggregationRule, Attribute, DataSourceDescriptor, Dataset, Supplement};
use ion_merge::{merge_supplement, MergeError, MergeOptions, MergeReport};
use proptest::prelude::*;

fn source(rule: AggregationRule) -> DataSourceDescriptor {
    DataSourceDescriptor::new("src-1", rule)
}

fn ingest(ds: &mut Dataset, sup: &Supplement, rule: AggregationRule) -> MergeReport {
    merge_supplement(ds, sup, &source(rule), &MergeOptions::default()).unwrap()
}

fn times(ds: &Dataset) -> Vec<f64> {
    ds.root.read_dense("time").unwrap()
}

#[test]
fn reapplying_a_contained_supplement_is_a_no_op() {
    let mut ds = empty_dataset();
    ingest(&mut ds, &supplement(&[0.0, 1.0, 2.0]), AggregationRule::Overlap);
    ingest(&mut ds, &supplement(&[3.0, 4.0, 5.0]), AggregationRule::Overlap);
    let before = ds.content_hash().unwrap();

    let report = ingest(&mut ds, &supplement(&[3.0, 4.0, 5.0]), AggregationRule::Overlap);
    assert!(report.is_clean());
    assert_eq!(ds.content_hash().unwrap(), before);
    assert_eq!(ds.root.dimension("time").unwrap().length, 6);
}

#[test]
fn overlapping_append_stores_each_step_once() {
    let mut ds = empty_dataset();
    ingest(&mut ds, &supplement(&[0.0, 1.0, 2.0]), AggregationRule::Overlap);
    let report = ingest(&mut ds, &supplement(&[1.0, 2.0, 3.0, 4.0]), AggregationRule::Overlap);
    assert_eq!(report.summary.timestep_count, 4);
    assert_eq!(times(&ds), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    assert_eq!(temp_row(&ds.root, 4), vec![temp_at(4.0, 0), temp_at(4.0, 1)]);
}

#[test]
fn overlap_with_divergent_data_is_rejected() {
    let mut ds = empty_dataset();
    ingest(&mut ds, &supplement(&[0.0, 1.0, 2.0]), AggregationRule::Overlap);
    let sup = Supplement {
        dataset_id: ds.id.clone(),
        root: timeseries_with(&[2.0, 3.0], 0, UNITS, |_, _| 99.0),
    };
    let err = merge_supplement(
        &mut ds,
        &sup,
        &source(AggregationRule::Overlap),
        &MergeOptions::default(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        MergeError::OverlapMismatch {
            variable: "temp".into(),
            index: 2
        }
    );
}

#[test]
fn overwrite_replaces_exactly_the_covered_range() {
    let mut ds = empty_dataset();
    let base: Vec<f64> = (0..6).map(f64::from).collect();
    ingest(&mut ds, &supplement(&base), AggregationRule::Overwrite);

    let patch = Supplement {
        dataset_id: ds.id.clone(),
        root: timeseries_with(&[2.0, 3.0], 0, UNITS, |_, _| -1.0),
    };
    ingest(&mut ds, &patch, AggregationRule::Overwrite);

    assert_eq!(times(&ds), base);
    assert_eq!(ds.root.dimension("time").unwrap().length, 6);
    for i in [0_u64, 1, 4, 5] {
        #[allow(clippy::cast_precision_loss)]
        let t = i as f64;
        assert_eq!(temp_row(&ds.root, i), vec![temp_at(t, 0), temp_at(t, 1)]);
    }
    assert_eq!(temp_row(&ds.root, 2), vec![-1.0, -1.0]);
    assert_eq!(temp_row(&ds.root, 3), vec![-1.0, -1.0]);
}

#[test]
fn overwrite_can_insert_and_extend() {
    let mut ds = empty_dataset();
    ingest(
        &mut ds,
        &supplement(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
        AggregationRule::Overwrite,
    );
    ingest(&mut ds, &supplement(&[4.5, 5.0, 6.0]), AggregationRule::Overwrite);
    assert_eq!(
        times(&ds),
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 4.5, 5.0, 6.0]
    );
    assert_eq!(ds.root.dimension("time").unwrap().length, 8);
    assert_eq!(temp_row(&ds.root, 7), vec![temp_at(6.0, 0), temp_at(6.0, 1)]);
}

#[test]
fn fmrc_runs_are_normalized_onto_stored_time_base() {
    let mut ds = empty_dataset();
    ingest(&mut ds, &supplement(&[0.0, 6.0]), AggregationRule::Fmrc);

    let later_run = Supplement {
        dataset_id: ds.id.clone(),
        root: timeseries_with(
            &[0.0, 6.0],
            0,
            "hours since 2024-01-01T12:00:00Z",
            temp_at,
        ),
    };
    ingest(&mut ds, &later_run, AggregationRule::Fmrc);

    assert_eq!(times(&ds), vec![0.0, 6.0, 12.0, 18.0]);
    assert_eq!(
        ds.root
            .variable("time")
            .and_then(|v| v.attribute("units"))
            .and_then(Attribute::as_text),
        Some(UNITS)
    );
}

#[test]
fn latitude_widens_and_longitude_follows_supplement() {
    let mut ds = empty_dataset();
    ingest(
        &mut ds,
        &with_bounds(supplement(&[0.0]), (-10.0, 10.0), (0.0, 20.0)),
        AggregationRule::Overlap,
    );
    ingest(
        &mut ds,
        &with_bounds(supplement(&[1.0]), (-20.0, 5.0), (5.0, 30.0)),
        AggregationRule::Overlap,
    );
    let bound = |name: &str| ds.root.attribute(name).and_then(Attribute::as_f64).unwrap();
    assert_eq!(bound("ion_geospatial_lat_min"), -20.0);
    assert_eq!(bound("ion_geospatial_lat_max"), 10.0);
    assert_eq!(bound("ion_geospatial_lon_min"), 5.0);
    assert_eq!(bound("ion_geospatial_lon_max"), 30.0);
}

#[test]
fn supplement_without_aggregation_dimension_is_rejected() {
    let mut ds = empty_dataset();
    let mut sup = supplement(&[0.0]);
    sup.root.dimensions.retain(|d| d.name != "time");
    assert_eq!(
        merge_supplement(
            &mut ds,
            &sup,
            &source(AggregationRule::Overlap),
            &MergeOptions::default()
        ),
        Err(MergeError::MissingAggregationDimension("time".into()))
    );
}

proptest! {
    #[test]
    fn split_appends_match_single_append(len in 2_usize..24, cuts in prop::collection::vec(1_usize..23, 0..4)) {
        #[allow(clippy::cast_precision_loss)]
        let all: Vec<f64> = (0..len).map(|i| i as f64).collect();
        let mut bounds: Vec<usize> = cuts.into_iter().filter(|&c| c < len).collect();
        bounds.sort_unstable();
        bounds.dedup();

        let mut whole = empty_dataset();
        ingest(&mut whole, &supplement(&all), AggregationRule::Overlap);

        let mut pieces = empty_dataset();
        let mut start = 0;
        for end in bounds.into_iter().chain(std::iter::once(len)) {
            ingest(&mut pieces, &supplement(&all[start..end]), AggregationRule::Overlap);
            start = end;
        }

        let t = times(&pieces);
        prop_assert!(t.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(t, all);
        prop_assert_eq!(pieces.content_hash().unwrap(), whole.content_hash().unwrap());
    }
}
