// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::cast_precision_loss)]

use ion_dataset::{
    ArrayValues, Attribute, Bound, BoundedArray, DataType, Dataset, DatasetId, Dimension, Group,
    Supplement, Variable,
};

pub const DEPTH: u64 = 2;
pub const UNITS: &str = "hours since 2024-01-01T00:00:00Z";

/// Temperature at time `t`, depth level `d`.
pub fn temp_at(t: f64, d: u64) -> f64 {
    t * 10.0 + d as f64
}

/// Time series group with a `time` coordinate and a `temp[time, depth]`
/// variable, one block per timestep starting at `origin`.
pub fn timeseries(times: &[f64], origin: u64, units: &str) -> Group {
    timeseries_with(times, origin, units, temp_at)
}

pub fn timeseries_with(
    times: &[f64],
    origin: u64,
    units: &str,
    temp: impl Fn(f64, u64) -> f64,
) -> Group {
    let mut g = Group::default();
    g.add_dimension(Dimension::new("time", times.len() as u64))
        .unwrap();
    g.add_dimension(Dimension::new("depth", DEPTH)).unwrap();

    let mut time = Variable::new("time", DataType::Float64, vec!["time".into()]);
    time.set_attribute(Attribute::text("units", units));
    time.set_attribute(Attribute::text("standard_name", "time"));
    let mut t_var = Variable::new(
        "temp",
        DataType::Float64,
        vec!["time".into(), "depth".into()],
    );
    t_var.set_attribute(Attribute::text("units", "degC"));

    let mut depth = Variable::new("depth", DataType::Float64, vec!["depth".into()]);
    depth
        .push_array(
            BoundedArray::new(
                vec![Bound::new(0, DEPTH)],
                ArrayValues::Float64((0..DEPTH).map(|d| d as f64 * 5.0).collect()),
            )
            .unwrap(),
        )
        .unwrap();

    for (i, &t) in times.iter().enumerate() {
        let at = origin + i as u64;
        time.push_array(
            BoundedArray::new(vec![Bound::new(at, 1)], ArrayValues::Float64(vec![t])).unwrap(),
        )
        .unwrap();
        t_var
            .push_array(
                BoundedArray::new(
                    vec![Bound::new(at, 1), Bound::new(0, DEPTH)],
                    ArrayValues::Float64((0..DEPTH).map(|d| temp(t, d)).collect()),
                )
                .unwrap(),
            )
            .unwrap();
    }
    g.add_variable(time).unwrap();
    g.add_variable(depth).unwrap();
    g.add_variable(t_var).unwrap();
    g
}

pub fn supplement(times: &[f64]) -> Supplement {
    Supplement {
        dataset_id: DatasetId::from("ds-1"),
        root: timeseries(times, 0, UNITS),
    }
}

pub fn with_bounds(mut s: Supplement, lat: (f64, f64), lon: (f64, f64)) -> Supplement {
    s.root
        .set_attribute(Attribute::float("ion_geospatial_lat_min", lat.0));
    s.root
        .set_attribute(Attribute::float("ion_geospatial_lat_max", lat.1));
    s.root
        .set_attribute(Attribute::float("ion_geospatial_lon_min", lon.0));
    s.root
        .set_attribute(Attribute::float("ion_geospatial_lon_max", lon.1));
    s
}

pub fn empty_dataset() -> Dataset {
    Dataset::new("ds-1")
}

/// Dense `temp` row at absolute time index `index`.
pub fn temp_row(group: &Group, index: u64) -> Vec<f64> {
    group.read_hyperslab("temp", 0, index, 1).unwrap()
}
