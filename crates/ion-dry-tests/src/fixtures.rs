// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Supplement stream builders.
//!
//! A stream is a header plus one chunk per variable per timestep: `time[time]`,
//! `temp[time, depth]`, and a single `depth[depth]` chunk.

use ion_dataset::{
    ArrayValues, Attribute, Bound, BoundedArray, DataType, DatasetId, Dimension, Group, Variable,
};
use ion_proto::{BlobError, ChunkPayload, DatasetHeader, IngestDone, IngestStatus, SupplementChunk};

use crate::blobs::MemoryBlobStore;

/// Depth levels per timestep.
pub const DEPTH: u64 = 2;
/// Time units used by [`SupplementStream::new`].
pub const UNITS: &str = "hours since 2024-01-01T00:00:00Z";

/// Default temperature at time `t`, depth level `d`.
#[allow(clippy::cast_precision_loss)]
pub fn temp_at(t: f64, d: u64) -> f64 {
    t * 10.0 + d as f64
}

/// Header and chunks for one supplement.
#[derive(Debug, Clone)]
pub struct SupplementStream {
    /// Header message.
    pub header: DatasetHeader,
    /// Chunk messages in generation order.
    pub chunks: Vec<SupplementChunk>,
}

impl SupplementStream {
    /// Stream for `times` with resident chunks and default temperatures.
    pub fn new(dataset_id: &str, times: &[f64]) -> Self {
        Self::with_temps(dataset_id, times, temp_at)
    }

    /// Stream whose `temp` values come from `temp`.
    #[allow(clippy::cast_precision_loss)]
    pub fn with_temps(dataset_id: &str, times: &[f64], temp: impl Fn(f64, u64) -> f64) -> Self {
        let id = DatasetId::from(dataset_id);
        let header = DatasetHeader {
            dataset_id: id.clone(),
            shape_descriptor: shape(times.len() as u64),
        };
        let mut chunks = vec![resident(
            &id,
            "depth",
            vec![Bound::new(0, DEPTH)],
            ArrayValues::Float64((0..DEPTH).map(|d| d as f64 * 5.0).collect()),
        )];
        for (i, &t) in times.iter().enumerate() {
            let at = i as u64;
            chunks.push(resident(
                &id,
                "time",
                vec![Bound::new(at, 1)],
                ArrayValues::Float64(vec![t]),
            ));
            chunks.push(resident(
                &id,
                "temp",
                vec![Bound::new(at, 1), Bound::new(0, DEPTH)],
                ArrayValues::Float64((0..DEPTH).map(|d| temp(t, d)).collect()),
            ));
        }
        Self { header, chunks }
    }

    /// Set a text global attribute on the header.
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.header
            .shape_descriptor
            .set_attribute(Attribute::text(name, value));
        self
    }

    /// Set a numeric global attribute on the header.
    pub fn with_float_attribute(mut self, name: &str, value: f64) -> Self {
        self.header
            .shape_descriptor
            .set_attribute(Attribute::float(name, value));
        self
    }

    /// Move every resident payload into `blobs` and reference it by key.
    pub fn into_remote(mut self, blobs: &MemoryBlobStore) -> Result<Self, BlobError> {
        for chunk in &mut self.chunks {
            if let ChunkPayload::Resident(block) = &chunk.payload {
                let key = blobs.put_values(&block.values)?;
                chunk.payload = ChunkPayload::Remote {
                    bounds: block.bounds.clone(),
                    key,
                };
            }
        }
        Ok(self)
    }
}

/// Successful end of stream.
pub fn done_ok() -> IngestDone {
    IngestDone {
        status: IngestStatus::Ok,
        detail: None,
    }
}

/// End of stream with a failure status.
pub fn done_with(status: IngestStatus, detail: &str) -> IngestDone {
    IngestDone {
        status,
        detail: Some(detail.to_string()),
    }
}

fn resident(id: &DatasetId, variable: &str, bounds: Vec<Bound>, values: ArrayValues) -> SupplementChunk {
    SupplementChunk {
        dataset_id: id.clone(),
        variable_name: variable.to_string(),
        payload: ChunkPayload::Resident(BoundedArray { bounds, values }),
    }
}

fn shape(steps: u64) -> Group {
    let mut time = Variable::new("time", DataType::Float64, vec!["time".into()]);
    time.set_attribute(Attribute::text("units", UNITS));
    time.set_attribute(Attribute::text("standard_name", "time"));
    let depth = Variable::new("depth", DataType::Float64, vec!["depth".into()]);
    let mut temp = Variable::new(
        "temp",
        DataType::Float64,
        vec!["time".into(), "depth".into()],
    );
    temp.set_attribute(Attribute::text("units", "degC"));

    Group {
        dimensions: vec![Dimension::new("time", steps), Dimension::new("depth", DEPTH)],
        variables: vec![time, depth, temp],
        attributes: Vec::new(),
    }
}
