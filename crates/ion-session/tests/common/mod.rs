// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use ion_dataset::{Dataset, DatasetId};
use ion_dry_tests::{done_ok, Harness, SupplementStream};
use ion_proto::OutcomeEvent;
use ion_session::{Delivery, Outcome, SessionHandle};

pub const DATASET: &str = "ds-1";

pub fn dataset_id() -> DatasetId {
    DatasetId::from(DATASET)
}

/// Send the header and every chunk; returns the deliveries in order.
pub async fn feed(handle: &SessionHandle, stream: &SupplementStream) -> Vec<Delivery> {
    let mut deliveries = vec![handle.on_header(stream.header.clone()).await];
    for chunk in &stream.chunks {
        deliveries.push(handle.on_chunk(chunk.clone()).await);
    }
    deliveries
}

/// Run one complete session for `stream` and return its outcome.
pub async fn ingest(harness: &Harness, stream: &SupplementStream) -> Outcome {
    let handle = harness
        .controller()
        .begin_session(&ion_dry_tests::perform_ingest(DATASET, 30))
        .unwrap();
    feed(&handle, stream).await;
    handle.on_done(done_ok()).await;
    handle.await_outcome().await
}

pub fn committed(harness: &Harness) -> Dataset {
    harness.datasets.committed(&dataset_id()).unwrap()
}

pub fn times(harness: &Harness) -> Vec<f64> {
    committed(harness).root.read_dense("time").unwrap()
}

pub fn last_event(harness: &Harness) -> OutcomeEvent {
    harness.events.events().pop().unwrap()
}
