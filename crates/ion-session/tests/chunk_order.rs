// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Chunk arrival order does not change the committed dataset.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{committed, ingest, DATASET};
use ion_dataset::AggregationRule;
use ion_dry_tests::{Harness, SupplementStream};
use proptest::prelude::*;

fn run(stream: &SupplementStream) -> Harness {
    let harness = Harness::new(AggregationRule::Overlap);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    runtime.block_on(ingest(&harness, stream)).unwrap();
    harness
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn shuffled_chunks_commit_the_same_dataset(
        (len, order) in (1_usize..8).prop_flat_map(|len| {
            let chunks = 1 + 2 * len;
            (Just(len), Just((0..chunks).collect::<Vec<_>>()).prop_shuffle())
        })
    ) {
        #[allow(clippy::cast_precision_loss)]
        let times: Vec<f64> = (0..len).map(|i| i as f64 * 6.0).collect();
        let in_order = SupplementStream::new(DATASET, &times);
        let mut shuffled = in_order.clone();
        shuffled.chunks = order.iter().map(|&i| in_order.chunks[i].clone()).collect();

        let a = committed(&run(&in_order));
        let b = committed(&run(&shuffled));
        prop_assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
        prop_assert_eq!(a.root.read_dense("time").unwrap(), times);
    }
}
