// tests/property/delivery_test.rs

//! Property-based tests for typed delivery
//! Tests that messages sent over a link arrive intact and in order

use crate::test_helpers::MemoryLink;
use commlink::connection::ConnectionKey;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Update {
    seq: u64,
    label: String,
    values: Vec<i32>,
    flag: Option<bool>,
}

fn update_strategy() -> impl Strategy<Value = Update> {
    (
        any::<u64>(),
        ".{0,64}",
        prop::collection::vec(any::<i32>(), 0..16),
        any::<Option<bool>>(),
    )
        .prop_map(|(seq, label, values, flag)| Update {
            seq,
            label,
            values,
            flag,
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_updates_arrive_intact_and_in_order(
        updates in prop::collection::vec(update_strategy(), 1..30)
    ) {
        let link = MemoryLink::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        link.server
            .registration()
            .register::<Update>()
            .add_last(move |_context, _session, update| {
                sink.lock().push(update.clone());
                Ok(())
            });

        for update in &updates {
            link.client_context.send(update).unwrap();
        }
        prop_assert_eq!(&*received.lock(), &updates);
    }

    #[test]
    fn test_guarded_handler_sees_exactly_matching_updates(
        updates in prop::collection::vec(update_strategy(), 1..30),
        threshold in any::<u64>()
    ) {
        let link = MemoryLink::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        link.server
            .registration()
            .register::<Update>()
            .add_last(move |context, _session, update| {
                assert_eq!(context.key(), &ConnectionKey::default());
                sink.lock().push(update.seq);
                Ok(())
            })
            .require_value(move |update: &Update| update.seq >= threshold);

        for update in &updates {
            link.client_context.send(update).unwrap();
        }
        let expected: Vec<u64> = updates
            .iter()
            .map(|u| u.seq)
            .filter(|seq| *seq >= threshold)
            .collect();
        prop_assert_eq!(&*received.lock(), &expected);
    }
}
