//! Model-based property tests: random operation sequences are replayed
//! against a `BTreeMap` reference, with every structural invariant
//! re-verified after each step.

use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::error::Error;
use crate::tree::RadixTree;

#[derive(Debug, Clone)]
enum Action {
    Add(Vec<u8>, Vec<u8>),
    Put(Vec<u8>, Vec<u8>),
    Get(Vec<u8>),
    Delete(Vec<u8>),
}

/// Keys drawn from a narrow alphabet so sequences hit shared prefixes,
/// splits, and merges instead of degenerating into a flat root.
fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 1..4),
        prop::collection::vec(0u8..4u8, 1..12),
        "[a-c]{1,8}".prop_map(|s| s.into_bytes()),
    ]
}

/// Values spanning the inline threshold, plus a fixed oversize value so
/// blob deduplication gets exercised.
fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..8),
        prop::collection::vec(any::<u8>(), 30..40),
        Just(vec![b'x'; 64]),
    ]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (key_strategy(), value_strategy()).prop_map(|(k, v)| Action::Put(k, v)),
        (key_strategy(), value_strategy()).prop_map(|(k, v)| Action::Add(k, v)),
        key_strategy().prop_map(Action::Get),
        key_strategy().prop_map(Action::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    #[test]
    fn matches_btreemap_model(actions in prop::collection::vec(action_strategy(), 1..48)) {
        let mut tree = RadixTree::new();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for action in actions {
            match action {
                Action::Put(key, value) => {
                    tree.put(&key, &value).unwrap();
                    model.insert(key, value);
                }
                Action::Add(key, value) => {
                    let result = tree.add(&key, &value);

                    if model.contains_key(&key) {
                        prop_assert!(matches!(result, Err(Error::DuplicateKey)));
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(key, value);
                    }
                }
                Action::Get(key) => match model.get(&key) {
                    Some(value) => prop_assert_eq!(&tree.get(&key).unwrap(), value),
                    None => {
                        prop_assert!(matches!(tree.get(&key), Err(Error::KeyNotFound)));
                    }
                },
                Action::Delete(key) => {
                    let result = tree.delete(&key);

                    if model.remove(&key).is_some() {
                        prop_assert!(result.is_ok());
                    } else {
                        prop_assert!(matches!(result, Err(Error::KeyNotFound)));
                    }
                }
            }

            prop_assert_eq!(tree.len(), model.len());

            let integrity = tree.verify_integrity();
            prop_assert!(integrity.is_ok(), "invariant violated: {:?}", integrity);
        }

        for (key, value) in &model {
            prop_assert_eq!(&tree.get(key).unwrap(), value);
        }
    }

    #[test]
    fn serialization_roundtrip(
        entries in prop::collection::vec((key_strategy(), value_strategy()), 0..32)
    ) {
        let mut tree = RadixTree::new();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for (key, value) in entries {
            tree.put(&key, &value).unwrap();
            model.insert(key, value);
        }

        let mut buf = Vec::new();
        tree.serialize(&mut buf).unwrap();
        let restored = RadixTree::deserialize(&mut buf.as_slice()).unwrap();

        prop_assert_eq!(restored.len(), model.len());
        prop_assert_eq!(restored.node_count(), tree.node_count());

        for (key, value) in &model {
            prop_assert_eq!(&restored.get(key).unwrap(), value);
        }

        let integrity = restored.verify_integrity();
        prop_assert!(integrity.is_ok(), "invariant violated: {:?}", integrity);
    }
}
