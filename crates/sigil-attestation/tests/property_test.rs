//! Property-based tests for the canonical encoder and Merkle tree.

#![allow(clippy::unwrap_used)]

use proptest::{prelude::*, test_runner::Config as ProptestConfig};
use serde_json::Value;
use sigil_attestation::{canonicalize, digest, verify_inclusion, EnvelopeCipher, MerkleTree};

/// Deterministic property test configuration for CI stability.
fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 50,
        timeout: 5000,
        fork: false,
        failure_persistence: None,
        source_file: None,
        ..ProptestConfig::default()
    }
}

fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::from(n)),
        (-1.0e15f64..1.0e15).prop_map(|f| serde_json::json!(f)),
        "[ -~]{0,24}".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Canonical encoding is idempotent for arbitrary JSON.
    #[test]
    fn canonicalization_is_idempotent(value in json_value_strategy()) {
        let first = canonicalize(&value);
        let reparsed: Value = serde_json::from_slice(&first).unwrap();
        let second = canonicalize(&reparsed);

        prop_assert_eq!(first, second);
    }

    /// Key order in the input never changes the canonical bytes.
    #[test]
    fn map_insertion_order_is_irrelevant(
        entries in prop::collection::vec(("[a-z]{1,8}", any::<i64>()), 1..8),
    ) {
        let forward: serde_json::Map<String, Value> =
            entries.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect();
        let mut reversed_entries = entries.clone();
        reversed_entries.reverse();
        let reversed: serde_json::Map<String, Value> =
            reversed_entries.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect();

        prop_assert_eq!(
            canonicalize(&Value::Object(forward)),
            canonicalize(&Value::Object(reversed))
        );
    }

    /// Every leaf of every tree shape proves membership against the root.
    #[test]
    fn all_inclusion_proofs_verify(count in 1usize..60) {
        let leaves: Vec<[u8; 32]> =
            (0..count).map(|i| digest::keccak256(&(i as u64).to_le_bytes())).collect();
        let tree = MerkleTree::from_leaves(leaves.clone()).unwrap();
        let root = tree.root();

        for (i, leaf) in leaves.iter().enumerate() {
            let path = tree.proof(i).unwrap();
            prop_assert!(verify_inclusion(leaf, &path, &root));
        }
    }

    /// A corrupted leaf never verifies against the original root.
    #[test]
    fn corrupted_leaves_fail_verification(count in 2usize..40, victim in 0usize..40) {
        let victim = victim % count;
        let leaves: Vec<[u8; 32]> =
            (0..count).map(|i| digest::keccak256(&(i as u64).to_le_bytes())).collect();
        let tree = MerkleTree::from_leaves(leaves.clone()).unwrap();
        let path = tree.proof(victim).unwrap();

        let mut corrupted = leaves[victim];
        corrupted[0] ^= 0xff;

        prop_assert!(!verify_inclusion(&corrupted, &path, &tree.root()));
    }

    /// Envelope round-trip holds for arbitrary byte strings.
    #[test]
    fn envelope_round_trip(plaintext in prop::collection::vec(any::<u8>(), 0..256)) {
        let cipher = EnvelopeCipher::from_bytes(&[7u8; 32]);
        let stored = cipher.encrypt(&plaintext).unwrap();

        prop_assert_eq!(cipher.decrypt(&stored).unwrap(), plaintext);
    }
}
