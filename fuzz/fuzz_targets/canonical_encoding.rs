#![no_main]

//! Fuzz target for canonical payload encoding.
//!
//! Feeds arbitrary JSON through the canonical encoder and checks the
//! idempotence invariant: parsing the canonical bytes and re-encoding
//! them must be byte-identical, and must never panic. A violation here
//! means two hosts could disagree on a digest.

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use sigil_attestation::canonicalize;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let first = canonicalize(&value);

    let reparsed: Value = match serde_json::from_slice(&first) {
        Ok(v) => v,
        Err(e) => panic!("canonical output must be valid JSON: {e}"),
    };
    let second = canonicalize(&reparsed);

    assert_eq!(first, second, "canonical encoding must be idempotent");
});
