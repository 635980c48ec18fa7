#![no_main]

//! Fuzz target for condition list parsing and evaluation.
//!
//! Arbitrary JSON must never panic the rule engine: parsing either
//! yields typed conditions or a single violation message, and anything
//! that parses must evaluate against arbitrary records without error.

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use sigil_core::rules;

fuzz_target!(|data: &[u8]| {
    let Some(split) = data.iter().position(|b| *b == 0) else {
        return;
    };
    let (conditions_raw, record_raw) = data.split_at(split);

    let Ok(conditions_value) = serde_json::from_slice::<Value>(conditions_raw) else {
        return;
    };

    let Ok(conditions) = rules::parse_conditions(&conditions_value) else {
        return;
    };

    // Whatever record the caller supplies, evaluation always completes.
    let record = serde_json::from_slice::<Value>(&record_raw[1..])
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    let evaluation = rules::evaluate(&conditions, &record);
    assert_eq!(evaluation.results.len(), conditions.len());
    assert_eq!(evaluation.met, evaluation.results.iter().all(|r| r.pass));
});
