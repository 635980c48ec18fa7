//! Deterministic canonical encoding of attestation payloads.
//!
//! The digest that identifies a proof is computed over these bytes, so
//! two hosts given the same semantic inputs must produce the identical
//! sequence. The general-purpose serializer cannot promise that (map
//! ordering, float formatting), so this module is a small dedicated
//! encoder instead:
//!
//! - object keys sorted ascending by code point, at every depth
//! - list order preserved
//! - strings UTF-8 with only the mandatory JSON escapes
//! - integers without a decimal point, floats in Rust's shortest
//!   round-trip decimal form
//! - `true` / `false` / `null` literal tokens, no whitespace
//!
//! Encoding is idempotent: parsing the output and re-encoding it yields
//! byte-identical results.

use serde_json::{Map, Value};
use sigil_core::{
    rules::{Condition, ConditionResult},
    AgentId, RuleId,
};

use crate::error::Result;

/// Version of the canonical payload schema.
///
/// Future schema changes must bump this and never repurpose a field.
pub const PAYLOAD_VERSION: u64 = 1;

/// The signed content of one attestation.
///
/// Field names here are the wire keys of the canonical object; the
/// encoder orders them by code point regardless of declaration order.
#[derive(Debug, Clone, Copy)]
pub struct ProofPayload<'a> {
    /// Issuing agent.
    pub agent: AgentId,

    /// Rule attested against.
    pub rule: RuleId,

    /// Rule condition list at issue time.
    pub conditions: &'a [Condition],

    /// Caller-supplied action record.
    pub action: &'a Map<String, Value>,

    /// Per-condition evaluation results.
    pub eval: &'a [ConditionResult],

    /// Aggregate outcome.
    pub met: bool,

    /// Agent sequence number.
    pub nonce: i64,

    /// Issue time, whole seconds since the Unix epoch.
    pub ts: i64,
}

impl ProofPayload<'_> {
    /// Builds the payload object with schema version `v = 1`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if conditions or results cannot be
    /// represented as JSON, which would indicate a bug.
    pub fn to_value(&self) -> Result<Value> {
        let mut payload = Map::new();
        payload.insert("v".to_string(), Value::from(PAYLOAD_VERSION));
        payload.insert("agent".to_string(), Value::String(self.agent.to_string()));
        payload.insert("rule".to_string(), Value::String(self.rule.to_string()));
        payload.insert("conditions".to_string(), serde_json::to_value(self.conditions)?);
        payload.insert("action".to_string(), Value::Object(self.action.clone()));
        payload.insert("eval".to_string(), serde_json::to_value(self.eval)?);
        payload.insert("met".to_string(), Value::Bool(self.met));
        payload.insert("nonce".to_string(), Value::from(self.nonce));
        payload.insert("ts".to_string(), Value::from(self.ts));

        Ok(Value::Object(payload))
    }

    /// Canonical byte sequence of the payload.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be built.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(canonicalize(&self.to_value()?))
    }
}

/// Encodes a JSON value into its canonical byte sequence.
pub fn canonicalize(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_value(&mut out, value);
    out.into_bytes()
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        },
        Value::Object(map) => {
            // Sorting by code point at every depth is the load-bearing
            // property: the default serializer preserves insertion order.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        },
    }
}

/// Integers print without a decimal point; everything else uses the
/// shortest decimal form that round-trips through f64. serde_json
/// guarantees the number is finite.
fn write_number(out: &mut String, n: &serde_json::Number) {
    use std::fmt::Write;

    if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else if let Some(f) = n.as_f64() {
        let _ = write!(out, "{f}");
    }
}

/// Mandatory escapes only: quote, backslash, and control characters.
fn write_string(out: &mut String, s: &str) {
    use std::fmt::Write;

    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{09}' => out.push_str("\\t"),
            '\u{0a}' => out.push_str("\\n"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{0d}' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            },
            c => out.push(c),
        }
    }
    out.push('"');
}
