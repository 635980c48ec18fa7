//! End-to-end pipeline tests over the pure crypto path.
//!
//! Exercises evaluate → canonicalize → hash → sign → encrypt without a
//! database, including the literal scenarios from the service contract.

use serde_json::{json, Map, Value};
use sigil_attestation::{
    canonicalize, digest, recover_verifying_key, CompactSignature, EnvelopeCipher, ProofPayload,
    ProofSigner,
};
use sigil_core::{
    rules::{self, Condition, Operator},
    AgentId, RuleId,
};

fn record(value: Value) -> Map<String, Value> {
    value.as_object().expect("record literal").clone()
}

fn slippage_rule() -> Vec<Condition> {
    vec![
        Condition::new("slippage_pct", Operator::Le, json!(0.5)),
        Condition::new("pool_tvl", Operator::Gt, json!(50_000)),
    ]
}

struct Pipeline {
    signer: ProofSigner,
    envelope: EnvelopeCipher,
}

struct PipelineOutput {
    proof_hash: String,
    canonical: Vec<u8>,
    signature_enc: String,
    evaluation: rules::Evaluation,
}

impl Pipeline {
    fn new() -> Self {
        Self { signer: ProofSigner::ephemeral(), envelope: EnvelopeCipher::ephemeral() }
    }

    fn issue(
        &self,
        conditions: &[Condition],
        action: &Map<String, Value>,
        nonce: i64,
    ) -> PipelineOutput {
        let evaluation = rules::evaluate(conditions, action);

        let payload = ProofPayload {
            agent: AgentId::new(),
            rule: RuleId::new(),
            conditions,
            action,
            eval: &evaluation.results,
            met: evaluation.met,
            nonce,
            ts: 1_704_067_200,
        };

        let canonical = payload.canonical_bytes().unwrap();
        let proof_hash = digest::keccak256_hex(&canonical);
        let raw = digest::keccak256(&canonical);
        let signature = self.signer.sign_digest(&raw).unwrap();
        let signature_enc = self.envelope.encrypt(signature.to_hex().as_bytes()).unwrap();

        PipelineOutput { proof_hash, canonical, signature_enc, evaluation }
    }
}

#[test]
fn happy_path_two_conditions_pass() {
    let pipeline = Pipeline::new();
    let action = record(json!({"slippage_pct": 0.38, "pool_tvl": 2_100_000}));

    let output = pipeline.issue(&slippage_rule(), &action, 1);

    assert!(output.evaluation.met);
    assert_eq!(output.evaluation.results.len(), 2);
    assert!(output.evaluation.results.iter().all(|r| r.pass));
    assert_eq!(output.evaluation.summary, "All 2 conditions passed");

    // The digest is exactly the hash of the canonical payload.
    assert_eq!(output.proof_hash, digest::keccak256_hex(&output.canonical));
    assert_eq!(output.proof_hash.len(), 66);
}

#[test]
fn single_failing_condition_is_reported_first() {
    let pipeline = Pipeline::new();
    let action = record(json!({"slippage_pct": 0.8, "pool_tvl": 2_100_000}));

    let output = pipeline.issue(&slippage_rule(), &action, 2);

    assert!(!output.evaluation.met);
    let first = &output.evaluation.results[0];
    assert!(!first.pass);
    assert_eq!(first.actual, json!(0.8));
    assert_eq!(output.evaluation.summary, "1 of 2 conditions failed");
}

#[test]
fn missing_field_yields_null_actual() {
    let pipeline = Pipeline::new();
    let conditions = vec![Condition::new("amount", Operator::Le, json!(10_000))];
    let action = record(json!({"noise": 1}));

    let output = pipeline.issue(&conditions, &action, 3);

    assert!(!output.evaluation.met);
    assert_eq!(output.evaluation.results[0].actual, Value::Null);
}

#[test]
fn decrypted_signature_recovers_the_signer() {
    let pipeline = Pipeline::new();
    let action = record(json!({"slippage_pct": 0.1, "pool_tvl": 90_000}));

    let output = pipeline.issue(&slippage_rule(), &action, 4);

    let signature_hex = pipeline.envelope.decrypt(&output.signature_enc).unwrap();
    let signature_hex = String::from_utf8(signature_hex).unwrap();
    let signature = CompactSignature::from_hex(&signature_hex).unwrap();

    assert!(signature.v() == 27 || signature.v() == 28);

    let raw = digest::from_hex(&output.proof_hash).unwrap();
    let recovered = recover_verifying_key(&raw, &signature).unwrap();
    assert_eq!(recovered, pipeline.signer.verifying_key());
}

#[test]
fn identical_inputs_produce_identical_digests() {
    let conditions = slippage_rule();
    let action = record(json!({"slippage_pct": 0.2, "pool_tvl": 75_000}));
    let evaluation = rules::evaluate(&conditions, &action);
    let agent = AgentId::new();
    let rule = RuleId::new();

    let build = || {
        ProofPayload {
            agent,
            rule,
            conditions: &conditions,
            action: &action,
            eval: &evaluation.results,
            met: evaluation.met,
            nonce: 9,
            ts: 1_704_067_200,
        }
        .canonical_bytes()
        .unwrap()
    };

    assert_eq!(digest::keccak256_hex(&build()), digest::keccak256_hex(&build()));
}

#[test]
fn nonce_and_timestamp_are_digest_relevant() {
    let conditions = slippage_rule();
    let action = record(json!({"slippage_pct": 0.2, "pool_tvl": 75_000}));
    let evaluation = rules::evaluate(&conditions, &action);
    let agent = AgentId::new();
    let rule = RuleId::new();

    let digest_for = |nonce: i64, ts: i64| {
        let payload = ProofPayload {
            agent,
            rule,
            conditions: &conditions,
            action: &action,
            eval: &evaluation.results,
            met: evaluation.met,
            nonce,
            ts,
        };
        digest::keccak256_hex(&payload.canonical_bytes().unwrap())
    };

    let base = digest_for(1, 1_704_067_200);
    assert_ne!(base, digest_for(2, 1_704_067_200), "nonce must separate digests");
    assert_ne!(base, digest_for(1, 1_704_067_201), "timestamp must separate digests");
}

#[test]
fn canonical_payload_survives_reparse() {
    let conditions = slippage_rule();
    let action = record(json!({"slippage_pct": 0.38, "pool_tvl": 2_100_000}));
    let evaluation = rules::evaluate(&conditions, &action);

    let payload = ProofPayload {
        agent: AgentId::new(),
        rule: RuleId::new(),
        conditions: &conditions,
        action: &action,
        eval: &evaluation.results,
        met: evaluation.met,
        nonce: 12,
        ts: 1_704_067_200,
    };

    let first = payload.canonical_bytes().unwrap();
    let reparsed: Value = serde_json::from_slice(&first).unwrap();
    let second = canonicalize(&reparsed);

    assert_eq!(first, second, "canonical encoding must be idempotent");
}
