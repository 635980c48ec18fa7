//! Integration tests for the issuance coordinator.
//!
//! Requires PostgreSQL via `DATABASE_URL`; every test skips cleanly when
//! the variable is unset so the pure-logic suite stays green without
//! infrastructure.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use sigil_attestation::{CryptoMaterials, EnvelopeCipher, IssuerService, ProofSigner};
use sigil_core::{rules::Condition, Clock, ErrorCode, Operator, RuleStatus};
use sigil_testing::TestEnv;

fn test_issuer(env: &TestEnv) -> Arc<IssuerService> {
    let crypto = CryptoMaterials {
        signer: ProofSigner::ephemeral(),
        envelope: EnvelopeCipher::ephemeral(),
    };
    Arc::new(IssuerService::new(
        env.storage().clone(),
        env.clock.clone() as Arc<dyn Clock>,
        Some(crypto),
    ))
}

#[tokio::test]
async fn issuance_persists_proof_with_first_nonce() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 100, 0.01).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;

    let issued = issuer
        .issue(
            TestEnv::identity(principal_id, agent_id),
            rule_id,
            json!({"slippage_pct": 0.38, "pool_tvl": 2_100_000}).as_object().unwrap().clone(),
        )
        .await
        .expect("issuance should succeed");

    assert!(issued.rule_met);
    assert_eq!(issued.nonce, 1);
    assert_eq!(issued.summary, "All 2 conditions passed");
    assert!((issued.unit_cost - 0.01).abs() < f64::EPSILON);

    let stored = env.storage().proofs.find_by_id(issued.proof_id).await?.expect("stored proof");
    assert_eq!(stored.proof_hash, issued.proof_hash);
    assert_eq!(stored.nonce, 1);
    assert!(stored.batch_id.is_none());
    assert!(stored.signature_enc.split(':').count() == 3);

    let agent = env.storage().agents.find_by_id(agent_id).await?.expect("agent");
    assert_eq!(agent.nonce, 1);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn nonces_are_sequential_across_issuances() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 100, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;

    for expected_nonce in 1..=5i64 {
        let issued = issuer
            .issue(
                TestEnv::identity(principal_id, agent_id),
                rule_id,
                json!({"slippage_pct": 0.1, "pool_tvl": 60_000, "seq": expected_nonce})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await
            .expect("issuance should succeed");
        assert_eq!(issued.nonce, expected_nonce);
    }

    let nonces = env.storage().proofs.nonces_for_agent(agent_id).await?;
    assert_eq!(nonces, vec![1, 2, 3, 4, 5]);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_issuance_produces_gap_free_nonces() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 1_000, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;

    let mut handles = Vec::new();
    for i in 0..100u32 {
        let issuer = issuer.clone();
        handles.push(tokio::spawn(async move {
            issuer
                .issue(
                    TestEnv::identity(principal_id, agent_id),
                    rule_id,
                    json!({"slippage_pct": 0.2, "pool_tvl": 80_000, "request": i})
                        .as_object()
                        .unwrap()
                        .clone(),
                )
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 100, "every concurrent issuance must succeed");

    let nonces = env.storage().proofs.nonces_for_agent(agent_id).await?;
    assert_eq!(nonces, (1..=100).collect::<Vec<i64>>(), "nonces must be 1..=100, gap-free");

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn quota_wall_rejects_and_consumes_nothing() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("free-tier", 10, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;

    for i in 0..10u32 {
        issuer
            .issue(
                TestEnv::identity(principal_id, agent_id),
                rule_id,
                json!({"slippage_pct": 0.1, "pool_tvl": 60_000, "n": i})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await
            .expect("issuance within quota should succeed");
    }

    let err = issuer
        .issue(
            TestEnv::identity(principal_id, agent_id),
            rule_id,
            json!({"slippage_pct": 0.1, "pool_tvl": 60_000, "n": 11}).as_object().unwrap().clone(),
        )
        .await
        .expect_err("11th issuance must hit the quota wall");

    assert_eq!(err.code(), ErrorCode::QuotaExceeded);

    // The sequence counter was not consumed and no row was inserted.
    let agent = env.storage().agents.find_by_id(agent_id).await?.expect("agent");
    assert_eq!(agent.nonce, 10);
    assert_eq!(env.storage().proofs.count_by_agent(agent_id).await?, 10);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn foreign_rule_is_an_ownership_mismatch() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 100, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let other_agent = env.create_agent(principal_id).await?;
    let foreign_rule = env.create_rule(other_agent, TestEnv::default_conditions()).await?;

    let err = issuer
        .issue(
            TestEnv::identity(principal_id, agent_id),
            foreign_rule,
            json!({"slippage_pct": 0.1, "pool_tvl": 60_000}).as_object().unwrap().clone(),
        )
        .await
        .expect_err("foreign rule must be rejected");

    assert_eq!(err.code(), ErrorCode::OwnershipMismatch);
    assert_eq!(env.storage().proofs.count_by_agent(agent_id).await?, 0);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn archived_rule_is_a_state_error() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 100, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;
    env.storage().rules.archive(rule_id).await?;

    let rule = env.storage().rules.find_by_id(rule_id).await?.expect("rule");
    assert_eq!(rule.status, RuleStatus::Archived);

    let err = issuer
        .issue(
            TestEnv::identity(principal_id, agent_id),
            rule_id,
            json!({"slippage_pct": 0.1, "pool_tvl": 60_000}).as_object().unwrap().clone(),
        )
        .await
        .expect_err("archived rule must be rejected");

    assert_eq!(err.code(), ErrorCode::State);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_rule_is_not_found() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 100, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;

    let err = issuer
        .issue(
            TestEnv::identity(principal_id, agent_id),
            sigil_core::RuleId::new(),
            json!({"slippage_pct": 0.1}).as_object().unwrap().clone(),
        )
        .await
        .expect_err("unknown rule must be rejected");

    assert_eq!(err.code(), ErrorCode::NotFound);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn suspended_agent_cannot_issue() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 100, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;

    env.storage().agents.set_status(agent_id, sigil_core::AgentStatus::Suspended).await?;

    let err = issuer
        .issue(
            TestEnv::identity(principal_id, agent_id),
            rule_id,
            json!({"slippage_pct": 0.1, "pool_tvl": 60_000}).as_object().unwrap().clone(),
        )
        .await
        .expect_err("suspended agent must be rejected");

    assert_eq!(err.code(), ErrorCode::State);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn malformed_action_record_is_a_validation_error() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 100, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;

    let err = issuer
        .issue(
            TestEnv::identity(principal_id, agent_id),
            rule_id,
            json!({"nested": {"a": 1}}).as_object().unwrap().clone(),
        )
        .await
        .expect_err("nested action values must be rejected");

    assert_eq!(err.code(), ErrorCode::Validation);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn degraded_issuer_returns_internal() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = IssuerService::new(
        env.storage().clone(),
        env.clock.clone() as Arc<dyn Clock>,
        None,
    );
    assert!(!issuer.issuance_enabled());

    let principal_id = env.create_principal("acme", 100, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;

    let err = issuer
        .issue(
            TestEnv::identity(principal_id, agent_id),
            rule_id,
            json!({"slippage_pct": 0.1, "pool_tvl": 60_000}).as_object().unwrap().clone(),
        )
        .await
        .expect_err("degraded issuer must reject issuance");

    assert_eq!(err.code(), ErrorCode::Internal);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn digests_are_unique_across_issuances() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    let issuer = test_issuer(&env);

    let principal_id = env.create_principal("acme", 100, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env
        .create_rule(agent_id, vec![Condition::new("x", Operator::Ge, json!(0))])
        .await?;

    // Identical action records still produce distinct digests because
    // the nonce is part of the signed payload.
    let mut hashes = std::collections::HashSet::new();
    for _ in 0..5 {
        let issued = issuer
            .issue(
                TestEnv::identity(principal_id, agent_id),
                rule_id,
                json!({"x": 1}).as_object().unwrap().clone(),
            )
            .await
            .expect("issuance should succeed");
        assert!(hashes.insert(issued.proof_hash), "digest collision");
    }

    env.teardown().await;
    Ok(())
}
