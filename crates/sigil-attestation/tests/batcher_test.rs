//! Integration tests for the Merkle batch service.
//!
//! Requires PostgreSQL via `DATABASE_URL`; every test skips cleanly when
//! the variable is unset.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use serde_json::json;
use sigil_attestation::{
    digest, verify_inclusion, BatchConfig, BatchService, CryptoMaterials, EnvelopeCipher,
    IssuerService, MerkleTree, ProofSigner,
};
use sigil_core::Clock;
use sigil_testing::{MockLedger, TestEnv};

fn unique_lock_key() -> i64 {
    // Each test environment gets its own advisory lock so parallel
    // tests on one database never contend.
    i64::from(uuid::Uuid::new_v4().as_u128() as i32)
}

async fn issue_proofs(env: &TestEnv, count: usize) -> Result<()> {
    let issuer = IssuerService::new(
        env.storage().clone(),
        env.clock.clone() as Arc<dyn Clock>,
        Some(CryptoMaterials {
            signer: ProofSigner::ephemeral(),
            envelope: EnvelopeCipher::ephemeral(),
        }),
    );

    let principal_id = env.create_principal("batch-acct", 10_000, 0.0).await?;
    let agent_id = env.create_agent(principal_id).await?;
    let rule_id = env.create_rule(agent_id, TestEnv::default_conditions()).await?;

    for i in 0..count {
        issuer
            .issue(
                TestEnv::identity(principal_id, agent_id),
                rule_id,
                json!({"slippage_pct": 0.1, "pool_tvl": 70_000, "n": i})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await
            .expect("issuance should succeed");
    }

    Ok(())
}

fn batcher(env: &TestEnv, ledger: Arc<MockLedger>, max_leaves: usize) -> BatchService {
    BatchService::new(
        env.storage().clone(),
        ledger,
        env.clock.clone() as Arc<dyn Clock>,
        BatchConfig {
            max_leaves,
            interval: Duration::from_secs(3600),
            anchor_deadline: Duration::from_secs(5),
            lock_key: unique_lock_key(),
        },
    )
}

#[tokio::test]
async fn cycle_commits_batch_and_stamps_proofs() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    issue_proofs(&env, 3).await?;

    let ledger = Arc::new(MockLedger::new());
    let service = batcher(&env, ledger.clone(), 500);

    let summary = service.run_cycle().await.expect("cycle").expect("batch committed");
    assert_eq!(summary.leaf_count, 3);
    assert!(summary.anchor_tx.starts_with("0xmocktx"));

    // Every proof now carries the batch reference.
    let unbatched = env.storage().proofs.find_unbatched(500).await?;
    assert!(unbatched.is_empty());

    let batch = env
        .storage()
        .batches
        .find_by_id(summary.batch_id)
        .await?
        .expect("batch row persisted");
    assert_eq!(batch.leaf_count, 3);
    assert_eq!(batch.anchor_tx, summary.anchor_tx);
    assert_eq!(batch.root_hash, summary.root_hash);

    // The ledger saw the same root and leaves.
    let anchored = ledger.anchored();
    assert_eq!(anchored.len(), 1);
    assert_eq!(digest::to_hex(&anchored[0].root), summary.root_hash);
    assert_eq!(anchored[0].count, 3);

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn stored_leaves_reproduce_the_stored_root() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    issue_proofs(&env, 7).await?;

    let ledger = Arc::new(MockLedger::new());
    let service = batcher(&env, ledger, 500);
    let summary = service.run_cycle().await.expect("cycle").expect("batch committed");

    let hashes = env.storage().proofs.hashes_for_batch(summary.batch_id).await?;
    assert_eq!(hashes.len(), 7);

    let leaves: Vec<[u8; 32]> =
        hashes.iter().map(|h| digest::from_hex(h).expect("stored digest")).collect();
    let tree = MerkleTree::from_leaves(leaves.clone()).expect("tree");

    assert_eq!(digest::to_hex(&tree.root()), summary.root_hash);

    // Every member proves inclusion against the stored root.
    let root = tree.root();
    for (i, leaf) in leaves.iter().enumerate() {
        let path = tree.proof(i).expect("path");
        assert!(verify_inclusion(leaf, &path, &root));
    }

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn ledger_failure_leaves_proofs_unbatched() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    issue_proofs(&env, 4).await?;

    let ledger = Arc::new(MockLedger::new());
    ledger.set_failing(true);

    let service = batcher(&env, ledger.clone(), 500);
    let err = service.run_cycle().await.expect_err("outage must fail the cycle");
    assert!(err.is_retryable());

    // No partial progress: nothing stamped, no batch row.
    assert_eq!(env.storage().proofs.find_unbatched(500).await?.len(), 4);
    assert_eq!(env.storage().batches.count().await?, 0);

    // The next cycle picks the same proofs up.
    ledger.set_failing(false);
    let summary = service.run_cycle().await.expect("cycle").expect("batch committed");
    assert_eq!(summary.leaf_count, 4);
    assert!(env.storage().proofs.find_unbatched(500).await?.is_empty());

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn oversized_backlog_is_chunked_by_leaf_limit() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };
    issue_proofs(&env, 5).await?;

    let ledger = Arc::new(MockLedger::new());
    let service = batcher(&env, ledger, 2);

    let first = service.run_cycle().await.expect("cycle").expect("batch");
    assert_eq!(first.leaf_count, 2);

    let second = service.run_cycle().await.expect("cycle").expect("batch");
    assert_eq!(second.leaf_count, 2);

    let third = service.run_cycle().await.expect("cycle").expect("batch");
    assert_eq!(third.leaf_count, 1);

    assert!(service.run_cycle().await.expect("cycle").is_none(), "backlog drained");

    env.teardown().await;
    Ok(())
}

#[tokio::test]
async fn empty_backlog_skips_quietly() -> Result<()> {
    let Some(env) = TestEnv::try_new().await? else { return Ok(()) };

    let ledger = Arc::new(MockLedger::new());
    let service = batcher(&env, ledger.clone(), 500);

    assert!(service.run_cycle().await.expect("cycle").is_none());
    assert!(ledger.anchored().is_empty());

    env.teardown().await;
    Ok(())
}
