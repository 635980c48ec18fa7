//! Periodic Merkle batching of unbatched proofs.
//!
//! Each cycle scans unbatched proofs in issue order, builds the batch
//! tree, anchors the root on the external ledger, and only then stamps
//! the proofs inside a single transaction. A failed anchor call or a
//! missed deadline writes nothing: the proofs stay unbatched and the
//! next cycle retries them. No partial progress is ever recorded.
//!
//! A Postgres advisory lock keeps at most one batcher active per
//! deployment; a crashed batcher releases the lock with its session and
//! leaves its candidates re-batchable.

use std::{sync::Arc, time::Duration};

use sigil_core::{
    models::{Batch, BatchId},
    storage::Storage,
    Clock,
};
use tracing::{debug, error, info, warn};

use crate::{
    digest,
    error::{AttestationError, Result},
    ledger::Ledger,
    merkle::{MerkleTree, MAX_BATCH_LEAVES},
};

/// Default advisory lock key identifying the batcher across a
/// deployment.
pub const BATCHER_LOCK_KEY: i64 = 0x5167_1BA7;

/// Batcher tuning knobs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum leaves per batch, capped at [`MAX_BATCH_LEAVES`].
    pub max_leaves: usize,

    /// Pause between cycles.
    pub interval: Duration,

    /// Wall-clock budget for the external anchor call. On expiry the
    /// cycle is abandoned and the proofs remain unbatched.
    pub anchor_deadline: Duration,

    /// Advisory lock key scoping "at most one batcher" to a deployment.
    /// Deployments sharing one database cluster must use distinct keys.
    pub lock_key: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_leaves: MAX_BATCH_LEAVES,
            interval: Duration::from_secs(60),
            anchor_deadline: Duration::from_secs(30),
            lock_key: BATCHER_LOCK_KEY,
        }
    }
}

/// Outcome of one committed batch cycle.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// Identifier of the committed batch.
    pub batch_id: BatchId,

    /// Merkle root, `0x` + 64 hex.
    pub root_hash: String,

    /// Number of proofs aggregated.
    pub leaf_count: usize,

    /// Ledger transaction reference.
    pub anchor_tx: String,
}

/// Merkle batch service.
pub struct BatchService {
    storage: Storage,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    config: BatchConfig,
}

impl BatchService {
    /// Creates a new batch service.
    ///
    /// The configured leaf limit is clamped to [`MAX_BATCH_LEAVES`].
    pub fn new(
        storage: Storage,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        mut config: BatchConfig,
    ) -> Self {
        if config.max_leaves > MAX_BATCH_LEAVES {
            warn!(
                requested = config.max_leaves,
                max = MAX_BATCH_LEAVES,
                "batch leaf limit clamped"
            );
            config.max_leaves = MAX_BATCH_LEAVES;
        }
        Self { storage, ledger, clock, config }
    }

    /// Runs batch cycles until the task is aborted.
    ///
    /// Cycle errors are internal: they are logged and retried on the
    /// next tick, never surfaced to callers.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            max_leaves = self.config.max_leaves,
            "merkle batcher started"
        );

        loop {
            ticker.tick().await;

            match self.run_cycle().await {
                Ok(Some(summary)) => {
                    info!(
                        batch_id = %summary.batch_id,
                        root = %summary.root_hash,
                        leaves = summary.leaf_count,
                        anchor_tx = %summary.anchor_tx,
                        "batch committed"
                    );
                },
                Ok(None) => {
                    debug!("batch cycle skipped: nothing to do or lock held elsewhere");
                },
                Err(e) => {
                    error!(error = %e, retryable = e.is_retryable(), "batch cycle failed");
                },
            }
        }
    }

    /// Runs one batch cycle.
    ///
    /// Returns `Ok(None)` when another batcher holds the lock or there
    /// are no unbatched proofs.
    ///
    /// # Errors
    ///
    /// Returns an error when the ledger call or the commit fails; in
    /// both cases no proof has been marked batched.
    pub async fn run_cycle(&self) -> Result<Option<BatchSummary>> {
        // The advisory lock is session-scoped, so it must live on one
        // dedicated connection for the whole cycle.
        let mut lock_conn = self.storage.pool().acquire().await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.config.lock_key)
            .fetch_one(&mut *lock_conn)
            .await?;

        if !locked {
            return Ok(None);
        }

        let outcome = self.commit_pending().await;

        let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.config.lock_key)
            .execute(&mut *lock_conn)
            .await;
        if let Err(e) = unlock {
            warn!(error = %e, "failed to release batcher advisory lock");
        }

        outcome
    }

    /// Scans, anchors, and stamps one batch. Caller holds the lock.
    async fn commit_pending(&self) -> Result<Option<BatchSummary>> {
        let candidates = self
            .storage
            .proofs
            .find_unbatched(self.config.max_leaves as i64)
            .await
            .map_err(AttestationError::storage)?;

        if candidates.is_empty() {
            return Ok(None);
        }

        let mut leaves = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            leaves.push(digest::from_hex(&candidate.proof_hash)?);
        }

        let tree = MerkleTree::from_leaves(leaves)?;
        let root = tree.root();
        let count = u32::try_from(tree.leaf_count()).unwrap_or(u32::MAX);

        // The external call is the only step allowed to fail cheaply:
        // nothing has been written yet.
        let anchor_tx = tokio::time::timeout(
            self.config.anchor_deadline,
            self.ledger.anchor_batch(root, count, tree.leaves()),
        )
        .await
        .map_err(|_| AttestationError::DeadlineExceeded)??;

        let batch = Batch {
            id: BatchId::new(),
            root_hash: digest::to_hex(&root),
            leaf_count: i32::try_from(tree.leaf_count()).unwrap_or(i32::MAX),
            anchor_tx: anchor_tx.clone(),
            committed_at: self.clock.now_utc(),
        };

        let proof_ids: Vec<_> = candidates.iter().map(|c| c.id).collect();

        let mut tx = self.storage.pool().begin().await?;
        self.storage
            .batches
            .insert_in_tx(&mut tx, &batch)
            .await
            .map_err(AttestationError::storage)?;
        let stamped = self
            .storage
            .proofs
            .mark_batched_in_tx(&mut tx, &proof_ids, batch.id, &anchor_tx)
            .await
            .map_err(AttestationError::storage)?;
        tx.commit().await?;

        debug!(stamped, "proofs stamped with batch reference");

        Ok(Some(BatchSummary {
            batch_id: batch.id,
            root_hash: batch.root_hash,
            leaf_count: tree.leaf_count(),
            anchor_tx,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_stays_within_the_leaf_limit() {
        let config = BatchConfig::default();
        assert!(config.max_leaves <= MAX_BATCH_LEAVES);
        assert!(config.anchor_deadline < config.interval);
    }
}
