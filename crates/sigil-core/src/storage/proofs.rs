//! Repository for issued proofs.
//!
//! Proof rows are written exactly once inside the issuance transaction
//! and mutated exactly once more when a batch anchors them. The UNIQUE
//! constraints on `proof_hash` and `(agent_id, nonce)` are the last line
//! of defense against digest collisions and duplicate sequence numbers;
//! a violation aborts the surrounding transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{AgentId, BatchId, Proof, ProofId, RuleId},
    rules::ConditionResult,
};

/// Fields of a proof row at insertion time.
///
/// Batch references start empty; `created_at` is supplied by the caller
/// so the stored row matches the `ts` member of the signed payload.
#[derive(Debug, Clone)]
pub struct NewProof {
    /// Proof identifier.
    pub id: ProofId,

    /// Issuing agent.
    pub agent_id: AgentId,

    /// Rule attested against.
    pub rule_id: RuleId,

    /// Snapshot of the action record.
    pub action_data: Map<String, Value>,

    /// Per-condition evaluation results.
    pub evaluation: Vec<ConditionResult>,

    /// Aggregate outcome.
    pub rule_met: bool,

    /// Evaluation summary.
    pub summary: String,

    /// Canonical payload digest, `0x` + 64 hex.
    pub proof_hash: String,

    /// Envelope-encrypted signature.
    pub signature_enc: String,

    /// Agent sequence number.
    pub nonce: i64,

    /// Price at issue time.
    pub unit_cost: f64,

    /// Issue timestamp.
    pub created_at: DateTime<Utc>,
}

/// An unbatched proof digest, as scanned by the batcher.
#[derive(Debug, Clone)]
pub struct UnbatchedProof {
    /// Proof identifier.
    pub id: ProofId,

    /// Canonical payload digest, `0x` + 64 hex.
    pub proof_hash: String,
}

/// Repository for proof database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a proof inside the issuance transaction.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation on digest or nonce collision;
    /// the caller must abort the transaction.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        proof: &NewProof,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO proofs (
                id, agent_id, rule_id, action_data, evaluation, rule_met,
                summary, proof_hash, signature_enc, nonce, unit_cost, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(proof.id.0)
        .bind(proof.agent_id.0)
        .bind(proof.rule_id.0)
        .bind(sqlx::types::Json(&proof.action_data))
        .bind(sqlx::types::Json(&proof.evaluation))
        .bind(proof.rule_met)
        .bind(&proof.summary)
        .bind(&proof.proof_hash)
        .bind(&proof.signature_enc)
        .bind(proof.nonce)
        .bind(proof.unit_cost)
        .bind(proof.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Finds a proof by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, proof_id: ProofId) -> Result<Option<Proof>> {
        let proof = sqlx::query_as::<_, Proof>(
            r"
            SELECT id, agent_id, rule_id, action_data, evaluation, rule_met,
                   summary, proof_hash, signature_enc, nonce, unit_cost,
                   batch_id, anchor_tx, created_at
            FROM proofs
            WHERE id = $1
            ",
        )
        .bind(proof_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(proof)
    }

    /// Scans unbatched proofs in commit-visibility order.
    ///
    /// Ordered by issue time ascending with the identifier as the tie
    /// breaker, which fixes the batcher's leaf ordering.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_unbatched(&self, limit: i64) -> Result<Vec<UnbatchedProof>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r"
            SELECT id, proof_hash
            FROM proofs
            WHERE batch_id IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, proof_hash)| UnbatchedProof { id: ProofId(id), proof_hash })
            .collect())
    }

    /// Stamps every proof in a committed batch with its batch reference.
    ///
    /// Runs in the batch-commit transaction, only after the external
    /// anchor call succeeded.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_batched_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        proof_ids: &[ProofId],
        batch_id: BatchId,
        anchor_tx: &str,
    ) -> Result<u64> {
        let ids: Vec<Uuid> = proof_ids.iter().map(|id| id.0).collect();

        let updated = sqlx::query(
            r"
            UPDATE proofs
            SET batch_id = $2, anchor_tx = $3
            WHERE id = ANY($1) AND batch_id IS NULL
            ",
        )
        .bind(&ids)
        .bind(batch_id.0)
        .bind(anchor_tx)
        .execute(&mut **tx)
        .await?;

        Ok(updated.rows_affected())
    }

    /// Lists proofs for an agent, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_agent(&self, agent_id: AgentId, limit: Option<i64>) -> Result<Vec<Proof>> {
        let proofs = sqlx::query_as::<_, Proof>(
            r"
            SELECT id, agent_id, rule_id, action_data, evaluation, rule_met,
                   summary, proof_hash, signature_enc, nonce, unit_cost,
                   batch_id, anchor_tx, created_at
            FROM proofs
            WHERE agent_id = $1
            ORDER BY nonce DESC
            LIMIT $2
            ",
        )
        .bind(agent_id.0)
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(proofs)
    }

    /// Returns every nonce issued for an agent in ascending order.
    ///
    /// Used by invariant checks: the sequence must be contiguous from 1
    /// with no duplicates.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn nonces_for_agent(&self, agent_id: AgentId) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r"
            SELECT nonce FROM proofs
            WHERE agent_id = $1
            ORDER BY nonce ASC
            ",
        )
        .bind(agent_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    /// Counts proofs issued for an agent.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count_by_agent(&self, agent_id: AgentId) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM proofs WHERE agent_id = $1")
                .bind(agent_id.0)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.0)
    }

    /// Lists the ordered proof hashes of a committed batch.
    ///
    /// Order matches the batcher's scan order so the stored root is
    /// reproducible from these leaves.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn hashes_for_batch(&self, batch_id: BatchId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r"
            SELECT proof_hash FROM proofs
            WHERE batch_id = $1
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(batch_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.into_iter().map(|(h,)| h).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}
