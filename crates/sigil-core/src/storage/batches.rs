//! Repository for committed Merkle batches.
//!
//! A batch row exists only for successfully anchored batches: the insert
//! runs in the same transaction that stamps the member proofs, after the
//! external ledger accepted the root. There is no pending state.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{Batch, BatchId},
};

/// Repository for batch database operations.
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

    /// Inserts a committed batch inside the batch-commit transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        batch: &Batch,
    ) -> Result<BatchId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO batches (id, root_hash, leaf_count, anchor_tx, committed_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(batch.id.0)
        .bind(&batch.root_hash)
        .bind(batch.leaf_count)
        .bind(&batch.anchor_tx)
        .bind(batch.committed_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(BatchId(id))
    }

    /// Finds a batch by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, batch_id: BatchId) -> Result<Option<Batch>> {
        let batch = sqlx::query_as::<_, Batch>(
            r"
            SELECT id, root_hash, leaf_count, anchor_tx, committed_at
            FROM batches
            WHERE id = $1
            ",
        )
        .bind(batch_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(batch)
    }

    /// Counts committed batches.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM batches").fetch_one(&*self.pool).await?;

        Ok(count.0)
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
