//! Repository for principal accounts and quota state.
//!
//! Principals own agents and pay for issuance. The monthly quota counter
//! lives here and is only ever modified under a row lock inside the
//! issuance transaction, keeping it race-free against concurrent
//! requests.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{Principal, PrincipalId},
};

/// Quota snapshot read under a row lock during issuance.
#[derive(Debug, Clone, Copy)]
pub struct QuotaState {
    /// Attestations issued in the current monthly window.
    pub proofs_this_month: i32,

    /// Tier limit for the window.
    pub max_proofs_per_month: i32,

    /// Per-attestation price at the principal's tier.
    pub unit_cost: f64,
}

impl QuotaState {
    /// Whether another attestation may be issued in this window.
    pub const fn has_capacity(&self) -> bool {
        self.proofs_this_month < self.max_proofs_per_month
    }
}

/// Repository for principal database operations.
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

    /// Creates a new principal.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or the name is already taken.
    pub async fn create(&self, principal: &Principal) -> Result<PrincipalId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO principals (id, name, tier, max_proofs_per_month, unit_cost)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(principal.id.0)
        .bind(&principal.name)
        .bind(&principal.tier)
        .bind(principal.max_proofs_per_month)
        .bind(principal.unit_cost)
        .fetch_one(&*self.pool)
        .await?;

        Ok(PrincipalId(id))
    }

    /// Finds a principal by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, principal_id: PrincipalId) -> Result<Option<Principal>> {
        let principal = sqlx::query_as::<_, Principal>(
            r"
            SELECT id, name, tier, max_proofs_per_month, proofs_this_month,
                   unit_cost, period_start, created_at, updated_at, deleted_at
            FROM principals
            WHERE id = $1 AND deleted_at IS NULL
            ",
        )
        .bind(principal_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(principal)
    }

    /// Locks the principal row for issuance and returns its quota state.
    ///
    /// Rolls the monthly window first: if `period_start` belongs to a
    /// prior month, the counter is reset and the anchor moved to the
    /// current month. The returned state reflects the rolled window. The
    /// row stays locked until the surrounding transaction ends.
    ///
    /// # Errors
    ///
    /// Returns error if the lock or update fails.
    pub async fn lock_quota_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        principal_id: PrincipalId,
    ) -> Result<Option<QuotaState>> {
        let row: Option<(i32, i32, f64)> = sqlx::query_as(
            r"
            SELECT proofs_this_month, max_proofs_per_month, unit_cost
            FROM principals
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
            ",
        )
        .bind(principal_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        let Some((used, limit, unit_cost)) = row else {
            return Ok(None);
        };

        let rolled = sqlx::query(
            r"
            UPDATE principals
            SET proofs_this_month = 0, period_start = date_trunc('month', NOW())
            WHERE id = $1 AND period_start < date_trunc('month', NOW())
            ",
        )
        .bind(principal_id.0)
        .execute(&mut **tx)
        .await?;

        let proofs_this_month = if rolled.rows_affected() > 0 { 0 } else { used };

        Ok(Some(QuotaState {
            proofs_this_month,
            max_proofs_per_month: limit,
            unit_cost,
        }))
    }

    /// Debits one issuance against the monthly quota.
    ///
    /// Must run inside the issuance transaction, after
    /// [`Repository::lock_quota_in_tx`] on the same row.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn debit_quota_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        principal_id: PrincipalId,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE principals
            SET proofs_this_month = proofs_this_month + 1, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(principal_id.0)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Updates the tier, limit, and unit price for a principal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_tier(
        &self,
        principal_id: PrincipalId,
        tier: &str,
        max_proofs_per_month: i32,
        unit_cost: f64,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE principals
            SET tier = $2, max_proofs_per_month = $3, unit_cost = $4, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(principal_id.0)
        .bind(tier)
        .bind(max_proofs_per_month)
        .bind(unit_cost)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Soft-deletes a principal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn delete(&self, principal_id: PrincipalId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE principals
            SET deleted_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            ",
        )
        .bind(principal_id.0)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
