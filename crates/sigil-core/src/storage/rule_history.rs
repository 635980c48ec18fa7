//! Repository for append-only rule version history.
//!
//! Every rule edit snapshots the outgoing version here, keyed by
//! (rule, version). History rows are never updated or deleted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::{error::Result, models::RuleId, rules::Condition};

/// One archived rule version.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RuleVersion {
    /// Rule the snapshot belongs to.
    pub rule_id: RuleId,

    /// Version number of the snapshot.
    pub version: i32,

    /// Rule name at that version.
    pub name: String,

    /// Condition list at that version.
    pub conditions: sqlx::types::Json<Vec<Condition>>,

    /// When the version was superseded.
    pub archived_at: DateTime<Utc>,
}

/// Repository for rule history database operations.
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

    /// Appends a superseded version snapshot.
    ///
    /// Runs inside the rule-update transaction so the snapshot and the
    /// version bump commit together.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails, including on a duplicate
    /// (rule, version) pair.
    pub async fn append_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rule_id: RuleId,
        version: i32,
        name: &str,
        conditions: &[Condition],
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO rule_history (rule_id, version, name, conditions)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(rule_id.0)
        .bind(version)
        .bind(name)
        .bind(sqlx::types::Json(conditions))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Lists all archived versions of a rule, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_versions(&self, rule_id: RuleId) -> Result<Vec<RuleVersion>> {
        let versions = sqlx::query_as::<_, RuleVersion>(
            r"
            SELECT rule_id, version, name, conditions, archived_at
            FROM rule_history
            WHERE rule_id = $1
            ORDER BY version ASC
            ",
        )
        .bind(rule_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(versions)
    }
}
