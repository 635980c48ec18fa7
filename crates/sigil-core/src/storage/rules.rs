//! Repository for rule definitions.
//!
//! Rules are immutable per version: edits bump the version counter and
//! snapshot the prior version into rule history in the same transaction.
//! Archiving is a soft state change; rules are never hard-deleted while
//! proofs reference them.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{AgentId, Rule, RuleId, RuleStatus},
    rules::Condition,
};

/// Repository for rule database operations.
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

    /// Creates a new rule at version 1.
    ///
    /// The condition list must already be validated; this method only
    /// persists it.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create(
        &self,
        rule_id: RuleId,
        agent_id: AgentId,
        name: &str,
        conditions: &[Condition],
    ) -> Result<RuleId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO rules (id, agent_id, name, conditions, version, status)
            VALUES ($1, $2, $3, $4, 1, 'active')
            RETURNING id
            ",
        )
        .bind(rule_id.0)
        .bind(agent_id.0)
        .bind(name)
        .bind(sqlx::types::Json(conditions))
        .fetch_one(&*self.pool)
        .await?;

        Ok(RuleId(id))
    }

    /// Finds a rule by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, rule_id: RuleId) -> Result<Option<Rule>> {
        let rule = sqlx::query_as::<_, Rule>(
            r"
            SELECT id, agent_id, name, conditions, version, status, created_at, updated_at
            FROM rules
            WHERE id = $1
            ",
        )
        .bind(rule_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(rule)
    }

    /// Finds a rule by ID inside a transaction.
    ///
    /// Used by the issuance path so the ownership and state checks read
    /// the same snapshot the insert will commit against.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rule_id: RuleId,
    ) -> Result<Option<Rule>> {
        let rule = sqlx::query_as::<_, Rule>(
            r"
            SELECT id, agent_id, name, conditions, version, status, created_at, updated_at
            FROM rules
            WHERE id = $1
            ",
        )
        .bind(rule_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(rule)
    }

    /// Lists rules owned by an agent, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_agent(&self, agent_id: AgentId, limit: Option<i64>) -> Result<Vec<Rule>> {
        let rules = sqlx::query_as::<_, Rule>(
            r"
            SELECT id, agent_id, name, conditions, version, status, created_at, updated_at
            FROM rules
            WHERE agent_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(agent_id.0)
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(rules)
    }

    /// Replaces the condition list, bumping the version.
    ///
    /// Must run in the same transaction as the history append so the
    /// prior version is never lost.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_conditions_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rule_id: RuleId,
        name: &str,
        conditions: &[Condition],
    ) -> Result<i32> {
        let version: i32 = sqlx::query_scalar(
            r"
            UPDATE rules
            SET name = $2, conditions = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING version
            ",
        )
        .bind(rule_id.0)
        .bind(name)
        .bind(sqlx::types::Json(conditions))
        .fetch_one(&mut **tx)
        .await?;

        Ok(version)
    }

    /// Archives a rule.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn archive(&self, rule_id: RuleId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE rules
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(rule_id.0)
        .bind(RuleStatus::Archived)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
