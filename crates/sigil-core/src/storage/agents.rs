//! Repository for agents and their sequence counters.
//!
//! The agent row carries the monotonic sequence counter (`nonce`). The
//! counter is only ever advanced through [`Repository::next_nonce_in_tx`]
//! inside the issuance transaction, which gives every successful
//! attestation a unique, gap-free number per agent.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{Agent, AgentId, AgentStatus, PrincipalId},
};

/// Repository for agent database operations.
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

    /// Creates a new agent in the active state with a zero counter.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create(&self, agent: &Agent) -> Result<AgentId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO agents (id, principal_id, name, status, nonce)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(agent.id.0)
        .bind(agent.principal_id.0)
        .bind(&agent.name)
        .bind(agent.status)
        .bind(agent.nonce)
        .fetch_one(&*self.pool)
        .await?;

        Ok(AgentId(id))
    }

    /// Finds an agent by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, agent_id: AgentId) -> Result<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>(
            r"
            SELECT id, principal_id, name, status, nonce, created_at, updated_at
            FROM agents
            WHERE id = $1
            ",
        )
        .bind(agent_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(agent)
    }

    /// Finds all agents belonging to a principal.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_principal(&self, principal_id: PrincipalId) -> Result<Vec<Agent>> {
        let agents = sqlx::query_as::<_, Agent>(
            r"
            SELECT id, principal_id, name, status, nonce, created_at, updated_at
            FROM agents
            WHERE principal_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(principal_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(agents)
    }

    /// Locks the agent row and returns its current state.
    ///
    /// Issuance locks the agent first so concurrent requests for the
    /// same agent serialize at one point, before any other row is
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns error if the lock fails.
    pub async fn lock_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        agent_id: AgentId,
    ) -> Result<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>(
            r"
            SELECT id, principal_id, name, status, nonce, created_at, updated_at
            FROM agents
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(agent_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(agent)
    }

    /// Advances the sequence counter by one and returns the new value.
    ///
    /// Linearizable read-modify-write under the row lock: the returned
    /// nonce is unique and gap-free per agent as long as the surrounding
    /// transaction commits, and is never consumed when it aborts.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails or the agent does not exist.
    pub async fn next_nonce_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        agent_id: AgentId,
    ) -> Result<i64> {
        let nonce: i64 = sqlx::query_scalar(
            r"
            UPDATE agents
            SET nonce = nonce + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING nonce
            ",
        )
        .bind(agent_id.0)
        .fetch_one(&mut **tx)
        .await?;

        Ok(nonce)
    }

    /// Sets the agent lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn set_status(&self, agent_id: AgentId, status: AgentStatus) -> Result<()> {
        sqlx::query(
            r"
            UPDATE agents
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(agent_id.0)
        .bind(status)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
