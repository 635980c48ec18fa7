//! Repository for API key credentials.
//!
//! Keys are stored as SHA-256 hashes; the plaintext is shown once at
//! creation and never persisted. A credential resolves to the owning
//! (principal, agent) pair for the request context.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{AgentId, PrincipalId},
};

/// Resolved identity of an API credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialIdentity {
    /// Principal the credential bills against.
    pub principal_id: PrincipalId,

    /// Agent the credential issues as.
    pub agent_id: AgentId,
}

/// Repository for API key database operations.
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

    /// Stores a new API key hash for an agent.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or the hash already exists.
    pub async fn create(
        &self,
        key_hash: &str,
        principal_id: PrincipalId,
        agent_id: AgentId,
        name: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO api_keys (key_hash, principal_id, agent_id, name)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(key_hash)
        .bind(principal_id.0)
        .bind(agent_id.0)
        .bind(name)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Resolves a key hash to its identity, rejecting revoked and
    /// expired keys.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn resolve(&self, key_hash: &str) -> Result<Option<CredentialIdentity>> {
        let row: Option<(uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
            r"
            SELECT principal_id, agent_id
            FROM api_keys
            WHERE key_hash = $1
              AND revoked_at IS NULL
              AND (expires_at IS NULL OR expires_at > NOW())
            ",
        )
        .bind(key_hash)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|(principal_id, agent_id)| CredentialIdentity {
            principal_id: PrincipalId(principal_id),
            agent_id: AgentId(agent_id),
        }))
    }

    /// Records key usage for audit purposes.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn touch(&self, key_hash: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE key_hash = $1")
            .bind(key_hash)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Revokes a key immediately.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn revoke(&self, key_hash: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET revoked_at = NOW() WHERE key_hash = $1")
            .bind(key_hash)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }
}
