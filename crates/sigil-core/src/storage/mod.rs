//! Database access layer implementing the repository pattern for
//! attestation persistence.
//!
//! The repository layer acts as an anti-corruption layer, translating
//! between domain models and database schemas. All database operations
//! MUST go through these repositories; direct SQL outside this module is
//! forbidden to maintain consistency.

use std::sync::Arc;

use sqlx::PgPool;

pub mod agents;
pub mod api_keys;
pub mod batches;
pub mod principals;
pub mod proofs;
pub mod rule_history;
pub mod rules;

use crate::error::Result;

/// Container for all repository instances providing unified database
/// access.
///
/// `Storage` is the entry point for all database operations. It manages a
/// shared connection pool and provides type-safe access to each domain
/// repository.
#[derive(Clone)]
pub struct Storage {
    /// Repository for principal accounts and quota state.
    pub principals: Arc<principals::Repository>,

    /// Repository for agents and their sequence counters.
    pub agents: Arc<agents::Repository>,

    /// Repository for API key credentials.
    pub api_keys: Arc<api_keys::Repository>,

    /// Repository for rule definitions.
    pub rules: Arc<rules::Repository>,

    /// Repository for append-only rule version history.
    pub rule_history: Arc<rule_history::Repository>,

    /// Repository for issued proofs.
    pub proofs: Arc<proofs::Repository>,

    /// Repository for committed Merkle batches.
    pub batches: Arc<batches::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    ///
    /// All repositories share the same pool with Arc for efficient
    /// resource usage.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            principals: Arc::new(principals::Repository::new(pool.clone())),
            agents: Arc::new(agents::Repository::new(pool.clone())),
            api_keys: Arc::new(api_keys::Repository::new(pool.clone())),
            rules: Arc::new(rules::Repository::new(pool.clone())),
            rule_history: Arc::new(rule_history::Repository::new(pool.clone())),
            proofs: Arc::new(proofs::Repository::new(pool.clone())),
            batches: Arc::new(batches::Repository::new(pool)),
        }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.proofs.pool()
    }

    /// Performs a health check on the database connection.
    ///
    /// Executes a simple query to verify database connectivity. Used by
    /// the `/ready` endpoint for orchestration probes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy or
    /// the query times out.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool()).await?;

        Ok(())
    }
}

/// Ensures the schema exists, creating tables and indexes idempotently.
///
/// Run once at process start and by the test environment before each
/// isolated run.
///
/// # Errors
///
/// Returns `CoreError::Database` if any DDL statement fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let statements = [
        r"
        CREATE TABLE IF NOT EXISTS principals (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            tier TEXT NOT NULL DEFAULT 'free',
            max_proofs_per_month INTEGER NOT NULL DEFAULT 10,
            proofs_this_month INTEGER NOT NULL DEFAULT 0,
            unit_cost DOUBLE PRECISION NOT NULL DEFAULT 0,
            period_start TIMESTAMPTZ NOT NULL DEFAULT date_trunc('month', NOW()),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            deleted_at TIMESTAMPTZ
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS agents (
            id UUID PRIMARY KEY,
            principal_id UUID NOT NULL REFERENCES principals(id),
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            nonce BIGINT NOT NULL DEFAULT 0 CHECK (nonce >= 0),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS api_keys (
            key_hash TEXT PRIMARY KEY,
            principal_id UUID NOT NULL REFERENCES principals(id),
            agent_id UUID NOT NULL REFERENCES agents(id),
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            revoked_at TIMESTAMPTZ,
            expires_at TIMESTAMPTZ,
            last_used_at TIMESTAMPTZ
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS rules (
            id UUID PRIMARY KEY,
            agent_id UUID NOT NULL REFERENCES agents(id),
            name TEXT NOT NULL,
            conditions JSONB NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS rule_history (
            rule_id UUID NOT NULL REFERENCES rules(id),
            version INTEGER NOT NULL,
            name TEXT NOT NULL,
            conditions JSONB NOT NULL,
            archived_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (rule_id, version)
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS batches (
            id UUID PRIMARY KEY,
            root_hash TEXT NOT NULL,
            leaf_count INTEGER NOT NULL CHECK (leaf_count BETWEEN 1 AND 500),
            anchor_tx TEXT NOT NULL,
            committed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS proofs (
            id UUID PRIMARY KEY,
            agent_id UUID NOT NULL REFERENCES agents(id),
            rule_id UUID NOT NULL REFERENCES rules(id),
            action_data JSONB NOT NULL,
            evaluation JSONB NOT NULL,
            rule_met BOOLEAN NOT NULL,
            summary TEXT NOT NULL,
            proof_hash TEXT NOT NULL UNIQUE,
            signature_enc TEXT NOT NULL,
            nonce BIGINT NOT NULL,
            unit_cost DOUBLE PRECISION NOT NULL,
            batch_id UUID REFERENCES batches(id),
            anchor_tx TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (agent_id, nonce)
        )
        ",
        r"
        CREATE INDEX IF NOT EXISTS idx_proofs_unbatched
        ON proofs(created_at, id)
        WHERE batch_id IS NULL
        ",
        r"
        CREATE INDEX IF NOT EXISTS idx_rules_agent
        ON rules(agent_id, status)
        ",
        r"
        CREATE INDEX IF NOT EXISTS idx_agents_principal
        ON agents(principal_id)
        ",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
