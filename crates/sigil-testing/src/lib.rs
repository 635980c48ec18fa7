//! Test infrastructure and utilities for deterministic testing.
//!
//! Provides per-run schema isolation against a real PostgreSQL, fixture
//! helpers for principals, agents, keys, and rules, a controllable
//! clock, and a recording mock ledger. Integration tests skip cleanly
//! when `DATABASE_URL` is not set so the pure-logic suite stays runnable
//! anywhere.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use sigil_core::{
    models::{Agent, AgentStatus, Principal},
    rules::Condition,
    storage::{self, api_keys::CredentialIdentity, Storage},
    AgentId, Clock, PrincipalId, RuleId,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

pub mod ledger;
pub mod time;

pub use ledger::MockLedger;
pub use time::TestClock;

/// Test environment with schema isolation for integration testing.
///
/// Each environment owns a uniquely named schema in the target database;
/// every pooled connection pins its `search_path` there, so parallel
/// tests never see each other's rows.
pub struct TestEnv {
    /// Deterministic clock shared with services under test.
    pub clock: Arc<TestClock>,
    pool: PgPool,
    storage: Storage,
    schema: String,
}

impl TestEnv {
    /// Creates an isolated environment, or `None` without `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns error if the database is reachable but schema creation or
    /// migration fails.
    pub async fn try_new() -> Result<Option<Self>> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("skipping: DATABASE_URL not set");
            return Ok(None);
        };

        let schema = format!("sigil_test_{}", Uuid::new_v4().simple());

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .context("connecting to test database")?;
        sqlx::query(&format!("CREATE SCHEMA \"{schema}\""))
            .execute(&admin)
            .await
            .context("creating test schema")?;
        admin.close().await;

        let search_path_schema = schema.clone();
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .after_connect(move |conn, _meta| {
                let schema = search_path_schema.clone();
                Box::pin(async move {
                    sqlx::query(&format!("SET search_path TO \"{schema}\""))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .context("connecting isolated pool")?;

        storage::migrate(&pool).await.context("migrating test schema")?;

        let storage = Storage::new(pool.clone());

        Ok(Some(Self { clock: Arc::new(TestClock::default()), pool, storage, schema }))
    }

    /// Returns the isolated connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the storage layer bound to the isolated schema.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Drops the isolated schema and closes the pool.
    ///
    /// Best-effort: environments left behind by panicking tests are
    /// garbage, not corruption, and can be dropped manually.
    pub async fn teardown(self) {
        let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", self.schema))
            .execute(&self.pool)
            .await;
        self.pool.close().await;
    }

    /// Creates a principal with the given tier parameters.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_principal(
        &self,
        name: &str,
        max_proofs_per_month: i32,
        unit_cost: f64,
    ) -> Result<PrincipalId> {
        let now = self.clock.now_utc();
        let principal = Principal {
            id: PrincipalId::new(),
            name: format!("{name}-{}", Uuid::new_v4().simple()),
            tier: "free".to_string(),
            max_proofs_per_month,
            proofs_this_month: 0,
            unit_cost,
            period_start: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        Ok(self.storage.principals.create(&principal).await?)
    }

    /// Creates an active agent for a principal.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_agent(&self, principal_id: PrincipalId) -> Result<AgentId> {
        let now = self.clock.now_utc();
        let agent = Agent {
            id: AgentId::new(),
            principal_id,
            name: format!("agent-{}", Uuid::new_v4().simple()),
            status: AgentStatus::Active,
            nonce: 0,
            created_at: now,
            updated_at: now,
        };

        Ok(self.storage.agents.create(&agent).await?)
    }

    /// Creates an API key for an agent, returning the plaintext key.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_api_key(
        &self,
        principal_id: PrincipalId,
        agent_id: AgentId,
    ) -> Result<String> {
        let plaintext = format!("sg_test_{}", Uuid::new_v4().simple());
        let key_hash = sha256::digest(plaintext.as_bytes());

        self.storage.api_keys.create(&key_hash, principal_id, agent_id, "test-key").await?;

        Ok(plaintext)
    }

    /// Creates an active rule owned by an agent.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_rule(
        &self,
        agent_id: AgentId,
        conditions: Vec<Condition>,
    ) -> Result<RuleId> {
        let rule_id = RuleId::new();
        self.storage.rules.create(rule_id, agent_id, "test-rule", &conditions).await?;
        Ok(rule_id)
    }

    /// Builds the resolved identity for a (principal, agent) pair.
    pub fn identity(principal_id: PrincipalId, agent_id: AgentId) -> CredentialIdentity {
        CredentialIdentity { principal_id, agent_id }
    }

    /// A default slippage-style rule used across integration tests.
    pub fn default_conditions() -> Vec<Condition> {
        vec![
            Condition::new("slippage_pct", sigil_core::Operator::Le, json!(0.5)),
            Condition::new("pool_tvl", sigil_core::Operator::Gt, json!(50_000)),
        ]
    }
}
