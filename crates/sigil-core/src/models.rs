//! Core domain models and strongly-typed identifiers.
//!
//! Defines principals, agents, rules, proofs, batches, and newtype ID
//! wrappers for compile-time type safety. Includes database serialization
//! traits and lifecycle state enums for the attestation pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::rules::{Condition, ConditionResult};

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            ///
            /// Uses UUID v4 for globally unique identifiers without
            /// coordination.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id! {
    /// Strongly-typed principal identifier.
    ///
    /// A principal is the human or organization on whose behalf agents
    /// act. All billing and quota accounting is scoped to a principal.
    PrincipalId
}

uuid_id! {
    /// Strongly-typed agent identifier.
    ///
    /// Each agent is a credentialed issuer of attestations and owns a
    /// monotonic sequence counter. Wrapping the UUID prevents mixing
    /// with other ID types at compile time.
    AgentId
}

uuid_id! {
    /// Strongly-typed rule identifier.
    RuleId
}

uuid_id! {
    /// Strongly-typed proof (attestation) identifier.
    ProofId
}

uuid_id! {
    /// Strongly-typed Merkle batch identifier.
    BatchId
}

/// Principal account owning agents and paying for issuance.
///
/// Quota accounting uses a lazily-rolled monthly window: `period_start`
/// anchors the current month and `proofs_this_month` resets when a new
/// month begins.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Principal {
    /// Unique identifier for this principal.
    pub id: PrincipalId,

    /// Human-readable account name.
    pub name: String,

    /// Subscription tier (e.g., "free", "pro", "enterprise").
    pub tier: String,

    /// Maximum attestations allowed per month.
    pub max_proofs_per_month: i32,

    /// Attestations issued in the current month.
    pub proofs_this_month: i32,

    /// Price charged per attestation at this tier.
    pub unit_cost: f64,

    /// Anchor of the current monthly quota window.
    pub period_start: DateTime<Utc>,

    /// When this principal was created.
    pub created_at: DateTime<Utc>,

    /// When this principal was last updated.
    pub updated_at: DateTime<Utc>,

    /// When this principal was deleted (soft delete).
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Agent lifecycle status.
///
/// Agents progress through these states:
///
/// ```text
/// Active -> Suspended -> Active
///        -> Deleted (tombstone, terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Normal operation, may issue attestations.
    Active,

    /// Administratively suspended; issuance rejected.
    Suspended,

    /// Tombstoned. The row is retained so existing attestations keep a
    /// valid owner reference.
    Deleted,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl sqlx::Type<PgDb> for AgentStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AgentStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("invalid agent status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for AgentStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Credentialed issuer of attestations.
///
/// Each agent belongs to exactly one principal and owns a monotonically
/// increasing sequence counter (`nonce`). The counter is bumped by
/// exactly one inside each successful issuance transaction; it is never
/// decremented and never reused.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    /// Unique identifier for this agent.
    pub id: AgentId,

    /// Principal that owns this agent.
    pub principal_id: PrincipalId,

    /// Human-readable agent name.
    pub name: String,

    /// Current lifecycle status.
    pub status: AgentStatus,

    /// Sequence counter: the nonce of the most recently issued
    /// attestation, 0 before the first.
    ///
    /// Stored as a 64-bit integer so the sequence continues safely past
    /// `2^31 - 1`.
    pub nonce: i64,

    /// When this agent was created.
    pub created_at: DateTime<Utc>,

    /// When this agent was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Rule lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// Rule may be attested against.
    Active,

    /// Rule is retired. Archived rules are never hard-deleted while
    /// attestations reference them.
    Archived,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl sqlx::Type<PgDb> for RuleStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RuleStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("invalid rule status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for RuleStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Named conjunction of conditions owned by one agent.
///
/// The condition list is immutable per version: edits bump `version` and
/// append the prior snapshot to the rule history.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rule {
    /// Unique identifier for this rule.
    pub id: RuleId,

    /// Agent that owns this rule.
    pub agent_id: AgentId,

    /// Human-readable rule name.
    pub name: String,

    /// Conjunctive condition list. The rule is met iff every condition
    /// holds.
    pub conditions: sqlx::types::Json<Vec<Condition>>,

    /// Version counter, 1 on create.
    pub version: i32,

    /// Current lifecycle status.
    pub status: RuleStatus,

    /// When this rule was created.
    pub created_at: DateTime<Utc>,

    /// When this rule was last updated.
    pub updated_at: DateTime<Utc>,
}

/// One signed attestation that a rule held (or failed) over an action
/// record at a specific sequence number.
///
/// Immutable once created, except for the single batch-stamping update
/// applied when the proof is anchored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    /// Unique identifier for this proof.
    pub id: ProofId,

    /// Agent that issued this proof.
    pub agent_id: AgentId,

    /// Rule the proof attests against.
    pub rule_id: RuleId,

    /// Snapshot of the caller-supplied action record.
    pub action_data: Map<String, Value>,

    /// Per-condition evaluation results.
    pub evaluation: Vec<ConditionResult>,

    /// Aggregate outcome: true iff every condition passed.
    pub rule_met: bool,

    /// Human-readable evaluation summary.
    pub summary: String,

    /// Keccak-256 digest of the canonical payload, `0x` + 64 hex.
    ///
    /// Unique across all proofs; the public identifier of the
    /// attestation content.
    pub proof_hash: String,

    /// Envelope-encrypted compact signature, `hex(iv):hex(tag):hex(body)`.
    pub signature_enc: String,

    /// Agent-scoped sequence number inherited from the agent counter at
    /// issue time.
    pub nonce: i64,

    /// Price charged for this proof at issue time.
    pub unit_cost: f64,

    /// Batch this proof was aggregated into, if any.
    pub batch_id: Option<BatchId>,

    /// External-ledger transaction reference, once anchored.
    pub anchor_tx: Option<String>,

    /// When this proof was issued.
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for Proof {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let action_data: sqlx::types::Json<Map<String, Value>> = row.try_get("action_data")?;
        let evaluation: sqlx::types::Json<Vec<ConditionResult>> = row.try_get("evaluation")?;

        Ok(Self {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            rule_id: row.try_get("rule_id")?,
            action_data: action_data.0,
            evaluation: evaluation.0,
            rule_met: row.try_get("rule_met")?,
            summary: row.try_get("summary")?,
            proof_hash: row.try_get("proof_hash")?,
            signature_enc: row.try_get("signature_enc")?,
            nonce: row.try_get("nonce")?,
            unit_cost: row.try_get("unit_cost")?,
            batch_id: row.try_get("batch_id")?,
            anchor_tx: row.try_get("anchor_tx")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A set of proofs aggregated under one Merkle root and anchored on the
/// external ledger as a single record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Batch {
    /// Unique identifier for this batch.
    pub id: BatchId,

    /// Merkle root over the leaf digests, `0x` + 64 hex.
    pub root_hash: String,

    /// Number of leaves in the batch (1..=500).
    pub leaf_count: i32,

    /// Ledger transaction reference returned by the anchor call.
    pub anchor_tx: String,

    /// When the batch was committed.
    pub committed_at: DateTime<Utc>,
}
