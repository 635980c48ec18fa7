//! Attestation issuance coordinator.
//!
//! Every attestation flows through [`IssuerService::issue`]: quota check,
//! rule fetch and ownership check, evaluation, sequence-number
//! allocation, canonicalization, hashing, signing, envelope encryption,
//! persistence, and quota debit, all inside one transaction. Any
//! failure aborts the transaction: the sequence counter is not consumed
//! and the quota is not debited.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sigil_core::{
    rules,
    storage::{api_keys::CredentialIdentity, proofs::NewProof, Storage},
    AgentStatus, Clock, ProofId, RuleId, RuleStatus, SigilError,
};
use tracing::{info, instrument, warn};

use crate::{
    canonical::ProofPayload,
    digest,
    envelope::EnvelopeCipher,
    signing::ProofSigner,
};

/// Signing and encryption material loaded at process start.
///
/// Both halves are required for issuance. When configuration omits
/// either key the service runs degraded: reads keep working, issuance
/// returns an internal error.
#[derive(Debug)]
pub struct CryptoMaterials {
    /// secp256k1 signer for payload digests.
    pub signer: ProofSigner,

    /// AES-256-GCM cipher for signatures at rest.
    pub envelope: EnvelopeCipher,
}

/// Result of a successful issuance.
#[derive(Debug, Clone)]
pub struct IssuedProof {
    /// Proof identifier.
    pub proof_id: ProofId,

    /// Canonical payload digest, `0x` + 64 hex.
    pub proof_hash: String,

    /// Aggregate evaluation outcome.
    pub rule_met: bool,

    /// Per-condition evaluation results.
    pub evaluation: Vec<rules::ConditionResult>,

    /// Human-readable summary.
    pub summary: String,

    /// Price charged at issue time.
    pub unit_cost: f64,

    /// Agent sequence number of this proof.
    pub nonce: i64,

    /// Issue timestamp.
    pub created_at: DateTime<Utc>,
}

/// Coordinator gluing the rule engine, crypto pipeline, and storage into
/// one atomic issuance step.
pub struct IssuerService {
    storage: Storage,
    clock: Arc<dyn Clock>,
    crypto: Option<CryptoMaterials>,
}

impl IssuerService {
    /// Creates the coordinator.
    ///
    /// Pass `None` for `crypto` to run in degraded mode.
    pub fn new(storage: Storage, clock: Arc<dyn Clock>, crypto: Option<CryptoMaterials>) -> Self {
        if crypto.is_none() {
            warn!("issuer running degraded: signing or envelope key missing, issuance disabled");
        }
        Self { storage, clock, crypto }
    }

    /// Whether issuance is possible (crypto material loaded).
    pub fn issuance_enabled(&self) -> bool {
        self.crypto.is_some()
    }

    /// Issues one attestation.
    ///
    /// Preconditions are checked in a fixed order (quota, rule
    /// existence, ownership, rule state, rule integrity) with the
    /// listed taxonomy error on the first failure. The atomic section
    /// then allocates the nonce, runs the crypto pipeline, persists the
    /// proof, and debits the quota.
    ///
    /// # Errors
    ///
    /// Every taxonomy error is possible here; see the error type for the
    /// mapping. On any error nothing has been persisted.
    #[instrument(
        name = "issue_attestation",
        skip(self, action_data),
        fields(agent_id = %identity.agent_id, rule_id = %rule_id)
    )]
    pub async fn issue(
        &self,
        identity: CredentialIdentity,
        rule_id: RuleId,
        action_data: Map<String, Value>,
    ) -> Result<IssuedProof, SigilError> {
        rules::validate_action_record(&action_data).map_err(SigilError::Validation)?;

        let crypto = self
            .crypto
            .as_ref()
            .ok_or_else(|| SigilError::Internal("signing material unavailable".to_string()))?;

        let mut tx = self.storage.pool().begin().await?;

        // Locking the agent row first serializes concurrent issuance for
        // one agent at a single point and fixes the lock order.
        let agent = self
            .storage
            .agents
            .lock_in_tx(&mut tx, identity.agent_id)
            .await?
            .ok_or(SigilError::NotFound("agent"))?;

        if agent.status != AgentStatus::Active {
            return Err(SigilError::State(format!("agent is {}", agent.status)));
        }

        let quota = self
            .storage
            .principals
            .lock_quota_in_tx(&mut tx, identity.principal_id)
            .await?
            .ok_or(SigilError::NotFound("principal"))?;

        if !quota.has_capacity() {
            return Err(SigilError::QuotaExceeded);
        }

        let rule = self
            .storage
            .rules
            .find_by_id_in_tx(&mut tx, rule_id)
            .await?
            .ok_or(SigilError::NotFound("rule"))?;

        if rule.agent_id != identity.agent_id {
            return Err(SigilError::OwnershipMismatch);
        }

        if rule.status != RuleStatus::Active {
            return Err(SigilError::State("rule is archived".to_string()));
        }

        let conditions: &[rules::Condition] = &rule.conditions.0;
        if let Err(violation) = rules::validate_conditions(conditions) {
            // Stored rules are validated at write time, so this is
            // corruption, not caller error.
            return Err(SigilError::Internal(format!("rule {rule_id} corrupt: {violation}")));
        }

        let nonce = self.storage.agents.next_nonce_in_tx(&mut tx, identity.agent_id).await?;

        let evaluation = rules::evaluate(conditions, &action_data);
        let created_at = self.clock.now_utc();

        let payload = ProofPayload {
            agent: identity.agent_id,
            rule: rule.id,
            conditions,
            action: &action_data,
            eval: &evaluation.results,
            met: evaluation.met,
            nonce,
            ts: created_at.timestamp(),
        };

        let canonical = payload.canonical_bytes().map_err(SigilError::from)?;
        let proof_hash = digest::keccak256_hex(&canonical);
        let raw_digest = digest::keccak256(&canonical);

        let signature = crypto.signer.sign_digest(&raw_digest).map_err(SigilError::from)?;
        let signature_enc =
            crypto.envelope.encrypt(signature.to_hex().as_bytes()).map_err(SigilError::from)?;

        let proof = NewProof {
            id: ProofId::new(),
            agent_id: identity.agent_id,
            rule_id: rule.id,
            action_data,
            evaluation: evaluation.results.clone(),
            rule_met: evaluation.met,
            summary: evaluation.summary.clone(),
            proof_hash: proof_hash.clone(),
            signature_enc,
            nonce,
            unit_cost: quota.unit_cost,
            created_at,
        };

        self.storage.proofs.insert_in_tx(&mut tx, &proof).await?;
        self.storage.principals.debit_quota_in_tx(&mut tx, identity.principal_id).await?;

        tx.commit().await?;

        info!(
            proof_id = %proof.id,
            proof_hash = %proof_hash,
            nonce,
            met = evaluation.met,
            "attestation issued"
        );

        Ok(IssuedProof {
            proof_id: proof.id,
            proof_hash,
            rule_met: evaluation.met,
            evaluation: evaluation.results,
            summary: evaluation.summary,
            unit_cost: quota.unit_cost,
            nonce,
            created_at,
        })
    }
}
