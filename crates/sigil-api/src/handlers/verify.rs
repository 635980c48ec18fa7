//! Public proof verification handler.
//!
//! Returns the public fields of an attestation: digest, outcome,
//! evaluation, summary, and the ledger reference once batched. The
//! signature, whether plaintext or encrypted, is never returned;
//! verification against the digest happens on-ledger or by a holder of
//! the signing public key.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sigil_core::{rules::ConditionResult, ProofId, SigilError};
use tracing::instrument;
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// Public view of one attestation.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// Proof identifier.
    pub proof_id: Uuid,

    /// Canonical payload digest, `0x` + 64 hex.
    pub proof_hash: String,

    /// Aggregate evaluation outcome.
    pub rule_met: bool,

    /// Per-condition evaluation results.
    pub evaluation: Vec<ConditionResult>,

    /// Human-readable summary.
    pub summary: String,

    /// Whether the proof has been anchored on the external ledger.
    pub on_chain: bool,

    /// Ledger transaction reference, once batched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_tx: Option<String>,

    /// Batch the proof belongs to, once batched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,

    /// Issue timestamp.
    pub created_at: DateTime<Utc>,
}

/// Returns the public view of a proof.
///
/// # Errors
///
/// Returns *not found* for unknown identifiers.
#[instrument(name = "verify_proof", skip(state))]
pub async fn verify_proof(
    State(state): State<AppState>,
    Path(proof_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let proof = state
        .storage
        .proofs
        .find_by_id(ProofId::from(proof_id))
        .await
        .map_err(SigilError::from)?
        .ok_or(SigilError::NotFound("proof"))?;

    let response = VerifyResponse {
        proof_id: proof.id.0,
        proof_hash: proof.proof_hash,
        rule_met: proof.rule_met,
        evaluation: proof.evaluation,
        summary: proof.summary,
        on_chain: proof.anchor_tx.is_some(),
        anchor_tx: proof.anchor_tx,
        batch_id: proof.batch_id.map(|id| id.0),
        created_at: proof.created_at,
    };

    Ok(Json(response))
}
