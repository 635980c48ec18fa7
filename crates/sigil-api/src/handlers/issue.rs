//! Attestation issuance handler.
//!
//! Accepts a rule identifier and an action record, delegates to the
//! issuer coordinator, and returns the public view of the freshly
//! issued proof. All precondition failures surface as taxonomy errors;
//! nothing is persisted on failure.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sigil_core::{rules::ConditionResult, storage::api_keys::CredentialIdentity, RuleId};
use tracing::instrument;
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// Request body for `POST /issue`.
#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    /// Rule to attest against.
    pub rule_id: Uuid,

    /// Action record the rule is evaluated over.
    pub action_data: Map<String, Value>,
}

/// Response body for a successful issuance.
#[derive(Debug, Serialize)]
pub struct IssueResponse {
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

    /// Price charged for this proof.
    pub cost: f64,

    /// Always false at issue time; flips once the proof is batched.
    pub on_chain: bool,

    /// Public verification URL.
    pub verify_url: String,

    /// Issue timestamp.
    pub created_at: DateTime<Utc>,
}

/// Issues one attestation.
///
/// # Errors
///
/// Returns taxonomy errors for quota exhaustion, unknown or foreign
/// rules, archived rules, and commit conflicts; see the error module for
/// status mapping.
#[instrument(
    name = "issue_proof",
    skip(state, identity, request),
    fields(agent_id = %identity.agent_id, rule_id = %request.rule_id)
)]
pub async fn issue_proof(
    State(state): State<AppState>,
    Extension(identity): Extension<CredentialIdentity>,
    Json(request): Json<IssueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state
        .issuer
        .issue(identity, RuleId::from(request.rule_id), request.action_data)
        .await?;

    let response = IssueResponse {
        proof_id: issued.proof_id.0,
        proof_hash: issued.proof_hash,
        rule_met: issued.rule_met,
        evaluation: issued.evaluation,
        summary: issued.summary,
        cost: issued.unit_cost,
        on_chain: false,
        verify_url: state.verify_url(issued.proof_id),
        created_at: issued.created_at,
    };

    Ok((StatusCode::CREATED, Json(response)))
}
