//! Rule management handlers.
//!
//! Rules are validated at registration, versioned on edit with an
//! append-only history snapshot, and archived rather than deleted. All
//! operations are scoped to the authenticated agent.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigil_core::{
    rules::{self, Condition},
    storage::api_keys::CredentialIdentity,
    Rule, RuleId, RuleStatus, SigilError,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// Request body for `POST /rules`.
#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    /// Human-readable rule name.
    pub name: String,

    /// Raw condition list, validated before storage.
    pub conditions: Value,
}

/// Request body for `PUT /rules/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    /// Replacement name; keeps the current one when omitted.
    pub name: Option<String>,

    /// Replacement condition list, validated before storage.
    pub conditions: Value,
}

/// Public view of a rule.
#[derive(Debug, Serialize)]
pub struct RuleResponse {
    /// Rule identifier.
    pub rule_id: Uuid,

    /// Human-readable rule name.
    pub name: String,

    /// Condition list of the current version.
    pub conditions: Vec<Condition>,

    /// Version counter.
    pub version: i32,

    /// Lifecycle status.
    pub status: RuleStatus,

    /// When the rule was created.
    pub created_at: DateTime<Utc>,
}

impl From<Rule> for RuleResponse {
    fn from(rule: Rule) -> Self {
        Self {
            rule_id: rule.id.0,
            name: rule.name,
            conditions: rule.conditions.0,
            version: rule.version,
            status: rule.status,
            created_at: rule.created_at,
        }
    }
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name.len() > 200 {
        return Err(ApiError(SigilError::Validation(
            "rule name must be 1 to 200 characters".to_string(),
        )));
    }
    Ok(())
}

/// Fetches a rule and enforces agent ownership.
async fn fetch_owned_rule(
    state: &AppState,
    identity: &CredentialIdentity,
    rule_id: Uuid,
) -> Result<Rule, ApiError> {
    let rule = state
        .storage
        .rules
        .find_by_id(RuleId::from(rule_id))
        .await
        .map_err(SigilError::from)?
        .ok_or(SigilError::NotFound("rule"))?;

    if rule.agent_id != identity.agent_id {
        return Err(ApiError(SigilError::OwnershipMismatch));
    }

    Ok(rule)
}

/// Registers a new rule at version 1.
///
/// # Errors
///
/// Returns *validation* with the first condition violation.
#[instrument(name = "create_rule", skip(state, identity, request), fields(agent_id = %identity.agent_id))]
pub async fn create_rule(
    State(state): State<AppState>,
    Extension(identity): Extension<CredentialIdentity>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_name(&request.name)?;
    let conditions =
        rules::parse_conditions(&request.conditions).map_err(SigilError::Validation)?;

    let rule_id = RuleId::new();
    state
        .storage
        .rules
        .create(rule_id, identity.agent_id, &request.name, &conditions)
        .await
        .map_err(SigilError::from)?;

    let rule = state
        .storage
        .rules
        .find_by_id(rule_id)
        .await
        .map_err(SigilError::from)?
        .ok_or_else(|| SigilError::Internal("created rule vanished".to_string()))?;

    Ok((StatusCode::CREATED, Json(RuleResponse::from(rule))))
}

/// Fetches an owned rule.
///
/// # Errors
///
/// Returns *not found* or *ownership mismatch*.
#[instrument(name = "get_rule", skip(state, identity), fields(agent_id = %identity.agent_id))]
pub async fn get_rule(
    State(state): State<AppState>,
    Extension(identity): Extension<CredentialIdentity>,
    Path(rule_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = fetch_owned_rule(&state, &identity, rule_id).await?;
    Ok(Json(RuleResponse::from(rule)))
}

/// Replaces a rule's conditions, bumping the version.
///
/// The outgoing version is snapshotted into rule history in the same
/// transaction; archived rules cannot be edited.
///
/// # Errors
///
/// Returns *validation*, *not found*, *ownership mismatch*, or *state*.
#[instrument(name = "update_rule", skip(state, identity, request), fields(agent_id = %identity.agent_id))]
pub async fn update_rule(
    State(state): State<AppState>,
    Extension(identity): Extension<CredentialIdentity>,
    Path(rule_id): Path<Uuid>,
    Json(request): Json<UpdateRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = fetch_owned_rule(&state, &identity, rule_id).await?;

    if rule.status != RuleStatus::Active {
        return Err(ApiError(SigilError::State("rule is archived".to_string())));
    }

    let name = request.name.unwrap_or_else(|| rule.name.clone());
    validate_name(&name)?;
    let conditions =
        rules::parse_conditions(&request.conditions).map_err(SigilError::Validation)?;

    let mut tx = state.storage.pool().begin().await.map_err(SigilError::from)?;
    state
        .storage
        .rule_history
        .append_in_tx(&mut tx, rule.id, rule.version, &rule.name, &rule.conditions.0)
        .await
        .map_err(SigilError::from)?;
    state
        .storage
        .rules
        .update_conditions_in_tx(&mut tx, rule.id, &name, &conditions)
        .await
        .map_err(SigilError::from)?;
    tx.commit().await.map_err(SigilError::from)?;

    let updated = state
        .storage
        .rules
        .find_by_id(rule.id)
        .await
        .map_err(SigilError::from)?
        .ok_or_else(|| SigilError::Internal("updated rule vanished".to_string()))?;

    Ok(Json(RuleResponse::from(updated)))
}

/// Archives a rule.
///
/// Archived rules reject issuance but stay readable; proofs referencing
/// them keep a valid target.
///
/// # Errors
///
/// Returns *not found* or *ownership mismatch*.
#[instrument(name = "archive_rule", skip(state, identity), fields(agent_id = %identity.agent_id))]
pub async fn archive_rule(
    State(state): State<AppState>,
    Extension(identity): Extension<CredentialIdentity>,
    Path(rule_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = fetch_owned_rule(&state, &identity, rule_id).await?;

    state.storage.rules.archive(rule.id).await.map_err(SigilError::from)?;

    let archived = state
        .storage
        .rules
        .find_by_id(rule.id)
        .await
        .map_err(SigilError::from)?
        .ok_or_else(|| SigilError::Internal("archived rule vanished".to_string()))?;

    Ok(Json(RuleResponse::from(archived)))
}
