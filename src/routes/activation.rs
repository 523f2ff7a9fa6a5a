//! Activation Routes
//!
//! Vendor access requests, approver decisions and the resulting grants.

use crate::activation::{AccessGrant, ActivationRequest, Decision};
use crate::actor::Actor;
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitActivationRequest {
    #[validate(length(min = 1, max = 128, message = "yojId is required"))]
    pub yoj_id: String,
    #[validate(length(min = 1, message = "schemeId is required"))]
    pub scheme_id: String,
    #[validate(length(max = 1000, message = "Note is limited to 1000 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub decision: Decision,
    #[validate(length(max = 1000, message = "Note is limited to 1000 characters"))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationListQuery {
    pub yoj_id: String,
}

#[derive(Serialize)]
pub struct RequestResponse {
    pub request: ActivationRequest,
}

#[derive(Serialize)]
pub struct RequestListResponse {
    pub requests: Vec<ActivationRequest>,
}

#[derive(Serialize)]
pub struct GrantResponse {
    pub grant: AccessGrant,
}

#[derive(Serialize)]
pub struct GrantListResponse {
    pub grants: Vec<AccessGrant>,
}

// =============================================================================
// REQUESTS
// =============================================================================

pub async fn submit_activation(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<SubmitActivationRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<RequestResponse>>)> {
    payload.validate()?;
    let request = state
        .activation
        .submit(&payload.yoj_id, &payload.scheme_id, actor.id(), payload.note)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Activation request submitted.",
            RequestResponse { request },
        )),
    ))
}

/// Requests of one vendor, oldest first
pub async fn list_activations(
    State(state): State<SharedState>,
    Query(query): Query<ActivationListQuery>,
) -> ApiResult<Json<SuccessResponse<RequestListResponse>>> {
    let requests = state.activation.list_for_vendor(&query.yoj_id)?;
    Ok(Json(SuccessResponse::with_data(
        format!("Retrieved {} requests for {}", requests.len(), query.yoj_id),
        RequestListResponse { requests },
    )))
}

pub async fn list_pending(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<RequestListResponse>>> {
    let requests = state.activation.list_pending()?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} pending requests", requests.len()),
        RequestListResponse { requests },
    )))
}

pub async fn get_activation(
    State(state): State<SharedState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<RequestResponse>>> {
    let request = state.activation.get(request_id)?;
    Ok(Json(SuccessResponse::with_data(
        "Activation request retrieved.",
        RequestResponse { request },
    )))
}

pub async fn decide_activation(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> ApiResult<Json<SuccessResponse<RequestResponse>>> {
    payload.validate()?;
    let request = state
        .activation
        .decide(request_id, payload.decision, actor.id(), payload.note)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Activation request {}.", request.status),
        RequestResponse { request },
    )))
}

// =============================================================================
// GRANTS
// =============================================================================

pub async fn list_grants(
    State(state): State<SharedState>,
    Path(yoj_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<GrantListResponse>>> {
    let grants = state.activation.grants_for_vendor(&yoj_id)?;
    Ok(Json(SuccessResponse::with_data(
        format!("Retrieved {} grants", grants.len()),
        GrantListResponse { grants },
    )))
}

pub async fn get_grant(
    State(state): State<SharedState>,
    Path((yoj_id, scheme_id)): Path<(String, String)>,
) -> ApiResult<Json<SuccessResponse<GrantResponse>>> {
    let grant = state.activation.grant(&yoj_id, &scheme_id)?;
    Ok(Json(SuccessResponse::with_data(
        "Grant retrieved.",
        GrantResponse { grant },
    )))
}
