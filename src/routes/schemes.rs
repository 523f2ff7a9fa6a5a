//! Scheme Routes
//!
//! Scheme shells, definitions and the import / compile / publish pipeline.

use crate::actor::Actor;
use crate::error::{ApiResult, AppError};
use crate::models::SuccessResponse;
use crate::pipeline::{render, PipelineOutcome, ValidationReport};
use crate::scheme::{CompiledArtifact, DefinitionRecord, Scheme, SchemeCategory, SCHEME_ID_PATTERN};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchemeRequest {
    #[validate(regex(
        path = *SCHEME_ID_PATTERN,
        message = "Scheme id must be uppercase letters, digits and hyphens (2-64 characters)"
    ))]
    pub scheme_id: String,
    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 500, message = "Short description is limited to 500 characters"))]
    pub short_description: String,
    #[serde(default)]
    pub category: Option<SchemeCategory>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSchemeRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "Short description is limited to 500 characters"))]
    pub short_description: Option<String>,
    pub category: Option<SchemeCategory>,
}

#[derive(Serialize)]
pub struct SchemeListResponse {
    pub schemes: Vec<Scheme>,
}

#[derive(Serialize)]
pub struct SchemeResponse {
    pub scheme: Scheme,
}

#[derive(Serialize)]
pub struct DefinitionResponse {
    pub definition: DefinitionRecord,
}

#[derive(Serialize)]
pub struct ArtifactResponse {
    pub artifact: CompiledArtifact,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub success: bool,
    pub message: String,
    pub valid: bool,
    #[serde(flatten)]
    pub report: ValidationReport,
    /// Errors then warnings, one line each
    pub messages: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: PipelineOutcome,
    /// Errors then warnings, one line each
    pub messages: Vec<String>,
}

/// 200 with the outcome on success, 422 with the same body on failure
fn outcome_response(outcome: PipelineOutcome) -> (StatusCode, Json<OutcomeResponse>) {
    let verb = format!("{:?}", outcome.stage).to_lowercase();
    let (status, message) = if outcome.success {
        (
            StatusCode::OK,
            format!("{} of {} succeeded.", verb, outcome.scheme.scheme_id),
        )
    } else {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!(
                "{} of {} failed with {} error(s).",
                verb,
                outcome.scheme.scheme_id,
                outcome.errors.len()
            ),
        )
    };

    let mut messages = render(&outcome.errors);
    messages.extend(render(&outcome.warnings));
    (
        status,
        Json(OutcomeResponse {
            message,
            outcome,
            messages,
        }),
    )
}

// =============================================================================
// SCHEME SHELLS
// =============================================================================

pub async fn list_schemes(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<SchemeListResponse>>> {
    let schemes = state.schemes.list().await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Retrieved {} schemes", schemes.len()),
        SchemeListResponse { schemes },
    )))
}

pub async fn create_scheme(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<CreateSchemeRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<SchemeResponse>>)> {
    payload.validate()?;
    debug!("Creating scheme {} for {}", payload.scheme_id, actor.id());

    let scheme = state
        .pipeline
        .create_scheme(
            &payload.scheme_id,
            &payload.name,
            &payload.short_description,
            payload.category.unwrap_or(SchemeCategory::Other),
            actor.id(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Scheme created successfully.",
            SchemeResponse { scheme },
        )),
    ))
}

pub async fn get_scheme(
    State(state): State<SharedState>,
    Path(scheme_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<SchemeResponse>>> {
    let scheme = state.schemes.load(&scheme_id).await?;
    Ok(Json(SuccessResponse::with_data(
        "Scheme retrieved.",
        SchemeResponse { scheme },
    )))
}

pub async fn update_scheme(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(scheme_id): Path<String>,
    Json(payload): Json<UpdateSchemeRequest>,
) -> ApiResult<Json<SuccessResponse<SchemeResponse>>> {
    payload.validate()?;
    if payload.name.is_none() && payload.short_description.is_none() && payload.category.is_none() {
        return Err(AppError::BadRequest("Nothing to update".to_string()));
    }

    let scheme = state
        .pipeline
        .update_metadata(
            &scheme_id,
            payload.name,
            payload.short_description,
            payload.category,
            actor.id(),
        )
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Scheme updated.",
        SchemeResponse { scheme },
    )))
}

// =============================================================================
// DEFINITIONS
// =============================================================================

/// Dry-run validation; nothing is stored
pub async fn validate_definition(
    State(state): State<SharedState>,
    Json(raw): Json<serde_json::Value>,
) -> Json<ValidationResponse> {
    let report = state.pipeline.validate(&raw);
    let valid = report.is_valid();
    let mut messages = render(&report.errors);
    messages.extend(render(&report.warnings));

    Json(ValidationResponse {
        success: true,
        message: if valid {
            format!("Definition is valid ({} warnings)", report.warnings.len())
        } else {
            format!("Definition has {} errors", report.errors.len())
        },
        valid,
        report,
        messages,
    })
}

pub async fn get_definition(
    State(state): State<SharedState>,
    Path(scheme_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<DefinitionResponse>>> {
    let definition = state.pipeline.definition(&scheme_id)?;
    Ok(Json(SuccessResponse::with_data(
        format!("Definition revision {}", definition.revision),
        DefinitionResponse { definition },
    )))
}

pub async fn import_definition(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(scheme_id): Path<String>,
    Json(raw): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<OutcomeResponse>)> {
    let outcome = state
        .pipeline
        .import_definition(&scheme_id, &raw, actor.id())
        .await?;
    Ok(outcome_response(outcome))
}

// =============================================================================
// COMPILE / PUBLISH
// =============================================================================

pub async fn compile_scheme(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(scheme_id): Path<String>,
) -> ApiResult<(StatusCode, Json<OutcomeResponse>)> {
    let outcome = state.pipeline.compile_scheme(&scheme_id, actor.id()).await?;
    Ok(outcome_response(outcome))
}

pub async fn get_compiled(
    State(state): State<SharedState>,
    Path(scheme_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<ArtifactResponse>>> {
    let artifact = state
        .pipeline
        .artifact(&scheme_id)?
        .ok_or_else(|| AppError::NotFound(format!("Scheme {} has not been compiled", scheme_id)))?;

    Ok(Json(SuccessResponse::with_data(
        format!("Compiled artifact {}", artifact.checksum),
        ArtifactResponse { artifact },
    )))
}

pub async fn publish_scheme(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(scheme_id): Path<String>,
) -> ApiResult<(StatusCode, Json<OutcomeResponse>)> {
    let outcome = state.pipeline.publish_scheme(&scheme_id, actor.id()).await?;
    Ok(outcome_response(outcome))
}
