//! Sections Index Routes

use crate::actor::Actor;
use crate::error::ApiResult;
use crate::models::{MessageResponse, SuccessResponse};
use crate::scheme::{Section, SectionDraft};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSectionsRequest {
    pub sections: Vec<SectionDraft>,
}

/// Body of a single-section upsert; the id comes from the path
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSectionRequest {
    pub title: String,
    #[serde(default)]
    pub template_set: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Serialize)]
pub struct SectionListResponse {
    pub sections: Vec<Section>,
}

#[derive(Serialize)]
pub struct SectionResponse {
    pub section: Section,
}

pub async fn list_sections(
    State(state): State<SharedState>,
    Path(scheme_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<SectionListResponse>>> {
    let sections = state.sections.list(&scheme_id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Retrieved {} sections", sections.len()),
        SectionListResponse { sections },
    )))
}

/// Replace the whole ordered index
pub async fn write_sections(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(scheme_id): Path<String>,
    Json(payload): Json<WriteSectionsRequest>,
) -> ApiResult<Json<SuccessResponse<SectionListResponse>>> {
    let sections = state
        .pipeline
        .write_sections(&scheme_id, payload.sections, actor.id())
        .await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Sections index written ({} sections)", sections.len()),
        SectionListResponse { sections },
    )))
}

pub async fn upsert_section(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path((scheme_id, section_id)): Path<(String, String)>,
    Json(payload): Json<UpsertSectionRequest>,
) -> ApiResult<Json<SuccessResponse<SectionResponse>>> {
    let draft = SectionDraft {
        id: section_id,
        title: payload.title,
        template_set: payload.template_set,
        content: payload.content,
    };
    draft.validate()?;

    let section = state
        .pipeline
        .upsert_section(&scheme_id, draft, actor.id())
        .await?;
    Ok(Json(SuccessResponse::with_data(
        "Section saved.",
        SectionResponse { section },
    )))
}

pub async fn remove_section(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path((scheme_id, section_id)): Path<(String, String)>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .pipeline
        .remove_section(&scheme_id, &section_id, actor.id())
        .await?;
    Ok(Json(MessageResponse::new(format!(
        "Section {} removed from {}.",
        section_id, scheme_id
    ))))
}
