//! Audit Routes

use crate::audit::AuditEntry;
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub scheme_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Serialize)]
pub struct AuditLogResponse {
    pub entries: Vec<AuditEntry>,
}

pub async fn get_audit_log(
    State(state): State<SharedState>,
    Query(query): Query<AuditLogQuery>,
) -> ApiResult<Json<SuccessResponse<AuditLogResponse>>> {
    let entries = state.audit.recent(query.scheme_id.as_deref(), query.limit)?;

    Ok(Json(SuccessResponse::with_data(
        format!("Retrieved {} audit entries", entries.len()),
        AuditLogResponse { entries },
    )))
}
