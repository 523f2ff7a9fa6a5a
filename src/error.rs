//! Error handling module
//!
//! Provides unified error types and handling for the entire application.
//! Validation and compile findings are data (see `pipeline::types`); only
//! operation-level failures travel through [`AppError`].

use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Scheme {0} not found")]
    SchemeNotFound(String),

    #[error("Scheme {0} already exists")]
    DuplicateScheme(String),

    #[error("Scheme {0} has no imported definition")]
    DefinitionMissing(String),

    #[error("Activation request {0} not found")]
    RequestNotFound(String),

    #[error("Activation request {0} has already been decided")]
    AlreadyDecided(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::SchemeNotFound(_) => "SCHEME_NOT_FOUND",
            AppError::DuplicateScheme(_) => "DUPLICATE_SCHEME",
            AppError::DefinitionMissing(_) => "DEFINITION_MISSING",
            AppError::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            AppError::AlreadyDecided(_) => "ALREADY_DECIDED",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::Storage(_) => "STORAGE_FAILURE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::SchemeNotFound(_) | AppError::RequestNotFound(_) | AppError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::DuplicateScheme(_)
            | AppError::AlreadyDecided(_)
            | AppError::InvalidTransition(_)
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::DefinitionMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, details) = match &self {
            AppError::Storage(e) => {
                error!("Storage failure: {:?}", e);
                ("A storage failure occurred".to_string(), Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), Some(msg.clone()))
            }
            other => (other.to_string(), None),
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(self.code().to_string()),
        });

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;
