//! Shared types for the definition pipeline
//!
//! Validation and compile findings are returned as data so callers can show
//! errors and warnings together.

use crate::scheme::{CompiledArtifact, Definition, Scheme};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Issue codes
pub mod codes {
    pub const MALFORMED_INPUT: &str = "MALFORMED_INPUT";
    pub const MISSING_KEY: &str = "MISSING_KEY";
    pub const WRONG_TYPE: &str = "WRONG_TYPE";
    pub const UNKNOWN_KEY: &str = "UNKNOWN_KEY";
    pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
    pub const UNKNOWN_OPERATOR: &str = "UNKNOWN_OPERATOR";
    pub const DUPLICATE_ID: &str = "DUPLICATE_ID";
    pub const DANGLING_REFERENCE: &str = "DANGLING_REFERENCE";
    pub const MISSING_OPTIONS: &str = "MISSING_OPTIONS";
    pub const REQUIRED_FIELD_UNPLACED: &str = "REQUIRED_FIELD_UNPLACED";
    pub const SCHEME_MISMATCH: &str = "SCHEME_MISMATCH";
    pub const DEPRECATED: &str = "DEPRECATED";
    pub const EMPTY_COLLECTION: &str = "EMPTY_COLLECTION";
    pub const NAMING_STYLE: &str = "NAMING_STYLE";
    pub const UNRESOLVED_SECTION: &str = "UNRESOLVED_SECTION";
    pub const UNRESOLVED_TEMPLATE_SET: &str = "UNRESOLVED_TEMPLATE_SET";
    pub const UNUSED_SECTION: &str = "UNUSED_SECTION";
    pub const DRAFT_SECTION: &str = "DRAFT_SECTION";
}

/// A single validation or compile finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub code: String,
    /// Location in the document, e.g. `fields[2].id`
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.path, self.message)
    }
}

/// Render issues as plain strings for audit payloads and messages
pub fn render(issues: &[ValidationIssue]) -> Vec<String> {
    issues.iter().map(ToString::to_string).collect()
}

/// Result of validating a raw definition
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Present only when there are no errors
    pub normalized: Option<Definition>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of a compile run over stored inputs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutcome {
    /// `None` whenever `errors` is non-empty
    pub artifact: Option<CompiledArtifact>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl CompileOutcome {
    pub fn failed(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            artifact: None,
            errors,
            warnings,
        }
    }
}

/// Which pipeline operation produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Import,
    Compile,
    Publish,
}

/// What the caller of import/compile/publish gets back
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub stage: PipelineStage,
    pub success: bool,
    /// Scheme metadata after the operation committed
    pub scheme: Scheme,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Set when a compile ran and succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Whether the artifact content differs from the previous one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_changed: Option<bool>,
}
