//! Compiled artifact record
//!
//! The single runtime document vendors are served. Overwritten on every
//! successful compile; a failed compile never touches it.

use super::{ensure_guard, FieldDef, RuleDef, SchemeCategory, SchemeLayout, SectionStatus, StepDef};
use crate::error::AppError;
use crate::storage::{read_json, remove_file, write_atomic, KeyGuard};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A section folded into the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledSection {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_set: Option<String>,
    pub status: SectionStatus,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledArtifact {
    pub scheme_id: String,
    pub name: String,
    pub category: SchemeCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Definition revision this artifact was built from
    pub source_revision: u64,
    pub compiled_at: DateTime<Utc>,
    /// SHA-256 of everything except `compiledAt` and the checksum itself
    pub checksum: String,
    pub fields: Vec<FieldDef>,
    pub steps: Vec<StepDef>,
    pub rules: Vec<RuleDef>,
    pub sections: Vec<CompiledSection>,
}

/// Borrowed view of the checksummed content
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactContent<'a> {
    scheme_id: &'a str,
    name: &'a str,
    category: SchemeCategory,
    description: &'a Option<String>,
    source_revision: u64,
    fields: &'a [FieldDef],
    steps: &'a [StepDef],
    rules: &'a [RuleDef],
    sections: &'a [CompiledSection],
}

impl CompiledArtifact {
    /// Compute checksum from artifact content
    pub fn compute_checksum(&self) -> String {
        let content = ArtifactContent {
            scheme_id: &self.scheme_id,
            name: &self.name,
            category: self.category,
            description: &self.description,
            source_revision: self.source_revision,
            fields: &self.fields,
            steps: &self.steps,
            rules: &self.rules,
            sections: &self.sections,
        };

        let mut hasher = Sha256::new();
        // Serializing plain structs and JSON values cannot fail
        if let Ok(bytes) = serde_json::to_vec(&content) {
            hasher.update(&bytes);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// File-backed artifact store. Writes require the scheme lock.
pub struct ArtifactStore {
    layout: SchemeLayout,
}

impl ArtifactStore {
    pub fn new(layout: SchemeLayout) -> Self {
        Self { layout }
    }

    pub fn load(&self, scheme_id: &str) -> Result<Option<CompiledArtifact>, AppError> {
        if !self.layout.exists(scheme_id) {
            return Ok(None);
        }
        Ok(read_json(&self.layout.artifact(scheme_id))?)
    }

    pub fn write_locked(&self, guard: &KeyGuard, artifact: &CompiledArtifact) -> Result<(), AppError> {
        ensure_guard(guard, &artifact.scheme_id)?;
        write_atomic(&self.layout.artifact(&artifact.scheme_id), artifact)?;
        Ok(())
    }

    /// Put back the last good artifact after a failed chain of writes
    pub fn restore_locked(
        &self,
        guard: &KeyGuard,
        scheme_id: &str,
        previous: Option<&CompiledArtifact>,
    ) -> Result<(), AppError> {
        ensure_guard(guard, scheme_id)?;
        match previous {
            Some(artifact) => write_atomic(&self.layout.artifact(scheme_id), artifact)?,
            None => remove_file(&self.layout.artifact(scheme_id))?,
        }
        Ok(())
    }
}
