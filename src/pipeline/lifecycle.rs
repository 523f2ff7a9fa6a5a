//! Publication State Machine
//!
//! Drives a scheme through draft -> imported -> compiled -> published.
//! Each operation runs under the scheme's key lock, commits its writes in
//! order (content first, metadata last) and only then reports to the audit
//! sink. If a later write in the chain fails, earlier writes are restored so
//! the scheme stays at its last consistent state.

use crate::audit::{AuditEvent, AuditSink};
use crate::error::AppError;
use crate::pipeline::compiler::Compiler;
use crate::pipeline::types::{
    codes, render, PipelineOutcome, PipelineStage, ValidationIssue, ValidationReport,
};
use crate::pipeline::validator::DefinitionValidator;
use crate::scheme::{
    ArtifactStore, CompiledArtifact, DefinitionRecord, DefinitionStore, LifecycleEvent,
    MetadataStore, Scheme, SchemeCategory, SchemePatch, Section, SectionDraft,
    SectionsIndex,
};
use crate::storage::KeyGuard;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Version policy switches
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelinePolicy {
    /// Count failed standalone compiles as version attempts
    pub count_failed_compiles: bool,
}

/// Scheme lifecycle service
pub struct SchemePipeline {
    metadata: Arc<MetadataStore>,
    definitions: Arc<DefinitionStore>,
    sections: Arc<SectionsIndex>,
    artifacts: Arc<ArtifactStore>,
    compiler: Compiler,
    validator: DefinitionValidator,
    audit: Arc<dyn AuditSink>,
    policy: PipelinePolicy,
}

impl SchemePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: Arc<MetadataStore>,
        definitions: Arc<DefinitionStore>,
        sections: Arc<SectionsIndex>,
        artifacts: Arc<ArtifactStore>,
        compiler: Compiler,
        audit: Arc<dyn AuditSink>,
        policy: PipelinePolicy,
    ) -> Self {
        Self {
            metadata,
            definitions,
            sections,
            artifacts,
            compiler,
            validator: DefinitionValidator::new(),
            audit,
            policy,
        }
    }

    // =========================================================================
    // SCHEME SHELL & METADATA
    // =========================================================================

    pub async fn create_scheme(
        &self,
        scheme_id: &str,
        name: &str,
        short_description: &str,
        category: SchemeCategory,
        actor: &str,
    ) -> Result<Scheme, AppError> {
        let scheme = self
            .metadata
            .create(scheme_id, name, short_description, category, actor)
            .await?;
        self.audit.log(
            AuditEvent::SchemeCreated,
            scheme_id,
            actor,
            json!({ "name": scheme.name, "category": scheme.category, "version": scheme.version }),
        );
        Ok(scheme)
    }

    /// Metadata-only edit; never bumps the version
    pub async fn update_metadata(
        &self,
        scheme_id: &str,
        name: Option<String>,
        short_description: Option<String>,
        category: Option<SchemeCategory>,
        actor: &str,
    ) -> Result<Scheme, AppError> {
        let patch = SchemePatch {
            name,
            short_description,
            category,
            ..SchemePatch::default()
        };
        let scheme = self.metadata.update(scheme_id, patch, actor).await?;
        self.audit.log(
            AuditEvent::SchemeUpdated,
            scheme_id,
            actor,
            json!({ "name": scheme.name, "category": scheme.category, "version": scheme.version }),
        );
        Ok(scheme)
    }

    // =========================================================================
    // SECTIONS
    // =========================================================================

    pub async fn write_sections(
        &self,
        scheme_id: &str,
        drafts: Vec<SectionDraft>,
        actor: &str,
    ) -> Result<Vec<Section>, AppError> {
        let sections = self.sections.write_index(scheme_id, drafts, actor).await?;
        self.audit.log(
            AuditEvent::SectionsUpdated,
            scheme_id,
            actor,
            json!({ "operation": "write_index", "sections": section_ids(&sections) }),
        );
        Ok(sections)
    }

    pub async fn upsert_section(
        &self,
        scheme_id: &str,
        draft: SectionDraft,
        actor: &str,
    ) -> Result<Section, AppError> {
        let section = self.sections.upsert_section(scheme_id, draft, actor).await?;
        self.audit.log(
            AuditEvent::SectionsUpdated,
            scheme_id,
            actor,
            json!({ "operation": "upsert", "section": section.id }),
        );
        Ok(section)
    }

    pub async fn remove_section(&self, scheme_id: &str, section_id: &str, actor: &str) -> Result<(), AppError> {
        self.sections.remove_section(scheme_id, section_id).await?;
        self.audit.log(
            AuditEvent::SectionsUpdated,
            scheme_id,
            actor,
            json!({ "operation": "remove", "section": section_id }),
        );
        Ok(())
    }

    // =========================================================================
    // IMPORT
    // =========================================================================

    /// Validate without storing anything
    pub fn validate(&self, raw: &Value) -> ValidationReport {
        self.validator.validate(raw)
    }

    /// Validate and store a definition, replacing any previous one
    pub async fn import_definition(
        &self,
        scheme_id: &str,
        raw: &Value,
        actor: &str,
    ) -> Result<PipelineOutcome, AppError> {
        let guard = self.metadata.lock(scheme_id).await?;
        let scheme = self.metadata.load(scheme_id).await?;

        let mut report = self.validator.validate(raw);
        if let Some(definition) = &report.normalized {
            if definition.scheme_id != scheme_id {
                report.errors.push(ValidationIssue::new(
                    codes::SCHEME_MISMATCH,
                    "schemeId",
                    format!(
                        "definition is for {} but was imported into {}",
                        definition.scheme_id, scheme_id
                    ),
                ));
            }
        }

        let definition = match report.normalized.take() {
            Some(definition) if report.errors.is_empty() => definition,
            _ => {
                drop(guard);
                warn!("Import into {} rejected with {} errors", scheme_id, report.errors.len());
                self.audit.log(
                    AuditEvent::ImportFail,
                    scheme_id,
                    actor,
                    json!({ "errors": render(&report.errors), "warnings": render(&report.warnings) }),
                );
                return Ok(outcome(PipelineStage::Import, false, scheme, report.errors, report.warnings));
            }
        };

        let next_status = scheme.status.apply(LifecycleEvent::Import)?;
        let previous = self.definitions.load(scheme_id)?;
        let record = DefinitionRecord {
            scheme_id: scheme_id.to_string(),
            revision: scheme.version + 1,
            imported_at: Utc::now(),
            imported_by: actor.to_string(),
            warnings: report.warnings.clone(),
            definition,
        };
        self.definitions.store_locked(&guard, &record)?;

        let updated = match self.metadata.update_locked(
            &guard,
            scheme_id,
            SchemePatch::attempt(Some(next_status)),
            actor,
        ) {
            Ok(updated) => updated,
            Err(e) => {
                if let Err(restore) = self.definitions.restore_locked(&guard, scheme_id, previous.as_ref()) {
                    error!("Failed to restore definition of {}: {}", scheme_id, restore);
                }
                return Err(e);
            }
        };
        drop(guard);

        info!(
            "Imported definition into {} (status {}, version {}, {} warnings)",
            scheme_id,
            updated.status,
            updated.version,
            report.warnings.len()
        );
        self.audit.log(
            AuditEvent::ImportOk,
            scheme_id,
            actor,
            json!({ "version": updated.version, "warnings": render(&report.warnings) }),
        );
        Ok(outcome(PipelineStage::Import, true, updated, Vec::new(), report.warnings))
    }

    // =========================================================================
    // COMPILE
    // =========================================================================

    /// Compile (or recompile in place) the stored definition and sections
    pub async fn compile_scheme(&self, scheme_id: &str, actor: &str) -> Result<PipelineOutcome, AppError> {
        let guard = self.metadata.lock(scheme_id).await?;
        let scheme = self.metadata.load(scheme_id).await?;
        if !scheme.status.has_definition() {
            return Err(AppError::DefinitionMissing(scheme_id.to_string()));
        }
        let next_status = scheme.status.apply(LifecycleEvent::Compile)?;

        let compiled = self.compiler.compile(scheme_id).await?;
        let Some(artifact) = compiled.artifact.filter(|_| compiled.errors.is_empty()) else {
            let scheme = if self.policy.count_failed_compiles {
                self.metadata
                    .update_locked(&guard, scheme_id, SchemePatch::attempt(None), actor)?
            } else {
                scheme
            };
            drop(guard);

            warn!("Compile of {} failed with {} errors", scheme_id, compiled.errors.len());
            self.audit.log(
                AuditEvent::CompileFail,
                scheme_id,
                actor,
                json!({
                    "version": scheme.version,
                    "errors": render(&compiled.errors),
                    "warnings": render(&compiled.warnings),
                }),
            );
            return Ok(outcome(PipelineStage::Compile, false, scheme, compiled.errors, compiled.warnings));
        };

        let patch = SchemePatch {
            compiled_at: Some(artifact.compiled_at),
            ..SchemePatch::attempt(Some(next_status))
        };
        let (updated, changed) = self.commit_artifact(&guard, scheme_id, &artifact, patch, actor)?;
        drop(guard);

        info!(
            "Compiled {} (status {}, version {}, checksum {})",
            scheme_id, updated.status, updated.version, artifact.checksum
        );
        self.audit.log(
            AuditEvent::CompileOk,
            scheme_id,
            actor,
            json!({
                "version": updated.version,
                "checksum": artifact.checksum,
                "artifactChanged": changed,
                "warnings": render(&compiled.warnings),
            }),
        );

        let mut result = outcome(PipelineStage::Compile, true, updated, Vec::new(), compiled.warnings);
        result.checksum = Some(artifact.checksum);
        result.artifact_changed = Some(changed);
        Ok(result)
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Mark all sections published, compile, and make the scheme vendor-visible.
    ///
    /// A failed compile leaves status, sections and artifact as they were
    /// but still counts as a version attempt.
    pub async fn publish_scheme(&self, scheme_id: &str, actor: &str) -> Result<PipelineOutcome, AppError> {
        let guard = self.metadata.lock(scheme_id).await?;
        let scheme = self.metadata.load(scheme_id).await?;
        if !scheme.status.has_definition() {
            return Err(AppError::DefinitionMissing(scheme_id.to_string()));
        }
        let next_status = scheme.status.apply(LifecycleEvent::Publish)?;

        let (previous_sections, _) = self.sections.mark_all_published_locked(&guard, scheme_id, actor)?;

        let compiled = match self.compiler.compile(scheme_id).await {
            Ok(compiled) => compiled,
            Err(e) => {
                self.restore_sections(&guard, scheme_id, &previous_sections);
                return Err(e);
            }
        };

        let Some(artifact) = compiled.artifact.filter(|_| compiled.errors.is_empty()) else {
            self.restore_sections(&guard, scheme_id, &previous_sections);
            let scheme = self
                .metadata
                .update_locked(&guard, scheme_id, SchemePatch::attempt(None), actor)?;
            drop(guard);

            warn!("Publish of {} failed with {} errors", scheme_id, compiled.errors.len());
            self.audit.log(
                AuditEvent::PublishFail,
                scheme_id,
                actor,
                json!({
                    "version": scheme.version,
                    "errors": render(&compiled.errors),
                    "warnings": render(&compiled.warnings),
                }),
            );
            return Ok(outcome(PipelineStage::Publish, false, scheme, compiled.errors, compiled.warnings));
        };

        let patch = SchemePatch {
            compiled_at: Some(artifact.compiled_at),
            published_at: Some(Utc::now()),
            ..SchemePatch::attempt(Some(next_status))
        };
        let (updated, changed) = match self.commit_artifact(&guard, scheme_id, &artifact, patch, actor) {
            Ok(committed) => committed,
            Err(e) => {
                self.restore_sections(&guard, scheme_id, &previous_sections);
                return Err(e);
            }
        };
        drop(guard);

        info!(
            "Published {} (version {}, {} sections)",
            scheme_id,
            updated.version,
            artifact.sections.len()
        );
        self.audit.log(
            AuditEvent::PublishOk,
            scheme_id,
            actor,
            json!({
                "version": updated.version,
                "checksum": artifact.checksum,
                "sections": previous_sections.len(),
                "warnings": render(&compiled.warnings),
            }),
        );

        let mut result = outcome(PipelineStage::Publish, true, updated, Vec::new(), compiled.warnings);
        result.checksum = Some(artifact.checksum);
        result.artifact_changed = Some(changed);
        Ok(result)
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn definition(&self, scheme_id: &str) -> Result<DefinitionRecord, AppError> {
        if self.metadata.find(scheme_id)?.is_none() {
            return Err(AppError::SchemeNotFound(scheme_id.to_string()));
        }
        self.definitions
            .load(scheme_id)?
            .ok_or_else(|| AppError::DefinitionMissing(scheme_id.to_string()))
    }

    pub fn artifact(&self, scheme_id: &str) -> Result<Option<CompiledArtifact>, AppError> {
        if self.metadata.find(scheme_id)?.is_none() {
            return Err(AppError::SchemeNotFound(scheme_id.to_string()));
        }
        self.artifacts.load(scheme_id)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Write the artifact, then the metadata. Restores the previous artifact
    /// if the metadata write fails. Returns the updated scheme and whether
    /// the artifact content changed.
    fn commit_artifact(
        &self,
        guard: &KeyGuard,
        scheme_id: &str,
        artifact: &CompiledArtifact,
        patch: SchemePatch,
        actor: &str,
    ) -> Result<(Scheme, bool), AppError> {
        let previous = self.artifacts.load(scheme_id)?;
        let changed = previous
            .as_ref()
            .map(|p| p.checksum != artifact.checksum)
            .unwrap_or(true);

        self.artifacts.write_locked(guard, artifact)?;
        match self.metadata.update_locked(guard, scheme_id, patch, actor) {
            Ok(updated) => Ok((updated, changed)),
            Err(e) => {
                if let Err(restore) = self.artifacts.restore_locked(guard, scheme_id, previous.as_ref()) {
                    error!("Failed to restore artifact of {}: {}", scheme_id, restore);
                }
                Err(e)
            }
        }
    }

    fn restore_sections(&self, guard: &KeyGuard, scheme_id: &str, previous: &[Section]) {
        if let Err(e) = self.sections.write_locked(guard, scheme_id, previous) {
            error!("Failed to restore sections of {}: {}", scheme_id, e);
        }
    }
}

fn outcome(
    stage: PipelineStage,
    success: bool,
    scheme: Scheme,
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
) -> PipelineOutcome {
    PipelineOutcome {
        stage,
        success,
        scheme,
        errors,
        warnings,
        checksum: None,
        artifact_changed: None,
    }
}

fn section_ids(sections: &[Section]) -> Vec<&str> {
    sections.iter().map(|s| s.id.as_str()).collect()
}
