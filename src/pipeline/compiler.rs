//! Compiler
//!
//! Folds the sections index into the normalized definition and produces the
//! compiled artifact. Cross-reference checks that need stored state (the
//! sections index, the template catalog) happen here rather than in the
//! validator. The compiler never writes; the publication flow persists a
//! successful artifact.

use crate::error::AppError;
use crate::pipeline::catalog::TemplateCatalog;
use crate::pipeline::types::{codes, CompileOutcome, ValidationIssue};
use crate::scheme::{
    CompiledArtifact, CompiledSection, DefinitionRecord, DefinitionStore, MetadataStore, Scheme,
    Section, SectionStatus, SectionsIndex,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

pub struct Compiler {
    metadata: Arc<MetadataStore>,
    definitions: Arc<DefinitionStore>,
    sections: Arc<SectionsIndex>,
    catalog: Arc<dyn TemplateCatalog>,
}

impl Compiler {
    pub fn new(
        metadata: Arc<MetadataStore>,
        definitions: Arc<DefinitionStore>,
        sections: Arc<SectionsIndex>,
        catalog: Arc<dyn TemplateCatalog>,
    ) -> Self {
        Self {
            metadata,
            definitions,
            sections,
            catalog,
        }
    }

    /// Compile the stored definition and sections of a scheme
    pub async fn compile(&self, scheme_id: &str) -> Result<CompileOutcome, AppError> {
        let scheme = self.metadata.load(scheme_id).await?;
        let record = self
            .definitions
            .load(scheme_id)?
            .ok_or_else(|| AppError::DefinitionMissing(scheme_id.to_string()))?;
        let sections = self.sections.list(scheme_id).await?;

        Ok(self.assemble(&scheme, &record, &sections, Utc::now()))
    }

    /// Build an artifact from already-loaded inputs
    pub fn assemble(
        &self,
        scheme: &Scheme,
        record: &DefinitionRecord,
        sections: &[Section],
        compiled_at: DateTime<Utc>,
    ) -> CompileOutcome {
        let definition = &record.definition;
        let mut errors = Vec::new();
        let mut warnings = record.warnings.clone();

        if definition.scheme_id != scheme.scheme_id {
            errors.push(ValidationIssue::new(
                codes::SCHEME_MISMATCH,
                "schemeId",
                format!(
                    "definition belongs to {} but is stored under {}",
                    definition.scheme_id, scheme.scheme_id
                ),
            ));
        }

        let index_ids: HashSet<&str> = sections.iter().map(|s| s.id.as_str()).collect();
        for (path, id) in definition.section_refs() {
            if !index_ids.contains(id) {
                errors.push(ValidationIssue::new(
                    codes::UNRESOLVED_SECTION,
                    path,
                    format!("section '{}' does not exist in the sections index", id),
                ));
            }
        }

        for (i, section) in sections.iter().enumerate() {
            if let Some(template_set) = &section.template_set {
                if !self.catalog.resolve_template_set(template_set) {
                    errors.push(ValidationIssue::new(
                        codes::UNRESOLVED_TEMPLATE_SET,
                        format!("sectionsIndex[{}].templateSet", i),
                        format!("section '{}' uses unknown template set '{}'", section.id, template_set),
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return CompileOutcome::failed(errors, warnings);
        }

        let slots: HashSet<&str> = definition.sections.iter().map(String::as_str).collect();
        let mut compiled_sections = Vec::new();
        for (i, section) in sections.iter().enumerate() {
            if !slots.contains(section.id.as_str()) {
                warnings.push(ValidationIssue::new(
                    codes::UNUSED_SECTION,
                    format!("sectionsIndex[{}]", i),
                    format!("section '{}' is not referenced by the definition and was left out", section.id),
                ));
                continue;
            }
            if section.status == SectionStatus::Draft {
                warnings.push(ValidationIssue::new(
                    codes::DRAFT_SECTION,
                    format!("sectionsIndex[{}]", i),
                    format!("section '{}' is still a draft", section.id),
                ));
            }
            compiled_sections.push(CompiledSection {
                id: section.id.clone(),
                title: section.title.clone(),
                template_set: section.template_set.clone(),
                status: section.status,
                content: section.content.clone(),
            });
        }

        let mut artifact = CompiledArtifact {
            scheme_id: scheme.scheme_id.clone(),
            name: definition.name.clone(),
            category: scheme.category,
            description: definition.description.clone(),
            source_revision: record.revision,
            compiled_at,
            checksum: String::new(),
            fields: definition.fields.clone(),
            steps: definition.steps.clone(),
            rules: definition.rules.clone(),
            sections: compiled_sections,
        };
        artifact.checksum = artifact.compute_checksum();

        CompileOutcome {
            artifact: Some(artifact),
            errors,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::catalog::StaticTemplateCatalog;
    use crate::pipeline::validator::DefinitionValidator;
    use crate::scheme::{SchemeCategory, SchemeLayout};
    use crate::storage::{KeyLocks, LockSettings};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn compiler(dir: &std::path::Path, template_sets: &[&str]) -> Compiler {
        let locks = Arc::new(KeyLocks::new(dir.join("locks"), LockSettings::default()));
        let layout = SchemeLayout::new(dir);
        Compiler::new(
            Arc::new(MetadataStore::new(layout.clone(), locks.clone())),
            Arc::new(DefinitionStore::new(layout.clone())),
            Arc::new(SectionsIndex::new(layout, locks)),
            Arc::new(StaticTemplateCatalog::new(template_sets.iter().copied())),
        )
    }

    fn scheme() -> Scheme {
        Scheme::new_shell(
            "SCM-TEST".to_string(),
            "Test".to_string(),
            String::new(),
            SchemeCategory::Registration,
            "op".to_string(),
        )
    }

    fn record(slots: &[&str]) -> DefinitionRecord {
        let raw = json!({
            "schemeId": "SCM-TEST",
            "name": "Test",
            "fields": [{ "id": "company_name", "label": "Company", "type": "text", "required": true }],
            "steps": [{ "id": "company", "title": "Company", "fields": ["company_name"] }],
            "sections": slots,
        });
        let report = DefinitionValidator::new().validate(&raw);
        DefinitionRecord {
            scheme_id: "SCM-TEST".to_string(),
            revision: 2,
            imported_at: Utc::now(),
            imported_by: "op".to_string(),
            warnings: report.warnings,
            definition: report.normalized.unwrap(),
        }
    }

    fn section(id: &str, template_set: Option<&str>, status: SectionStatus) -> Section {
        Section {
            id: id.to_string(),
            title: id.to_string(),
            template_set: template_set.map(str::to_string),
            content: json!({ "body": id }),
            status,
            updated_at: Utc::now(),
            updated_by: "op".to_string(),
        }
    }

    #[test]
    fn test_folds_sections_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = compiler(dir.path(), &["TS-BASIC"]);
        let sections = vec![
            section("SEC-B", Some("TS-BASIC"), SectionStatus::Published),
            section("SEC-A", None, SectionStatus::Published),
        ];

        let outcome = compiler.assemble(&scheme(), &record(&["SEC-A", "SEC-B"]), &sections, Utc::now());

        assert!(outcome.errors.is_empty());
        assert!(outcome.warnings.is_empty());
        let artifact = outcome.artifact.unwrap();
        let ids: Vec<&str> = artifact.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["SEC-B", "SEC-A"]);
        assert_eq!(artifact.source_revision, 2);
        assert_eq!(artifact.category, SchemeCategory::Registration);
    }

    #[test]
    fn test_unresolved_section_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = compiler(dir.path(), &[]);

        let outcome = compiler.assemble(&scheme(), &record(&["SEC-MISSING"]), &[], Utc::now());

        assert!(outcome.artifact.is_none());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].code, codes::UNRESOLVED_SECTION);
    }

    #[test]
    fn test_unresolved_template_set_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = compiler(dir.path(), &["TS-BASIC"]);
        let sections = vec![section("SEC-A", Some("TS-GONE"), SectionStatus::Draft)];

        let outcome = compiler.assemble(&scheme(), &record(&["SEC-A"]), &sections, Utc::now());

        assert!(outcome.artifact.is_none());
        assert_eq!(outcome.errors[0].code, codes::UNRESOLVED_TEMPLATE_SET);
    }

    #[test]
    fn test_unused_and_draft_sections_warn() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = compiler(dir.path(), &[]);
        let sections = vec![
            section("SEC-A", None, SectionStatus::Draft),
            section("SEC-EXTRA", None, SectionStatus::Published),
        ];

        let outcome = compiler.assemble(&scheme(), &record(&["SEC-A"]), &sections, Utc::now());

        assert!(outcome.errors.is_empty());
        let found: Vec<&str> = outcome.warnings.iter().map(|w| w.code.as_str()).collect();
        assert_eq!(found, vec![codes::DRAFT_SECTION, codes::UNUSED_SECTION]);
        assert_eq!(outcome.artifact.unwrap().sections.len(), 1);
    }

    #[test]
    fn test_recompile_without_edits_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = compiler(dir.path(), &[]);
        let sections = vec![section("SEC-A", None, SectionStatus::Published)];
        let record = record(&["SEC-A"]);

        let first = compiler.assemble(&scheme(), &record, &sections, Utc::now()).artifact.unwrap();
        let second = compiler
            .assemble(&scheme(), &record, &sections, Utc::now() + chrono::Duration::seconds(1))
            .artifact
            .unwrap();

        assert_eq!(first.checksum, second.checksum);
        let mut second_aligned = second.clone();
        second_aligned.compiled_at = first.compiled_at;
        assert_eq!(first, second_aligned);
    }

    #[tokio::test]
    async fn test_compile_reports_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = compiler(dir.path(), &[]);

        let missing = compiler.compile("SCM-TEST").await;
        assert!(matches!(missing, Err(AppError::SchemeNotFound(_))));

        compiler
            .metadata
            .create("SCM-TEST", "Test", "", SchemeCategory::Other, "op")
            .await
            .unwrap();
        let no_definition = compiler.compile("SCM-TEST").await;
        assert!(matches!(no_definition, Err(AppError::DefinitionMissing(_))));
    }
}
