//! Sections Index
//!
//! The ordered sequence of sections for a scheme, stored as one record so a
//! rewrite replaces the whole sequence atomically. Order is significant: the
//! compiler folds sections into the artifact in index order.

use super::{ensure_guard, lock_key, require_scheme, SchemeLayout, Section, SectionStatus};
use crate::error::AppError;
use crate::storage::{read_json, write_atomic, KeyGuard, KeyLocks};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

/// Operator-supplied section content
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SectionDraft {
    #[validate(length(min = 1, max = 64, message = "Section id must be between 1 and 64 characters"))]
    pub id: String,
    #[validate(length(min = 1, max = 200, message = "Section title is required"))]
    pub title: String,
    #[serde(default)]
    pub template_set: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl SectionDraft {
    fn same_content_as(&self, section: &Section) -> bool {
        self.title == section.title
            && self.template_set == section.template_set
            && self.content == section.content
    }

    fn into_section(self, actor: &str) -> Section {
        Section {
            id: self.id,
            title: self.title,
            template_set: self.template_set,
            content: self.content,
            status: SectionStatus::Draft,
            updated_at: Utc::now(),
            updated_by: actor.to_string(),
        }
    }
}

/// File-backed sections index
pub struct SectionsIndex {
    layout: SchemeLayout,
    locks: Arc<KeyLocks>,
}

impl SectionsIndex {
    pub fn new(layout: SchemeLayout, locks: Arc<KeyLocks>) -> Self {
        Self { layout, locks }
    }

    /// The full ordered sequence (empty if never written)
    pub async fn list(&self, scheme_id: &str) -> Result<Vec<Section>, AppError> {
        require_scheme(&self.layout, scheme_id)?;
        self.read(scheme_id)
    }

    fn read(&self, scheme_id: &str) -> Result<Vec<Section>, AppError> {
        Ok(read_json(&self.layout.sections(scheme_id))?.unwrap_or_default())
    }

    /// Replace the whole ordered sequence.
    ///
    /// Sections whose content is unchanged keep their status and timestamp;
    /// anything new or edited becomes a draft.
    pub async fn write_index(
        &self,
        scheme_id: &str,
        drafts: Vec<SectionDraft>,
        actor: &str,
    ) -> Result<Vec<Section>, AppError> {
        for draft in &drafts {
            draft.validate()?;
        }
        let mut seen = HashSet::new();
        for draft in &drafts {
            if !seen.insert(draft.id.as_str()) {
                return Err(AppError::Validation(format!("Duplicate section id '{}'", draft.id)));
            }
        }

        let guard = self.locks.acquire(&lock_key(scheme_id)).await?;
        require_scheme(&self.layout, scheme_id)?;

        let existing = self.read(scheme_id)?;
        let sections: Vec<Section> = drafts
            .into_iter()
            .map(|draft| match existing.iter().find(|s| s.id == draft.id) {
                Some(current) if draft.same_content_as(current) => current.clone(),
                _ => draft.into_section(actor),
            })
            .collect();

        self.write_locked(&guard, scheme_id, &sections)?;
        info!("Wrote sections index for {} ({} sections)", scheme_id, sections.len());
        Ok(sections)
    }

    /// Edit one section in place, or append it if new
    pub async fn upsert_section(
        &self,
        scheme_id: &str,
        draft: SectionDraft,
        actor: &str,
    ) -> Result<Section, AppError> {
        draft.validate()?;
        let guard = self.locks.acquire(&lock_key(scheme_id)).await?;
        require_scheme(&self.layout, scheme_id)?;

        let mut sections = self.read(scheme_id)?;
        let section = match sections.iter().position(|s| s.id == draft.id) {
            Some(i) if draft.same_content_as(&sections[i]) => sections[i].clone(),
            Some(i) => {
                sections[i] = draft.into_section(actor);
                sections[i].clone()
            }
            None => {
                let section = draft.into_section(actor);
                sections.push(section.clone());
                section
            }
        };

        self.write_locked(&guard, scheme_id, &sections)?;
        Ok(section)
    }

    /// Remove one section
    pub async fn remove_section(&self, scheme_id: &str, section_id: &str) -> Result<(), AppError> {
        let guard = self.locks.acquire(&lock_key(scheme_id)).await?;
        require_scheme(&self.layout, scheme_id)?;

        let mut sections = self.read(scheme_id)?;
        let before = sections.len();
        sections.retain(|s| s.id != section_id);
        if sections.len() == before {
            return Err(AppError::NotFound(format!(
                "Section {} not found in scheme {}",
                section_id, scheme_id
            )));
        }

        self.write_locked(&guard, scheme_id, &sections)
    }

    /// Stamp every section published. Returns (previous, updated) so the
    /// publication flow can restore the previous index on failure.
    pub fn mark_all_published_locked(
        &self,
        guard: &KeyGuard,
        scheme_id: &str,
        actor: &str,
    ) -> Result<(Vec<Section>, Vec<Section>), AppError> {
        ensure_guard(guard, scheme_id)?;
        let previous = self.read(scheme_id)?;

        let now = Utc::now();
        let updated: Vec<Section> = previous
            .iter()
            .cloned()
            .map(|mut section| {
                section.status = SectionStatus::Published;
                section.updated_at = now;
                section.updated_by = actor.to_string();
                section
            })
            .collect();

        self.write_locked(guard, scheme_id, &updated)?;
        Ok((previous, updated))
    }

    /// Persist an index while the caller holds the scheme lock
    pub fn write_locked(
        &self,
        guard: &KeyGuard,
        scheme_id: &str,
        sections: &[Section],
    ) -> Result<(), AppError> {
        ensure_guard(guard, scheme_id)?;
        write_atomic(&self.layout.sections(scheme_id), sections)?;
        Ok(())
    }
}
