//! Metadata Store
//!
//! Persists per-scheme metadata. Every update is a read-modify-write under
//! the scheme's key lock, committed with an atomic write.

use super::{ensure_guard, lock_key, Scheme, SchemeCategory, SchemeLayout, SchemePatch, SCHEME_ID_PATTERN};
use crate::error::AppError;
use crate::storage::{read_json, write_atomic, KeyGuard, KeyLocks};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// File-backed store of scheme metadata
pub struct MetadataStore {
    layout: SchemeLayout,
    locks: Arc<KeyLocks>,
}

impl MetadataStore {
    pub fn new(layout: SchemeLayout, locks: Arc<KeyLocks>) -> Self {
        Self { layout, locks }
    }

    /// Take the exclusive lock covering all records of `scheme_id`
    pub async fn lock(&self, scheme_id: &str) -> Result<KeyGuard, AppError> {
        Ok(self.locks.acquire(&lock_key(scheme_id)).await?)
    }

    /// Create a scheme shell in `draft` at version 1
    pub async fn create(
        &self,
        scheme_id: &str,
        name: &str,
        short_description: &str,
        category: SchemeCategory,
        creator: &str,
    ) -> Result<Scheme, AppError> {
        if !SCHEME_ID_PATTERN.is_match(scheme_id) {
            return Err(AppError::Validation(format!(
                "Invalid scheme id '{}': use uppercase letters, digits and hyphens",
                scheme_id
            )));
        }

        let _guard = self.lock(scheme_id).await?;
        if self.layout.exists(scheme_id) {
            return Err(AppError::DuplicateScheme(scheme_id.to_string()));
        }

        let scheme = Scheme::new_shell(
            scheme_id.to_string(),
            name.trim().to_string(),
            short_description.trim().to_string(),
            category,
            creator.to_string(),
        );
        write_atomic(&self.layout.meta(scheme_id), &scheme)?;

        info!("Created scheme shell {} by {}", scheme_id, creator);
        Ok(scheme)
    }

    /// Load a scheme's metadata
    pub async fn load(&self, scheme_id: &str) -> Result<Scheme, AppError> {
        self.find(scheme_id)?
            .ok_or_else(|| AppError::SchemeNotFound(scheme_id.to_string()))
    }

    /// Load a scheme's metadata if it exists
    pub fn find(&self, scheme_id: &str) -> Result<Option<Scheme>, AppError> {
        if !SCHEME_ID_PATTERN.is_match(scheme_id) {
            return Ok(None);
        }
        Ok(read_json(&self.layout.meta(scheme_id))?)
    }

    /// All schemes ordered by id
    pub async fn list(&self) -> Result<Vec<Scheme>, AppError> {
        let mut schemes = Vec::new();
        for id in self.layout.scheme_ids()? {
            if let Some(scheme) = self.find(&id)? {
                schemes.push(scheme);
            }
        }
        Ok(schemes)
    }

    /// Apply a partial update under the scheme lock
    pub async fn update(
        &self,
        scheme_id: &str,
        patch: SchemePatch,
        actor: &str,
    ) -> Result<Scheme, AppError> {
        let guard = self.lock(scheme_id).await?;
        self.update_locked(&guard, scheme_id, patch, actor)
    }

    /// Apply a partial update while the caller already holds the scheme lock
    pub fn update_locked(
        &self,
        guard: &KeyGuard,
        scheme_id: &str,
        patch: SchemePatch,
        actor: &str,
    ) -> Result<Scheme, AppError> {
        ensure_guard(guard, scheme_id)?;

        let mut scheme = self
            .find(scheme_id)?
            .ok_or_else(|| AppError::SchemeNotFound(scheme_id.to_string()))?;

        if patch.is_empty() {
            return Ok(scheme);
        }

        if let Some(next) = patch.status {
            if !scheme.status.can_transition_to(next) {
                return Err(AppError::InvalidTransition(format!(
                    "scheme {} cannot move from {} to {}",
                    scheme_id, scheme.status, next
                )));
            }
            scheme.status = next;
        }
        if let Some(name) = patch.name {
            scheme.name = name.trim().to_string();
        }
        if let Some(description) = patch.short_description {
            scheme.short_description = description.trim().to_string();
        }
        if let Some(category) = patch.category {
            scheme.category = category;
        }
        if patch.compiled_at.is_some() {
            scheme.compiled_at = patch.compiled_at;
        }
        if patch.published_at.is_some() {
            scheme.published_at = patch.published_at;
        }
        if patch.bump_version {
            scheme.version += 1;
        }
        scheme.updated_at = Utc::now();
        scheme.updated_by = actor.to_string();

        write_atomic(&self.layout.meta(scheme_id), &scheme)?;

        debug!(
            "Updated scheme {} -> status {}, version {}",
            scheme_id, scheme.status, scheme.version
        );
        Ok(scheme)
    }
}
