//! Scheme module - durable records owned by a scheme
//!
//! Each scheme lives in its own directory under `<data_dir>/schemes/`:
//!
//! ```text
//! schemes/SCM-TEST/meta.json        scheme metadata
//! schemes/SCM-TEST/definition.json  normalized definition record
//! schemes/SCM-TEST/sections.json    ordered sections index
//! schemes/SCM-TEST/compiled.json    last good compiled artifact
//! ```
//!
//! All mutations of a scheme's files happen under the scheme's key lock.

mod artifact;
mod definition;
mod models;
mod sections;
mod store;

pub use artifact::{ArtifactStore, CompiledArtifact, CompiledSection};
pub use definition::{
    Definition, DefinitionRecord, DefinitionStore, FieldDef, FieldType, RuleDef, RuleOperator,
    StepDef,
};
pub use models::*;
pub use sections::{SectionDraft, SectionsIndex};
pub use store::MetadataStore;

use crate::error::AppError;
use crate::storage::{KeyGuard, StorageError, StorageResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Lock key guarding every record of a scheme
pub fn lock_key(scheme_id: &str) -> String {
    format!("scheme:{}", scheme_id)
}

/// Fail unless `guard` holds the lock for `scheme_id`
pub(crate) fn ensure_guard(guard: &KeyGuard, scheme_id: &str) -> Result<(), AppError> {
    if guard.key() == lock_key(scheme_id) {
        Ok(())
    } else {
        Err(AppError::Internal(format!(
            "lock '{}' does not cover scheme {}",
            guard.key(),
            scheme_id
        )))
    }
}

/// File layout of the scheme records
#[derive(Debug, Clone)]
pub struct SchemeLayout {
    root: PathBuf,
}

impl SchemeLayout {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("schemes"),
        }
    }

    pub fn dir(&self, scheme_id: &str) -> PathBuf {
        self.root.join(scheme_id)
    }

    pub fn meta(&self, scheme_id: &str) -> PathBuf {
        self.dir(scheme_id).join("meta.json")
    }

    pub fn definition(&self, scheme_id: &str) -> PathBuf {
        self.dir(scheme_id).join("definition.json")
    }

    pub fn sections(&self, scheme_id: &str) -> PathBuf {
        self.dir(scheme_id).join("sections.json")
    }

    pub fn artifact(&self, scheme_id: &str) -> PathBuf {
        self.dir(scheme_id).join("compiled.json")
    }

    /// Whether a scheme shell exists. Ids outside the id pattern never do.
    pub fn exists(&self, scheme_id: &str) -> bool {
        SCHEME_ID_PATTERN.is_match(scheme_id) && self.meta(scheme_id).is_file()
    }

    /// All scheme ids with a metadata record, sorted
    pub fn scheme_ids(&self) -> StorageResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let id = entry.file_name().to_string_lossy().into_owned();
            if self.exists(&id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Require an existing scheme before touching its records
pub(crate) fn require_scheme(layout: &SchemeLayout, scheme_id: &str) -> Result<(), AppError> {
    if layout.exists(scheme_id) {
        Ok(())
    } else {
        Err(AppError::SchemeNotFound(scheme_id.to_string()))
    }
}
