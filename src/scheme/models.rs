//! Scheme data models
//!
//! Defines scheme metadata, its lifecycle status and the section records
//! that subdivide a scheme's content.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Uppercase alphanumeric plus hyphen, e.g. `SCM-TEST`
pub static SCHEME_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9-]{1,63}$").expect("scheme id pattern"));

/// Scheme lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemeStatus {
    /// Shell created, no definition yet
    Draft,
    /// Definition validated and stored
    Imported,
    /// Artifact exists and is current
    Compiled,
    /// Vendor-visible
    Published,
}

impl Default for SchemeStatus {
    fn default() -> Self {
        SchemeStatus::Draft
    }
}

impl fmt::Display for SchemeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemeStatus::Draft => "draft",
            SchemeStatus::Imported => "imported",
            SchemeStatus::Compiled => "compiled",
            SchemeStatus::Published => "published",
        };
        f.write_str(s)
    }
}

/// Events that move a scheme through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Import,
    Compile,
    Publish,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 3] = [LifecycleEvent::Import, LifecycleEvent::Compile, LifecycleEvent::Publish];
}

impl SchemeStatus {
    /// Transition table. `None` means the event is not allowed from `self`.
    pub fn on(self, event: LifecycleEvent) -> Option<SchemeStatus> {
        use LifecycleEvent::*;
        use SchemeStatus::*;

        match (self, event) {
            (Draft, Import) => Some(Imported),
            (Imported, Import) => Some(Imported),
            (Compiled, Import) => Some(Compiled),
            (Published, Import) => Some(Published),

            (Imported, Compile) => Some(Compiled),
            (Compiled, Compile) => Some(Compiled),
            (Published, Compile) => Some(Published),

            (Imported, Publish) => Some(Published),
            (Compiled, Publish) => Some(Published),
            (Published, Publish) => Some(Published),

            (Draft, Compile) | (Draft, Publish) => None,
        }
    }

    /// Apply an event, failing fast on transitions outside the table
    pub fn apply(self, event: LifecycleEvent) -> Result<SchemeStatus, AppError> {
        self.on(event).ok_or_else(|| {
            AppError::InvalidTransition(format!("{:?} is not allowed from status {}", event, self))
        })
    }

    /// Direct status changes: allowed iff some event takes `self` to `next`
    pub fn can_transition_to(self, next: SchemeStatus) -> bool {
        LifecycleEvent::ALL.iter().any(|event| self.on(*event) == Some(next))
    }

    /// Whether a definition has been stored
    pub fn has_definition(self) -> bool {
        self != SchemeStatus::Draft
    }
}

/// Scheme category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemeCategory {
    Procurement,
    Compliance,
    Registration,
    Finance,
    Operations,
    Other,
}

impl Default for SchemeCategory {
    fn default() -> Self {
        SchemeCategory::Other
    }
}

/// Per-scheme metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheme {
    pub scheme_id: String,
    pub name: String,
    pub short_description: String,
    pub category: SchemeCategory,
    pub status: SchemeStatus,
    /// Attempt counter, starts at 1
    pub version: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl Scheme {
    /// A fresh shell in `draft` at version 1
    pub fn new_shell(
        scheme_id: String,
        name: String,
        short_description: String,
        category: SchemeCategory,
        creator: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            scheme_id,
            name,
            short_description,
            category,
            status: SchemeStatus::Draft,
            version: 1,
            created_by: creator.clone(),
            created_at: now,
            updated_by: creator,
            updated_at: now,
            compiled_at: None,
            published_at: None,
        }
    }
}

/// Partial update applied by `MetadataStore::update`.
///
/// The version can only be bumped, never set.
#[derive(Debug, Clone, Default)]
pub struct SchemePatch {
    pub name: Option<String>,
    pub short_description: Option<String>,
    pub category: Option<SchemeCategory>,
    pub status: Option<SchemeStatus>,
    pub bump_version: bool,
    pub compiled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl SchemePatch {
    /// A pipeline attempt: bump the version, optionally move status
    pub fn attempt(status: Option<SchemeStatus>) -> Self {
        Self {
            status,
            bump_version: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.short_description.is_none()
            && self.category.is_none()
            && self.status.is_none()
            && !self.bump_version
            && self.compiled_at.is_none()
            && self.published_at.is_none()
    }
}

/// Section status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Draft,
    Published,
}

impl Default for SectionStatus {
    fn default() -> Self {
        SectionStatus::Draft
    }
}

/// An addressable sub-unit of scheme content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    /// Template set this section renders with, resolved at compile time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_set: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub status: SectionStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: String,
}
