//! Scheme definitions
//!
//! The typed form of a definition document. Raw JSON only exists up to the
//! validator; everything after it works on [`Definition`].

use super::{ensure_guard, SchemeLayout};
use crate::error::AppError;
use crate::pipeline::ValidationIssue;
use crate::storage::{read_json, remove_file, write_atomic, KeyGuard};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    Boolean,
    Select,
    Multiselect,
    File,
    Email,
    Phone,
}

impl FieldType {
    pub const KNOWN: [&'static str; 10] = [
        "text", "textarea", "number", "date", "boolean", "select", "multiselect", "file", "email",
        "phone",
    ];

    /// Parse a type name. The second value is true for deprecated aliases.
    pub fn parse(name: &str) -> Option<(FieldType, bool)> {
        let parsed = match name {
            "text" => FieldType::Text,
            "textarea" => FieldType::Textarea,
            "number" => FieldType::Number,
            "date" => FieldType::Date,
            "boolean" => FieldType::Boolean,
            "select" => FieldType::Select,
            "multiselect" => FieldType::Multiselect,
            "file" => FieldType::File,
            "email" => FieldType::Email,
            "phone" => FieldType::Phone,
            "upload" => return Some((FieldType::File, true)),
            _ => return None,
        };
        Some((parsed, false))
    }

    pub fn needs_options(self) -> bool {
        matches!(self, FieldType::Select | FieldType::Multiselect)
    }
}

/// A vendor-facing input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

/// One step of the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Conditional requirement operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    Present,
    Absent,
}

impl RuleOperator {
    pub fn parse(name: &str) -> Option<RuleOperator> {
        match name {
            "equals" => Some(RuleOperator::Equals),
            "notEquals" => Some(RuleOperator::NotEquals),
            "present" => Some(RuleOperator::Present),
            "absent" => Some(RuleOperator::Absent),
            _ => None,
        }
    }

    pub fn needs_value(self) -> bool {
        matches!(self, RuleOperator::Equals | RuleOperator::NotEquals)
    }
}

/// "When `field` matches, also require these fields"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDef {
    pub id: String,
    pub field: String,
    pub operator: RuleOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    pub require: Vec<String>,
}

/// Normalized scheme definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub scheme_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldDef>,
    pub steps: Vec<StepDef>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    /// Section slots, filled from the sections index at compile time
    #[serde(default)]
    pub sections: Vec<String>,
}

impl Definition {
    /// Every section id this definition refers to, slots first
    pub fn section_refs(&self) -> Vec<(String, &str)> {
        let mut refs: Vec<(String, &str)> = self
            .sections
            .iter()
            .enumerate()
            .map(|(i, id)| (format!("sections[{}]", i), id.as_str()))
            .collect();
        refs.extend(self.steps.iter().enumerate().filter_map(|(i, step)| {
            step.section
                .as_deref()
                .map(|id| (format!("steps[{}].section", i), id))
        }));
        refs
    }
}

/// Stored definition with its import metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRecord {
    pub scheme_id: String,
    /// Scheme version produced by the import that stored this definition
    pub revision: u64,
    pub imported_at: DateTime<Utc>,
    pub imported_by: String,
    #[serde(default)]
    pub warnings: Vec<ValidationIssue>,
    pub definition: Definition,
}

/// File-backed definition store. Writes require the scheme lock.
pub struct DefinitionStore {
    layout: SchemeLayout,
}

impl DefinitionStore {
    pub fn new(layout: SchemeLayout) -> Self {
        Self { layout }
    }

    pub fn load(&self, scheme_id: &str) -> Result<Option<DefinitionRecord>, AppError> {
        if !self.layout.exists(scheme_id) {
            return Ok(None);
        }
        Ok(read_json(&self.layout.definition(scheme_id))?)
    }

    /// Replace the stored definition wholesale
    pub fn store_locked(&self, guard: &KeyGuard, record: &DefinitionRecord) -> Result<(), AppError> {
        ensure_guard(guard, &record.scheme_id)?;
        if record.definition.scheme_id != record.scheme_id {
            return Err(AppError::Internal(format!(
                "definition for {} stored under scheme {}",
                record.definition.scheme_id, record.scheme_id
            )));
        }
        write_atomic(&self.layout.definition(&record.scheme_id), record)?;
        Ok(())
    }

    /// Put back what was stored before a failed chain of writes
    pub fn restore_locked(
        &self,
        guard: &KeyGuard,
        scheme_id: &str,
        previous: Option<&DefinitionRecord>,
    ) -> Result<(), AppError> {
        ensure_guard(guard, scheme_id)?;
        match previous {
            Some(record) => write_atomic(&self.layout.definition(scheme_id), record)?,
            None => remove_file(&self.layout.definition(scheme_id))?,
        }
        Ok(())
    }
}
