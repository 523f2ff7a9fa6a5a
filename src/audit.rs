//! Audit Log Sink
//!
//! Append-only record of every import, compile, publish and access decision.
//! Logging is best-effort: a failed append is reported through `tracing` and
//! never fails the operation that produced it.

use crate::storage::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    // Scheme metadata
    SchemeCreated,
    SchemeUpdated,
    SectionsUpdated,

    // Pipeline
    ImportOk,
    ImportFail,
    CompileOk,
    CompileFail,
    PublishOk,
    PublishFail,

    // Activation workflow
    ActivationRequested,
    ActivationApproved,
    ActivationRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub scheme_id: String,
    pub actor: String,
    pub payload: serde_json::Value,
}

/// Append-only audit sink
pub trait AuditSink: Send + Sync {
    fn log(&self, event: AuditEvent, scheme_id: &str, actor: &str, payload: serde_json::Value);
}

/// JSON-lines audit log file
pub struct JsonlAuditLog {
    path: PathBuf,
    append: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: Mutex::new(()),
        }
    }

    fn append(&self, entry: &AuditEntry) -> StorageResult<()> {
        let mut line = serde_json::to_vec(entry).map_err(|source| StorageError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        line.push(b'\n');

        let _serialized = self.append.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))?;
        file.write_all(&line).map_err(|e| StorageError::io(&self.path, e))
    }

    /// Most recent entries first, optionally for a single scheme
    pub fn recent(&self, scheme_id: Option<&str>, limit: usize) -> StorageResult<Vec<AuditEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        Ok(content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
            .filter(|entry| scheme_id.map(|id| entry.scheme_id == id).unwrap_or(true))
            .take(limit)
            .collect())
    }
}

impl AuditSink for JsonlAuditLog {
    fn log(&self, event: AuditEvent, scheme_id: &str, actor: &str, payload: serde_json::Value) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
            scheme_id: scheme_id.to_string(),
            actor: actor.to_string(),
            payload,
        };

        if let Err(e) = self.append(&entry) {
            warn!("Audit log append failed for {:?} on {}: {}", event, scheme_id, e);
        }
    }
}
