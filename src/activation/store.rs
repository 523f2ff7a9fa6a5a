//! Activation stores
//!
//! ```text
//! activation/requests/<requestId>.json
//! activation/grants/<stem(yojId)>__<stem(schemeId)>.json
//! ```
//!
//! `stem` is [`file_stem`], so every (vendor, scheme) pair owns its own file.
//!
//! Writers must hold the matching key lock (see `request_lock_key` and
//! `grant_lock_key`).

use super::models::{AccessGrant, ActivationRequest};
use crate::error::AppError;
use crate::storage::{file_stem, read_json, write_atomic, KeyGuard, StorageError, StorageResult};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub fn request_lock_key(request_id: Uuid) -> String {
    format!("request:{}", request_id)
}

pub fn grant_lock_key(yoj_id: &str, scheme_id: &str) -> String {
    format!("grant:{}:{}", yoj_id, scheme_id)
}

fn ensure_key(guard: &KeyGuard, expected: &str) -> Result<(), AppError> {
    if guard.key() != expected {
        return Err(AppError::Internal(format!(
            "holding lock '{}' but '{}' is required",
            guard.key(),
            expected
        )));
    }
    Ok(())
}

/// Every JSON record in a directory; a missing directory is empty
fn read_all<T: DeserializeOwned>(dir: &Path) -> StorageResult<Vec<T>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };

    let mut records = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StorageError::io(dir, e))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if let Some(record) = read_json(&path)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Activation request records
pub struct RequestStore {
    dir: PathBuf,
}

impl RequestStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("activation").join("requests"),
        }
    }

    fn path(&self, request_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", request_id))
    }

    pub fn find(&self, request_id: Uuid) -> Result<Option<ActivationRequest>, AppError> {
        Ok(read_json(&self.path(request_id))?)
    }

    pub fn load(&self, request_id: Uuid) -> Result<ActivationRequest, AppError> {
        self.find(request_id)?
            .ok_or_else(|| AppError::RequestNotFound(request_id.to_string()))
    }

    /// All requests, oldest first
    pub fn list(&self) -> Result<Vec<ActivationRequest>, AppError> {
        let mut requests: Vec<ActivationRequest> = read_all(&self.dir)?;
        requests.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        Ok(requests)
    }

    /// Persist a request. The guard may be the request's own lock or, for
    /// a brand-new request, the lock of its (vendor, scheme) pair.
    pub fn write_locked(&self, guard: &KeyGuard, request: &ActivationRequest) -> Result<(), AppError> {
        let own = request_lock_key(request.request_id);
        if guard.key() != own {
            ensure_key(guard, &grant_lock_key(&request.yoj_id, &request.scheme_id))?;
        }
        write_atomic(&self.path(request.request_id), request)?;
        Ok(())
    }
}

/// Access grant records, one per (vendor, scheme)
pub struct GrantStore {
    dir: PathBuf,
}

impl GrantStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("activation").join("grants"),
        }
    }

    fn path(&self, yoj_id: &str, scheme_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", file_stem(yoj_id), file_stem(scheme_id)))
    }

    pub fn find(&self, yoj_id: &str, scheme_id: &str) -> Result<Option<AccessGrant>, AppError> {
        Ok(read_json(&self.path(yoj_id, scheme_id))?)
    }

    /// All grants of a vendor, ordered by scheme id
    pub fn list_for_vendor(&self, yoj_id: &str) -> Result<Vec<AccessGrant>, AppError> {
        let mut grants: Vec<AccessGrant> = read_all(&self.dir)?;
        grants.retain(|g| g.yoj_id == yoj_id);
        grants.sort_by(|a, b| a.scheme_id.cmp(&b.scheme_id));
        Ok(grants)
    }

    /// Create or overwrite the grant for its pair
    pub fn write_locked(&self, guard: &KeyGuard, grant: &AccessGrant) -> Result<(), AppError> {
        ensure_key(guard, &grant_lock_key(&grant.yoj_id, &grant.scheme_id))?;
        write_atomic(&self.path(&grant.yoj_id, &grant.scheme_id), grant)?;
        Ok(())
    }
}
