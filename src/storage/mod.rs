//! Durable storage primitives
//!
//! Every record in the registry is a JSON file under the data directory.
//! Writes go through [`write_atomic`] and mutations of a keyed record are
//! serialized with [`KeyLocks`].

mod atomic;
mod lock;

pub use atomic::{read_json, remove_file, write_atomic};
pub use lock::{KeyGuard, KeyLocks, LockSettings};

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the storage layer. Always fatal for the calling operation.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize record for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timed out waiting for lock on '{0}'")]
    LockTimeout(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Map an identifier onto a safe file stem.
///
/// ASCII letters, digits and `-` pass through; every other byte, `_`
/// included, becomes `_xx` (lowercase hex). Distinct ids always get distinct
/// stems, and a stem never contains `__`, so it can serve as a separator.
pub fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_stem_keeps_safe_characters() {
        assert_eq!(file_stem("SCM-TEST1"), "SCM-TEST1");
    }

    #[test]
    fn test_file_stem_escapes_path_separators() {
        assert_eq!(file_stem("../Y1 23"), "_2e_2e_2fY1_2023");
    }

    #[test]
    fn test_file_stem_keeps_lookalike_ids_apart() {
        let stems: Vec<String> = ["Y_1", "Y.1", "Y/1", "Y_2f1"].iter().map(|id| file_stem(id)).collect();
        assert_eq!(stems, vec!["Y_5f1", "Y_2e1", "Y_2f1", "Y_5f2f1"]);
        assert!(stems.iter().all(|s| !s.contains("__")));
    }
}
