//! Atomic JSON writer
//!
//! Atomicity is achieved via:
//! 1. Write to a temp file in the target directory
//! 2. fsync the temp file
//! 3. Rename temp to final (atomic on POSIX)
//!
//! A reader therefore sees either the previous record or the new one, never
//! a partial file.

use super::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Persist `value` at `path` all-or-nothing.
pub fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = write_and_sync(&temp_path, &bytes)
        .and_then(|_| fs::rename(&temp_path, path).map_err(|e| StorageError::io(path, e)));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    // fsync the directory so the rename itself is durable
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    tracing::debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn write_and_sync(temp_path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)
        .map_err(|e| StorageError::io(temp_path, e))?;
    file.write_all(bytes).map_err(|e| StorageError::io(temp_path, e))?;
    file.sync_all().map_err(|e| StorageError::io(temp_path, e))
}

/// Read a JSON record. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Remove a record. Removing a missing record is not an error.
pub fn remove_file(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: String,
        count: u32,
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("record.json");
        let record = Record { id: "a".to_string(), count: 3 };

        write_atomic(&path, &record).unwrap();

        let loaded: Option<Record> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");

        write_atomic(&path, &Record { id: "a".to_string(), count: 1 }).unwrap();
        write_atomic(&path, &Record { id: "a".to_string(), count: 2 }).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["record.json".to_string()]);

        let loaded: Record = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded.count, 2);
    }

    #[test]
    fn test_missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Record> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        fs::write(&path, b"{\"id\": ").unwrap();

        let result: StorageResult<Option<Record>> = read_json(&path);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_file(&dir.path().join("absent.json")).is_ok());
    }
}
