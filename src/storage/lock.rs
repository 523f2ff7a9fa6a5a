//! Per-key advisory locks
//!
//! A key is held by at most one task across all processes sharing the data
//! directory. Within this process an async mutex per key queues waiters;
//! across processes an exclusive OS lock on `<stem>.lock` is the token. The
//! kernel drops that lock when its holder exits, so a crashed process never
//! wedges a key. Acquisition never waits longer than the configured timeout.

use super::{file_stem, StorageError, StorageResult};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lock timing configuration
#[derive(Debug, Clone)]
pub struct LockSettings {
    /// Give up acquiring after this long
    pub timeout: Duration,
    /// Sleep between attempts on a lock held by another process
    pub retry_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(20),
        }
    }
}

/// Registry of per-key locks rooted at a lock directory
pub struct KeyLocks {
    dir: PathBuf,
    settings: LockSettings,
    local: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Proof that the holder owns the lock for [`KeyGuard::key`].
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    file: File,
    _local: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    // The lock file stays on disk: a waiter may already have it open, and
    // unlinking would let the next opener lock a different inode.
    fn drop(&mut self) {
        match self.file.unlock() {
            Ok(()) => debug!("Released lock '{}'", self.key),
            Err(e) => warn!("Failed to release lock '{}': {}", self.key, e),
        }
    }
}

impl KeyLocks {
    pub fn new(dir: impl Into<PathBuf>, settings: LockSettings) -> Self {
        Self {
            dir: dir.into(),
            settings,
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the lock file backing `key`
    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", file_stem(key)))
    }

    /// Acquire the exclusive lock for `key`
    pub async fn acquire(&self, key: &str) -> StorageResult<KeyGuard> {
        let deadline = Instant::now() + self.settings.timeout;

        let cell = {
            let mut local = self.local.lock().await;
            // Drop entries nobody is holding or waiting on
            local.retain(|_, m| Arc::strong_count(m) > 1);
            local
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let local_guard = tokio::time::timeout_at(deadline, cell.lock_owned())
            .await
            .map_err(|_| StorageError::LockTimeout(key.to_string()))?;

        fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;
        let lock_path = self.lock_path(key);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StorageError::io(&lock_path, e))?;

        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(StorageError::LockTimeout(key.to_string()));
                    }
                    tokio::time::sleep(self.settings.retry_interval).await;
                }
                Err(TryLockError::Error(e)) => return Err(StorageError::io(&lock_path, e)),
            }
        }

        // Holder pid, for operators inspecting a contended key
        let stamp = file
            .set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .and_then(|_| file.flush());
        if let Err(e) = stamp {
            // Dropping `file` releases the OS lock
            return Err(StorageError::io(&lock_path, e));
        }

        debug!("Acquired lock '{}'", key);
        Ok(KeyGuard {
            key: key.to_string(),
            file,
            _local: local_guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings(timeout_ms: u64) -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(timeout_ms),
            retry_interval: Duration::from_millis(5),
        }
    }

    /// A second handle on the same lock file, standing in for another process
    fn foreign_holder(locks: &KeyLocks, key: &str) -> File {
        fs::create_dir_all(&locks.dir).unwrap();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(locks.lock_path(key))
            .unwrap();
        file.try_lock().unwrap();
        file
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let locks = KeyLocks::new(dir.path(), settings(100));

        let guard = locks.acquire("scheme:SCM-A").await.unwrap();
        assert_eq!(guard.key(), "scheme:SCM-A");
        let path = dir.path().join("scheme_3aSCM-A.lock");
        assert_eq!(locks.lock_path("scheme:SCM-A"), path);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), std::process::id().to_string());

        drop(guard);
        assert!(locks.acquire("scheme:SCM-A").await.is_ok());
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let locks = Arc::new(KeyLocks::new(dir.path(), settings(2_000)));
        let counter = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("scheme:SCM-B").await.unwrap();
                counter.lock().await.push(("enter", i));
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.lock().await.push(("leave", i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let events = counter.lock().await;
        for pair in events.chunks(2) {
            assert_eq!(pair[0].0, "enter");
            assert_eq!(pair[1].0, "leave");
            assert_eq!(pair[0].1, pair[1].1);
        }
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let locks = KeyLocks::new(dir.path(), settings(100));

        let _a = locks.acquire("request:a").await.unwrap();
        let b = locks.acquire("request:b").await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere_times_out_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let locks = KeyLocks::new(dir.path(), settings(50));
        let holder = foreign_holder(&locks, "scheme:SCM-C");

        let result = locks.acquire("scheme:SCM-C").await;
        assert!(matches!(result, Err(StorageError::LockTimeout(_))));

        drop(holder);
        assert!(locks.acquire("scheme:SCM-C").await.is_ok());
    }

    #[tokio::test]
    async fn test_leftover_lock_file_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let locks = KeyLocks::new(dir.path(), settings(50));
        fs::write(locks.lock_path("scheme:SCM-D"), b"4242\n").unwrap();

        let guard = locks.acquire("scheme:SCM-D").await.unwrap();
        let holder = fs::read_to_string(locks.lock_path("scheme:SCM-D")).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
        drop(guard);
    }

    #[tokio::test]
    async fn test_waiter_takes_over_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let locks = Arc::new(KeyLocks::new(dir.path(), settings(1_000)));
        let holder = foreign_holder(&locks, "scheme:SCM-E");

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("scheme:SCM-E").await.map(|g| g.key().to_string()) })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(holder);

        assert_eq!(waiter.await.unwrap().unwrap(), "scheme:SCM-E");
    }
}
