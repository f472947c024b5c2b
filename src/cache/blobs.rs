// SPDX-License-Identifier: MPL-2.0

//! Staged attachment previews.
//!
//! When a user picks an avatar or post attachment, the bytes are staged to
//! a local file so the UI can show them before Nexus has indexed the
//! upload. Each entity key owns at most one staged file:
//! - staging a new file for a key releases the previous one first
//! - `reset` (sign-out) releases everything
//! - dropping the registry releases whatever is left

use crate::cache::CacheError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

pub struct BlobLeases {
    dir: PathBuf,
    leases: Mutex<HashMap<String, PathBuf>>,
    next: AtomicU64,
}

impl BlobLeases {
    /// Create a registry staging files under `dir`.
    pub fn new(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| CacheError::Path(format!("failed to create lease dir: {}", e)))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            leases: Mutex::new(HashMap::new()),
            next: AtomicU64::new(0),
        })
    }

    /// Stage `data` for `key` and return the handle (file path) to display.
    pub fn stage(
        &self,
        key: &str,
        data: &[u8],
        extension: Option<&str>,
    ) -> Result<PathBuf, CacheError> {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        let safe_key: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let mut path = self.dir.join(format!("{safe_key}-{seq}"));
        if let Some(ext) = extension {
            path.set_extension(ext);
        }

        // The old handle goes first, even if the new write then fails
        let mut leases = self.leases.lock().expect("lease lock poisoned");
        if let Some(previous) = leases.remove(key) {
            Self::free(&previous);
        }
        std::fs::write(&path, data)?;
        leases.insert(key.to_string(), path.clone());
        debug!(key, path = %path.display(), "staged blob");
        Ok(path)
    }

    pub fn get(&self, key: &str) -> Option<PathBuf> {
        let leases = self.leases.lock().expect("lease lock poisoned");
        leases.get(key).cloned()
    }

    /// Release the handle for `key`. Returns false when there was none.
    pub fn release(&self, key: &str) -> bool {
        let mut leases = self.leases.lock().expect("lease lock poisoned");
        match leases.remove(key) {
            Some(path) => {
                Self::free(&path);
                true
            }
            None => false,
        }
    }

    /// Release every handle. Returns how many were freed.
    pub fn reset(&self) -> usize {
        let mut leases = self.leases.lock().expect("lease lock poisoned");
        let count = leases.len();
        for (_, path) in leases.drain() {
            Self::free(&path);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.leases.lock().expect("lease lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn free(path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to release staged blob");
        }
    }
}

impl Drop for BlobLeases {
    fn drop(&mut self) {
        let leases = self.leases.get_mut().map(std::mem::take).unwrap_or_default();
        for path in leases.values() {
            Self::free(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_supersedes_previous_handle() {
        let dir = tempfile::tempdir().unwrap();
        let leases = BlobLeases::new(dir.path()).unwrap();

        let first = leases.stage("alice", b"one", Some("png")).unwrap();
        let second = leases.stage("alice", b"two", Some("png")).unwrap();

        assert_ne!(first, second);
        assert!(!first.exists());
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
        assert_eq!(leases.get("alice"), Some(second));
        assert_eq!(leases.len(), 1);
    }

    #[test]
    fn test_failed_stage_still_releases_previous_handle() {
        let dir = tempfile::tempdir().unwrap();
        let leases = BlobLeases::new(dir.path()).unwrap();
        let first = leases.stage("alice", b"one", Some("png")).unwrap();

        // Occupy the next file name so the write fails
        std::fs::create_dir(dir.path().join("alice-1.png")).unwrap();
        assert!(leases.stage("alice", b"two", Some("png")).is_err());

        assert!(!first.exists());
        assert_eq!(leases.get("alice"), None);
        assert!(leases.is_empty());
    }

    #[test]
    fn test_release_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let leases = BlobLeases::new(dir.path()).unwrap();

        let a = leases.stage("alice", b"a", None).unwrap();
        let b = leases.stage("bob:post1", b"b", None).unwrap();

        assert!(leases.release("alice"));
        assert!(!leases.release("alice"));
        assert!(!a.exists());

        assert_eq!(leases.reset(), 1);
        assert!(!b.exists());
        assert!(leases.is_empty());
    }

    #[test]
    fn test_drop_releases_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let leases = BlobLeases::new(dir.path()).unwrap();
            leases.stage("alice", b"a", None).unwrap()
        };
        assert!(!path.exists());
    }
}
