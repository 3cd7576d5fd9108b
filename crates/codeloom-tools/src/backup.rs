//! Bounded in-memory cache of pre-modification file contents.
//!
//! Write-style handlers record the original bytes before touching a file.
//! Bounds: at most [`MAX_VERSIONS_PER_FILE`] versions per path, at most
//! [`MAX_TOTAL_BYTES`] overall, entries older than the TTL evicted by the
//! periodic scan the orchestrator drives between iterations. Eviction is
//! oldest-first in every case.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const MAX_VERSIONS_PER_FILE: usize = 5;
pub const MAX_TOTAL_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct FileBackup {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub taken_at: Instant,
    pub operation: String,
}

/// Per-session backup store. Handlers run strictly sequentially; the mutex
/// exists only because they share the store behind `Arc`.
pub struct BackupStore {
    entries: Mutex<Vec<FileBackup>>,
    ttl: Duration,
}

impl Default for BackupStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ttl,
        }
    }

    /// Record the original content of `path` before `operation` modifies it.
    pub fn record(&self, path: &Path, content: &[u8], operation: &str) {
        let mut entries = self.entries.lock().expect("backup store");
        entries.push(FileBackup {
            path: path.to_path_buf(),
            content: content.to_vec(),
            taken_at: Instant::now(),
            operation: operation.to_string(),
        });

        // Per-file bound, oldest first.
        let mut count = entries.iter().filter(|e| e.path == path).count();
        while count > MAX_VERSIONS_PER_FILE {
            if let Some(idx) = entries.iter().position(|e| e.path == path) {
                entries.remove(idx);
            }
            count -= 1;
        }

        // Global byte bound, oldest first.
        while entries.iter().map(|e| e.content.len()).sum::<usize>() > MAX_TOTAL_BYTES
            && !entries.is_empty()
        {
            entries.remove(0);
        }
    }

    /// Most recent backup for a path, if any survives the bounds.
    pub fn latest(&self, path: &Path) -> Option<Vec<u8>> {
        let entries = self.entries.lock().expect("backup store");
        entries
            .iter()
            .rev()
            .find(|e| e.path == path)
            .map(|e| e.content.clone())
    }

    /// Drop entries older than the TTL. Invoked from the orchestrator loop,
    /// not from a background timer.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        let mut entries = self.entries.lock().expect("backup store");
        entries.retain(|e| e.taken_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("backup store").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.entries
            .lock()
            .expect("backup store")
            .iter()
            .map(|e| e.content.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_returns_most_recent_version() {
        let store = BackupStore::new();
        let path = Path::new("/ws/a.txt");
        store.record(path, b"v1", "write_file");
        store.record(path, b"v2", "write_file");
        assert_eq!(store.latest(path), Some(b"v2".to_vec()));
    }

    #[test]
    fn per_file_versions_are_bounded_oldest_first() {
        let store = BackupStore::new();
        let path = Path::new("/ws/a.txt");
        for i in 0..8 {
            store.record(path, format!("v{i}").as_bytes(), "write_file");
        }
        assert_eq!(store.len(), MAX_VERSIONS_PER_FILE);
        // Oldest versions are gone; the newest survives.
        assert_eq!(store.latest(path), Some(b"v7".to_vec()));
    }

    #[test]
    fn global_byte_bound_evicts_oldest() {
        let store = BackupStore::new();
        let big = vec![0_u8; MAX_TOTAL_BYTES / 2 + 1];
        store.record(Path::new("/ws/a"), &big, "write_file");
        store.record(Path::new("/ws/b"), &big, "write_file");
        // a + b exceed the cap, so a was evicted.
        assert!(store.latest(Path::new("/ws/a")).is_none());
        assert!(store.latest(Path::new("/ws/b")).is_some());
        assert!(store.total_bytes() <= MAX_TOTAL_BYTES);
    }

    #[test]
    fn expired_entries_are_scanned_out() {
        let store = BackupStore::with_ttl(Duration::ZERO);
        store.record(Path::new("/ws/a"), b"v1", "write_file");
        store.evict_expired();
        assert!(store.is_empty());
    }

    #[test]
    fn other_files_are_untouched_by_per_file_bound() {
        let store = BackupStore::new();
        store.record(Path::new("/ws/other"), b"keep", "apply_diff");
        for i in 0..10 {
            store.record(Path::new("/ws/a"), format!("v{i}").as_bytes(), "write_file");
        }
        assert_eq!(store.latest(Path::new("/ws/other")), Some(b"keep".to_vec()));
    }
}
