//! Local snapshot cache: the last-known-good document as one JSON blob.
//!
//! Read fallback only — when the remote document cannot be fetched, the
//! store serves this snapshot instead and the user gets a degraded but
//! working view. The original kept this in browser local storage; here it
//! is a single file under the config directory, but the store only ever
//! sees the key-value seam.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// The key-value seam the remote store writes snapshots through.
pub trait SnapshotCache: Send + Sync {
    /// The last stored snapshot, if any.
    fn get(&self) -> Option<String>;
    /// Stores a snapshot, replacing any previous one. Failures are logged,
    /// not surfaced — a broken cache must never break a save.
    fn put(&self, snapshot: &str);
}

/// File-backed cache used by the binary.
#[derive(Debug, Clone)]
pub struct FileSnapshotCache {
    path: PathBuf,
}

impl FileSnapshotCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SnapshotCache for FileSnapshotCache {
    fn get(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read snapshot cache");
                None
            }
        }
    }

    fn put(&self, snapshot: &str) {
        if let Err(e) = self.write_atomic(snapshot) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write snapshot cache");
        }
    }
}

impl FileSnapshotCache {
    /// Write-to-temp-then-rename so the snapshot is never left half
    /// written. The randomized suffix keeps a concurrent writer from
    /// colliding on the temp path.
    fn write_atomic(&self, snapshot: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let random_suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = self.path.with_extension(format!("tmp.{:016x}", random_suffix));

        std::fs::write(&temp_path, snapshot)?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            e
        })
    }
}

/// In-memory cache for tests and cache-less runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: std::sync::Mutex<Option<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: &str) -> Self {
        Self {
            inner: std::sync::Mutex::new(Some(snapshot.to_string())),
        }
    }
}

impl SnapshotCache for MemoryCache {
    fn get(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }

    fn put(&self, snapshot: &str) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some(snapshot.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_cache_round_trip() {
        let dir = std::env::temp_dir().join("rill_cache_test_roundtrip");
        std::fs::create_dir_all(&dir).unwrap();
        let cache = FileSnapshotCache::new(dir.join("snapshot.json"));

        assert_eq!(cache.get(), None);
        cache.put("{\"feeds\":[]}");
        assert_eq!(cache.get().as_deref(), Some("{\"feeds\":[]}"));
        cache.put("{\"feeds\":[1]}");
        assert_eq!(cache.get().as_deref(), Some("{\"feeds\":[1]}"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_cache_creates_parent_dirs() {
        let dir = std::env::temp_dir().join("rill_cache_test_parents");
        std::fs::remove_dir_all(&dir).ok();
        let cache = FileSnapshotCache::new(dir.join("nested").join("snapshot.json"));

        cache.put("data");
        assert_eq!(cache.get().as_deref(), Some("data"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_memory_cache_round_trip() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get(), None);
        cache.put("snapshot");
        assert_eq!(cache.get().as_deref(), Some("snapshot"));
    }
}
