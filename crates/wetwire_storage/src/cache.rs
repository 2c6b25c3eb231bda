//! Discovery cache.
//!
//! One JSON file per source file, named `<fingerprint>.json`. Any change to
//! a file's path, mtime or size changes its fingerprint, which is a miss.
//! Reads never fail: unreadable, corrupt or foreign entries are misses.
//! Writes go to a temporary file in the cache directory and are renamed
//! into place, so readers only ever see complete entries.

use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use wetwire_core::{CoreError, DeclaredResource, Fingerprint};

/// Cache error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// IO error
    Io {
        /// Path involved
        path: String,
        /// Underlying reason
        reason: String,
    },
    /// Serialization error
    Serialization {
        /// Underlying reason
        reason: String,
    },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, reason } => write!(f, "Cache IO error on {}: {}", path, reason),
            Self::Serialization { reason } => write!(f, "Cache serialization error: {}", reason),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<CacheError> for CoreError {
    fn from(err: CacheError) -> Self {
        CoreError::Validation {
            field: "cache".to_string(),
            reason: err.to_string(),
        }
    }
}

/// What is stored for one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Source file the entry belongs to, as given to the cache
    pub file_path: String,
    /// Fingerprint the entry was stored under
    pub fingerprint: Fingerprint,
    /// Resources discovered in the file
    pub resources: Vec<DeclaredResource>,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries served
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Entries written
    pub writes: u64,
}

/// Fingerprint-addressed cache of discovery results
///
/// Safe to share between scanner threads; concurrent writes of the same
/// entry race only on the final rename.
#[derive(Debug)]
pub struct DiscoveryCache {
    cache_dir: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl DiscoveryCache {
    /// Create a cache rooted at `cache_dir`; the directory is created lazily
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Cache directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Fingerprint for `path`
    ///
    /// Falls back to hashing the path alone when the file cannot be stat'ed.
    #[must_use]
    pub fn fingerprint(path: &Path) -> Fingerprint {
        Fingerprint::of_path(path).unwrap_or_else(|err| {
            tracing::debug!(path = %path.display(), error = %err, "stat failed, fingerprinting path only");
            Fingerprint::compute(path.display().to_string().as_bytes())
        })
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.cache_dir.join(format!("{}.json", fingerprint.to_hex()))
    }

    /// Cached resources for `path`, if an entry for its current state exists
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Vec<DeclaredResource>> {
        self.get_fingerprinted(path, &Self::fingerprint(path))
    }

    /// Cached resources for `path` under a precomputed fingerprint
    #[must_use]
    pub fn get_fingerprinted(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> Option<Vec<DeclaredResource>> {
        match self.read_entry(path, fingerprint) {
            Ok(Some(resources)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(resources)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "cache entry unusable");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn read_entry(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Vec<DeclaredResource>>, CacheError> {
        let entry_path = self.entry_path(fingerprint);
        let text = match std::fs::read_to_string(&entry_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CacheError::Io {
                    path: entry_path.display().to_string(),
                    reason: err.to_string(),
                });
            }
        };
        let entry: CacheEntry =
            serde_json::from_str(&text).map_err(|err| CacheError::Serialization {
                reason: err.to_string(),
            })?;
        if entry.file_path != path.display().to_string() || entry.fingerprint != *fingerprint {
            return Ok(None);
        }
        Ok(Some(entry.resources))
    }

    /// Store resources for the current state of `path`
    ///
    /// Failures are logged and otherwise ignored.
    pub fn set(&self, path: &Path, resources: &[DeclaredResource]) {
        self.put(path, &Self::fingerprint(path), resources);
    }

    /// Store resources under a precomputed fingerprint
    ///
    /// Failures are logged and otherwise ignored.
    pub fn put(&self, path: &Path, fingerprint: &Fingerprint, resources: &[DeclaredResource]) {
        match self.write_entry(path, fingerprint, resources) {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to write cache entry");
            }
        }
    }

    fn write_entry(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
        resources: &[DeclaredResource],
    ) -> Result<(), CacheError> {
        let io_err = |p: &Path, err: std::io::Error| CacheError::Io {
            path: p.display().to_string(),
            reason: err.to_string(),
        };

        std::fs::create_dir_all(&self.cache_dir).map_err(|e| io_err(&self.cache_dir, e))?;

        let entry = CacheEntry {
            file_path: path.display().to_string(),
            fingerprint: *fingerprint,
            resources: resources.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&entry).map_err(|err| CacheError::Serialization {
            reason: err.to_string(),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)
            .map_err(|e| io_err(&self.cache_dir, e))?;
        tmp.write_all(&json).map_err(|e| io_err(tmp.path(), e))?;

        let target = self.entry_path(fingerprint);
        tmp.persist(&target).map_err(|e| io_err(&target, e.error))?;
        Ok(())
    }

    /// Remove every entry; returns how many were removed
    ///
    /// Only `*.json` files directly in the cache directory are touched.
    /// A missing directory counts as already clear.
    pub fn clear(&self) -> usize {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %self.cache_dir.display(), error = %err, "failed to list cache");
                }
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let is_entry = path.is_file() && path.extension().is_some_and(|ext| ext == "json");
            if !is_entry {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove cache entry");
                }
            }
        }
        tracing::debug!(dir = %self.cache_dir.display(), removed, "cleared cache");
        removed
    }

    /// Hit, miss and write counters since creation
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wetwire_core::ResourceKind;

    fn resources(path: &Path) -> Vec<DeclaredResource> {
        let file = path.display().to_string();
        vec![
            DeclaredResource::new("build", ResourceKind::Job, &file, 3, "ci"),
            DeclaredResource::new("ci", ResourceKind::Workflow, &file, 7, "ci").with_dependency("build"),
        ]
    }

    fn setup() -> (tempfile::TempDir, PathBuf, DiscoveryCache) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("ci.py");
        std::fs::write(&source, "build = Job()\n").unwrap();
        let cache = DiscoveryCache::new(dir.path().join(".wetwire-cache"));
        (dir, source, cache)
    }

    #[test]
    fn test_set_then_get() {
        let (_dir, source, cache) = setup();
        assert!(cache.get(&source).is_none());
        cache.set(&source, &resources(&source));
        assert_eq!(cache.get(&source), Some(resources(&source)));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                writes: 1
            }
        );
    }

    #[test]
    fn test_modified_file_misses() {
        let (_dir, source, cache) = setup();
        cache.set(&source, &resources(&source));
        std::fs::write(&source, "build = Job()\ntest = Job()\n").unwrap();
        assert!(cache.get(&source).is_none());
    }

    #[test]
    fn test_fingerprint_tracks_mtime() {
        let (_dir, source, cache) = setup();
        let meta = std::fs::metadata(&source).unwrap();
        let now = Fingerprint::of_file(&source, meta.modified().unwrap(), meta.len());
        let later = Fingerprint::of_file(
            &source,
            meta.modified().unwrap() + Duration::from_secs(1),
            meta.len(),
        );
        assert_ne!(now, later);
        assert_eq!(DiscoveryCache::fingerprint(&source), now);

        cache.put(&source, &now, &resources(&source));
        assert!(cache.get_fingerprinted(&source, &later).is_none());
        assert!(cache.get_fingerprinted(&source, &now).is_some());
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let (_dir, source, cache) = setup();
        cache.set(&source, &resources(&source));
        let fp = DiscoveryCache::fingerprint(&source);
        std::fs::write(cache.dir().join(format!("{}.json", fp.to_hex())), "{not json").unwrap();
        assert!(cache.get(&source).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_entry_for_other_path_is_miss() {
        let (_dir, source, cache) = setup();
        let fp = DiscoveryCache::fingerprint(&source);
        let other = source.with_file_name("other.py");
        cache.put(&other, &fp, &resources(&other));
        assert!(cache.get_fingerprinted(&source, &fp).is_none());
    }

    #[test]
    fn test_missing_file_uses_path_fingerprint() {
        let (dir, _source, _cache) = setup();
        let ghost = dir.path().join("ghost.py");
        assert_eq!(
            DiscoveryCache::fingerprint(&ghost),
            Fingerprint::compute(ghost.display().to_string().as_bytes())
        );
    }

    #[test]
    fn test_clear_only_removes_entries() {
        let (_dir, source, cache) = setup();
        assert_eq!(cache.clear(), 0);
        cache.set(&source, &resources(&source));
        std::fs::write(cache.dir().join("notes.txt"), "keep").unwrap();
        assert_eq!(cache.clear(), 1);
        assert!(cache.dir().join("notes.txt").exists());
        assert!(cache.get(&source).is_none());
    }

    #[test]
    fn test_unwritable_cache_is_silent() {
        let (dir, source, _cache) = setup();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not dir").unwrap();
        let cache = DiscoveryCache::new(blocker.join("cache"));
        cache.set(&source, &resources(&source));
        assert_eq!(cache.stats().writes, 0);
        assert!(cache.get(&source).is_none());
    }
}
