//! Directory traversal and parallel scanning.

use crate::scan::Scanner;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use wetwire_core::{CancelToken, DeclaredResource, DiscoveryConfig};
use wetwire_plan::SourceParser;
use wetwire_storage::DiscoveryCache;

/// Upper bound for the default worker count
const MAX_DEFAULT_WORKERS: usize = 8;

/// Directory scan settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Directory names never descended into
    pub reserved_dirs: Vec<String>,
    /// Skip directories whose name starts with `.`
    pub exclude_hidden: bool,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Worker threads (0 = [`default_workers`])
    pub workers: usize,
    /// Source file extension, without the dot
    pub extension: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for ScanOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            reserved_dirs: config.reserved_dirs.clone(),
            exclude_hidden: config.exclude_hidden,
            recursive: true,
            workers: config.workers,
            extension: "py".to_string(),
        }
    }
}

impl ScanOptions {
    /// Check if a directory with this name is skipped
    #[must_use]
    pub fn skips_dir(&self, name: &str) -> bool {
        (self.exclude_hidden && name.starts_with('.')) || self.reserved_dirs.iter().any(|d| d == name)
    }
}

/// Result of a directory scan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryScan {
    /// Resources from every scanned file, in path order
    pub resources: Vec<DeclaredResource>,
    /// Source files scanned
    pub files_scanned: usize,
    /// Entries that could not be read while walking
    pub skipped: usize,
    /// Whether cancellation cut the scan short
    pub cancelled: bool,
}

/// Available parallelism, capped
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

/// Source files under `dir`, sorted by path
///
/// Returns the files and the number of entries that could not be read.
#[must_use]
pub fn collect_source_files(dir: &Path, options: &ScanOptions) -> (Vec<PathBuf>, usize) {
    let mut skipped = 0;
    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !options.skips_dir(&entry.file_name().to_string_lossy())
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable entry");
                skipped += 1;
                None
            }
        })
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == options.extension.as_str())
        })
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    (files, skipped)
}

impl<P: SourceParser> Scanner<P> {
    /// Scan every source file under `dir`
    ///
    /// Files are scanned on a bounded worker pool. `cancel` is checked
    /// before each file; a cancelled scan returns what was found so far.
    #[must_use]
    pub fn scan_directory(
        &self,
        dir: &Path,
        options: &ScanOptions,
        cache: Option<&DiscoveryCache>,
        cancel: &CancelToken,
    ) -> DirectoryScan {
        let _span = tracing::info_span!("scan_directory", dir = %dir.display()).entered();

        let (files, skipped) = collect_source_files(dir, options);
        let workers = if options.workers == 0 {
            default_workers()
        } else {
            options.workers
        };
        tracing::debug!(files = files.len(), workers, "scanning source files");

        let scan_one = |path: &PathBuf| -> Option<Vec<DeclaredResource>> {
            if cancel.is_cancelled() {
                return None;
            }
            Some(self.scan_file(path, cache))
        };

        let per_file: Vec<Option<Vec<DeclaredResource>>> =
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| files.par_iter().map(scan_one).collect()),
                Err(err) => {
                    tracing::warn!(error = %err, "worker pool unavailable, scanning sequentially");
                    files.iter().map(scan_one).collect()
                }
            };

        let mut result = DirectoryScan {
            skipped,
            ..DirectoryScan::default()
        };
        for outcome in per_file {
            match outcome {
                Some(resources) => {
                    result.files_scanned += 1;
                    result.resources.extend(resources);
                }
                None => result.cancelled = true,
            }
        }

        if result.cancelled {
            tracing::info!(files = result.files_scanned, "directory scan cancelled");
        } else {
            tracing::debug!(
                files = result.files_scanned,
                resources = result.resources.len(),
                skipped,
                "directory scan complete"
            );
        }
        result
    }
}

/// Scan every source file under `dir` with the default scanner
#[must_use]
pub fn scan_directory(
    dir: &Path,
    options: &ScanOptions,
    cache: Option<&DiscoveryCache>,
    cancel: &CancelToken,
) -> DirectoryScan {
    Scanner::new().scan_directory(dir, options, cache, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ci.py", "build = Job()\n");
        write(dir.path(), "pkg/deploy.py", "ship = Job()\nrelease = Workflow(jobs=[ship])\n");
        write(dir.path(), "pkg/broken.py", "oops = Job(\n");
        write(dir.path(), "__pycache__/cached.py", "ghost = Job()\n");
        write(dir.path(), ".hidden/secret.py", "hidden = Job()\n");
        write(dir.path(), "node_modules/x.py", "vendored = Job()\n");
        write(dir.path(), "notes.txt", "build = Job()\n");
        dir
    }

    fn names(scan: &DirectoryScan) -> Vec<&str> {
        scan.resources.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_skips_reserved_and_hidden() {
        let dir = tree();
        let scan = scan_directory(dir.path(), &ScanOptions::default(), None, &CancelToken::new());
        assert_eq!(names(&scan), vec!["build", "ship", "release"]);
        assert_eq!(scan.files_scanned, 3);
        assert!(!scan.cancelled);
    }

    #[test]
    fn test_hidden_allowed_when_configured() {
        let dir = tree();
        let options = ScanOptions {
            exclude_hidden: false,
            ..ScanOptions::default()
        };
        let scan = scan_directory(dir.path(), &options, None, &CancelToken::new());
        assert!(names(&scan).contains(&"hidden"));
        assert!(!names(&scan).contains(&"ghost"));
    }

    #[test]
    fn test_non_recursive() {
        let dir = tree();
        let options = ScanOptions {
            recursive: false,
            ..ScanOptions::default()
        };
        let scan = scan_directory(dir.path(), &options, None, &CancelToken::new());
        assert_eq!(names(&scan), vec!["build"]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            write(dir.path(), &format!("m{:02}.py", i), &format!("job{} = Job()\n", i));
        }
        let run = |workers| {
            let options = ScanOptions {
                workers,
                ..ScanOptions::default()
            };
            scan_directory(dir.path(), &options, None, &CancelToken::new()).resources
        };
        assert_eq!(run(1), run(4));
        assert_eq!(run(1).len(), 20);
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tree();
        let cancel = CancelToken::new();
        cancel.cancel();
        let scan = scan_directory(dir.path(), &ScanOptions::default(), None, &cancel);
        assert!(scan.cancelled);
        assert!(scan.resources.is_empty());
        assert_eq!(scan.files_scanned, 0);
    }

    struct CancelOn {
        marker: &'static str,
        token: CancelToken,
    }

    impl SourceParser for CancelOn {
        fn parse(&self, text: &str) -> Result<wetwire_plan::Module, wetwire_plan::ParseError> {
            if text.contains(self.marker) {
                self.token.cancel();
            }
            wetwire_plan::parse(text)
        }
    }

    #[test]
    fn test_cancelled_mid_scan() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write(dir.path(), &format!("m{:02}.py", i), &format!("job{:02} = Job()\n", i));
        }
        let token = CancelToken::new();
        let scanner = Scanner::with_parser(CancelOn {
            marker: "job03",
            token: token.clone(),
        });
        let options = ScanOptions {
            workers: 1,
            ..ScanOptions::default()
        };
        let scan = scanner.scan_directory(dir.path(), &options, None, &token);
        assert!(scan.cancelled);
        assert!(scan.files_scanned < 10);
        assert_eq!(scan.resources.len(), scan.files_scanned);
        assert!(names(&scan).contains(&"job03"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "alpha = Job()\n");
        write(dir.path(), "locked/inner.py", "inner = Job()\n");
        write(dir.path(), "z/last.py", "omega = Job()\n");
        let locked = dir.path().join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not bind a privileged user
        if std::fs::read_dir(&locked).is_err() {
            let scan = scan_directory(dir.path(), &ScanOptions::default(), None, &CancelToken::new());
            assert_eq!(names(&scan), vec!["alpha", "omega"]);
            assert!(scan.skipped >= 1);
            assert_eq!(scan.files_scanned, 2);
        }

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_cache_populated_by_directory_scan() {
        let dir = tree();
        let cache = DiscoveryCache::new(dir.path().join(".wetwire-cache"));
        let first = scan_directory(dir.path(), &ScanOptions::default(), Some(&cache), &CancelToken::new());
        let second = scan_directory(dir.path(), &ScanOptions::default(), Some(&cache), &CancelToken::new());
        assert_eq!(first, second);
        assert_eq!(cache.stats().writes, 2);
        assert_eq!(cache.stats().hits, 2);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_directory(&dir.path().join("nope"), &ScanOptions::default(), None, &CancelToken::new());
        assert!(scan.resources.is_empty());
        assert_eq!(scan.skipped, 1);
    }

    #[test]
    fn test_default_workers_bounded() {
        let n = default_workers();
        assert!((1..=MAX_DEFAULT_WORKERS).contains(&n));
    }
}
