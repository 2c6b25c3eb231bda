//! WETWIRE Storage
//!
//! On-disk cache for per-file discovery results, addressed by file
//! fingerprint so that stale entries are never served.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;

// Re-exports
pub use cache::{CacheEntry, CacheError, CacheStats, DiscoveryCache};
