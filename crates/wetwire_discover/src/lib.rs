//! WETWIRE Discovery
//!
//! Finds workflow and job declarations in source files without executing
//! them. Parse failures and unreadable files yield no resources rather than
//! errors, since files under edit are routinely incomplete.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod reusable;
pub mod scan;
pub mod walk;

// Re-exports
pub use reusable::{ReusableWorkflow, discover_reusable_workflows};
pub use scan::{DEFAULT_PACKAGE, Scanner, build_dependency_map, scan, scan_file};
pub use walk::{DirectoryScan, ScanOptions, default_workers, scan_directory};
