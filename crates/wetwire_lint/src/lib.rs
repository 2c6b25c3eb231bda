//! WETWIRE Lint
//!
//! Style rules over declaration scripts. Every rule reads the same
//! [`SourceUnit`]; fixable rules rewrite the text through span edits that
//! are re-parsed before they are accepted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod edit;
pub mod linter;
pub mod rules;
pub mod splitting;
pub mod unit;

// Re-exports
pub use edit::{Edit, EditBuffer};
pub use linter::{FixResult, LintResult, Linter, fix_file, lint_directory, lint_file};
pub use rules::default_rules;
pub use splitting::{JobCategory, categorize_job, suggest_splits};
pub use unit::SourceUnit;
