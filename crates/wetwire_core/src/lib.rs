//! Wetwire Core Types
//!
//! Shared vocabulary for the static-analysis crates: errors, file
//! fingerprints, source locations, declared resources, the rule protocol,
//! the resolved workflow model, and project configuration.
//! Nothing in this crate parses source text or walks directories.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod hash;
pub mod resource;
pub mod rule;
pub mod span;
pub mod workflow;

// Re-exports
pub use cancel::CancelToken;
pub use config::{DiscoveryConfig, LintConfig, PolicyConfig, ProjectConfig, RuleSettings};
pub use credentials::{CredentialMatch, find_credential};
pub use error::{CoreError, CoreResult};
pub use hash::{Fingerprint, HashError};
pub use resource::{DeclaredResource, ResourceKind};
pub use rule::{Category, FixOutcome, Fixable, Rule, RuleSet, Severity, Violation};
pub use span::{LineIndex, Location, Span};
pub use workflow::{Job, Permissions, Step, Workflow};
