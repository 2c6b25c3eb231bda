//! WETWIRE Policy
//!
//! Object rules over resolved workflows. Policy rules encode organizational
//! conventions; security checks look for risky configurations. Neither kind
//! ever rewrites its subject.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
mod paths;
pub mod policies;
pub mod security;

// Re-exports
pub use engine::{PRESETS, PolicyEngine, PolicyError, PolicyReport, all_rule_ids};
pub use policies::{LimitJobCount, PinActions, RequireApproval, RequireCheckout, RequireTimeouts};
pub use security::{
    ExcessivePermissions, HardcodedSecrets, MissingPermissions, ScriptInjection, UnpinnedActions,
};
