//! Composition validator for job dependency sets.

use crate::dag::{DependencyMap, detect_cycles};
use indexmap::IndexSet;
use wetwire_core::CoreError;

/// Composition error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionError {
    /// A dependency names a node outside the set
    MissingDependency {
        /// Dependent node
        node: String,
        /// Name that does not exist
        dependency: String,
    },
    /// A node lists itself as a dependency
    SelfDependency {
        /// Offending node
        node: String,
    },
    /// Dependencies form a cycle
    Circular {
        /// Closed walk through the cycle
        cycle: Vec<String>,
    },
    /// Trigger event is not a known event type
    UnknownTrigger {
        /// Rejected event name
        event: String,
        /// Accepted event names, sorted
        valid: Vec<String>,
    },
    /// Permission preset is not recognized
    InvalidPermissions {
        /// Rejected value
        value: String,
    },
}

impl std::fmt::Display for CompositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingDependency { node, dependency } => write!(
                f,
                "node '{}' depends on non-existent node '{}'",
                node, dependency
            ),
            Self::SelfDependency { node } => write!(f, "node '{}' cannot depend on itself", node),
            Self::Circular { cycle } => {
                write!(f, "Circular dependency detected: {}", cycle.join(" -> "))
            }
            Self::UnknownTrigger { event, valid } => write!(
                f,
                "Unknown trigger type: {}. Valid types: {}",
                event,
                valid.join(", ")
            ),
            Self::InvalidPermissions { value } => write!(
                f,
                "Invalid permission string: {}. Use 'read-all' or 'write-all'",
                value
            ),
        }
    }
}

impl std::error::Error for CompositionError {}

impl From<CompositionError> for CoreError {
    fn from(err: CompositionError) -> Self {
        let field = match &err {
            CompositionError::UnknownTrigger { .. } => "on",
            CompositionError::InvalidPermissions { .. } => "permissions",
            _ => "needs",
        };
        CoreError::Validation {
            field: field.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Validator for dependency sets assembled by composition
///
/// Checks run in a fixed order so the clearest diagnostic wins: dangling
/// references, then self-references, then general cycles.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositionValidator;

impl CompositionValidator {
    /// Create a new validator
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate a dependency set, stopping at the first problem
    ///
    /// # Errors
    ///
    /// Returns the first [`CompositionError`] found
    pub fn validate(&self, deps: &DependencyMap) -> Result<(), CompositionError> {
        match self.check_all(deps).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Every problem in the dependency set, in check order
    #[must_use]
    pub fn check_all(&self, deps: &DependencyMap) -> Vec<CompositionError> {
        let mut errors = Vec::new();

        for (node, needs) in deps {
            let unique: IndexSet<&String> = needs.iter().collect();
            for dependency in unique {
                if !deps.contains_key(dependency) {
                    errors.push(CompositionError::MissingDependency {
                        node: node.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        for (node, needs) in deps {
            if needs.contains(node) {
                errors.push(CompositionError::SelfDependency { node: node.clone() });
            }
        }

        let cycles = detect_cycles(deps);
        errors.extend(
            cycles
                .into_iter()
                .filter(|cycle| cycle.len() > 2)
                .map(|cycle| CompositionError::Circular { cycle }),
        );

        if !errors.is_empty() {
            tracing::debug!(problems = errors.len(), "composition rejected");
        }
        errors
    }
}
