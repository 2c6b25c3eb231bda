//! Declared resources found by static scanning.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognized resource constructors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A workflow (`Workflow(...)`)
    Workflow,
    /// A job (`Job(...)`)
    Job,
}

impl ResourceKind {
    /// Every kind, in declaration order
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Workflow, ResourceKind::Job];

    /// Constructor name as written in source
    #[must_use]
    pub const fn constructor(self) -> &'static str {
        match self {
            Self::Workflow => "Workflow",
            Self::Job => "Job",
        }
    }

    /// Resolve a constructor name
    #[must_use]
    pub fn from_constructor(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.constructor() == name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.constructor())
    }
}

/// A resource statically recognized in a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredResource {
    /// Bound variable name
    pub name: String,
    /// Constructor kind
    pub kind: ResourceKind,
    /// File the binding lives in
    pub file_path: String,
    /// 1-based line of the binding statement
    pub line: usize,
    /// Module identifier (file stem)
    pub module_id: String,
    /// Names referenced by the constructor arguments, in first-seen order
    #[serde(default)]
    pub dependencies: IndexSet<String>,
}

impl DeclaredResource {
    /// Create a resource with no dependencies
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        file_path: impl Into<String>,
        line: usize,
        module_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            file_path: file_path.into(),
            line,
            module_id: module_id.into(),
            dependencies: IndexSet::new(),
        }
    }

    /// Add a dependency name
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    /// Check if this resource references `name`
    #[must_use]
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_constructor() {
        assert_eq!(ResourceKind::from_constructor("Job"), Some(ResourceKind::Job));
        assert_eq!(ResourceKind::from_constructor("Workflow"), Some(ResourceKind::Workflow));
        assert_eq!(ResourceKind::from_constructor("Step"), None);
        assert_eq!(ResourceKind::Job.to_string(), "Job");
    }

    #[test]
    fn test_dependencies_keep_first_seen_order() {
        let res = DeclaredResource::new("ci", ResourceKind::Workflow, "ci.py", 4, "ci")
            .with_dependency("test")
            .with_dependency("build")
            .with_dependency("test");
        let deps: Vec<_> = res.dependencies.iter().cloned().collect();
        assert_eq!(deps, vec!["test", "build"]);
        assert!(res.depends_on("build"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let res = DeclaredResource::new("build", ResourceKind::Job, "jobs.py", 2, "jobs")
            .with_dependency("setup");
        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains("\"kind\":\"job\""));
        let back: DeclaredResource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, res);
    }
}
