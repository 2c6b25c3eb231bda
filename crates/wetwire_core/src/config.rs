//! Project configuration (`wetwire.toml`).
//!
//! Every field has a default, so an absent file or an absent table behaves
//! exactly like the built-in settings.

use crate::error::{CoreError, CoreResult};
use crate::rule::Severity;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name looked up in the project root
pub const CONFIG_FILE: &str = "wetwire.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Discovery settings
    pub discovery: DiscoveryConfig,
    /// Style rule thresholds
    pub lint: LintConfig,
    /// Object rule selection
    pub policy: PolicyConfig,
}

impl ProjectConfig {
    /// Parse configuration text
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the TOML is malformed
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a file; a missing file yields the defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> CoreResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "loaded project configuration");
                Self::from_toml_str(&text)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(CoreError::io(path, &err)),
        }
    }

    /// Load `wetwire.toml` from a project root
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn discover(root: &Path) -> CoreResult<Self> {
        Self::load(&root.join(CONFIG_FILE))
    }
}

/// Discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Import path fragment that marks a constructor import
    pub package: String,
    /// Directory names never descended into
    pub reserved_dirs: Vec<String>,
    /// Skip directories whose name starts with `.`
    pub exclude_hidden: bool,
    /// Worker threads for directory scans (0 = available parallelism)
    pub workers: usize,
    /// Cache directory, relative to the project root
    pub cache_dir: String,
    /// Whether to use the cache at all
    pub cache_enabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            package: "wetwire_github".to_string(),
            reserved_dirs: ["__pycache__", ".git", "node_modules", ".venv", "venv"]
                .into_iter()
                .map(String::from)
                .collect(),
            exclude_hidden: true,
            workers: 0,
            cache_dir: ".wetwire-cache".to_string(),
            cache_enabled: true,
        }
    }
}

/// Style rule thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    /// Most keys allowed in an inline step `env` literal
    pub max_inline_env: usize,
    /// Most entries allowed in an inline job `outputs` literal
    pub max_inline_outputs: usize,
    /// Most keys allowed in an inline matrix
    pub max_matrix_keys: usize,
    /// Most values allowed per inline matrix key
    pub max_matrix_values: usize,
    /// Most job bindings per file
    pub max_jobs: usize,
    /// Most operators allowed in one `if_` condition
    pub max_condition_operators: usize,
    /// Rule ids switched off
    pub disabled: Vec<String>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            max_inline_env: 3,
            max_inline_outputs: 2,
            max_matrix_keys: 2,
            max_matrix_values: 3,
            max_jobs: 10,
            max_condition_operators: 3,
            disabled: Vec::new(),
        }
    }
}

/// Per-rule toggle and parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// Explicit enable/disable; `None` keeps the rule's default
    pub enabled: Option<bool>,
    /// Rule parameters
    pub params: IndexMap<String, serde_json::Value>,
}

impl RuleSettings {
    /// Integer parameter
    #[must_use]
    pub fn param_usize(&self, key: &str) -> Option<usize> {
        self.params
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    }
}

/// Object rule selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Named preset applied before per-rule settings
    pub preset: Option<String>,
    /// Lowest severity that fails a report
    pub fail_on: Severity,
    /// Settings keyed by rule id
    pub rules: IndexMap<String, RuleSettings>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            preset: None,
            fail_on: Severity::High,
            rules: IndexMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ProjectConfig::default();
        assert_eq!(cfg.discovery.package, "wetwire_github");
        assert!(cfg.discovery.reserved_dirs.iter().any(|d| d == "__pycache__"));
        assert_eq!(cfg.lint.max_inline_env, 3);
        assert_eq!(cfg.lint.max_jobs, 10);
        assert_eq!(cfg.lint.max_condition_operators, 3);
        assert_eq!(cfg.policy.fail_on, Severity::High);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg = ProjectConfig::from_toml_str(
            r#"
            [lint]
            max_inline_env = 5
            disabled = ["WAG008"]

            [policy]
            fail_on = "medium"
            preset = "strict"

            [policy.rules.limit_job_count]
            enabled = true
            params = { max_jobs = 5 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.lint.max_inline_env, 5);
        assert_eq!(cfg.lint.max_inline_outputs, 2);
        assert_eq!(cfg.lint.disabled, vec!["WAG008"]);
        assert_eq!(cfg.policy.fail_on, Severity::Medium);
        assert_eq!(cfg.policy.preset.as_deref(), Some("strict"));
        let limit = &cfg.policy.rules["limit_job_count"];
        assert_eq!(limit.enabled, Some(true));
        assert_eq!(limit.param_usize("max_jobs"), Some(5));
        assert_eq!(cfg.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn test_malformed_is_config_error() {
        let err = ProjectConfig::from_toml_str("[lint\nmax_jobs = ").unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ProjectConfig::discover(dir.path()).unwrap(), ProjectConfig::default());

        std::fs::write(dir.path().join(CONFIG_FILE), "[discovery]\nworkers = 2\n").unwrap();
        assert_eq!(ProjectConfig::discover(dir.path()).unwrap().discovery.workers, 2);
    }
}
