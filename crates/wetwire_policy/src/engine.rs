//! Rule selection and evaluation.
//!
//! An engine is built from a [`PolicyConfig`]: defaults first, then the
//! named preset, then per-rule settings. Evaluating a workflow runs every
//! selected rule against it and collects the results into a
//! [`PolicyReport`].

use crate::policies::{LimitJobCount, PinActions, RequireApproval, RequireCheckout, RequireTimeouts};
use crate::security::{
    ExcessivePermissions, HardcodedSecrets, MissingPermissions, ScriptInjection, UnpinnedActions,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wetwire_core::{CoreError, PolicyConfig, Rule, RuleSet, RuleSettings, Severity, Violation, Workflow};

/// Known preset names
pub const PRESETS: [&str; 3] = ["minimal", "standard", "strict"];

/// Every rule id in evaluation order
#[must_use]
pub fn all_rule_ids() -> [&'static str; 10] {
    [
        "require_checkout",
        "require_timeouts",
        "pin_actions",
        "limit_job_count",
        "require_approval",
        "hardcoded_secrets",
        "script_injection",
        "unpinned_actions",
        "excessive_permissions",
        "missing_permissions",
    ]
}

/// Policy configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Preset name not in [`PRESETS`]
    UnknownPreset { name: String },
    /// Settings given for a rule that does not exist
    UnknownRule { id: String },
    /// Parameter with the wrong type
    InvalidParam {
        rule: String,
        param: String,
        reason: String,
    },
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownPreset { name } => {
                write!(f, "Unknown policy preset '{}' (expected one of: {})", name, PRESETS.join(", "))
            }
            Self::UnknownRule { id } => write!(f, "Unknown policy rule '{}'", id),
            Self::InvalidParam { rule, param, reason } => {
                write!(f, "Invalid parameter '{}' for {}: {}", param, rule, reason)
            }
        }
    }
}

impl std::error::Error for PolicyError {}

impl From<PolicyError> for CoreError {
    fn from(err: PolicyError) -> Self {
        CoreError::Config {
            reason: err.to_string(),
        }
    }
}

fn settings(enabled: bool) -> RuleSettings {
    RuleSettings {
        enabled: Some(enabled),
        params: IndexMap::new(),
    }
}

/// Preset selection for the policy rules. Security checks are on in every
/// preset except that `minimal` keeps only the secret scan.
fn preset(name: &str) -> Option<IndexMap<&'static str, RuleSettings>> {
    let (checkout, timeouts, pin, limit, approval, extra_security) = match name {
        "minimal" => (true, false, false, false, false, false),
        "standard" => (true, true, true, true, false, true),
        "strict" => (true, true, true, true, true, true),
        _ => return None,
    };
    let mut out = IndexMap::new();
    out.insert("require_checkout", settings(checkout));
    out.insert("require_timeouts", settings(timeouts));
    out.insert("pin_actions", settings(pin));
    out.insert("limit_job_count", settings(limit));
    out.insert("require_approval", settings(approval));
    out.insert("hardcoded_secrets", settings(true));
    for id in ["script_injection", "unpinned_actions", "excessive_permissions", "missing_permissions"] {
        out.insert(id, settings(extra_security));
    }
    if name == "strict" {
        if let Some(limit) = out.get_mut("limit_job_count") {
            limit.params.insert("max_jobs".to_string(), serde_json::Value::from(5));
        }
    }
    Some(out)
}

fn build_rule(id: &str, settings: &RuleSettings) -> Result<Box<dyn Rule<Subject = Workflow>>, PolicyError> {
    let rule: Box<dyn Rule<Subject = Workflow>> = match id {
        "require_checkout" => Box::new(RequireCheckout),
        "require_timeouts" => Box::new(RequireTimeouts),
        "pin_actions" => Box::new(PinActions),
        "limit_job_count" => {
            let max_jobs = match settings.params.get("max_jobs") {
                None => LimitJobCount::DEFAULT_MAX_JOBS,
                Some(_) => settings.param_usize("max_jobs").ok_or_else(|| PolicyError::InvalidParam {
                    rule: id.to_string(),
                    param: "max_jobs".to_string(),
                    reason: "expected a non-negative integer".to_string(),
                })?,
            };
            Box::new(LimitJobCount::new(max_jobs))
        }
        "require_approval" => Box::new(RequireApproval),
        "hardcoded_secrets" => Box::new(HardcodedSecrets),
        "script_injection" => Box::new(ScriptInjection),
        "unpinned_actions" => Box::new(UnpinnedActions),
        "excessive_permissions" => Box::new(ExcessivePermissions),
        "missing_permissions" => Box::new(MissingPermissions),
        other => return Err(PolicyError::UnknownRule { id: other.to_string() }),
    };
    Ok(rule)
}

/// Evaluates object rules against resolved workflows
pub struct PolicyEngine {
    rules: RuleSet<Workflow>,
}

impl PolicyEngine {
    /// Engine with the `standard` selection
    #[must_use]
    pub fn new() -> Self {
        let mut rules = RuleSet::new();
        for id in all_rule_ids() {
            if let Ok(rule) = build_rule(id, &RuleSettings::default()) {
                rules.push(rule);
            }
        }
        rules.disable("require_approval");
        Self { rules }
    }

    /// Engine over an explicit rule set
    #[must_use]
    pub fn from_rules(rules: RuleSet<Workflow>) -> Self {
        Self { rules }
    }

    /// Build the selection described by `config`
    ///
    /// # Errors
    ///
    /// Returns error on an unknown preset or rule id, or a malformed parameter
    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        let preset_name = config.preset.as_deref().unwrap_or("standard");
        let mut selection = preset(preset_name).ok_or_else(|| PolicyError::UnknownPreset {
            name: preset_name.to_string(),
        })?;

        for (id, overrides) in &config.rules {
            let Some(current) = selection.get_mut(id.as_str()) else {
                return Err(PolicyError::UnknownRule { id: id.clone() });
            };
            if let Some(enabled) = overrides.enabled {
                current.enabled = Some(enabled);
            }
            for (key, value) in &overrides.params {
                current.params.insert(key.clone(), value.clone());
            }
        }

        let mut rules = RuleSet::new();
        for (id, settings) in &selection {
            rules.push(build_rule(id, settings)?);
            if settings.enabled == Some(false) {
                rules.disable(*id);
            }
        }
        tracing::debug!(preset = preset_name, rules = ?rules.ids(), "policy rules selected");
        Ok(Self { rules })
    }

    /// The rule set
    #[must_use]
    pub fn rules(&self) -> &RuleSet<Workflow> {
        &self.rules
    }

    /// Run every selected rule against `workflow`
    #[must_use]
    pub fn evaluate(&self, workflow: &Workflow) -> PolicyReport {
        PolicyReport::new(workflow.name.clone(), self.rules.evaluate(workflow))
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of evaluating one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyReport {
    /// Workflow name
    pub workflow: String,
    /// Violations in rule order
    pub violations: Vec<Violation>,
    /// Violation count per severity
    pub counts: BTreeMap<Severity, usize>,
}

impl PolicyReport {
    /// Build a report, tallying severities
    #[must_use]
    pub fn new(workflow: impl Into<String>, violations: Vec<Violation>) -> Self {
        let mut counts = BTreeMap::new();
        for violation in &violations {
            *counts.entry(violation.severity).or_insert(0) += 1;
        }
        Self {
            workflow: workflow.into(),
            violations,
            counts,
        }
    }

    /// Violations at exactly `severity`
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.counts.get(&severity).copied().unwrap_or(0)
    }

    /// Highest severity reported
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.counts.keys().next_back().copied()
    }

    /// Check if no violation is at or above `fail_on`
    #[must_use]
    pub fn passed(&self, fail_on: Severity) -> bool {
        self.max_severity().is_none_or(|max| max < fail_on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wetwire_core::{Job, Permissions, Step};

    fn workflow() -> Workflow {
        Workflow::new("CI").with_job(
            "build",
            Job::new("ubuntu-latest")
                .with_step(Step::uses("actions/checkout@main"))
                .with_step(Step::run("make")),
        )
    }

    #[test]
    fn test_default_selection() {
        let engine = PolicyEngine::new();
        assert_eq!(engine.rules().len(), 9);
        assert!(!engine.rules().is_enabled("require_approval"));
        assert_eq!(
            PolicyEngine::from_config(&PolicyConfig::default()).unwrap().rules().ids(),
            engine.rules().ids()
        );
    }

    #[test]
    fn test_report_counts_and_gate() {
        let report = PolicyEngine::new().evaluate(&workflow());
        let ids: Vec<&str> = report.violations.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["require_timeouts", "pin_actions", "unpinned_actions", "missing_permissions"]
        );
        assert_eq!(report.count(Severity::High), 1);
        assert_eq!(report.count(Severity::Medium), 2);
        assert_eq!(report.max_severity(), Some(Severity::High));
        assert!(!report.passed(Severity::High));
        assert!(report.passed(Severity::Critical));
    }

    #[test]
    fn test_presets_and_overrides() {
        let minimal = PolicyConfig {
            preset: Some("minimal".to_string()),
            ..PolicyConfig::default()
        };
        let engine = PolicyEngine::from_config(&minimal).unwrap();
        assert_eq!(engine.rules().ids(), vec!["require_checkout", "hardcoded_secrets"]);

        let wf = (0..6).fold(Workflow::new("big").with_permissions(Permissions::ReadAll), |wf, i| {
            wf.with_job(
                format!("j{}", i),
                Job::new("ubuntu-latest")
                    .with_step(Step::uses("actions/checkout@v4"))
                    .with_timeout(5)
                    .with_environment("ci"),
            )
        });
        let strict = PolicyConfig {
            preset: Some("strict".to_string()),
            ..PolicyConfig::default()
        };
        let report = PolicyEngine::from_config(&strict).unwrap().evaluate(&wf);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].message, "Workflow has 6 jobs, exceeds limit of 5");

        let mut relaxed = strict.clone();
        relaxed.rules.insert(
            "limit_job_count".to_string(),
            RuleSettings {
                enabled: None,
                params: [("max_jobs".to_string(), serde_json::Value::from(8))].into_iter().collect(),
            },
        );
        assert!(PolicyEngine::from_config(&relaxed).unwrap().evaluate(&wf).violations.is_empty());
    }

    #[test]
    fn test_config_errors() {
        let bad_preset = PolicyConfig {
            preset: Some("paranoid".to_string()),
            ..PolicyConfig::default()
        };
        assert!(matches!(
            PolicyEngine::from_config(&bad_preset),
            Err(PolicyError::UnknownPreset { .. })
        ));

        let mut unknown = PolicyConfig::default();
        unknown.rules.insert("no_tabs".to_string(), RuleSettings::default());
        assert!(matches!(
            PolicyEngine::from_config(&unknown),
            Err(PolicyError::UnknownRule { id }) if id == "no_tabs"
        ));

        let mut bad_param = PolicyConfig::default();
        bad_param.rules.insert(
            "limit_job_count".to_string(),
            RuleSettings {
                enabled: Some(true),
                params: [("max_jobs".to_string(), serde_json::Value::from("lots"))].into_iter().collect(),
            },
        );
        let err = PolicyEngine::from_config(&bad_param).err().unwrap();
        assert_eq!(
            CoreError::from(err).to_string(),
            "Invalid configuration: Invalid parameter 'max_jobs' for limit_job_count: expected a non-negative integer"
        );
    }
}
