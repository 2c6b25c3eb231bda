//! The rule protocol shared by style and object rules.
//!
//! A rule inspects one subject and reports [`Violation`]s. Style rules take
//! a source file and may also implement [`Fixable`]; object rules take a
//! resolved [`Workflow`](crate::Workflow) and only ever report.
//!
//! Rules are collected into an ordered [`RuleSet`]. Evaluating a set runs
//! every enabled rule against the same subject, so no rule observes the
//! output of another within one pass.

use crate::span::Location;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity tier used to gate pass/fail downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl Severity {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Rule category; determines the subject type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Source-text rules
    Style,
    /// Organizational policy over resolved configurations
    Policy,
    /// Security checks over resolved configurations
    Security,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Style => write!(f, "style"),
            Self::Policy => write!(f, "policy"),
            Self::Security => write!(f, "security"),
        }
    }
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Reporting rule
    pub rule_id: String,
    /// Severity tier
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
    /// Where it was found
    pub location: Location,
    /// Optional remediation hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Violation {
    /// Create a new violation
    #[must_use]
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            message: message.into(),
            location,
            suggestion: None,
        }
    }

    /// Attach a suggestion
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: [{}] {}: {}",
            self.location, self.rule_id, self.severity, self.message
        )
    }
}

/// Result of a fix attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    /// Rewritten source text (unchanged when nothing applied)
    pub source: String,
    /// Number of occurrences rewritten
    pub applied: usize,
    /// Violations of this rule still present in `source`
    pub remaining: Vec<Violation>,
}

impl FixOutcome {
    /// Outcome that applied nothing
    #[must_use]
    pub fn unchanged(source: &str, remaining: Vec<Violation>) -> Self {
        Self {
            source: source.to_string(),
            applied: 0,
            remaining,
        }
    }
}

/// A rule over one subject type
pub trait Rule: Send + Sync {
    /// Subject the rule inspects
    type Subject: ?Sized;

    /// Stable identifier (e.g. `WAG013`, `pin_actions`)
    fn id(&self) -> &'static str;

    /// One-line description
    fn description(&self) -> String;

    /// Category
    fn category(&self) -> Category;

    /// Severity assigned to reported violations
    fn severity(&self) -> Severity;

    /// Inspect the subject
    fn evaluate(&self, subject: &Self::Subject) -> Vec<Violation>;

    /// Fix capability, if the rule has one
    fn as_fixable(&self) -> Option<&dyn Fixable<Subject = Self::Subject>> {
        None
    }
}

/// A rule that can rewrite its subject's source text
pub trait Fixable: Rule {
    /// Rewrite every occurrence that has a pure syntactic substitution.
    /// Occurrences without one are left in place and reported in
    /// [`FixOutcome::remaining`].
    fn fix(&self, subject: &Self::Subject) -> FixOutcome;
}

/// Ordered rule registry
pub struct RuleSet<S: ?Sized + 'static> {
    rules: Vec<Box<dyn Rule<Subject = S>>>,
    disabled: IndexSet<String>,
}

impl<S: ?Sized + 'static> RuleSet<S> {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            disabled: IndexSet::new(),
        }
    }

    /// Append a rule
    #[must_use]
    pub fn with_rule(mut self, rule: impl Rule<Subject = S> + 'static) -> Self {
        self.push(Box::new(rule));
        self
    }

    /// Append a boxed rule
    pub fn push(&mut self, rule: Box<dyn Rule<Subject = S>>) {
        self.rules.push(rule);
    }

    /// Disable a rule by id
    pub fn disable(&mut self, id: impl Into<String>) {
        self.disabled.insert(id.into());
    }

    /// Check if a rule id is registered and enabled
    #[must_use]
    pub fn is_enabled(&self, id: &str) -> bool {
        !self.disabled.contains(id) && self.rules.iter().any(|r| r.id() == id)
    }

    /// Enabled rules in registration order
    pub fn iter(&self) -> impl Iterator<Item = &dyn Rule<Subject = S>> + '_ {
        self.rules
            .iter()
            .filter(|r| !self.disabled.contains(r.id()))
            .map(|r| r.as_ref())
    }

    /// Look up an enabled rule
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&dyn Rule<Subject = S>> {
        self.iter().find(|r| r.id() == id)
    }

    /// Enabled rule ids
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.iter().map(|r| r.id()).collect()
    }

    /// Number of enabled rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Check if no rules are enabled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate every enabled rule against `subject`, concatenating results
    #[must_use]
    pub fn evaluate(&self, subject: &S) -> Vec<Violation> {
        self.iter().flat_map(|rule| rule.evaluate(subject)).collect()
    }
}

impl<S: ?Sized + 'static> Default for RuleSet<S> {
    fn default() -> Self {
        Self::new()
    }
}
