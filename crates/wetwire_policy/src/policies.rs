//! Organizational policy rules.

use crate::paths;
use once_cell::sync::Lazy;
use regex::Regex;
use wetwire_core::{Category, Job, Rule, Severity, Violation, Workflow};

/// Compile a built-in pattern, logging instead of panicking
pub(crate) fn pattern(source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::error!(%source, %err, "invalid policy pattern");
            None
        }
    }
}

static SHA_REF: Lazy<Option<Regex>> = Lazy::new(|| pattern(r"@[0-9a-f]{40}$"));
static VERSION_REF: Lazy<Option<Regex>> = Lazy::new(|| pattern(r"@v\d+(\.\d+)*$"));

fn is_match(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Jobs that run steps, as opposed to calling a reusable workflow
fn step_jobs(workflow: &Workflow) -> impl Iterator<Item = (&String, &Job)> {
    workflow.jobs.iter().filter(|(_, job)| job.uses.is_none())
}

/// Every step-running job checks out the repository
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireCheckout;

impl Rule for RequireCheckout {
    type Subject = Workflow;

    fn id(&self) -> &'static str {
        "require_checkout"
    }

    fn description(&self) -> String {
        "All jobs must use actions/checkout action".to_string()
    }

    fn category(&self) -> Category {
        Category::Policy
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, workflow: &Workflow) -> Vec<Violation> {
        step_jobs(workflow)
            .filter(|(_, job)| {
                !job.steps
                    .iter()
                    .any(|s| s.uses.as_deref().is_some_and(|u| u.contains("checkout")))
            })
            .map(|(id, _)| {
                Violation::new(
                    self.id(),
                    self.severity(),
                    format!("Job '{}' does not use actions/checkout", id),
                    paths::job(workflow, id),
                )
            })
            .collect()
    }
}

/// Every step-running job sets `timeout-minutes`
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireTimeouts;

impl Rule for RequireTimeouts {
    type Subject = Workflow;

    fn id(&self) -> &'static str {
        "require_timeouts"
    }

    fn description(&self) -> String {
        "All jobs should have timeout-minutes set".to_string()
    }

    fn category(&self) -> Category {
        Category::Policy
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, workflow: &Workflow) -> Vec<Violation> {
        step_jobs(workflow)
            .filter(|(_, job)| job.timeout_minutes.is_none())
            .map(|(id, _)| {
                Violation::new(
                    self.id(),
                    self.severity(),
                    format!("Job '{}' has no timeout-minutes", id),
                    paths::job(workflow, id),
                )
                .with_suggestion("Set timeout-minutes so a hung job cannot run until the platform limit")
            })
            .collect()
    }
}

/// Actions referenced by a full commit SHA or a `vN[.N]*` tag
#[derive(Debug, Clone, Copy, Default)]
pub struct PinActions;

impl PinActions {
    /// Check if a `uses` reference satisfies the policy
    #[must_use]
    pub fn is_pinned(uses: &str) -> bool {
        uses.starts_with("./") || is_match(&SHA_REF, uses) || is_match(&VERSION_REF, uses)
    }
}

impl Rule for PinActions {
    type Subject = Workflow;

    fn id(&self) -> &'static str {
        "pin_actions"
    }

    fn description(&self) -> String {
        "Actions should be pinned to SHA or version".to_string()
    }

    fn category(&self) -> Category {
        Category::Policy
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, workflow: &Workflow) -> Vec<Violation> {
        workflow
            .steps()
            .filter_map(|(job_id, index, step)| {
                let uses = step.uses.as_deref()?;
                if Self::is_pinned(uses) {
                    return None;
                }
                Some(Violation::new(
                    self.id(),
                    self.severity(),
                    format!("Action '{}' is not pinned to a commit SHA or version tag", uses),
                    paths::step(workflow, job_id, index),
                ))
            })
            .collect()
    }
}

/// Caps the number of jobs in one workflow
#[derive(Debug, Clone, Copy)]
pub struct LimitJobCount {
    max_jobs: usize,
}

impl LimitJobCount {
    /// Default cap
    pub const DEFAULT_MAX_JOBS: usize = 10;

    /// Rule allowing at most `max_jobs` jobs
    #[must_use]
    pub fn new(max_jobs: usize) -> Self {
        Self { max_jobs }
    }

    /// Configured cap
    #[must_use]
    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }
}

impl Default for LimitJobCount {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_JOBS)
    }
}

impl Rule for LimitJobCount {
    type Subject = Workflow;

    fn id(&self) -> &'static str {
        "limit_job_count"
    }

    fn description(&self) -> String {
        format!("Workflow should not exceed {} jobs", self.max_jobs)
    }

    fn category(&self) -> Category {
        Category::Policy
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, workflow: &Workflow) -> Vec<Violation> {
        let count = workflow.jobs.len();
        if count <= self.max_jobs {
            return Vec::new();
        }
        vec![Violation::new(
            self.id(),
            self.severity(),
            format!("Workflow has {} jobs, exceeds limit of {}", count, self.max_jobs),
            paths::workflow(workflow),
        )]
    }
}

/// Jobs should run in a deployment environment so reviewers can gate them.
/// Detection only: reviewer configuration lives outside the workflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireApproval;

impl Rule for RequireApproval {
    type Subject = Workflow;

    fn id(&self) -> &'static str {
        "require_approval"
    }

    fn description(&self) -> String {
        "Jobs should use environment with reviewers (detection only)".to_string()
    }

    fn category(&self) -> Category {
        Category::Policy
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, workflow: &Workflow) -> Vec<Violation> {
        workflow
            .jobs
            .iter()
            .filter(|(_, job)| job.environment.as_ref().is_none_or(serde_json::Value::is_null))
            .map(|(id, _)| {
                Violation::new(
                    self.id(),
                    self.severity(),
                    format!("Job '{}' does not use a deployment environment", id),
                    paths::job(workflow, id),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use wetwire_core::{Location, Step};

    fn workflow() -> Workflow {
        Workflow::new("CI")
            .with_job(
                "build",
                Job::new("ubuntu-latest")
                    .with_step(Step::uses("actions/checkout@v4"))
                    .with_step(Step::run("make"))
                    .with_timeout(10),
            )
            .with_job(
                "lint",
                Job::new("ubuntu-latest")
                    .with_step(Step::uses("actions/setup-python@main"))
                    .with_step(Step::uses("./.github/actions/lint")),
            )
    }

    #[test]
    fn test_require_checkout() {
        let found = RequireCheckout.evaluate(&workflow());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "Job 'lint' does not use actions/checkout");
        assert_eq!(found[0].location, Location::object("CI/lint"));
    }

    #[test]
    fn test_reusable_calls_are_exempt() {
        let call = Job {
            uses: Some("org/repo/.github/workflows/deploy.yml@v1".to_string()),
            ..Job::default()
        };
        let wf = Workflow::new("CI").with_job("deploy", call);
        assert!(RequireCheckout.evaluate(&wf).is_empty());
        assert!(RequireTimeouts.evaluate(&wf).is_empty());
    }

    #[test]
    fn test_require_timeouts() {
        let found = RequireTimeouts.evaluate(&workflow());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "Job 'lint' has no timeout-minutes");
    }

    #[test]
    fn test_pin_actions() {
        assert!(PinActions::is_pinned("actions/checkout@v4"));
        assert!(PinActions::is_pinned("actions/checkout@v4.1.2"));
        assert!(PinActions::is_pinned("actions/checkout@8f4b7f84864484a7bf31766abe9204da3cbe65b3"));
        assert!(!PinActions::is_pinned("actions/checkout"));
        assert!(!PinActions::is_pinned("actions/checkout@main"));
        assert!(!PinActions::is_pinned("actions/checkout@4"));

        let found = PinActions.evaluate(&workflow());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].location, Location::object("CI/lint/step 1"));
        assert_eq!(found[0].severity, Severity::High);
    }

    #[test]
    fn test_require_approval() {
        let wf = workflow().with_job("deploy", Job::new("ubuntu-latest").with_environment("production"));
        let found = RequireApproval.evaluate(&wf);
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].message, "Job 'lint' does not use a deployment environment");
    }

    proptest! {
        #[test]
        fn test_limit_job_count(jobs in 0usize..20, limit in 0usize..20) {
            let wf = (0..jobs).fold(Workflow::new("CI"), |wf, i| wf.with_job(format!("j{}", i), Job::default()));
            let found = LimitJobCount::new(limit).evaluate(&wf);
            prop_assert_eq!(found.len(), usize::from(jobs > limit));
        }
    }
}
