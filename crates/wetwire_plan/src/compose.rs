//! Fluent builder that assembles a [`Workflow`] from typed parts.
//!
//! Dependencies are validated when [`ComposedWorkflow::build`] is called,
//! so an invalid composition never produces output.

use crate::dag::DependencyMap;
use crate::validate::{CompositionError, CompositionValidator};
use indexmap::IndexMap;
use wetwire_core::{Job, Permissions, Workflow};

/// Event types accepted as workflow triggers
pub const TRIGGER_EVENTS: [&str; 42] = [
    "push",
    "pull_request",
    "pull_request_target",
    "schedule",
    "workflow_dispatch",
    "workflow_call",
    "workflow_run",
    "repository_dispatch",
    "release",
    "issues",
    "issue_comment",
    "label",
    "milestone",
    "project",
    "project_card",
    "project_column",
    "discussion",
    "discussion_comment",
    "create",
    "delete",
    "deployment",
    "deployment_status",
    "fork",
    "gollum",
    "page_build",
    "public",
    "pull_request_review",
    "pull_request_review_comment",
    "pull_request_comment",
    "registry_package",
    "check_run",
    "check_suite",
    "status",
    "watch",
    "member",
    "membership",
    "org_block",
    "organization",
    "team",
    "team_add",
    "merge_group",
    "branch_protection_rule",
];

/// Workflow under construction
#[derive(Debug, Clone, Default)]
pub struct ComposedWorkflow {
    name: String,
    triggers: IndexMap<String, serde_json::Value>,
    jobs: IndexMap<String, Job>,
    needs: IndexMap<String, Vec<String>>,
    env: IndexMap<String, String>,
    permissions: Option<Permissions>,
}

impl ComposedWorkflow {
    /// Start an empty composition
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workflow name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a trigger
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::UnknownTrigger`] if `event` is not a known
    /// event type
    pub fn add_trigger(
        mut self,
        event: impl Into<String>,
        config: serde_json::Value,
    ) -> Result<Self, CompositionError> {
        let event = event.into();
        if !TRIGGER_EVENTS.contains(&event.as_str()) {
            let mut valid: Vec<String> = TRIGGER_EVENTS.iter().map(|e| (*e).to_string()).collect();
            valid.sort();
            return Err(CompositionError::UnknownTrigger { event, valid });
        }
        self.triggers.insert(event, config);
        Ok(self)
    }

    /// Add a job; `needs` extends whatever the job already declares
    ///
    /// Adding an id twice replaces the earlier job.
    #[must_use]
    pub fn add_job<I, S>(mut self, id: impl Into<String>, job: Job, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        if self.jobs.contains_key(&id) {
            tracing::debug!(job = %id, "replacing job in composition");
        }
        let mut all = job.needs.clone();
        for need in needs {
            let need = need.into();
            if !all.contains(&need) {
                all.push(need);
            }
        }
        self.needs.insert(id.clone(), all);
        self.jobs.insert(id, job);
        self
    }

    /// Merge environment variables; later values win
    #[must_use]
    pub fn add_env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set workflow permissions
    #[must_use]
    pub fn add_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Set workflow permissions from `read-all` / `write-all`
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::InvalidPermissions`] for any other value
    pub fn add_permissions_preset(self, preset: &str) -> Result<Self, CompositionError> {
        match Permissions::preset(preset) {
            Some(permissions) => Ok(self.add_permissions(permissions)),
            None => Err(CompositionError::InvalidPermissions {
                value: preset.to_string(),
            }),
        }
    }

    /// Job id → needs, as they will be emitted
    #[must_use]
    pub fn dependencies(&self) -> DependencyMap {
        self.needs.clone()
    }

    /// Validate dependencies and produce the workflow
    ///
    /// # Errors
    ///
    /// Returns the first dangling, self, or circular dependency
    pub fn build(self) -> Result<Workflow, CompositionError> {
        CompositionValidator::new().validate(&self.needs)?;

        let mut jobs = self.jobs;
        for (id, needs) in self.needs {
            if let Some(job) = jobs.get_mut(&id) {
                job.needs = needs;
            }
        }
        tracing::debug!(workflow = %self.name, jobs = jobs.len(), "composed workflow");
        Ok(Workflow {
            name: self.name,
            on: self.triggers,
            env: self.env,
            permissions: self.permissions,
            jobs,
        })
    }
}
