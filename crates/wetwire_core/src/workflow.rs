//! Resolved configuration model.
//!
//! These types describe a workflow after an external loader has executed
//! the declaring script. The analysis crates only read them; the
//! composition builder in `wetwire_plan` assembles them from typed parts.
//! Field names follow the emitted document (`runs-on`, `timeout-minutes`, `if`).

use crate::error::{CoreError, CoreResult};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// A resolved workflow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Workflow {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Trigger event → configuration
    #[serde(default)]
    pub on: IndexMap<String, serde_json::Value>,
    /// Workflow-level environment
    #[serde(default, deserialize_with = "scalar_map", skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Workflow-level permissions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// Jobs keyed by id, in declaration order
    #[serde(default)]
    pub jobs: IndexMap<String, Job>,
}

impl Workflow {
    /// Create an empty workflow
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a job
    #[must_use]
    pub fn with_job(mut self, id: impl Into<String>, job: Job) -> Self {
        self.jobs.insert(id.into(), job);
        self
    }

    /// Set workflow permissions
    #[must_use]
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Parse a resolved workflow document
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not match the model
    pub fn from_json(text: &str) -> CoreResult<Self> {
        serde_json::from_str(text).map_err(|err| CoreError::ParseError {
            message: err.to_string(),
        })
    }

    /// Every step with its job id and 1-based index
    pub fn steps(&self) -> impl Iterator<Item = (&str, usize, &Step)> + '_ {
        self.jobs.iter().flat_map(|(job_id, job)| {
            job.steps
                .iter()
                .enumerate()
                .map(move |(idx, step)| (job_id.as_str(), idx + 1, step))
        })
    }
}

/// A resolved job
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Job {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Runner label(s)
    #[serde(default, rename = "runs-on", skip_serializing_if = "Option::is_none")]
    pub runs_on: Option<serde_json::Value>,
    /// Job ids this job waits for
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    /// Steps in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    /// Timeout in minutes
    #[serde(default, rename = "timeout-minutes", skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
    /// Deployment environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<serde_json::Value>,
    /// Job-level permissions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// Job-level environment
    #[serde(default, deserialize_with = "scalar_map", skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Declared outputs
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, String>,
    /// Matrix strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<serde_json::Value>,
    /// Reusable workflow reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    /// Condition expression
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Job {
    /// Create a job on a runner label
    #[must_use]
    pub fn new(runs_on: impl Into<String>) -> Self {
        Self {
            runs_on: Some(serde_json::Value::String(runs_on.into())),
            ..Self::default()
        }
    }

    /// Append a step
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Set needs
    #[must_use]
    pub fn with_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = needs.into_iter().map(Into::into).collect();
        self
    }

    /// Set timeout
    #[must_use]
    pub fn with_timeout(mut self, minutes: u32) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }

    /// Set environment name
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(serde_json::Value::String(environment.into()));
        self
    }

    /// Set permissions
    #[must_use]
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// A resolved step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Step {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Step id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Action reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    /// Shell command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Action inputs
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub with: IndexMap<String, serde_json::Value>,
    /// Step environment
    #[serde(default, deserialize_with = "scalar_map", skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Condition expression
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Step {
    /// Step that runs an action
    #[must_use]
    pub fn uses(action: impl Into<String>) -> Self {
        Self {
            uses: Some(action.into()),
            ..Self::default()
        }
    }

    /// Step that runs a shell command
    #[must_use]
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            run: Some(command.into()),
            ..Self::default()
        }
    }

    /// Add an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Token permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PermissionsRepr", into = "PermissionsRepr")]
pub enum Permissions {
    /// `read-all`
    ReadAll,
    /// `write-all`
    WriteAll,
    /// Per-scope grants (`contents: read`, ...)
    Scopes(IndexMap<String, String>),
}

impl Permissions {
    /// Parse a preset name
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "read-all" => Some(Self::ReadAll),
            "write-all" => Some(Self::WriteAll),
            _ => None,
        }
    }

    /// Check for a blanket write grant
    #[must_use]
    pub fn is_write_all(&self) -> bool {
        matches!(self, Self::WriteAll)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PermissionsRepr {
    Preset(String),
    Scopes(IndexMap<String, String>),
}

impl TryFrom<PermissionsRepr> for Permissions {
    type Error = String;

    fn try_from(repr: PermissionsRepr) -> Result<Self, Self::Error> {
        match repr {
            PermissionsRepr::Preset(name) => Self::preset(&name).ok_or_else(|| {
                format!("invalid permission string '{}'; use 'read-all' or 'write-all'", name)
            }),
            PermissionsRepr::Scopes(scopes) => Ok(Self::Scopes(scopes)),
        }
    }
}

impl From<Permissions> for PermissionsRepr {
    fn from(p: Permissions) -> Self {
        match p {
            Permissions::ReadAll => Self::Preset("read-all".to_string()),
            Permissions::WriteAll => Self::Preset("write-all".to_string()),
            Permissions::Scopes(scopes) => Self::Scopes(scopes),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(one)) => vec![one],
        Some(OneOrMany::Many(many)) => many,
    })
}

fn scalar_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<IndexMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "name": "CI",
        "on": {"push": {"branches": ["main"]}},
        "permissions": "read-all",
        "jobs": {
            "build": {
                "runs-on": "ubuntu-latest",
                "timeout-minutes": 15,
                "steps": [
                    {"uses": "actions/checkout@v4"},
                    {"run": "make", "env": {"JOBS": 4, "CI": true}}
                ]
            },
            "test": {
                "runs-on": "ubuntu-latest",
                "needs": "build",
                "permissions": {"contents": "read"},
                "steps": [{"run": "make test", "if": "${{ success() }}"}]
            }
        }
    }"#;

    #[test]
    fn test_parse_resolved_document() {
        let wf = Workflow::from_json(DOC).unwrap();
        assert_eq!(wf.name, "CI");
        assert_eq!(wf.permissions, Some(Permissions::ReadAll));
        assert_eq!(wf.jobs.len(), 2);

        let build = &wf.jobs["build"];
        assert_eq!(build.timeout_minutes, Some(15));
        assert_eq!(build.steps[1].env["JOBS"], "4");
        assert_eq!(build.steps[1].env["CI"], "true");

        let test = &wf.jobs["test"];
        assert_eq!(test.needs, vec!["build"]);
        assert!(matches!(test.permissions, Some(Permissions::Scopes(_))));
        assert_eq!(test.steps[0].condition.as_deref(), Some("${{ success() }}"));
    }

    #[test]
    fn test_steps_iterator_indexes_from_one() {
        let wf = Workflow::from_json(DOC).unwrap();
        let steps: Vec<_> = wf.steps().map(|(job, idx, _)| (job, idx)).collect();
        assert_eq!(steps, vec![("build", 1), ("build", 2), ("test", 1)]);
    }

    #[test]
    fn test_invalid_permission_preset() {
        let err = Workflow::from_json(r#"{"name": "x", "permissions": "admin"}"#).unwrap_err();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }

    #[test]
    fn test_builders_roundtrip() {
        let wf = Workflow::new("Deploy")
            .with_permissions(Permissions::WriteAll)
            .with_job(
                "ship",
                Job::new("ubuntu-latest")
                    .with_needs(["build"])
                    .with_timeout(30)
                    .with_step(Step::uses("actions/checkout@v4"))
                    .with_step(Step::run("./ship.sh").with_env("STAGE", "prod")),
            );
        let json = serde_json::to_string(&wf).unwrap();
        assert!(json.contains("\"write-all\""));
        assert!(json.contains("\"timeout-minutes\":30"));
        assert_eq!(Workflow::from_json(&json).unwrap(), wf);
    }
}
