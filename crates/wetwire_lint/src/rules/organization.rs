//! File organization rules.

use crate::splitting::suggest_splits;
use crate::unit::SourceUnit;
use indexmap::IndexMap;
use wetwire_core::{Category, Location, ResourceKind, Rule, Severity, Violation};
use wetwire_discover::Scanner;
use wetwire_plan::ExprKind;

/// WAG004: `Strategy(matrix=Matrix(...))` instead of raw dicts
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixBuilder;

impl Rule for MatrixBuilder {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG004"
    }

    fn description(&self) -> String {
        "Use Strategy(matrix=Matrix(...)) instead of raw dicts".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let mut found = Vec::new();
        for (_, call) in unit.calls_to("Job") {
            if let Some(strategy) = call.keyword("strategy") {
                if matches!(strategy.kind, ExprKind::Dict(_)) {
                    found.push((
                        strategy.span.start,
                        Violation::new(
                            self.id(),
                            self.severity(),
                            "Use Strategy class instead of raw dict for strategy",
                            unit.location(strategy.span.start),
                        )
                        .with_suggestion("Use: Strategy(matrix=Matrix(values={...}))"),
                    ));
                }
            }
        }
        for (_, call) in unit.calls_to("Strategy") {
            if let Some(matrix) = call.keyword("matrix") {
                if matches!(matrix.kind, ExprKind::Dict(_)) {
                    found.push((
                        matrix.span.start,
                        Violation::new(
                            self.id(),
                            self.severity(),
                            "Use Matrix class instead of raw dict for matrix",
                            unit.location(matrix.span.start),
                        )
                        .with_suggestion("Use: Matrix(values={...})"),
                    ));
                }
            }
        }
        found.sort_by_key(|(offset, _)| *offset);
        found.into_iter().map(|(_, v)| v).collect()
    }
}

/// WAG005: the same env key declared on several steps
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatedStepEnv;

impl Rule for RepeatedStepEnv {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG005"
    }

    fn description(&self) -> String {
        "Extract repeated env variables to job or workflow level".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let mut occurrences: IndexMap<&str, Vec<usize>> = IndexMap::new();
        for (expr, call) in unit.calls_to("Step") {
            let Some(ExprKind::Dict(items)) = call.keyword("env").map(|e| &e.kind) else {
                continue;
            };
            for key in items.iter().filter_map(|item| item.key.as_ref()?.as_str()) {
                occurrences.entry(key).or_default().push(expr.span.start);
            }
        }

        occurrences
            .into_iter()
            .filter(|(_, offsets)| offsets.len() >= 2)
            .map(|(key, offsets)| {
                let line = unit.location(offsets[0]).line().unwrap_or(1);
                Violation::new(
                    self.id(),
                    self.severity(),
                    format!(
                        "Env variable '{}' defined in {} steps; consider extracting to job-level env",
                        key,
                        offsets.len()
                    ),
                    Location::source(unit.file_path(), line, 1),
                )
                .with_suggestion("Move to Job(env={...}) or Workflow(env={...})")
            })
            .collect()
    }
}

/// WAG006: two workflows in one file sharing a name
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateWorkflowNames;

impl Rule for DuplicateWorkflowNames {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG006"
    }

    fn description(&self) -> String {
        "Detect duplicate workflow names in the same file".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let mut first_seen: IndexMap<&str, usize> = IndexMap::new();
        let mut found = Vec::new();
        for (expr, call) in unit.calls_to("Workflow") {
            let Some(name) = call.keyword("name").and_then(|e| e.as_str()) else {
                continue;
            };
            let line = unit.location(expr.span.start).line().unwrap_or(1);
            match first_seen.get(name) {
                Some(first) => found.push(Violation::new(
                    self.id(),
                    self.severity(),
                    format!("Duplicate workflow name '{}' (first defined at line {})", name, first),
                    Location::source(unit.file_path(), line, 1),
                )),
                None => {
                    first_seen.insert(name, line);
                }
            }
        }
        found
    }
}

/// WAG007: too many job bindings in one file
#[derive(Debug, Clone, Copy)]
pub struct FileTooLarge {
    max_jobs: usize,
}

impl FileTooLarge {
    /// Rule allowing at most `max_jobs` job bindings
    #[must_use]
    pub fn new(max_jobs: usize) -> Self {
        Self { max_jobs }
    }
}

impl Default for FileTooLarge {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Rule for FileTooLarge {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG007"
    }

    fn description(&self) -> String {
        format!("Warn when a file has more than {} jobs", self.max_jobs)
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let Some(module) = &unit.module else {
            return Vec::new();
        };
        let resources = Scanner::new().scan_module(module, &unit.path);
        let jobs: Vec<&str> = resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Job)
            .map(|r| r.name.as_str())
            .collect();
        if jobs.len() <= self.max_jobs {
            return Vec::new();
        }

        let mut splits: Vec<(String, Vec<String>)> = suggest_splits(&jobs, self.max_jobs).into_iter().collect();
        splits.sort();
        let mut message = format!("File has too many jobs ({}), consider splitting into:", jobs.len());
        for (file, names) in splits {
            message.push_str(&format!("\n  {}.py: {}", file, names.join(", ")));
        }
        vec![Violation::new(
            self.id(),
            self.severity(),
            message,
            Location::source(unit.file_path(), 1, 1),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(src: &str) -> SourceUnit {
        SourceUnit::new("ci.py", src)
    }

    #[test]
    fn test_matrix_builder() {
        let src = "\
a = Job(strategy={\"matrix\": {\"py\": [\"3.11\"]}})
b = Job(strategy=Strategy(matrix={\"py\": [\"3.12\"]}))
c = Job(strategy=Strategy(matrix=Matrix(values={\"py\": [\"3.12\"]})))
";
        let found = MatrixBuilder.evaluate(&unit(src));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].message, "Use Strategy class instead of raw dict for strategy");
        assert_eq!(found[1].message, "Use Matrix class instead of raw dict for matrix");
        assert_eq!(found[1].location, Location::source("ci.py", 2, 34));
    }

    #[test]
    fn test_repeated_step_env() {
        let src = "\
steps = [
    Step(run=\"a\", env={\"CI\": \"1\", \"A\": \"x\"}),
    Step(run=\"b\", env={\"CI\": \"1\"}),
    Step(run=\"c\", env={\"CI\": \"1\", \"B\": \"y\"}),
]
";
        let found = RepeatedStepEnv.evaluate(&unit(src));
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].message,
            "Env variable 'CI' defined in 3 steps; consider extracting to job-level env"
        );
        assert_eq!(found[0].location.line(), Some(2));
    }

    #[test]
    fn test_duplicate_workflow_names() {
        let src = "a = Workflow(name=\"CI\")\nb = Workflow(name=\"Deploy\")\n\nc = Workflow(name=\"CI\")\n";
        let found = DuplicateWorkflowNames.evaluate(&unit(src));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "Duplicate workflow name 'CI' (first defined at line 1)");
        assert_eq!(found[0].location.line(), Some(4));
    }

    #[test]
    fn test_file_too_large() {
        let src = "build = Job()\ntest = Job()\nlint = Job()\ndeploy_prod = Job()\ndocs = Job()\nwf = Workflow()\n";
        assert!(FileTooLarge::new(5).evaluate(&unit(src)).is_empty());

        let found = FileTooLarge::new(2).evaluate(&unit(src));
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].message,
            "File has too many jobs (5), consider splitting into:\n  ci1.py: build, test\n  ci2.py: lint\n  deploy.py: deploy_prod\n  main.py: docs"
        );
    }
}
