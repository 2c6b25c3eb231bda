//! Trigger and job graph validation rules.

use crate::unit::SourceUnit;
use indexmap::IndexMap;
use wetwire_core::{Category, Rule, Severity, Violation};
use wetwire_plan::{Call, DependencyMap, Expr, ExprKind, TRIGGER_EVENTS, detect_cycles};

/// WAG009: workflow triggers must name real event types
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTypes;

impl EventTypes {
    fn suggestion() -> String {
        let mut valid = TRIGGER_EVENTS.to_vec();
        valid.sort_unstable();
        let head: Vec<&str> = valid.into_iter().take(5).collect();
        format!("Valid events: {}...", head.join(", "))
    }
}

impl Rule for EventTypes {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG009"
    }

    fn description(&self) -> String {
        "Validate webhook event types in triggers".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let mut found = Vec::new();
        for (_, call) in unit.calls_to("Workflow") {
            let Some(on) = call.keyword("on") else {
                continue;
            };
            let events: Vec<&Expr> = match &on.kind {
                ExprKind::Dict(items) => items.iter().filter_map(|item| item.key.as_ref()).collect(),
                ExprKind::List(items) | ExprKind::Tuple(items) => items.iter().collect(),
                _ => vec![on],
            };
            for event in events {
                let Some(name) = event.as_str() else {
                    continue;
                };
                if TRIGGER_EVENTS.contains(&name) {
                    continue;
                }
                found.push(
                    Violation::new(
                        self.id(),
                        self.severity(),
                        format!("Unknown event type '{}'", name),
                        unit.location(event.span.start),
                    )
                    .with_suggestion(Self::suggestion()),
                );
            }
        }
        found
    }
}

/// WAG051: jobs whose `needs` form a cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CircularNeeds;

/// Workflow key of a job binding, or the binding name itself
fn job_key(keys: &IndexMap<&str, &str>, binding: &str) -> String {
    keys.get(binding).map_or_else(|| binding.to_string(), |key| (*key).to_string())
}

/// Job keys named by a `needs=` value; strings are keys, names are bindings
fn needed(value: &Expr, keys: &IndexMap<&str, &str>) -> Vec<String> {
    let items: Vec<&Expr> = match &value.kind {
        ExprKind::List(items) | ExprKind::Tuple(items) => items.iter().collect(),
        _ => vec![value],
    };
    items
        .into_iter()
        .filter_map(|item| match (item.as_str(), item.as_name()) {
            (Some(key), _) => Some(key.to_string()),
            (None, Some(binding)) => Some(job_key(keys, binding)),
            _ => None,
        })
        .collect()
}

impl Rule for CircularNeeds {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG051"
    }

    fn description(&self) -> String {
        "Detect circular dependencies in job needs declarations".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let Some(module) = &unit.module else {
            return Vec::new();
        };

        let mut jobs: IndexMap<&str, (&Call, usize)> = IndexMap::new();
        module.walk_stmts(&mut |stmt, _| {
            let Some((name, value)) = stmt.single_binding() else {
                return;
            };
            if let Some(call) = value.as_call().filter(|c| c.is_call_to("Job")) {
                jobs.insert(name, (call, stmt.span.start));
            }
        });
        if jobs.is_empty() {
            return Vec::new();
        }

        let mut keys: IndexMap<&str, &str> = IndexMap::new();
        for (_, call) in unit.calls_to("Workflow") {
            let Some(ExprKind::Dict(items)) = call.keyword("jobs").map(|e| &e.kind) else {
                continue;
            };
            for item in items {
                let key = item.key.as_ref().and_then(|k| k.as_str());
                if let (Some(key), Some(binding)) = (key, item.value.as_name()) {
                    keys.entry(binding).or_insert(key);
                }
            }
        }

        let mut graph = DependencyMap::new();
        let mut offsets: IndexMap<String, usize> = IndexMap::new();
        for (binding, (call, offset)) in &jobs {
            let key = job_key(&keys, binding);
            let needs = call.keyword("needs").map(|v| needed(v, &keys)).unwrap_or_default();
            offsets.insert(key.clone(), *offset);
            graph.insert(key, needs);
        }

        detect_cycles(&graph)
            .into_iter()
            .map(|cycle| {
                let offset = cycle.first().and_then(|first| offsets.get(first)).copied().unwrap_or(0);
                Violation::new(
                    self.id(),
                    self.severity(),
                    format!("Circular dependency detected: {}", cycle.join(" -> ")),
                    unit.location(offset),
                )
                .with_suggestion("Remove one of the dependencies to break the cycle")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(src: &str) -> SourceUnit {
        SourceUnit::new("ci.py", src)
    }

    #[test]
    fn test_event_types() {
        let src = "\
a = Workflow(name=\"A\", on={\"push\": {}, \"pusj\": {}, \"registry_package\": {}})
b = Workflow(name=\"B\", on=[\"pull_request\", \"deploy\"])
c = Workflow(name=\"C\", on=\"workflow_dispatch\")
d = Workflow(name=\"D\", on=triggers)
";
        let found = EventTypes.evaluate(&unit(src));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].message, "Unknown event type 'pusj'");
        assert_eq!(found[0].location.line(), Some(1));
        assert_eq!(found[1].message, "Unknown event type 'deploy'");
        assert_eq!(
            found[1].suggestion.as_deref(),
            Some("Valid events: branch_protection_rule, check_run, check_suite, create, delete...")
        );
        assert!(EventTypes.as_fixable().is_none());
    }

    #[test]
    fn test_circular_needs() {
        let src = "\
lint = Job(runs_on=\"ubuntu-latest\")
build = Job(needs=[\"deploy\", lint])
test = Job(needs=[build, lint, lint])
deploy = Job(needs=[test, \"external\"])
ci = Workflow(name=\"CI\", jobs={\"lint\": lint, \"build\": build, \"test\": test, \"deploy\": deploy})
";
        let found = CircularNeeds.evaluate(&unit(src));
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].message,
            "Circular dependency detected: build -> deploy -> test -> build"
        );
        assert_eq!(found[0].location.line(), Some(2));
        assert_eq!(found[0].severity, Severity::High);
    }

    #[test]
    fn test_needs_follow_workflow_keys() {
        let src = "\
build_job = Job()
test_job = Job(needs=[\"build\"])
ci = Workflow(jobs={\"build\": build_job, \"test\": test_job})
";
        assert!(CircularNeeds.evaluate(&unit(src)).is_empty());

        let renamed = "\
build_job = Job(needs=\"test\")
test_job = Job(needs=[build_job])
ci = Workflow(jobs={\"build\": build_job, \"test\": test_job})
";
        let found = CircularNeeds.evaluate(&unit(renamed));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "Circular dependency detected: build -> test -> build");
    }

    #[test]
    fn test_self_need_and_acyclic() {
        let found = CircularNeeds.evaluate(&unit("a = Job(needs=[a])\n"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "Circular dependency detected: a -> a");

        let acyclic = "build = Job()\ntest = Job(needs=[build])\ndeploy = Job(needs=[build, test])\n";
        assert!(CircularNeeds.evaluate(&unit(acyclic)).is_empty());
        assert!(CircularNeeds.evaluate(&unit("a = Job(needs=[a]\n")).is_empty());
    }
}
