//! Reusable workflow discovery.
//!
//! A workflow is reusable when its `on=` trigger call carries a
//! `workflow_call=` keyword. The trigger's inputs, outputs, and secret
//! names are extracted from literals only.

use crate::scan::{KindResolver, Scanner};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use wetwire_core::ResourceKind;
use wetwire_plan::{Call, Expr, ExprKind, Literal, SourceParser, StmtKind};

/// A workflow declaring a `workflow_call` trigger
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReusableWorkflow {
    /// Value of the `name=` keyword, empty if absent or not a literal
    pub name: String,
    /// Declaring file
    pub file_path: String,
    /// Input name → literal keyword settings (`type`, `required`, ...)
    pub inputs: IndexMap<String, IndexMap<String, Value>>,
    /// Output name → value expression, empty if not a literal
    pub outputs: IndexMap<String, String>,
    /// Secret names
    pub secrets: Vec<String>,
}

impl<P: SourceParser> Scanner<P> {
    /// Reusable workflows declared in `text`; empty if it does not parse
    #[must_use]
    pub fn reusable_workflows(&self, text: &str, path: &Path) -> Vec<ReusableWorkflow> {
        let Some(module) = self.parse_soft(text, path) else {
            return Vec::new();
        };
        let file_path = path.display().to_string();
        let mut resolver = KindResolver::default();
        let mut found = Vec::new();

        module.walk_stmts(&mut |stmt, _| {
            if let StmtKind::ImportFrom { module: from, names, .. } = &stmt.kind {
                resolver.observe_import(from.as_deref(), self.package(), names);
                return;
            }
            let Some(call) = stmt.single_binding().and_then(|(_, value)| value.as_call()) else {
                return;
            };
            if resolver.resolve(call) != Some(ResourceKind::Workflow) {
                return;
            }
            if let Some(workflow) = reusable_from_call(call, &file_path) {
                found.push(workflow);
            }
        });

        tracing::trace!(path = %file_path, count = found.len(), "reusable workflows");
        found
    }
}

fn reusable_from_call(call: &Call, file_path: &str) -> Option<ReusableWorkflow> {
    let trigger = call
        .keyword("on")
        .and_then(Expr::as_call)
        .and_then(|triggers| triggers.keyword("workflow_call"))?;

    let mut workflow = ReusableWorkflow {
        name: call.keyword("name").and_then(constant_text).unwrap_or_default(),
        file_path: file_path.to_string(),
        ..ReusableWorkflow::default()
    };

    // A non-call trigger value is still reusable, just without a contract.
    let Some(trigger) = trigger.as_call() else {
        return Some(workflow);
    };

    for keyword in &trigger.keywords {
        match (keyword.arg.as_deref(), &keyword.value.kind) {
            (Some("inputs"), ExprKind::Dict(items)) => {
                for item in items {
                    let Some(input) = item.key.as_ref().and_then(Expr::as_str) else {
                        continue;
                    };
                    let settings = item
                        .value
                        .as_call()
                        .map(|c| {
                            c.keywords
                                .iter()
                                .filter_map(|kw| Some((kw.arg.clone()?, constant_value(&kw.value)?)))
                                .collect()
                        })
                        .unwrap_or_default();
                    workflow.inputs.insert(input.to_string(), settings);
                }
            }
            (Some("outputs"), ExprKind::Dict(items)) => {
                for item in items {
                    let Some(output) = item.key.as_ref().and_then(Expr::as_str) else {
                        continue;
                    };
                    let value = item.value.as_str().unwrap_or_default();
                    workflow.outputs.insert(output.to_string(), value.to_string());
                }
            }
            (Some("secrets"), ExprKind::List(items)) => {
                workflow.secrets = items.iter().filter_map(Expr::as_str).map(str::to_string).collect();
            }
            _ => {}
        }
    }
    Some(workflow)
}

fn constant_text(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Literal(Literal::Str(s)) => Some(s.clone()),
        ExprKind::Literal(Literal::Number(n)) => Some(n.clone()),
        ExprKind::Literal(Literal::Bool(b)) => Some(if *b { "True" } else { "False" }.to_string()),
        _ => None,
    }
}

fn constant_value(expr: &Expr) -> Option<Value> {
    let ExprKind::Literal(literal) = &expr.kind else {
        return None;
    };
    match literal {
        Literal::Str(s) => Some(Value::String(s.clone())),
        Literal::Bool(b) => Some(Value::Bool(*b)),
        Literal::None => Some(Value::Null),
        Literal::Number(n) => {
            let digits = n.replace('_', "");
            if let Ok(int) = digits.parse::<i64>() {
                Some(Value::from(int))
            } else {
                digits.parse::<f64>().ok().map(Value::from)
            }
        }
        Literal::Bytes | Literal::FString | Literal::Ellipsis => None,
    }
}

/// Reusable workflows declared in `text`, using the default scanner
#[must_use]
pub fn discover_reusable_workflows(text: &str, path: &Path) -> Vec<ReusableWorkflow> {
    Scanner::new().reusable_workflows(text, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SRC: &str = r#"from wetwire_github.workflow import Workflow as WF, Triggers, WorkflowCallTrigger

deploy = WF(
    name="Deploy",
    on=Triggers(
        workflow_call=WorkflowCallTrigger(
            inputs={
                "environment": WorkflowInput(type="string", required=True),
                "retries": WorkflowInput(type="number", default=3),
                "ratio": WorkflowInput(default=0.5, description=make_desc()),
                other: WorkflowInput(),
            },
            outputs={"url": "${{ jobs.ship.outputs.url }}", "computed": compute()},
            secrets=["TOKEN", NOT_A_LITERAL, "KEY"],
        ),
    ),
    jobs={},
)

ci = Workflow(name="CI", on=Triggers(push=PushTrigger()))
bare = Workflow(name="Bare", on=Triggers(workflow_call=True))
job = Job(on=Triggers(workflow_call=WorkflowCallTrigger()))
"#;

    #[test]
    fn test_extracts_workflow_call_contract() {
        let found = discover_reusable_workflows(SRC, Path::new("deploy.py"));
        assert_eq!(found.len(), 2);

        let deploy = &found[0];
        assert_eq!(deploy.name, "Deploy");
        assert_eq!(deploy.file_path, "deploy.py");
        assert_eq!(deploy.inputs.keys().collect::<Vec<_>>(), vec!["environment", "retries", "ratio"]);
        assert_eq!(deploy.inputs["environment"]["type"], json!("string"));
        assert_eq!(deploy.inputs["environment"]["required"], json!(true));
        assert_eq!(deploy.inputs["retries"]["default"], json!(3));
        assert_eq!(deploy.inputs["ratio"]["default"], json!(0.5));
        assert!(!deploy.inputs["ratio"].contains_key("description"));
        assert_eq!(deploy.outputs["url"], "${{ jobs.ship.outputs.url }}");
        assert_eq!(deploy.outputs["computed"], "");
        assert_eq!(deploy.secrets, vec!["TOKEN", "KEY"]);
    }

    #[test]
    fn test_non_call_trigger_has_empty_contract() {
        let found = discover_reusable_workflows(SRC, Path::new("deploy.py"));
        let bare = &found[1];
        assert_eq!(bare.name, "Bare");
        assert!(bare.inputs.is_empty() && bare.outputs.is_empty() && bare.secrets.is_empty());
    }

    #[test]
    fn test_syntax_error_is_empty() {
        assert!(discover_reusable_workflows("wf = Workflow(", Path::new("x.py")).is_empty());
    }
}
