//! Inline literal extraction rules.
//!
//! Each rule flags an oversized literal argument and, when fixing, lifts it
//! into a fresh module-level binding placed just before the statement that
//! uses it. Lifting only happens when that statement sits at module level
//! on its own line and the literal is outside any lambda or comprehension.

use super::finish_fix;
use crate::edit::{Edit, EditBuffer};
use crate::unit::SourceUnit;
use indexmap::IndexSet;
use wetwire_core::{Category, FixOutcome, Fixable, Rule, Severity, Span, Violation};
use wetwire_plan::{Call, Expr, ExprKind};

/// What to lift out of which constructor call
trait Extraction: Rule<Subject = SourceUnit> {
    /// Constructor whose calls are inspected
    const CONSTRUCTOR: &'static str;
    /// Suffix appended to the bound name
    const SUFFIX: &'static str;
    /// Name used when the call is not directly bound
    const FALLBACK: &'static str;

    /// The oversized argument, if this call has one
    fn target<'a>(&self, call: &'a Call) -> Option<&'a Expr>;

    /// Violation message for a flagged argument
    fn message(&self, target: &Expr) -> String;

    /// Remediation hint
    fn suggestion(&self) -> String;
}

fn check<R: Extraction>(rule: &R, unit: &SourceUnit) -> Vec<Violation> {
    unit.calls_to(R::CONSTRUCTOR)
        .into_iter()
        .filter_map(|(_, call)| rule.target(call))
        .map(|target| {
            Violation::new(rule.id(), rule.severity(), rule.message(target), unit.location(target.span.start))
                .with_suggestion(rule.suggestion())
        })
        .collect()
}

fn unique_name(base: &str, taken: &mut IndexSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

fn lift<R: Extraction>(rule: &R, unit: &SourceUnit) -> FixOutcome {
    let Some(module) = &unit.module else {
        return FixOutcome::unchanged(&unit.text, Vec::new());
    };
    let mut taken: IndexSet<String> = module.bound_names().into_iter().map(str::to_string).collect();
    let mut buffer = EditBuffer::new();

    for stmt in module.body.iter().filter(|s| s.is_simple()) {
        let insert_at = module.lines.line_start(stmt.span.start);
        if !unit.text[insert_at..stmt.span.start].trim().is_empty() {
            continue;
        }
        let binding = stmt.single_binding();
        let mut claimed: Vec<Span> = Vec::new();

        for expr in stmt.exprs() {
            expr.walk_scoped(false, &mut |node, scoped| {
                if scoped {
                    return;
                }
                let Some(call) = node.as_call().filter(|c| c.is_call_to(R::CONSTRUCTOR)) else {
                    return;
                };
                let Some(target) = rule.target(call) else {
                    return;
                };
                if claimed.iter().any(|span| span.overlaps(&target.span)) {
                    return;
                }
                let base = match binding {
                    Some((name, value)) if value.span == node.span => format!("{}_{}", name, R::SUFFIX),
                    _ => R::FALLBACK.to_string(),
                };
                let name = unique_name(&base, &mut taken);
                let lifted = target.span.slice(&unit.text);
                buffer.push_group(vec![
                    Edit::insert(insert_at, format!("{} = {}\n", name, lifted)),
                    Edit::replace(target.span, name),
                ]);
                claimed.push(target.span);
            });
        }
    }

    finish_fix(rule, unit, buffer)
}

/// WAG013: large inline `Step(env={...})`
#[derive(Debug, Clone, Copy)]
pub struct InlineEnv {
    max_inline: usize,
}

impl InlineEnv {
    /// Rule allowing at most `max_inline` inline keys
    #[must_use]
    pub fn new(max_inline: usize) -> Self {
        Self { max_inline }
    }
}

impl Default for InlineEnv {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Extraction for InlineEnv {
    const CONSTRUCTOR: &'static str = "Step";
    const SUFFIX: &'static str = "env";
    const FALLBACK: &'static str = "step_env";

    fn target<'a>(&self, call: &'a Call) -> Option<&'a Expr> {
        call.keyword("env")
            .filter(|env| matches!(&env.kind, ExprKind::Dict(items) if items.len() > self.max_inline))
    }

    fn message(&self, target: &Expr) -> String {
        let n = match &target.kind {
            ExprKind::Dict(items) => items.len(),
            _ => 0,
        };
        format!("Step has {} inline env variables; extract to a named variable", n)
    }

    fn suggestion(&self) -> String {
        "Create: step_env = {...}; Step(..., env=step_env)".to_string()
    }
}

impl Rule for InlineEnv {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG013"
    }

    fn description(&self) -> String {
        format!("Extract inline env dicts with >{} variables", self.max_inline)
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        check(self, unit)
    }

    fn as_fixable(&self) -> Option<&dyn Fixable<Subject = SourceUnit>> {
        Some(self)
    }
}

impl Fixable for InlineEnv {
    fn fix(&self, unit: &SourceUnit) -> FixOutcome {
        lift(self, unit)
    }
}

/// WAG014: complex inline `Job(strategy=Strategy(matrix=Matrix(values={...})))`
#[derive(Debug, Clone, Copy)]
pub struct InlineMatrix {
    max_keys: usize,
    max_values: usize,
}

impl InlineMatrix {
    /// Rule allowing `max_keys` keys with at most `max_values` values each
    #[must_use]
    pub fn new(max_keys: usize, max_values: usize) -> Self {
        Self { max_keys, max_values }
    }

    fn is_complex(&self, values: &Expr) -> bool {
        let ExprKind::Dict(items) = &values.kind else {
            return false;
        };
        items.len() > self.max_keys
            || items
                .iter()
                .any(|item| matches!(&item.value.kind, ExprKind::List(v) if v.len() > self.max_values))
    }
}

impl Default for InlineMatrix {
    fn default() -> Self {
        Self::new(2, 3)
    }
}

impl Extraction for InlineMatrix {
    const CONSTRUCTOR: &'static str = "Job";
    const SUFFIX: &'static str = "matrix";
    const FALLBACK: &'static str = "job_matrix";

    fn target<'a>(&self, call: &'a Call) -> Option<&'a Expr> {
        let strategy = call.keyword("strategy")?.as_call().filter(|c| c.is_call_to("Strategy"))?;
        let matrix = strategy.keyword("matrix")?;
        let values = matrix.as_call().filter(|c| c.is_call_to("Matrix"))?.keyword("values")?;
        self.is_complex(values).then_some(matrix)
    }

    fn message(&self, _: &Expr) -> String {
        "Complex inline matrix configuration; extract to a named variable".to_string()
    }

    fn suggestion(&self) -> String {
        "Create: job_matrix = Matrix(...); Strategy(matrix=job_matrix)".to_string()
    }
}

impl Rule for InlineMatrix {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG014"
    }

    fn description(&self) -> String {
        format!(
            "Extract complex inline matrix (>{} keys or >{} values)",
            self.max_keys, self.max_values
        )
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        check(self, unit)
    }

    fn as_fixable(&self) -> Option<&dyn Fixable<Subject = SourceUnit>> {
        Some(self)
    }
}

impl Fixable for InlineMatrix {
    fn fix(&self, unit: &SourceUnit) -> FixOutcome {
        lift(self, unit)
    }
}

/// WAG015: large inline `Job(outputs={...})`
#[derive(Debug, Clone, Copy)]
pub struct InlineOutputs {
    max_inline: usize,
}

impl InlineOutputs {
    /// Rule allowing at most `max_inline` inline outputs
    #[must_use]
    pub fn new(max_inline: usize) -> Self {
        Self { max_inline }
    }
}

impl Default for InlineOutputs {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Extraction for InlineOutputs {
    const CONSTRUCTOR: &'static str = "Job";
    const SUFFIX: &'static str = "outputs";
    const FALLBACK: &'static str = "job_outputs";

    fn target<'a>(&self, call: &'a Call) -> Option<&'a Expr> {
        call.keyword("outputs")
            .filter(|outputs| matches!(&outputs.kind, ExprKind::Dict(items) if items.len() > self.max_inline))
    }

    fn message(&self, target: &Expr) -> String {
        let n = match &target.kind {
            ExprKind::Dict(items) => items.len(),
            _ => 0,
        };
        format!("Job has {} inline outputs; extract to a named variable", n)
    }

    fn suggestion(&self) -> String {
        "Create: job_outputs = {...}; Job(..., outputs=job_outputs)".to_string()
    }
}

impl Rule for InlineOutputs {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG015"
    }

    fn description(&self) -> String {
        format!("Extract inline outputs dicts with >{} entries", self.max_inline)
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        check(self, unit)
    }

    fn as_fixable(&self) -> Option<&dyn Fixable<Subject = SourceUnit>> {
        Some(self)
    }
}

impl Fixable for InlineOutputs {
    fn fix(&self, unit: &SourceUnit) -> FixOutcome {
        lift(self, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(src: &str) -> SourceUnit {
        SourceUnit::new("ci.py", src)
    }

    const ENV: &str = "\
from wetwire_github.workflow import Job, Step

build = Job(
    runs_on=\"ubuntu-latest\",
    steps=[
        Step(run=\"make\", env={\"A\": \"1\", \"B\": \"2\", \"C\": \"3\", \"D\": \"4\"}),
    ],
)
";

    #[test]
    fn test_inline_env_threshold() {
        let found = InlineEnv::new(3).evaluate(&unit(ENV));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "Step has 4 inline env variables; extract to a named variable");
        assert_eq!(found[0].location.line(), Some(6));
        assert!(InlineEnv::new(4).evaluate(&unit(ENV)).is_empty());
    }

    #[test]
    fn test_inline_env_lifted() {
        let outcome = InlineEnv::new(3).fix(&unit(ENV));
        assert_eq!(outcome.applied, 1);
        assert!(outcome.remaining.is_empty());
        assert!(outcome.source.contains(
            "step_env = {\"A\": \"1\", \"B\": \"2\", \"C\": \"3\", \"D\": \"4\"}\nbuild = Job("
        ));
        assert!(outcome.source.contains("Step(run=\"make\", env=step_env),"));

        let again = InlineEnv::new(3).fix(&unit(&outcome.source));
        assert_eq!(again.applied, 0);
        assert_eq!(again.source, outcome.source);
    }

    #[test]
    fn test_bound_call_names_and_collisions() {
        let src = "\
deploy_env = 1
deploy = Step(env={\"A\": 1, \"B\": 2, \"C\": 3, \"D\": 4})
other = Step(env={\"A\": 1, \"B\": 2, \"C\": 3, \"D\": 4})
";
        let outcome = InlineEnv::new(3).fix(&unit(src));
        assert_eq!(outcome.applied, 2);
        assert!(outcome.source.contains("deploy_env_2 = {"));
        assert!(outcome.source.contains("deploy = Step(env=deploy_env_2)"));
        assert!(outcome.source.contains("other = Step(env=other_env)"));
    }

    #[test]
    fn test_lift_skipped_in_scopes_and_blocks() {
        let src = "\
steps = [Step(env={\"A\": 1, \"B\": 2, \"C\": 3, \"D\": i}) for i in range(3)]
if True:
    s = Step(env={\"A\": 1, \"B\": 2, \"C\": 3, \"D\": 4})
x = 1; y = Step(env={\"A\": 1, \"B\": 2, \"C\": 3, \"D\": 4})
";
        let u = unit(src);
        assert_eq!(InlineEnv::new(3).evaluate(&u).len(), 3);
        let outcome = InlineEnv::new(3).fix(&u);
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.source, src);
        assert_eq!(outcome.remaining.len(), 3);
    }

    #[test]
    fn test_multiple_lifts_in_one_statement_keep_order() {
        let src = "\
job = Job(steps=[
    Step(env={\"A\": 1, \"B\": 2, \"C\": 3, \"D\": 4}),
    Step(env={\"E\": 1, \"F\": 2, \"G\": 3, \"H\": 4}),
])
";
        let outcome = InlineEnv::new(3).fix(&unit(src));
        assert_eq!(outcome.applied, 2);
        let first = outcome.source.find("step_env = {\"A\"").unwrap();
        let second = outcome.source.find("step_env_2 = {\"E\"").unwrap();
        let job = outcome.source.find("job = Job(").unwrap();
        assert!(first < second && second < job);
    }

    #[test]
    fn test_inline_matrix() {
        let src = "\
test = Job(
    strategy=Strategy(matrix=Matrix(values={\"py\": [\"3.10\", \"3.11\", \"3.12\", \"3.13\"]})),
)
small = Job(strategy=Strategy(matrix=Matrix(values={\"py\": [\"3.12\"], \"os\": [\"linux\"]})))
";
        let rule = InlineMatrix::new(2, 3);
        let found = rule.evaluate(&unit(src));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].location.line(), Some(2));

        let outcome = rule.fix(&unit(src));
        assert_eq!(outcome.applied, 1);
        assert!(outcome.source.starts_with(
            "test_matrix = Matrix(values={\"py\": [\"3.10\", \"3.11\", \"3.12\", \"3.13\"]})\ntest = Job(\n"
        ));
        assert!(outcome.source.contains("strategy=Strategy(matrix=test_matrix),"));
        assert!(outcome.remaining.is_empty());
    }

    #[test]
    fn test_inline_outputs() {
        let src = "\
ship = Job(outputs={\"a\": \"1\", \"b\": \"2\", \"c\": \"3\"})
ok = Job(outputs={\"a\": \"1\", \"b\": \"2\"})
";
        let rule = InlineOutputs::new(2);
        let found = rule.evaluate(&unit(src));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "Job has 3 inline outputs; extract to a named variable");

        let outcome = rule.fix(&unit(src));
        assert_eq!(
            outcome.source,
            "ship_outputs = {\"a\": \"1\", \"b\": \"2\", \"c\": \"3\"}\nship = Job(outputs=ship_outputs)\nok = Job(outputs={\"a\": \"1\", \"b\": \"2\"})\n"
        );
    }
}
