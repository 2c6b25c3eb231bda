//! Expression string rules.

use super::{finish_fix, pattern};
use crate::edit::{Edit, EditBuffer};
use crate::unit::SourceUnit;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use wetwire_core::{Category, FixOutcome, Fixable, Rule, Severity, Span, Violation};
use wetwire_plan::lexer::{Token, TokenKind, tokenize};

static CONDITION: Lazy<Option<Regex>> =
    Lazy::new(|| pattern(r"\$\{\{\s*(always|failure|success|cancelled)\(\)\s*\}\}"));
static SECRET: Lazy<Option<Regex>> = Lazy::new(|| pattern(r"\$\{\{\s*secrets\.(\w+)\s*\}\}"));
static EXPRESSION: Lazy<Option<Regex>> = Lazy::new(|| pattern(r"\$\{\{.*?\}\}"));

fn captures<'t>(re: &Lazy<Option<Regex>>, text: &'t str) -> Option<Captures<'t>> {
    re.as_ref().and_then(|re| re.captures(text))
}

/// Captured name, if the match covers the whole text
fn whole<'t>(caps: &Captures<'t>, text: &str) -> Option<&'t str> {
    let m = caps.get(0)?;
    if m.start() == 0 && m.end() == text.len() {
        caps.get(1).map(|c| c.as_str())
    } else {
        None
    }
}

/// WAG002: use `always()`/`failure()`/... instead of raw condition strings
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionBuilders;

impl ConditionBuilders {
    fn conditions(unit: &SourceUnit) -> Vec<(usize, &wetwire_plan::Expr, &str)> {
        ["Step", "Job"]
            .into_iter()
            .flat_map(|ctor| unit.calls_to(ctor))
            .filter_map(|(expr, call)| {
                let condition = call.keyword("if_")?;
                Some((expr.span.start, condition, condition.as_str()?))
            })
            .collect()
    }
}

impl Rule for ConditionBuilders {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG002"
    }

    fn description(&self) -> String {
        "Use condition builders (always(), failure(), etc.) instead of raw strings".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let mut found: Vec<(usize, Violation)> = Self::conditions(unit)
            .into_iter()
            .filter_map(|(offset, _, value)| {
                let caps = captures(&CONDITION, value)?;
                let func = caps.get(1)?.as_str();
                Some((
                    offset,
                    Violation::new(
                        self.id(),
                        self.severity(),
                        format!("Use {0}() helper instead of hardcoded '${{{{ {0}() }}}}'", func),
                        unit.location(offset),
                    )
                    .with_suggestion(format!("Import {} from wetwire_github.workflow.expressions", func)),
                ))
            })
            .collect();
        found.sort_by_key(|(offset, _)| *offset);
        found.into_iter().map(|(_, v)| v).collect()
    }

    fn as_fixable(&self) -> Option<&dyn Fixable<Subject = SourceUnit>> {
        Some(self)
    }
}

impl Fixable for ConditionBuilders {
    /// Rewrites literals that are exactly one builder expression; compound
    /// conditions stay as written.
    fn fix(&self, unit: &SourceUnit) -> FixOutcome {
        let mut buffer = EditBuffer::new();
        for (_, literal, value) in Self::conditions(unit) {
            let Some(caps) = captures(&CONDITION, value) else {
                continue;
            };
            if let Some(func) = whole(&caps, value) {
                buffer.push(Edit::replace(literal.span, format!("{}()", func)));
            }
        }
        finish_fix(self, unit, buffer)
    }
}

/// WAG003: use `Secrets.get("NAME")` instead of `"${{ secrets.NAME }}"`
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretsContext;

impl Rule for SecretsContext {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG003"
    }

    fn description(&self) -> String {
        "Use Secrets.get() helper instead of hardcoded secrets access".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        unit.string_literals()
            .into_iter()
            .filter_map(|(expr, value)| {
                let caps = captures(&SECRET, value)?;
                let name = caps.get(1)?.as_str();
                Some(
                    Violation::new(
                        self.id(),
                        self.severity(),
                        format!(
                            "Use Secrets.get('{0}') instead of hardcoded '${{{{ secrets.{0} }}}}'",
                            name
                        ),
                        unit.location(expr.span.start),
                    )
                    .with_suggestion(format!("Replace with: Secrets.get(\"{}\")", name)),
                )
            })
            .collect()
    }

    fn as_fixable(&self) -> Option<&dyn Fixable<Subject = SourceUnit>> {
        Some(self)
    }
}

impl Fixable for SecretsContext {
    fn fix(&self, unit: &SourceUnit) -> FixOutcome {
        let mut buffer = EditBuffer::new();
        for (expr, value) in unit.string_literals() {
            let Some(caps) = captures(&SECRET, value) else {
                continue;
            };
            if let Some(name) = whole(&caps, value) {
                buffer.push(Edit::replace(expr.span, format!("Secrets.get(\"{}\")", name)));
            }
        }
        finish_fix(self, unit, buffer)
    }
}

/// WAG008: flag any string literal carrying a `${{ ... }}` expression
#[derive(Debug, Clone, Copy, Default)]
pub struct HardcodedExpressions;

impl Rule for HardcodedExpressions {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG008"
    }

    fn description(&self) -> String {
        "Detect hardcoded GitHub expression strings; use Expression objects instead".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Info
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let Some(re) = EXPRESSION.as_ref() else {
            return Vec::new();
        };
        unit.string_literals()
            .into_iter()
            .filter(|(_, value)| re.is_match(value))
            .map(|(expr, value)| {
                let preview: String = value.chars().take(50).collect();
                Violation::new(
                    self.id(),
                    self.severity(),
                    format!("Hardcoded expression string '{}...'; use Expression objects", preview),
                    unit.location(expr.span.start),
                )
                .with_suggestion("Use wetwire_github.workflow.expressions helpers")
            })
            .collect()
    }
}

const OPERATORS: [&str; 20] = [
    "+", "-", "*", "/", "//", "%", "**", "@", "&", "|", "^", "~", "<<", ">>", "<", ">", "<=", ">=", "==", "!=",
];
const WORD_OPERATORS: [&str; 5] = ["and", "or", "not", "is", "in"];
const STRING_OPERATORS: [&str; 4] = ["&&", "||", " and ", " or "];

/// Check if a token can be followed by a call or subscript bracket
fn ends_operand(token: &Token, source: &str) -> bool {
    match token.kind {
        TokenKind::Name => !WORD_OPERATORS.contains(&source) && !matches!(source, "if" | "else" | "lambda"),
        TokenKind::Str | TokenKind::Number => true,
        TokenKind::Op => matches!(source, ")" | "]" | "}"),
        _ => false,
    }
}

/// Operators within `span`
///
/// Call arguments, subscripts and container literals are opaque; grouping
/// parentheses are not. `not in` and `is not` count once. String literals
/// contribute their `&&`, `||`, `and` and `or` occurrences.
fn complexity(text: &str, tokens: &[Token], span: Span) -> usize {
    let mut count = 0;
    let mut opaque = 0usize;
    let mut brackets: Vec<bool> = Vec::new();
    let mut prev: Option<(&Token, &str)> = None;

    for token in tokens.iter().filter(|t| t.span.start >= span.start && t.span.end <= span.end) {
        let source = &text[token.span.start..token.span.end];
        let is_op = token.kind == TokenKind::Op;
        if is_op && matches!(source, "(" | "[" | "{") {
            let grouping = source == "(" && !prev.is_some_and(|(t, s)| ends_operand(t, s));
            brackets.push(!grouping);
            if !grouping {
                opaque += 1;
            }
        } else if is_op && matches!(source, ")" | "]" | "}") {
            if brackets.pop() == Some(true) {
                opaque = opaque.saturating_sub(1);
            }
        } else if opaque == 0 {
            let after = prev.map(|(_, s)| s);
            count += match token.kind {
                TokenKind::Op if OPERATORS.contains(&source) => 1,
                TokenKind::Name if source == "in" && after == Some("not") => 0,
                TokenKind::Name if source == "not" && after == Some("is") => 0,
                TokenKind::Name if WORD_OPERATORS.contains(&source) => 1,
                TokenKind::Str => STRING_OPERATORS.iter().map(|op| source.matches(op).count()).sum(),
                _ => 0,
            };
        }
        prev = Some((token, source));
    }
    count
}

/// WAG011: conditions with more operators than a reader can follow
#[derive(Debug, Clone, Copy)]
pub struct ComplexConditions {
    max_operators: usize,
}

impl ComplexConditions {
    /// Rule allowing at most `max_operators` operators per condition
    #[must_use]
    pub fn new(max_operators: usize) -> Self {
        Self { max_operators }
    }
}

impl Default for ComplexConditions {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Rule for ComplexConditions {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG011"
    }

    fn description(&self) -> String {
        format!("Flag conditions with more than {} operators", self.max_operators)
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let mut conditions: Vec<(usize, Span)> = ["Step", "Job"]
            .into_iter()
            .flat_map(|ctor| unit.calls_to(ctor))
            .filter_map(|(expr, call)| Some((expr.span.start, call.keyword("if_")?.span)))
            .collect();
        if conditions.is_empty() {
            return Vec::new();
        }
        conditions.sort_by_key(|(offset, _)| *offset);

        let tokens = match tokenize(&unit.text) {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::debug!(path = %unit.path.display(), %err, "cannot tokenize conditions");
                return Vec::new();
            }
        };
        conditions
            .into_iter()
            .filter_map(|(offset, span)| {
                let score = complexity(&unit.text, &tokens, span);
                (score > self.max_operators).then(|| {
                    Violation::new(
                        self.id(),
                        self.severity(),
                        format!("Complex condition (complexity: {}); extract to a named variable", score),
                        unit.location(offset),
                    )
                    .with_suggestion("Create: is_deploy_ready = condition1 & condition2 & condition3")
                })
            })
            .collect()
    }
}
