//! Built-in style rules.
//!
//! | id     | rule                                 | fix |
//! |--------|--------------------------------------|-----|
//! | WAG001 | typed action wrappers                | yes |
//! | WAG002 | condition builders                   | yes |
//! | WAG003 | `Secrets.get()` over raw expressions | yes |
//! | WAG004 | `Strategy`/`Matrix` over raw dicts   |     |
//! | WAG005 | env keys repeated across steps       |     |
//! | WAG006 | duplicate workflow names             |     |
//! | WAG007 | too many jobs in one file            |     |
//! | WAG008 | hardcoded `${{ }}` expressions       |     |
//! | WAG009 | unknown trigger event types          |     |
//! | WAG011 | complex `if_` conditions             |     |
//! | WAG013 | large inline step env                | yes |
//! | WAG014 | complex inline matrix                | yes |
//! | WAG015 | large inline job outputs             | yes |
//! | WAG017 | credentials in run commands          |     |
//! | WAG018 | unpinned actions                     | yes |
//! | WAG051 | circular job `needs`                 |     |

pub mod actions;
pub mod expressions;
pub mod extraction;
pub mod organization;
pub mod security;
pub mod validation;

pub use actions::{TypedActionWrappers, UnpinnedActions};
pub use expressions::{ComplexConditions, ConditionBuilders, HardcodedExpressions, SecretsContext};
pub use extraction::{InlineEnv, InlineMatrix, InlineOutputs};
pub use organization::{DuplicateWorkflowNames, FileTooLarge, MatrixBuilder, RepeatedStepEnv};
pub use security::HardcodedSecretsInRun;
pub use validation::{CircularNeeds, EventTypes};

use crate::edit::EditBuffer;
use crate::unit::SourceUnit;
use regex::Regex;
use wetwire_core::{FixOutcome, LintConfig, Rule, RuleSet};

/// Every built-in rule in id order, thresholds taken from `config`
#[must_use]
pub fn default_rules(config: &LintConfig) -> RuleSet<SourceUnit> {
    let mut set = RuleSet::new()
        .with_rule(TypedActionWrappers)
        .with_rule(ConditionBuilders)
        .with_rule(SecretsContext)
        .with_rule(MatrixBuilder)
        .with_rule(RepeatedStepEnv)
        .with_rule(DuplicateWorkflowNames)
        .with_rule(FileTooLarge::new(config.max_jobs))
        .with_rule(HardcodedExpressions)
        .with_rule(EventTypes)
        .with_rule(ComplexConditions::new(config.max_condition_operators))
        .with_rule(InlineEnv::new(config.max_inline_env))
        .with_rule(InlineMatrix::new(config.max_matrix_keys, config.max_matrix_values))
        .with_rule(InlineOutputs::new(config.max_inline_outputs))
        .with_rule(HardcodedSecretsInRun)
        .with_rule(UnpinnedActions)
        .with_rule(CircularNeeds);
    for id in &config.disabled {
        set.disable(id.clone());
    }
    set
}

/// Compile a built-in pattern, logging instead of panicking
pub(crate) fn pattern(source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::error!(%source, %err, "invalid lint pattern");
            None
        }
    }
}

/// Apply `buffer` and accept the result only if it still parses
pub(crate) fn finish_fix(
    rule: &dyn Rule<Subject = SourceUnit>,
    unit: &SourceUnit,
    buffer: EditBuffer,
) -> FixOutcome {
    if buffer.is_empty() {
        return FixOutcome::unchanged(&unit.text, rule.evaluate(unit));
    }
    let (text, applied) = buffer.apply(&unit.text);
    let fixed = SourceUnit::new(unit.path.clone(), text);
    if !fixed.parses() {
        tracing::warn!(rule = rule.id(), path = %unit.path.display(), "rejecting fix that breaks parsing");
        return FixOutcome::unchanged(&unit.text, rule.evaluate(unit));
    }
    FixOutcome {
        remaining: rule.evaluate(&fixed),
        source: fixed.text,
        applied,
    }
}

/// Quote character of a plain string literal's source text
pub(crate) fn quote_of(literal_source: &str) -> char {
    match literal_source.chars().next() {
        Some('\'') => '\'',
        _ => '"',
    }
}
