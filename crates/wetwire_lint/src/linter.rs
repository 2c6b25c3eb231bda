//! Check and fix drivers over a rule set.

use crate::rules::default_rules;
use crate::unit::SourceUnit;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use wetwire_core::{CoreError, CoreResult, LintConfig, RuleSet, Violation};
use wetwire_discover::ScanOptions;
use wetwire_discover::walk::{collect_source_files, default_workers};

/// Upper bound on whole-rule-set fix passes over one file
pub const MAX_FIX_PASSES: usize = 8;

/// Violations found in one file
#[derive(Debug, Clone, PartialEq)]
pub struct LintResult {
    /// File checked
    pub path: PathBuf,
    /// Violations in rule order
    pub violations: Vec<Violation>,
    /// Whether the file parsed; unparsable files report nothing
    pub parsed: bool,
}

impl LintResult {
    /// Check if nothing was reported
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Outcome of fixing one file
#[derive(Debug, Clone, PartialEq)]
pub struct FixResult {
    /// Rewritten text
    pub source: String,
    /// Rewrites applied across all passes
    pub fixed_count: usize,
    /// What a check of the rewritten text still reports
    pub remaining: Vec<Violation>,
}

/// Runs a rule set over source units
pub struct Linter {
    rules: RuleSet<SourceUnit>,
}

impl Linter {
    /// Linter with the built-in rules configured by `config`
    #[must_use]
    pub fn new(config: &LintConfig) -> Self {
        Self::from_rules(default_rules(config))
    }

    /// Linter over an explicit rule set
    #[must_use]
    pub fn from_rules(rules: RuleSet<SourceUnit>) -> Self {
        Self { rules }
    }

    /// The rule set
    #[must_use]
    pub fn rules(&self) -> &RuleSet<SourceUnit> {
        &self.rules
    }

    /// Run every enabled rule
    #[must_use]
    pub fn check(&self, unit: &SourceUnit) -> LintResult {
        let violations = if unit.parses() {
            self.rules.evaluate(unit)
        } else {
            Vec::new()
        };
        LintResult {
            path: unit.path.clone(),
            violations,
            parsed: unit.parses(),
        }
    }

    /// Apply every enabled fixable rule, one after another, until a full
    /// pass changes nothing. Each rule sees the text left by the previous
    /// one.
    #[must_use]
    pub fn fix(&self, unit: &SourceUnit) -> FixResult {
        let mut current = unit.clone();
        let mut fixed_count = 0;

        for pass in 0..MAX_FIX_PASSES {
            if !current.parses() {
                break;
            }
            let mut applied_this_pass = 0;
            for rule in self.rules.iter() {
                let Some(fixable) = rule.as_fixable() else {
                    continue;
                };
                let outcome = fixable.fix(&current);
                if outcome.applied == 0 {
                    continue;
                }
                tracing::debug!(rule = rule.id(), applied = outcome.applied, pass, "fix applied");
                applied_this_pass += outcome.applied;
                current = SourceUnit::new(current.path.clone(), outcome.source);
            }
            fixed_count += applied_this_pass;
            if applied_this_pass == 0 {
                break;
            }
        }

        FixResult {
            remaining: self.check(&current).violations,
            source: current.text,
            fixed_count,
        }
    }
}

impl Default for Linter {
    fn default() -> Self {
        Self::new(&LintConfig::default())
    }
}

/// Read and check one file
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not UTF-8
pub fn lint_file(path: &Path, linter: &Linter) -> CoreResult<LintResult> {
    let unit = SourceUnit::load(path)?;
    Ok(linter.check(&unit))
}

/// Fix one file, writing it back when `write` is set and something changed
///
/// # Errors
///
/// Returns an error if the file cannot be read or written
pub fn fix_file(path: &Path, linter: &Linter, write: bool) -> CoreResult<FixResult> {
    let unit = SourceUnit::load(path)?;
    let result = linter.fix(&unit);
    if write && result.source != unit.text {
        std::fs::write(path, &result.source).map_err(|err| CoreError::io(path, &err))?;
    }
    Ok(result)
}

/// Check every source file under `dir` in parallel, in path order.
/// Unreadable files are logged and left out.
#[must_use]
pub fn lint_directory(dir: &Path, options: &ScanOptions, linter: &Linter) -> Vec<LintResult> {
    let _span = tracing::info_span!("lint_directory", dir = %dir.display()).entered();
    let (files, skipped) = collect_source_files(dir, options);
    if skipped > 0 {
        tracing::debug!(skipped, "entries skipped while walking");
    }

    let workers = if options.workers == 0 {
        default_workers()
    } else {
        options.workers
    };
    tracing::debug!(files = files.len(), workers, "linting source files");

    let lint_one = |path: &PathBuf| match lint_file(path, linter) {
        Ok(result) => Some(result),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "skipping file");
            None
        }
    };

    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| files.par_iter().filter_map(lint_one).collect()),
        Err(err) => {
            tracing::warn!(error = %err, "worker pool unavailable, linting sequentially");
            files.iter().filter_map(lint_one).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    const PIPELINE: &str = "\
from wetwire_github.workflow import Job, Step, Workflow

build = Job(
    runs_on=\"ubuntu-latest\",
    steps=[
        Step(uses=\"actions/checkout@v4\"),
        Step(run=\"make\", env={\"A\": \"1\", \"B\": \"2\", \"C\": \"3\", \"D\": \"4\"}),
    ],
)

ci = Workflow(name=\"CI\", jobs={\"build\": build})
";

    fn ids(violations: &[Violation]) -> Vec<&str> {
        violations.iter().map(|v| v.rule_id.as_str()).collect()
    }

    #[test]
    fn test_check_reports_inline_env_once() {
        let result = Linter::default().check(&SourceUnit::new("ci.py", PIPELINE));
        assert!(result.parsed);
        assert_eq!(ids(&result.violations), vec!["WAG001", "WAG013"]);
    }

    #[test]
    fn test_fix_then_check_is_clean() {
        let linter = Linter::default();
        let result = linter.fix(&SourceUnit::new("ci.py", PIPELINE));
        assert_eq!(result.fixed_count, 2);
        assert!(result.remaining.is_empty(), "{:?}", result.remaining);
        assert!(result.source.contains("checkout()"));
        assert!(result.source.contains("step_env = {\"A\": \"1\""));
        assert!(result.source.contains("env=step_env)"));

        let rechecked = linter.check(&SourceUnit::new("ci.py", result.source.as_str()));
        assert!(rechecked.is_clean());
    }

    #[test]
    fn test_unparsable_file_is_left_alone() {
        let linter = Linter::default();
        let unit = SourceUnit::new("bad.py", "a = Step(env={\"A\": 1, \"B\": 2, \"C\": 3, \"D\": 4}\n");
        let check = linter.check(&unit);
        assert!(!check.parsed);
        assert!(check.is_clean());

        let fixed = linter.fix(&unit);
        assert_eq!(fixed.fixed_count, 0);
        assert_eq!(fixed.source, unit.text);
    }

    #[test]
    fn test_disabled_rules_do_not_fix() {
        let config = LintConfig {
            disabled: vec!["WAG001".to_string(), "WAG013".to_string()],
            ..LintConfig::default()
        };
        let result = Linter::new(&config).fix(&SourceUnit::new("ci.py", PIPELINE));
        assert_eq!(result.fixed_count, 0);
        assert_eq!(result.source, PIPELINE);
    }

    #[test]
    fn test_lint_and_fix_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ci.py"), PIPELINE).unwrap();
        fs::write(dir.path().join("clean.py"), "x = 1\n").unwrap();
        fs::create_dir(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("__pycache__").join("ci.py"), PIPELINE).unwrap();

        let linter = Linter::default();
        let results = lint_directory(dir.path(), &ScanOptions::default(), &linter);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, dir.path().join("ci.py"));
        assert_eq!(results[0].violations.len(), 2);
        assert!(results[1].is_clean());

        let path = dir.path().join("ci.py");
        let dry = fix_file(&path, &linter, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), PIPELINE);
        let written = fix_file(&path, &linter, true).unwrap();
        assert_eq!(dry, written);
        assert_eq!(fs::read_to_string(&path).unwrap(), written.source);
        assert!(lint_file(&path, &linter).unwrap().is_clean());
    }

    #[test]
    fn test_single_worker_matches_default() {
        let dir = TempDir::new().unwrap();
        for i in 0..6 {
            fs::write(dir.path().join(format!("m{}.py", i)), PIPELINE).unwrap();
        }
        let linter = Linter::default();
        let single = ScanOptions {
            workers: 1,
            ..ScanOptions::default()
        };
        let sequential = lint_directory(dir.path(), &single, &linter);
        assert_eq!(sequential.len(), 6);
        assert_eq!(sequential, lint_directory(dir.path(), &ScanOptions::default(), &linter));
    }

    #[test]
    fn test_pathological_sources_do_not_crash() {
        let linter = Linter::default();

        let chain = SourceUnit::new("chain.py", format!("x = 1{}\n", " + 1".repeat(5_000)));
        let check = linter.check(&chain);
        assert!(check.parsed);
        assert!(check.is_clean());
        let fixed = linter.fix(&chain);
        assert_eq!(fixed.fixed_count, 0);
        assert_eq!(fixed.source, chain.text);

        let nested = SourceUnit::new("nested.py", format!("x = {}1{}\n", "(".repeat(10_000), ")".repeat(10_000)));
        let check = linter.check(&nested);
        assert!(!check.parsed);
        assert!(check.is_clean());
        assert_eq!(linter.fix(&nested).fixed_count, 0);
    }

    fn step_source(index: usize, keys: usize) -> String {
        let env: Vec<String> = (0..keys).map(|k| format!("\"S{}K{}\": \"{}\"", index, k, k)).collect();
        format!("Step(run=\"make\", env={{{}}})", env.join(", "))
    }

    proptest! {
        #[test]
        fn test_fix_is_idempotent(key_counts in prop::collection::vec(0usize..7, 1..4), bound in any::<bool>()) {
            let steps: Vec<String> = key_counts.iter().enumerate().map(|(i, &n)| step_source(i, n)).collect();
            let src = if bound {
                steps.iter().enumerate().map(|(i, s)| format!("s{} = {}\n", i, s)).collect::<String>()
            } else {
                format!("job = Job(steps=[{}])\n", steps.join(", "))
            };

            let linter = Linter::default();
            let first = linter.fix(&SourceUnit::new("ci.py", src.as_str()));
            let expected = key_counts.iter().filter(|&&n| n > 3).count();
            prop_assert_eq!(first.fixed_count, expected);
            prop_assert!(first.remaining.is_empty());

            let second = linter.fix(&SourceUnit::new("ci.py", first.source.as_str()));
            prop_assert_eq!(second.fixed_count, 0);
            prop_assert_eq!(second.source, first.source);
        }
    }
}
