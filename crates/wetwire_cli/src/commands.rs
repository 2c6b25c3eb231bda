//! Subcommand implementations.
//!
//! Each command writes its report to `out` and returns whether the check
//! passed; `main` maps that onto the exit code.

use clap::ValueEnum;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use indexmap::IndexMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use wetwire_core::{CancelToken, DeclaredResource, ProjectConfig, Severity, Violation, Workflow};
use wetwire_discover::walk::collect_source_files;
use wetwire_discover::{DirectoryScan, ReusableWorkflow, ScanOptions, Scanner};
use wetwire_lint::{Linter, fix_file, lint_directory, lint_file};
use wetwire_plan::{CompositionError, CompositionValidator, DependencyMap, Graph, TRIGGER_EVENTS};
use wetwire_policy::PolicyEngine;
use wetwire_storage::DiscoveryCache;

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per finding
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Diagram format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Mermaid flowchart
    Mermaid,
    /// Graphviz digraph
    Dot,
}

/// Project root with its loaded configuration
pub struct Context {
    root: PathBuf,
    config: ProjectConfig,
    cache: Option<DiscoveryCache>,
}

impl Context {
    /// Load `wetwire.toml` from `root`, falling back to defaults
    pub fn load(root: &Path, use_cache: bool) -> Result<Self> {
        let config = ProjectConfig::discover(root)
            .wrap_err_with(|| format!("loading configuration from {}", root.display()))?;
        let cache = (use_cache && config.discovery.cache_enabled)
            .then(|| DiscoveryCache::new(root.join(&config.discovery.cache_dir)));
        Ok(Self {
            root: root.to_path_buf(),
            config,
            cache,
        })
    }

    fn target(&self, path: Option<&Path>) -> PathBuf {
        match path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.root.join(p),
            None => self.root.clone(),
        }
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions::from(&self.config.discovery)
    }

    fn scanner(&self) -> Scanner {
        Scanner::new().with_package(self.config.discovery.package.as_str())
    }

    fn scan(&self, path: Option<&Path>) -> DirectoryScan {
        let target = self.target(path);
        if target.is_file() {
            let resources = self.scanner().scan_file(&target, self.cache.as_ref());
            return DirectoryScan {
                resources,
                files_scanned: 1,
                ..DirectoryScan::default()
            };
        }
        let scan = self
            .scanner()
            .scan_directory(&target, &self.scan_options(), self.cache.as_ref(), &CancelToken::new());
        if let Some(cache) = &self.cache {
            let stats = cache.stats();
            tracing::debug!(hits = stats.hits, misses = stats.misses, writes = stats.writes, "cache usage");
        }
        scan
    }

    fn source_files(&self, path: Option<&Path>) -> Vec<PathBuf> {
        let target = self.target(path);
        if target.is_file() {
            vec![target]
        } else {
            collect_source_files(&target, &self.scan_options()).0
        }
    }
}

fn write_violations(out: &mut dyn Write, violations: &[Violation]) -> Result<()> {
    for violation in violations {
        writeln!(out, "{}", violation)?;
        if let Some(suggestion) = &violation.suggestion {
            writeln!(out, "  help: {}", suggestion)?;
        }
    }
    Ok(())
}

fn read_workflow(path: &Path) -> Result<Workflow> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    Workflow::from_json(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

/// Print every declared resource
pub fn list(ctx: &Context, path: Option<&Path>, format: OutputFormat, out: &mut dyn Write) -> Result<bool> {
    let scan = ctx.scan(path);
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&scan.resources)?)?,
        OutputFormat::Text => {
            for DeclaredResource {
                name,
                kind,
                file_path,
                line,
                ..
            } in &scan.resources
            {
                writeln!(out, "{:<8} {:<24} {}:{}", kind.constructor(), name, file_path, line)?;
            }
            writeln!(
                out,
                "{} resource(s) in {} file(s)",
                scan.resources.len(),
                scan.files_scanned
            )?;
        }
    }
    Ok(true)
}

/// Render the dependency graph; fails if it has a cycle
pub fn graph(ctx: &Context, path: Option<&Path>, format: GraphFormat, out: &mut dyn Write) -> Result<bool> {
    let graph = Graph::from_resources(&ctx.scan(path).resources);
    let rendered = match format {
        GraphFormat::Mermaid => graph.to_mermaid(),
        GraphFormat::Dot => graph.to_dot(),
    };
    writeln!(out, "{}", rendered)?;
    match graph.topological_sort() {
        Ok(_) => Ok(true),
        Err(cycle) => {
            writeln!(out, "error: {}", cycle)?;
            Ok(false)
        }
    }
}

/// Run style rules, optionally applying fixes; fails if anything remains
pub fn lint(
    ctx: &Context,
    path: Option<&Path>,
    fix: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<bool> {
    let linter = Linter::new(&ctx.config.lint);
    let target = ctx.target(path);

    let mut violations = Vec::new();
    let mut files = 0;
    if fix {
        for file in ctx.source_files(path) {
            let result = fix_file(&file, &linter, true).wrap_err_with(|| format!("fixing {}", file.display()))?;
            if result.fixed_count > 0 && format == OutputFormat::Text {
                writeln!(out, "Fixed {} issue(s) in {}", result.fixed_count, file.display())?;
            }
            violations.extend(result.remaining);
            files += 1;
        }
    } else if target.is_file() {
        violations = lint_file(&target, &linter)?.violations;
        files = 1;
    } else {
        for result in lint_directory(&target, &ctx.scan_options(), &linter) {
            violations.extend(result.violations);
            files += 1;
        }
    }

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&violations)?)?,
        OutputFormat::Text => {
            write_violations(out, &violations)?;
            writeln!(out, "{} violation(s) in {} file(s)", violations.len(), files)?;
        }
    }
    Ok(violations.is_empty())
}

/// Evaluate object rules; fails at or above the gating severity
pub fn policy(
    ctx: &Context,
    file: &Path,
    preset: Option<String>,
    fail_on: Option<Severity>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<bool> {
    let workflow = read_workflow(&ctx.target(Some(file)))?;
    let mut config = ctx.config.policy.clone();
    if preset.is_some() {
        config.preset = preset;
    }
    let fail_on = fail_on.unwrap_or(config.fail_on);
    let report = PolicyEngine::from_config(&config)?.evaluate(&workflow);
    let passed = report.passed(fail_on);

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        OutputFormat::Text => {
            write_violations(out, &report.violations)?;
            let summary: Vec<String> = [
                Severity::Critical,
                Severity::High,
                Severity::Medium,
                Severity::Low,
                Severity::Info,
            ]
            .into_iter()
            .map(|s| format!("{}={}", s, report.count(s)))
            .collect();
            writeln!(out, "Summary: {}", summary.join(" "))?;
            if passed {
                writeln!(out, "PASSED")?;
            } else {
                writeln!(out, "FAILED (fail-on {})", fail_on)?;
            }
        }
    }
    Ok(passed)
}

/// Every composition problem in a resolved workflow
fn composition_errors(workflow: &Workflow) -> Vec<CompositionError> {
    let deps: DependencyMap = workflow
        .jobs
        .iter()
        .map(|(id, job)| (id.clone(), job.needs.clone()))
        .collect();
    let mut errors = CompositionValidator::new().check_all(&deps);

    let mut valid: Vec<String> = TRIGGER_EVENTS.iter().map(|e| e.to_string()).collect();
    valid.sort();
    for event in workflow.on.keys() {
        if !TRIGGER_EVENTS.contains(&event.as_str()) {
            errors.push(CompositionError::UnknownTrigger {
                event: event.clone(),
                valid: valid.clone(),
            });
        }
    }
    errors
}

/// Check dependencies and triggers; fails on any error
pub fn validate(ctx: &Context, file: &Path, out: &mut dyn Write) -> Result<bool> {
    let workflow = read_workflow(&ctx.target(Some(file)))?;
    let errors = composition_errors(&workflow);
    for error in &errors {
        writeln!(out, "error: {}", error)?;
    }
    if errors.is_empty() {
        writeln!(out, "{}: {} job(s), ok", file.display(), workflow.jobs.len())?;
    }
    Ok(errors.is_empty())
}

/// Print reusable workflow interfaces as JSON
pub fn reusable(ctx: &Context, path: Option<&Path>, out: &mut dyn Write) -> Result<bool> {
    let scanner = ctx.scanner();
    let mut found: IndexMap<String, Vec<ReusableWorkflow>> = IndexMap::new();
    for file in ctx.source_files(path) {
        let text = match std::fs::read_to_string(&file) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(path = %file.display(), %err, "skipping file");
                continue;
            }
        };
        let workflows = scanner.reusable_workflows(&text, &file);
        if !workflows.is_empty() {
            found.insert(file.display().to_string(), workflows);
        }
    }
    writeln!(out, "{}", serde_json::to_string_pretty(&found)?)?;
    Ok(true)
}

/// Drop every cache entry
pub fn clear_cache(ctx: &Context, out: &mut dyn Write) -> Result<bool> {
    match &ctx.cache {
        Some(cache) => writeln!(out, "Removed {} cache entries from {}", cache.clear(), cache.dir().display())?,
        None => writeln!(out, "Cache disabled")?,
    }
    Ok(true)
}
