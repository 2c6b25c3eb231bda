//! Action reference rules: typed wrappers and version pinning.

use super::{finish_fix, quote_of};
use crate::edit::{Edit, EditBuffer};
use crate::unit::SourceUnit;
use wetwire_core::{Category, FixOutcome, Fixable, Rule, Severity, Violation};
use wetwire_plan::{Call, Expr};

/// Actions with a typed wrapper, and the wrapper's name
pub const ACTION_WRAPPERS: &[(&str, &str)] = &[
    ("actions/attest-build-provenance", "attest_build_provenance"),
    ("actions/cache", "cache"),
    ("actions/checkout", "checkout"),
    ("actions/configure-pages", "configure_pages"),
    ("actions/create-github-app-token", "create_github_app_token"),
    ("actions/dependency-review-action", "dependency_review"),
    ("actions/deploy-pages", "deploy_pages"),
    ("actions/download-artifact", "download_artifact"),
    ("actions/first-interaction", "first_interaction"),
    ("actions/github-script", "github_script"),
    ("actions/labeler", "labeler"),
    ("actions/setup-dotnet", "setup_dotnet"),
    ("actions/setup-go", "setup_go"),
    ("actions/setup-java", "setup_java"),
    ("actions/setup-node", "setup_node"),
    ("actions/setup-python", "setup_python"),
    ("actions/stale", "stale"),
    ("actions/upload-artifact", "upload_artifact"),
    ("actions/upload-pages-artifact", "upload_pages_artifact"),
    ("actions/upload-release-asset", "upload_release_asset"),
    ("aws-actions/configure-aws-credentials", "configure_aws_credentials"),
    ("codecov/codecov-action", "codecov"),
    ("docker/build-push-action", "docker_build_push"),
    ("docker/login-action", "docker_login"),
    ("docker/metadata-action", "docker_metadata"),
    ("docker/setup-buildx-action", "setup_buildx"),
    ("peaceiris/actions-gh-pages", "gh_pages"),
    ("peter-evans/create-pull-request", "create_pull_request"),
    ("ruby/setup-ruby", "setup_ruby"),
    ("softprops/action-gh-release", "gh_release"),
];

/// Default version tags used when pinning common actions
pub const ACTION_VERSIONS: &[(&str, &str)] = &[
    ("actions/checkout", "v4"),
    ("actions/setup-python", "v5"),
    ("actions/setup-node", "v4"),
    ("actions/setup-go", "v5"),
    ("actions/setup-java", "v4"),
    ("actions/cache", "v4"),
    ("actions/upload-artifact", "v4"),
    ("actions/download-artifact", "v4"),
    ("actions/github-script", "v7"),
    ("actions/stale", "v9"),
    ("actions/labeler", "v5"),
];

const BRANCH_NAMES: &[&str] = &["main", "master", "develop", "dev", "latest", "trunk"];

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// `Step(uses="...")` calls whose `uses` is a plain string
fn step_uses(unit: &SourceUnit) -> Vec<(&Expr, &Call, &Expr, &str)> {
    unit.calls_to("Step")
        .into_iter()
        .filter_map(|(expr, call)| {
            let uses = call.keyword("uses")?;
            Some((expr, call, uses, uses.as_str()?))
        })
        .collect()
}

/// WAG001: prefer typed wrappers over raw `uses` strings for known actions
#[derive(Debug, Clone, Copy, Default)]
pub struct TypedActionWrappers;

impl Rule for TypedActionWrappers {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG001"
    }

    fn description(&self) -> String {
        "Use typed action wrappers instead of raw 'uses' strings".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        step_uses(unit)
            .into_iter()
            .filter_map(|(expr, _, _, uses)| {
                let action = uses.split('@').next().unwrap_or(uses);
                let wrapper = lookup(ACTION_WRAPPERS, action)?;
                Some(
                    Violation::new(
                        self.id(),
                        self.severity(),
                        format!("Use typed action wrapper instead of raw string '{}'", uses),
                        unit.location(expr.span.start),
                    )
                    .with_suggestion(format!("Import and use the typed wrapper {}()", wrapper)),
                )
            })
            .collect()
    }

    fn as_fixable(&self) -> Option<&dyn Fixable<Subject = SourceUnit>> {
        Some(self)
    }
}

impl Fixable for TypedActionWrappers {
    /// Only a bare `Step(uses="action@ref")` is rewritten; any other
    /// argument would be lost.
    fn fix(&self, unit: &SourceUnit) -> FixOutcome {
        let mut buffer = EditBuffer::new();
        for (expr, call, _, uses) in step_uses(unit) {
            if !call.args.is_empty() || call.keywords.len() != 1 {
                continue;
            }
            let Some((action, reference)) = uses.split_once('@') else {
                continue;
            };
            if reference.is_empty() {
                continue;
            }
            if let Some(wrapper) = lookup(ACTION_WRAPPERS, action) {
                buffer.push(Edit::replace(expr.span, format!("{}()", wrapper)));
            }
        }
        finish_fix(self, unit, buffer)
    }
}

/// How an action reference is pinned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pin<'a> {
    /// Local action or pinned to a version tag or full commit SHA
    Pinned,
    /// No `@ref` at all
    Unpinned,
    /// Pinned to something that looks like a branch
    Branch(&'a str),
}

/// Classify an action reference
#[must_use]
pub fn classify_pin(action: &str) -> Pin<'_> {
    if action.starts_with("./") {
        return Pin::Pinned;
    }
    let Some((_, reference)) = action.split_once('@') else {
        return Pin::Unpinned;
    };
    let is_sha = reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit());
    let is_version = reference.starts_with('v') || reference.contains('.');
    if is_sha || is_version {
        Pin::Pinned
    } else {
        Pin::Branch(reference)
    }
}

/// `owner/repo` part of an action reference
fn action_repo(action: &str) -> &str {
    let name = action.split('@').next().unwrap_or(action);
    match name.match_indices('/').nth(1) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// WAG018: actions must be pinned to a version tag or commit SHA
#[derive(Debug, Clone, Copy, Default)]
pub struct UnpinnedActions;

impl Rule for UnpinnedActions {
    type Subject = SourceUnit;

    fn id(&self) -> &'static str {
        "WAG018"
    }

    fn description(&self) -> String {
        "Detect unpinned actions that may pose security risks".to_string()
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, unit: &SourceUnit) -> Vec<Violation> {
        let mut found = Vec::new();
        for (expr, _, _, uses) in step_uses(unit) {
            let default = lookup(ACTION_VERSIONS, action_repo(uses));
            let location = unit.location(expr.span.start);
            match classify_pin(uses) {
                Pin::Pinned => {}
                Pin::Unpinned => {
                    let suggestion = format!("Pin to a version, e.g., {}@{}", uses, default.unwrap_or("v4"));
                    found.push(
                        Violation::new(
                            self.id(),
                            self.severity(),
                            format!("Action '{}' is unpinned (no version specified)", uses),
                            location,
                        )
                        .with_suggestion(suggestion),
                    );
                }
                Pin::Branch(reference) => {
                    let note = if BRANCH_NAMES.contains(&reference.to_lowercase().as_str()) {
                        format!(" Branch '{}' can change at any time.", reference)
                    } else {
                        String::new()
                    };
                    let suggestion = match default {
                        Some(version) => format!("Pin to @{} or a full commit SHA", version),
                        None => "Pin to a version tag (e.g., @v4) or full commit SHA".to_string(),
                    };
                    found.push(
                        Violation::new(
                            self.id(),
                            self.severity(),
                            format!("Action '{}' is pinned to branch '{}'.{}", uses, reference, note),
                            location,
                        )
                        .with_suggestion(suggestion),
                    );
                }
            }
        }
        found
    }

    fn as_fixable(&self) -> Option<&dyn Fixable<Subject = SourceUnit>> {
        Some(self)
    }
}

impl Fixable for UnpinnedActions {
    /// Adds the default tag to unpinned references of well-known actions.
    /// Branch pins are left for a human to decide.
    fn fix(&self, unit: &SourceUnit) -> FixOutcome {
        let mut buffer = EditBuffer::new();
        for (_, _, literal, uses) in step_uses(unit) {
            if classify_pin(uses) != Pin::Unpinned {
                continue;
            }
            if let Some(version) = lookup(ACTION_VERSIONS, uses) {
                let quote = quote_of(literal.span.slice(&unit.text));
                buffer.push(Edit::replace(
                    literal.span,
                    format!("{q}{}@{}{q}", uses, version, q = quote),
                ));
            }
        }
        finish_fix(self, unit, buffer)
    }
}
