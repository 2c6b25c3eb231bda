//! Category-based split suggestions for files with too many jobs.

use indexmap::IndexMap;
use std::fmt;

/// Job category, checked in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCategory {
    /// Scanning and audits
    Security,
    /// Cleanup and scheduled chores
    Maintenance,
    /// Deployment and infrastructure
    Deploy,
    /// Packaging and publishing
    Release,
    /// Build, test, lint
    Ci,
    /// Everything else
    Main,
}

const SECURITY: &[&str] = &[
    "security", "scan", "codeql", "dependabot", "vulnerability", "snyk", "trivy", "audit", "sast",
    "dast",
];
const MAINTENANCE: &[&str] = &[
    "cleanup", "clean", "stale", "prune", "expire", "archive", "schedule", "cron", "nightly",
    "weekly", "maintenance",
];
const DEPLOY: &[&str] = &[
    "deploy", "deployment", "staging", "production", "prod", "cdk", "terraform", "infrastructure",
    "infra", "provision",
];
const RELEASE: &[&str] = &[
    "release", "publish", "upload", "package", "dist", "npm", "pypi", "docker", "registry", "tag",
    "version",
];
const CI: &[&str] = &[
    "build", "test", "lint", "format", "check", "validate", "typecheck", "type_check", "coverage",
    "analyze", "compile", "ci",
];

const CI_STEPS: &[&str] = &[
    "pytest", "npm test", "yarn test", "go test", "cargo test", "make test", "ruff", "eslint",
    "flake8", "mypy", "pyright", "tsc --noemit",
];
const DEPLOY_STEPS: &[&str] = &[
    "deploy",
    "terraform apply",
    "kubectl apply",
    "aws-actions/configure-aws-credentials",
    "azure/login",
    "google-github-actions/auth",
];
const RELEASE_STEPS: &[&str] = &[
    "npm publish", "twine upload", "cargo publish", "docker push", "gh release",
    "actions/create-release",
];

impl JobCategory {
    /// File stem used in suggestions
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Maintenance => "maintenance",
            Self::Deploy => "deploy",
            Self::Release => "release",
            Self::Ci => "ci",
            Self::Main => "main",
        }
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a job from its name, falling back to its step contents
#[must_use]
pub fn categorize_job(name: &str, steps: &[&str]) -> JobCategory {
    let name = name.to_lowercase().replace('-', "_");
    let by_name = [
        (SECURITY, JobCategory::Security),
        (MAINTENANCE, JobCategory::Maintenance),
        (DEPLOY, JobCategory::Deploy),
        (RELEASE, JobCategory::Release),
        (CI, JobCategory::Ci),
    ];
    if let Some((_, category)) = by_name
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| name.contains(k)))
    {
        return *category;
    }

    let content = steps.join(" ").to_lowercase();
    let by_steps = [
        (CI_STEPS, JobCategory::Ci),
        (DEPLOY_STEPS, JobCategory::Deploy),
        (RELEASE_STEPS, JobCategory::Release),
    ];
    by_steps
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| content.contains(p)))
        .map_or(JobCategory::Main, |(_, category)| *category)
}

/// Group job names into files of at most `max_per_file` jobs
///
/// Keys are file stems. A category that overflows is split into numbered
/// chunks (`ci1`, `ci2`, ...). Categories appear in first-seen order.
#[must_use]
pub fn suggest_splits(jobs: &[&str], max_per_file: usize) -> IndexMap<String, Vec<String>> {
    let max_per_file = max_per_file.max(1);
    let mut by_category: IndexMap<JobCategory, Vec<String>> = IndexMap::new();
    for job in jobs {
        by_category
            .entry(categorize_job(job, &[]))
            .or_default()
            .push((*job).to_string());
    }

    let mut files = IndexMap::new();
    for (category, names) in by_category {
        if names.len() <= max_per_file {
            files.insert(category.to_string(), names);
        } else {
            for (i, chunk) in names.chunks(max_per_file).enumerate() {
                files.insert(format!("{}{}", category, i + 1), chunk.to_vec());
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_by_name() {
        assert_eq!(categorize_job("build", &[]), JobCategory::Ci);
        assert_eq!(categorize_job("deploy-production", &[]), JobCategory::Deploy);
        assert_eq!(categorize_job("vulnerability_check", &[]), JobCategory::Security);
        assert_eq!(categorize_job("nightly_cleanup", &[]), JobCategory::Maintenance);
        assert_eq!(categorize_job("publish_pypi", &[]), JobCategory::Release);
        assert_eq!(categorize_job("docs", &[]), JobCategory::Main);
    }

    #[test]
    fn test_categories_by_steps() {
        assert_eq!(categorize_job("job1", &["uv run pytest"]), JobCategory::Ci);
        assert_eq!(categorize_job("job2", &["kubectl apply -f k8s/"]), JobCategory::Deploy);
        assert_eq!(categorize_job("job3", &["twine upload dist/*"]), JobCategory::Release);
        assert_eq!(categorize_job("job4", &["echo hi"]), JobCategory::Main);
    }

    #[test]
    fn test_splits_chunk_overflowing_categories() {
        let jobs = ["build", "test", "lint", "deploy", "docs"];
        let splits = suggest_splits(&jobs, 2);
        assert_eq!(splits.keys().collect::<Vec<_>>(), vec!["ci1", "ci2", "deploy", "main"]);
        assert_eq!(splits["ci1"], vec!["build", "test"]);
        assert_eq!(splits["ci2"], vec!["lint"]);
    }
}
