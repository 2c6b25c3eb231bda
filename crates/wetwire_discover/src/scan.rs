//! Single-file resource discovery.

use indexmap::{IndexMap, IndexSet};
use std::path::Path;
use wetwire_core::{DeclaredResource, ResourceKind};
use wetwire_plan::{Call, DependencyMap, Expr, ExprKind, Module, PythonParser, SourceParser, StmtKind};
use wetwire_storage::DiscoveryCache;

/// Import path fragment that marks constructor imports by default
pub const DEFAULT_PACKAGE: &str = "wetwire_github";

/// Maps callees to resource kinds, following `from <package> import X as Y`
#[derive(Debug, Clone, Default)]
pub(crate) struct KindResolver {
    aliases: IndexMap<String, ResourceKind>,
}

impl KindResolver {
    pub(crate) fn observe_import(&mut self, module: Option<&str>, package: &str, names: &[wetwire_plan::Alias]) {
        if !module.is_some_and(|m| m.contains(package)) {
            return;
        }
        for alias in names {
            if let Some(kind) = ResourceKind::from_constructor(&alias.name) {
                self.aliases.insert(alias.bound_name().to_string(), kind);
            }
        }
    }

    pub(crate) fn resolve(&self, call: &Call) -> Option<ResourceKind> {
        match &call.func.kind {
            ExprKind::Name(name) => self
                .aliases
                .get(name)
                .copied()
                .or_else(|| ResourceKind::from_constructor(name)),
            ExprKind::Attribute { attr, .. } => ResourceKind::from_constructor(attr),
            _ => None,
        }
    }
}

/// Scans source text for resource declarations
#[derive(Debug, Clone)]
pub struct Scanner<P: SourceParser = PythonParser> {
    parser: P,
    package: String,
}

impl Scanner<PythonParser> {
    /// Create a scanner for Python-syntax files
    #[must_use]
    pub fn new() -> Self {
        Self::with_parser(PythonParser::new())
    }
}

impl Default for Scanner<PythonParser> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SourceParser> Scanner<P> {
    /// Create a scanner with a custom parser
    #[must_use]
    pub fn with_parser(parser: P) -> Self {
        Self {
            parser,
            package: DEFAULT_PACKAGE.to_string(),
        }
    }

    /// Set the package whose imports define constructor aliases
    #[must_use]
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    /// Package whose imports define constructor aliases
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Parser in use
    #[must_use]
    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Parse `text`, logging and returning `None` on a syntax error
    pub(crate) fn parse_soft(&self, text: &str, path: &Path) -> Option<Module> {
        match self.parser.parse(text) {
            Ok(module) => Some(module),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping file with syntax error");
                None
            }
        }
    }

    /// Resources declared in `text`; empty if it does not parse
    #[must_use]
    pub fn scan(&self, text: &str, path: &Path) -> Vec<DeclaredResource> {
        self.parse_soft(text, path)
            .map(|module| self.scan_module(&module, path))
            .unwrap_or_default()
    }

    /// Resources declared in an already parsed module
    ///
    /// A name bound twice keeps only its last binding.
    #[must_use]
    pub fn scan_module(&self, module: &Module, path: &Path) -> Vec<DeclaredResource> {
        let file_path = path.display().to_string();
        let module_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut resolver = KindResolver::default();
        let mut found: IndexMap<String, DeclaredResource> = IndexMap::new();

        module.walk_stmts(&mut |stmt, _| {
            if let StmtKind::ImportFrom { module: from, names, .. } = &stmt.kind {
                resolver.observe_import(from.as_deref(), &self.package, names);
                return;
            }
            let Some((name, value)) = stmt.single_binding() else {
                return;
            };
            let Some(call) = value.as_call() else {
                return;
            };
            let Some(kind) = resolver.resolve(call) else {
                return;
            };

            let mut resource = DeclaredResource::new(
                name,
                kind,
                &file_path,
                module.line_of(stmt.span.start),
                &module_id,
            );
            resource.dependencies = call_dependencies(call);
            found.shift_remove(name);
            found.insert(name.to_string(), resource);
        });

        found.into_values().collect()
    }

    /// Resources declared in the file at `path`
    ///
    /// Consults `cache` first and stores the result after a successful
    /// parse. Unreadable or non-UTF-8 files yield nothing.
    #[must_use]
    pub fn scan_file(&self, path: &Path, cache: Option<&DiscoveryCache>) -> Vec<DeclaredResource> {
        let fingerprint = cache.map(|_| DiscoveryCache::fingerprint(path));
        if let (Some(cache), Some(fp)) = (cache, fingerprint.as_ref()) {
            if let Some(resources) = cache.get_fingerprinted(path, fp) {
                tracing::trace!(path = %path.display(), "cache hit");
                return resources;
            }
        }

        let text = match std::fs::read(path).map(String::from_utf8) {
            Ok(Ok(text)) => text,
            Ok(Err(_)) => {
                tracing::debug!(path = %path.display(), "skipping non-UTF-8 file");
                return Vec::new();
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unreadable file");
                return Vec::new();
            }
        };

        let Some(module) = self.parse_soft(&text, path) else {
            return Vec::new();
        };
        let resources = self.scan_module(&module, path);
        if let (Some(cache), Some(fp)) = (cache, fingerprint.as_ref()) {
            cache.put(path, fp, &resources);
        }
        resources
    }
}

/// Names referenced by a constructor call's arguments, first-seen order
fn call_dependencies(call: &Call) -> IndexSet<String> {
    let mut names = IndexSet::new();
    for arg in &call.args {
        collect_names(arg, &mut names);
    }
    for keyword in &call.keywords {
        collect_names(&keyword.value, &mut names);
    }
    names
}

fn collect_names(expr: &Expr, names: &mut IndexSet<String>) {
    match &expr.kind {
        ExprKind::Name(name) => {
            names.insert(name.clone());
        }
        ExprKind::Dict(items) => {
            for item in items {
                collect_names(&item.value, names);
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
            for item in items {
                collect_names(item, names);
            }
        }
        ExprKind::Call(call) => {
            for arg in &call.args {
                collect_names(arg, names);
            }
            for keyword in &call.keywords {
                collect_names(&keyword.value, names);
            }
        }
        _ => {}
    }
}

/// Resources declared in `text`, using the default scanner
#[must_use]
pub fn scan(text: &str, path: &Path) -> Vec<DeclaredResource> {
    Scanner::new().scan(text, path)
}

/// Resources declared in the file at `path`, using the default scanner
#[must_use]
pub fn scan_file(path: &Path, cache: Option<&DiscoveryCache>) -> Vec<DeclaredResource> {
    Scanner::new().scan_file(path, cache)
}

/// Name → dependencies that are themselves discovered resources
#[must_use]
pub fn build_dependency_map(resources: &[DeclaredResource]) -> DependencyMap {
    let known: IndexSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();
    resources
        .iter()
        .map(|r| {
            let deps = r
                .dependencies
                .iter()
                .filter(|d| known.contains(d.as_str()))
                .cloned()
                .collect();
            (r.name.clone(), deps)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const CI: &str = r#"from wetwire_github.workflow import Job, Workflow as WF
from wetwire_github import workflow
from other_pkg import Job as Fake

BUILD_ENV = {"CI": "1"}

build = Job(runs_on="ubuntu-latest", env=BUILD_ENV)
test = Job(
    runs_on="ubuntu-latest",
    needs=[build],
    steps=[Step(run="make test", env={"X": secret_value})],
)
deploy = workflow.Job(needs=(build, test))
fake = Fake()

ci = WF(name="CI", jobs={"build": build, "test": test, "deploy": deploy})
"#;

    fn path() -> PathBuf {
        PathBuf::from("workflows/ci.py")
    }

    #[test]
    fn test_discovers_kinds_and_aliases() {
        let resources = scan(CI, &path());
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["build", "test", "deploy", "ci"]);
        assert_eq!(resources[3].kind, ResourceKind::Workflow);
        assert_eq!(resources[2].kind, ResourceKind::Job);
        assert_eq!(resources[0].line, 7);
        assert_eq!(resources[1].line, 8);
        assert_eq!(resources[0].module_id, "ci");
        assert_eq!(resources[0].file_path, "workflows/ci.py");
    }

    #[test]
    fn test_dependencies_walk_containers_and_calls() {
        let resources = scan(CI, &path());
        let deps = |name: &str| -> Vec<String> {
            resources
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.dependencies.iter().cloned().collect())
                .unwrap_or_default()
        };
        assert_eq!(deps("build"), vec!["BUILD_ENV"]);
        assert_eq!(deps("test"), vec!["build", "secret_value"]);
        assert_eq!(deps("deploy"), vec!["build", "test"]);
        assert_eq!(deps("ci"), vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_dependency_map_keeps_known_names() {
        let map = build_dependency_map(&scan(CI, &path()));
        assert_eq!(map["build"], Vec::<String>::new());
        assert_eq!(map["test"], vec!["build"]);
        assert_eq!(map["ci"], vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_syntax_error_is_empty() {
        assert!(scan("build = Job(\n", &path()).is_empty());
        assert!(scan("def broken(:\n    pass\n", &path()).is_empty());
    }

    #[test]
    fn test_pathological_nesting_is_empty() {
        let nested = format!("build = Job(env={}1{})\n", "(".repeat(10_000), ")".repeat(10_000));
        assert!(scan(&nested, &path()).is_empty());
        let chain = format!("x = 1{}\n", " + 1".repeat(5_000));
        assert!(scan(&chain, &path()).is_empty());

        let wide = format!("build = Job(timeout_minutes=1{})\n", " + 1".repeat(5_000));
        let resources = scan(&wide, &path());
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "build");
    }

    #[test]
    fn test_last_binding_wins() {
        let src = "a = Job()\nb = Job(needs=[a])\na = Job(needs=[b])\n";
        let resources = scan(src, &path());
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[1].name, "a");
        assert_eq!(resources[1].line, 3);
        assert!(resources[1].depends_on("b"));
    }

    #[test]
    fn test_nested_and_annotated_bindings() {
        let src = "\
if True:
    inner: Job = Job()
def make():
    local = Workflow(jobs={})
    return local
x, y = Job(), Job()
obj.attr = Job()
";
        let resources = scan(src, &path());
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["inner", "local"]);
    }

    #[test]
    fn test_custom_package() {
        let src = "from acme.ci import Job as Task\nt = Task()\n";
        assert!(scan(src, &path()).is_empty());
        let scanner = Scanner::new().with_package("acme");
        assert_eq!(scanner.scan(src, &path()).len(), 1);
    }

    #[test]
    fn test_scan_file_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ci.py");
        std::fs::write(&file, CI).unwrap();
        let cache = DiscoveryCache::new(dir.path().join("cache"));

        let first = scan_file(&file, Some(&cache));
        let second = scan_file(&file, Some(&cache));
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().writes, 1);

        std::fs::write(&file, [0xff, 0xfe, 0x00]).unwrap();
        assert!(scan_file(&file, Some(&cache)).is_empty());
        assert!(scan_file(&dir.path().join("missing.py"), None).is_empty());
    }
}
