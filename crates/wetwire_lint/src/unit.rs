//! The subject of every style rule.

use std::path::{Path, PathBuf};
use wetwire_core::{CoreError, CoreResult, Location};
use wetwire_plan::{Call, Expr, Module, PythonParser, SourceParser};

/// One source file: path, text, and its parse (if it parses)
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// File path as reported in violations
    pub path: PathBuf,
    /// Full text
    pub text: String,
    /// Parsed module, `None` on a syntax error
    pub module: Option<Module>,
}

impl SourceUnit {
    /// Parse `text` with the default parser
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self::with_parser(&PythonParser::new(), path, text)
    }

    /// Parse `text` with a custom parser
    #[must_use]
    pub fn with_parser(parser: &dyn SourceParser, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let path = path.into();
        let text = text.into();
        let module = match parser.parse(&text) {
            Ok(module) => Some(module),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "source does not parse");
                None
            }
        };
        Self { path, text, module }
    }

    /// Read and parse a file
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] if the file cannot be read and
    /// [`CoreError::InvalidEncoding`] if it is not UTF-8
    pub fn load(path: &Path) -> CoreResult<Self> {
        let bytes = std::fs::read(path).map_err(|err| CoreError::io(path, &err))?;
        let text = String::from_utf8(bytes).map_err(|_| CoreError::InvalidEncoding)?;
        Ok(Self::new(path, text))
    }

    /// Check if the text parsed
    #[must_use]
    pub fn parses(&self) -> bool {
        self.module.is_some()
    }

    /// Path as a display string
    #[must_use]
    pub fn file_path(&self) -> String {
        self.path.display().to_string()
    }

    /// Source location of a byte offset
    #[must_use]
    pub fn location(&self, offset: usize) -> Location {
        let (line, column) = self
            .module
            .as_ref()
            .map_or((1, 1), |m| m.lines.line_col(offset));
        Location::source(self.file_path(), line, column)
    }

    /// Every call to a constructor named `name`, with its expression
    #[must_use]
    pub fn calls_to(&self, name: &str) -> Vec<(&Expr, &Call)> {
        self.module
            .as_ref()
            .map(|m| m.calls().into_iter().filter(|(_, c)| c.is_call_to(name)).collect())
            .unwrap_or_default()
    }

    /// Every string literal with its decoded value
    #[must_use]
    pub fn string_literals(&self) -> Vec<(&Expr, &str)> {
        let mut out = Vec::new();
        if let Some(module) = &self.module {
            module.walk_exprs(&mut |expr| {
                if let Some(s) = expr.as_str() {
                    out.push((expr, s));
                }
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_locations_and_calls() {
        let unit = SourceUnit::new("ci.py", "a = Job()\nb = Step(run=\"x\")\nc = wf.Step()\n");
        assert!(unit.parses());
        let steps = unit.calls_to("Step");
        assert_eq!(steps.len(), 2);
        assert_eq!(unit.location(steps[0].0.span.start), Location::source("ci.py", 2, 5));
        assert_eq!(unit.string_literals().len(), 1);
    }

    #[test]
    fn test_unparsable_unit() {
        let unit = SourceUnit::new("bad.py", "a = (");
        assert!(!unit.parses());
        assert!(unit.calls_to("Job").is_empty());
        assert_eq!(unit.location(3), Location::source("bad.py", 1, 1));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = SourceUnit::load(&dir.path().join("nope.py")).unwrap_err();
        assert!(matches!(missing, CoreError::Io { .. }));

        let binary = dir.path().join("bin.py");
        std::fs::write(&binary, [0xff, 0x00]).unwrap();
        assert_eq!(SourceUnit::load(&binary).unwrap_err(), CoreError::InvalidEncoding);
    }
}
