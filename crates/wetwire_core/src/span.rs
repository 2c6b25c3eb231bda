//! Source positions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range `[start, end)` into a source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Span {
    /// First byte
    pub start: usize,
    /// One past the last byte
    pub end: usize,
}

impl Span {
    /// Create a new span
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Empty span at `offset`
    #[must_use]
    pub const fn point(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    /// Smallest span covering both
    #[must_use]
    pub fn join(self, other: Span) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Length in bytes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check if empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Check if `other` lies entirely within this span
    #[must_use]
    pub const fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Check if two spans share at least one byte
    #[must_use]
    pub const fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Text covered by this span, empty if out of range
    #[must_use]
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.start..self.end).unwrap_or("")
    }
}

/// Where a violation was found
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    /// Position in a source file. Lines and columns are 1-based; the column
    /// counts bytes from the start of the line.
    Source {
        /// File path as given to the scanner
        file_path: String,
        /// 1-based line
        line: usize,
        /// 1-based byte column
        column: usize,
    },
    /// Logical path inside a resolved configuration, e.g. `ci/build/step 2`
    Object {
        /// Slash-separated path
        path: String,
    },
}

impl Location {
    /// Source location
    #[must_use]
    pub fn source(file_path: impl Into<String>, line: usize, column: usize) -> Self {
        Self::Source {
            file_path: file_path.into(),
            line,
            column,
        }
    }

    /// Logical object location
    #[must_use]
    pub fn object(path: impl Into<String>) -> Self {
        Self::Object { path: path.into() }
    }

    /// Line number for source locations
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Source { line, .. } => Some(*line),
            Self::Object { .. } => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source {
                file_path,
                line,
                column,
            } => write!(f, "{}:{}:{}", file_path, line, column),
            Self::Object { path } => write!(f, "{}", path),
        }
    }
}

/// Byte offset to line/column lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    /// Index the line starts of `text`
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// 1-based `(line, column)` of a byte offset
    #[must_use]
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// Byte offset where the line containing `offset` begins
    #[must_use]
    pub fn line_start(&self, offset: usize) -> usize {
        let (line, _) = self.line_col(offset);
        self.line_starts[line - 1]
    }

    /// Number of lines
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_span_relations() {
        let outer = Span::new(2, 10);
        assert!(outer.contains(&Span::new(3, 5)));
        assert!(!outer.contains(&Span::new(8, 11)));
        assert!(outer.overlaps(&Span::new(9, 12)));
        assert!(!outer.overlaps(&Span::new(10, 12)));
        assert_eq!(outer.join(Span::new(0, 4)), Span::new(0, 10));
        assert_eq!(Span::new(1, 4).slice("abcdef"), "bcd");
        assert_eq!(Span::new(4, 40).slice("abcdef"), "");
    }

    #[test]
    fn test_line_index() {
        let text = "a = 1\nbb = 2\n\nc = 3";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_col(0), (1, 1));
        assert_eq!(index.line_col(6), (2, 1));
        assert_eq!(index.line_col(9), (2, 4));
        assert_eq!(index.line_col(14), (4, 1));
        assert_eq!(index.line_start(10), 6);
        assert_eq!(index.line_start(5), 0);
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::source("ci.py", 3, 7).to_string(), "ci.py:3:7");
        assert_eq!(Location::object("ci/build").to_string(), "ci/build");
        assert_eq!(Location::object("ci").line(), None);
    }

    proptest! {
        #[test]
        fn test_line_col_matches_naive_count(text in "[a-c\\n]{0,40}", pick in 0usize..41) {
            let offset = pick.min(text.len());
            let index = LineIndex::new(&text);
            let before = &text[..offset];
            let line = before.matches('\n').count() + 1;
            let column = offset - before.rfind('\n').map_or(0, |i| i + 1) + 1;
            prop_assert_eq!(index.line_col(offset), (line, column));
            prop_assert!(index.line_start(offset) <= offset);
        }
    }
}
