//! Span edits over an immutable source buffer.
//!
//! Edits are collected against the original text, then applied together in
//! descending offset order so no edit shifts the offsets of another. Edits
//! are queued in groups; a group is one logical rewrite and is applied
//! whole or not at all. A group overlapping an earlier accepted group is
//! dropped.

use wetwire_core::Span;

/// Replace `span` of the original text with `text`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// Replaced range; empty for an insertion
    pub span: Span,
    /// Replacement text
    pub text: String,
}

impl Edit {
    /// Replace a range
    #[must_use]
    pub fn replace(span: Span, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
        }
    }

    /// Insert before `offset`
    #[must_use]
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::replace(Span::point(offset), text)
    }
}

/// Pending edit groups against one text
#[derive(Debug, Clone, Default)]
pub struct EditBuffer {
    groups: Vec<Vec<Edit>>,
}

impl EditBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single-edit rewrite
    pub fn push(&mut self, edit: Edit) {
        self.groups.push(vec![edit]);
    }

    /// Queue a rewrite made of several edits
    pub fn push_group(&mut self, edits: Vec<Edit>) {
        if !edits.is_empty() {
            self.groups.push(edits);
        }
    }

    /// Number of queued rewrites
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Check if nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Apply every acceptable rewrite to `source`
    ///
    /// Returns the new text and the number of rewrites applied. A rewrite
    /// is dropped when any of its edits falls outside the text, splits a
    /// character, or overlaps an edit of an earlier accepted rewrite.
    /// Insertions at one offset land in queue order, before any
    /// replacement that starts there.
    #[must_use]
    pub fn apply(self, source: &str) -> (String, usize) {
        let valid = |span: &Span| {
            span.start <= span.end
                && span.end <= source.len()
                && source.is_char_boundary(span.start)
                && source.is_char_boundary(span.end)
        };

        let mut accepted: Vec<Edit> = Vec::new();
        let mut applied = 0;
        for group in self.groups {
            if !group.iter().all(|e| valid(&e.span)) {
                tracing::debug!("dropping out-of-range rewrite");
                continue;
            }
            let clashes = group.iter().enumerate().any(|(i, edit)| {
                accepted.iter().chain(&group[..i]).any(|other| other.span.overlaps(&edit.span))
            });
            if clashes {
                tracing::debug!("dropping overlapping rewrite");
                continue;
            }
            accepted.extend(group);
            applied += 1;
        }

        let mut ordered: Vec<(usize, Edit)> = accepted.into_iter().enumerate().collect();
        ordered.sort_by(|(seq_a, a), (seq_b, b)| {
            b.span
                .start
                .cmp(&a.span.start)
                .then(b.span.end.cmp(&a.span.end))
                .then(seq_b.cmp(seq_a))
        });

        let mut out = source.to_string();
        for (_, edit) in ordered {
            out.replace_range(edit.span.start..edit.span.end, &edit.text);
        }
        (out, applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descending_application() {
        let mut buffer = EditBuffer::new();
        buffer.push(Edit::replace(Span::new(0, 1), "alpha"));
        buffer.push(Edit::replace(Span::new(4, 5), "beta"));
        let (text, applied) = buffer.apply("a = b\n");
        assert_eq!(text, "alpha = beta\n");
        assert_eq!(applied, 2);
    }

    #[test]
    fn test_first_rewrite_wins_overlap() {
        let mut buffer = EditBuffer::new();
        buffer.push(Edit::replace(Span::new(0, 5), "x"));
        buffer.push(Edit::replace(Span::new(2, 4), "y"));
        let (text, applied) = buffer.apply("abcdefg");
        assert_eq!(applied, 1);
        assert_eq!(text, "xfg");

        let mut buffer = EditBuffer::new();
        buffer.push(Edit::replace(Span::new(2, 4), "y"));
        buffer.push(Edit::insert(3, "z"));
        let (text, applied) = buffer.apply("abcdefg");
        assert_eq!(applied, 1);
        assert_eq!(text, "abyefg");
    }

    #[test]
    fn test_group_is_atomic() {
        let mut buffer = EditBuffer::new();
        buffer.push(Edit::replace(Span::new(4, 5), "B"));
        buffer.push_group(vec![Edit::insert(0, "head\n"), Edit::replace(Span::new(4, 6), "zz")]);
        let (text, applied) = buffer.apply("a = bc");
        assert_eq!(applied, 1);
        assert_eq!(text, "a = Bc");
    }

    #[test]
    fn test_insertions_keep_order_and_precede_replacement() {
        let mut buffer = EditBuffer::new();
        buffer.push(Edit::replace(Span::new(0, 3), "ref"));
        buffer.push(Edit::insert(0, "first\n"));
        buffer.push(Edit::insert(0, "second\n"));
        let (text, applied) = buffer.apply("old tail");
        assert_eq!(text, "first\nsecond\nref tail");
        assert_eq!(applied, 3);
    }

    #[test]
    fn test_out_of_range_dropped() {
        let mut buffer = EditBuffer::new();
        buffer.push(Edit::replace(Span::new(2, 40), "x"));
        buffer.push(Edit::replace(Span::new(1, 2), "é"));
        let (text, applied) = buffer.apply("ééz");
        assert_eq!(applied, 0);
        assert_eq!(text, "ééz");
    }
}
