//! Tokenizer for the Python subset.
//!
//! Produces logical-line tokens: `Newline` ends a statement, `Indent` and
//! `Dedent` bracket blocks, and line breaks inside brackets or after a
//! backslash are dropped. Comments and blank lines produce nothing.

use crate::dsl::ParseError;
use wetwire_core::Span;

/// Token classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword
    Name,
    /// Numeric literal
    Number,
    /// String literal, prefix and quotes included
    Str,
    /// Operator or delimiter
    Op,
    /// End of logical line
    Newline,
    /// Deeper indentation
    Indent,
    /// Shallower indentation
    Dedent,
    /// End of input
    End,
}

/// A token and the bytes it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Class
    pub kind: TokenKind,
    /// Covered bytes
    pub span: Span,
}

const OPS3: [&str; 5] = ["**=", "//=", ">>=", "<<=", "..."];
const OPS2: [&str; 19] = [
    "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "->", ":=", "+=", "-=", "*=", "/=", "%=",
    "&=", "|=", "^=", "@=",
];
const OPS1: &[u8] = b"+-*/%@&|^~<>()[]{},:.;=";

const TAB_WIDTH: usize = 8;

/// Tokenize `text`
///
/// # Errors
///
/// Returns error on unterminated strings, unbalanced brackets, inconsistent
/// dedents, or characters that cannot start a token
pub fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(text).run()
}

struct Lexer<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    brackets: Vec<u8>,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        let pos = if text.starts_with('\u{feff}') { 3 } else { 0 };
        Self {
            text,
            bytes: text.as_bytes(),
            pos,
            tokens: Vec::new(),
            indents: vec![0],
            brackets: Vec::new(),
            at_line_start: true,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while self.pos < self.bytes.len() {
            if self.at_line_start && self.brackets.is_empty() {
                self.at_line_start = false;
                if !self.line_indent()? {
                    continue;
                }
            }
            self.next_token()?;
        }

        if let Some(open) = self.brackets.last() {
            return Err(ParseError::new(
                format!("unexpected end of input inside '{}'", *open as char),
                self.bytes.len(),
            ));
        }

        let end = self.bytes.len();
        if self.tokens.last().is_some_and(|t| t.kind != TokenKind::Newline) {
            self.push(TokenKind::Newline, Span::point(end));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, Span::point(end));
        }
        self.push(TokenKind::End, Span::point(end));
        Ok(self.tokens)
    }

    fn push(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token { kind, span });
    }

    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    /// Measure indentation at the start of a physical line. Returns `false`
    /// when the line is blank or comment-only and was skipped.
    fn line_indent(&mut self) -> Result<bool, ParseError> {
        let mut width = 0;
        let mut i = self.pos;
        while let Some(&b) = self.bytes.get(i) {
            match b {
                b' ' => width += 1,
                b'\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                b'\x0c' => width = 0,
                _ => break,
            }
            i += 1;
        }

        match self.bytes.get(i) {
            None => {
                self.pos = i;
                return Ok(false);
            }
            Some(b'\n') => {
                self.pos = i + 1;
                self.at_line_start = true;
                return Ok(false);
            }
            Some(b'\r') if self.bytes.get(i + 1) == Some(&b'\n') => {
                self.pos = i + 2;
                self.at_line_start = true;
                return Ok(false);
            }
            Some(b'#') => {
                self.pos = i;
                self.skip_comment();
                return Ok(false);
            }
            _ => {}
        }

        self.pos = i;
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, Span::point(i));
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent, Span::point(i));
            }
            if self.indents.last() != Some(&width) {
                return Err(ParseError::new(
                    "unindent does not match any outer indentation level",
                    i,
                ));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(b) = self.peek_byte(0) {
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<(), ParseError> {
        let b = self.bytes[self.pos];
        match b {
            b' ' | b'\t' | b'\x0c' | b'\r' => self.pos += 1,
            b'\n' => {
                if self.brackets.is_empty() {
                    if self.tokens.last().is_some_and(|t| t.kind != TokenKind::Newline) {
                        self.push(TokenKind::Newline, Span::new(self.pos, self.pos + 1));
                    }
                    self.at_line_start = true;
                }
                self.pos += 1;
            }
            b'#' => self.skip_comment(),
            b'\\' => match (self.peek_byte(1), self.peek_byte(2)) {
                (Some(b'\n'), _) => self.pos += 2,
                (Some(b'\r'), Some(b'\n')) => self.pos += 3,
                _ => return Err(ParseError::new("unexpected character after line continuation", self.pos)),
            },
            b'"' | b'\'' => self.string(self.pos, self.pos)?,
            b'0'..=b'9' => self.number(),
            b'.' if self.peek_byte(1).is_some_and(|c| c.is_ascii_digit()) => self.number(),
            _ => {
                let c = self.text[self.pos..].chars().next().unwrap_or('\0');
                if c == '_' || c.is_alphabetic() {
                    self.name()?;
                } else {
                    self.op()?;
                }
            }
        }
        Ok(())
    }

    fn name(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        for c in self.text[start..].chars() {
            if c == '_' || c.is_alphanumeric() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let word = &self.text[start..self.pos];
        let is_prefix = word.len() <= 2
            && word
                .bytes()
                .all(|b| matches!(b.to_ascii_lowercase(), b'r' | b'b' | b'u' | b'f'));
        if is_prefix && matches!(self.peek_byte(0), Some(b'"' | b'\'')) {
            return self.string(start, self.pos);
        }
        self.push(TokenKind::Name, Span::new(start, self.pos));
        Ok(())
    }

    fn string(&mut self, start: usize, quote_at: usize) -> Result<(), ParseError> {
        let quote = self.bytes[quote_at];
        let triple = self.bytes.get(quote_at + 1) == Some(&quote)
            && self.bytes.get(quote_at + 2) == Some(&quote);
        let mut i = quote_at + if triple { 3 } else { 1 };
        loop {
            let Some(&b) = self.bytes.get(i) else {
                return Err(ParseError::new("unterminated string literal", start));
            };
            if b == b'\\' {
                i += 2;
                continue;
            }
            if triple {
                if b == quote
                    && self.bytes.get(i + 1) == Some(&quote)
                    && self.bytes.get(i + 2) == Some(&quote)
                {
                    i += 3;
                    break;
                }
            } else if b == quote {
                i += 1;
                break;
            } else if b == b'\n' {
                return Err(ParseError::new("unterminated string literal", start));
            }
            i += 1;
        }
        self.pos = i;
        self.push(TokenKind::Str, Span::new(start, i));
        Ok(())
    }

    fn number(&mut self) {
        let start = self.pos;
        let radix_prefixed = self.bytes[start] == b'0'
            && matches!(self.peek_byte(1), Some(b'x' | b'X' | b'o' | b'O' | b'b' | b'B'));
        loop {
            match self.peek_byte(0) {
                Some(b) if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' => self.pos += 1,
                Some(b'+' | b'-')
                    if !radix_prefixed
                        && matches!(self.bytes[self.pos - 1], b'e' | b'E')
                        && self.peek_byte(1).is_some_and(|c| c.is_ascii_digit()) =>
                {
                    self.pos += 1;
                }
                _ => break,
            }
        }
        self.push(TokenKind::Number, Span::new(start, self.pos));
    }

    fn op(&mut self) -> Result<(), ParseError> {
        let rest = &self.text[self.pos..];
        let len = if OPS3.iter().any(|op| rest.starts_with(op)) {
            3
        } else if OPS2.iter().any(|op| rest.starts_with(op)) {
            2
        } else if OPS1.contains(&self.bytes[self.pos]) {
            1
        } else {
            let c = rest.chars().next().unwrap_or('\0');
            return Err(ParseError::new(format!("invalid character '{}'", c), self.pos));
        };

        let b = self.bytes[self.pos];
        match b {
            b'(' | b'[' | b'{' => self.brackets.push(b),
            b')' | b']' | b'}' => {
                let expected = match b {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                if self.brackets.pop() != Some(expected) {
                    return Err(ParseError::new(
                        format!("unmatched '{}'", b as char),
                        self.pos,
                    ));
                }
            }
            _ => {}
        }
        self.push(TokenKind::Op, Span::new(self.pos, self.pos + len));
        self.pos += len;
        Ok(())
    }
}
