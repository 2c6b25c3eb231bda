//! Parser for declaration scripts.
//!
//! Recursive descent over the tokens from [`crate::lexer`]. The grammar is
//! the Python statement and expression grammar, reduced to the tree in
//! [`crate::ast`]: operators collapse into [`ExprKind::Other`], lambdas and
//! comprehensions into [`ExprKind::Scoped`]. Compound statement headers that
//! the analyses never inspect (`for`, `with`, `except`, `def` parameters)
//! are skipped rather than parsed.

use crate::ast::{Alias, Call, DictItem, Expr, ExprKind, Keyword, Literal, Module, Stmt, StmtKind};
use crate::lexer::{Token, TokenKind, tokenize};
use thiserror::Error;
use wetwire_core::{CoreError, LineIndex, Span};

/// Syntax error with the byte offset it was detected at
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    /// Description
    pub message: String,
    /// Byte offset into the parsed text
    pub offset: usize,
}

impl ParseError {
    /// Create a parse error
    #[must_use]
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

impl From<ParseError> for CoreError {
    fn from(err: ParseError) -> Self {
        CoreError::ParseError {
            message: err.to_string(),
        }
    }
}

/// Turns source text into a [`Module`]
pub trait SourceParser: Send + Sync {
    /// Parse one file
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the text is not syntactically valid
    fn parse(&self, text: &str) -> Result<Module, ParseError>;
}

/// Parser for Python-syntax declaration files
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonParser;

impl PythonParser {
    /// Create a parser
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SourceParser for PythonParser {
    fn parse(&self, text: &str) -> Result<Module, ParseError> {
        parse(text)
    }
}

/// Parse Python-syntax source text
///
/// # Errors
///
/// Returns [`ParseError`] if the text is not syntactically valid
pub fn parse(text: &str) -> Result<Module, ParseError> {
    let tokens = tokenize(text)?;
    let body = Parser::new(text, tokens).module()?;
    Ok(Module {
        body,
        lines: LineIndex::new(text),
    })
}

const HARD_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const AUG_ASSIGN: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "@=", "&=", "|=", "^=", ">>=", "<<=", "**=",
];

const COMPARE_OPS: &[&str] = &["<", ">", "==", ">=", "<=", "!="];

const BINARY_LEVELS: &[&[&str]] = &[
    &["|"],
    &["^"],
    &["&"],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%", "//", "@"],
];

/// Bracket, block, unary and postfix levels allowed before a parse is
/// rejected
const MAX_NESTING: usize = 40;

type PResult<T> = Result<T, ParseError>;

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    last_end: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            text,
            tokens,
            pos: 0,
            last_end: 0,
            nesting: 0,
        }
    }

    // Token access

    fn peek(&self) -> Token {
        self.tokens[self.pos]
    }

    fn peek_at(&self, ahead: usize) -> Option<Token> {
        self.tokens.get(self.pos + ahead).copied()
    }

    fn text_of(&self, token: Token) -> &'a str {
        token.span.slice(self.text)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        if matches!(
            token.kind,
            TokenKind::Name | TokenKind::Number | TokenKind::Str | TokenKind::Op
        ) {
            self.last_end = token.span.end;
        }
        token
    }

    fn at_op(&self, op: &str) -> bool {
        let t = self.peek();
        t.kind == TokenKind::Op && self.text_of(t) == op
    }

    fn at_any_op(&self, ops: &[&str]) -> bool {
        let t = self.peek();
        t.kind == TokenKind::Op && ops.contains(&self.text_of(t))
    }

    fn at_name(&self, word: &str) -> bool {
        let t = self.peek();
        t.kind == TokenKind::Name && self.text_of(t) == word
    }

    fn at_kind(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_name(&mut self, word: &str) -> bool {
        if self.at_name(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.peek().span.start)
    }

    fn unexpected(&self) -> ParseError {
        let t = self.peek();
        match t.kind {
            TokenKind::Newline => self.error("unexpected end of line"),
            TokenKind::Indent => self.error("unexpected indent"),
            TokenKind::Dedent => self.error("unexpected dedent"),
            TokenKind::End => self.error("unexpected end of input"),
            _ => self.error(format!("unexpected '{}'", self.text_of(t))),
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<Token> {
        if self.at_op(op) {
            Ok(self.bump())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expect_name(&mut self) -> PResult<&'a str> {
        let t = self.peek();
        if t.kind == TokenKind::Name && !HARD_KEYWORDS.contains(&self.text_of(t)) {
            self.bump();
            Ok(self.text_of(t))
        } else {
            Err(self.error("expected identifier"))
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, what: &str) -> PResult<()> {
        if self.at_kind(kind) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn enter(&mut self) -> PResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("too many nested levels"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.last_end.max(start))
    }

    // Statements

    fn module(mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::End => break,
                TokenKind::Newline => {
                    self.bump();
                }
                TokenKind::Indent | TokenKind::Dedent => return Err(self.unexpected()),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        if self.at_op("@") {
            let start = self.bump().span.start;
            let expr = self.named_test()?;
            self.expect_kind(TokenKind::Newline, "newline after decorator")?;
            return Ok(vec![Stmt {
                kind: StmtKind::Other {
                    keyword: "@".to_string(),
                    exprs: vec![expr],
                },
                span: self.span_from(start),
            }]);
        }
        if self.at_block_start() {
            return Ok(vec![self.block()?]);
        }
        self.simple_stmts()
    }

    fn at_block_start(&self) -> bool {
        let t = self.peek();
        if t.kind != TokenKind::Name {
            return false;
        }
        match self.text_of(t) {
            "if" | "elif" | "else" | "while" | "for" | "with" | "try" | "except" | "finally"
            | "def" | "class" | "async" => true,
            "match" | "case" => self.line_ends_with_colon(),
            _ => false,
        }
    }

    fn line_ends_with_colon(&self) -> bool {
        let mut i = self.pos;
        while let Some(t) = self.tokens.get(i) {
            if matches!(t.kind, TokenKind::Newline | TokenKind::End) {
                break;
            }
            i += 1;
        }
        i > self.pos
            && self.tokens.get(i - 1).is_some_and(|t| {
                t.kind == TokenKind::Op && self.text_of(*t) == ":"
            })
    }

    fn block(&mut self) -> PResult<Stmt> {
        let start = self.peek().span.start;
        let first = self.bump();
        let mut keyword = self.text_of(first);
        if keyword == "async" {
            let next = self.bump();
            keyword = self.text_of(next);
        }

        let mut name = None;
        let mut header = Vec::new();
        match keyword {
            "if" | "elif" | "while" => {
                header.push(self.named_test()?);
                self.expect_op(":")?;
            }
            "else" | "try" | "finally" => {
                self.expect_op(":")?;
            }
            "def" | "class" => {
                name = Some(self.expect_name()?.to_string());
                self.skip_header()?;
            }
            "for" | "with" | "except" | "match" | "case" => self.skip_header()?,
            other => return Err(self.error(format!("unexpected '{}'", other))),
        }

        self.enter()?;
        let body = self.suite()?;
        self.leave();

        Ok(Stmt {
            kind: StmtKind::Block {
                keyword: keyword.to_string(),
                name,
                header,
                body,
            },
            span: self.span_from(start),
        })
    }

    /// Consume tokens up to and including the header's closing `:`
    fn skip_header(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        let mut lambdas = 0usize;
        loop {
            let t = self.peek();
            match t.kind {
                TokenKind::Newline | TokenKind::End => return Err(self.error("expected ':'")),
                TokenKind::Name if self.text_of(t) == "lambda" && depth == 0 => lambdas += 1,
                TokenKind::Op => match self.text_of(t) {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    ":" if depth == 0 && lambdas > 0 => lambdas -= 1,
                    ":" if depth == 0 => {
                        self.bump();
                        return Ok(());
                    }
                    _ => {}
                },
                _ => {}
            }
            self.bump();
        }
    }

    fn suite(&mut self) -> PResult<Vec<Stmt>> {
        if !self.at_kind(TokenKind::Newline) {
            return self.simple_stmts();
        }
        self.bump();
        self.expect_kind(TokenKind::Indent, "an indented block")?;
        let mut body = Vec::new();
        while !self.at_kind(TokenKind::Dedent) {
            if self.at_kind(TokenKind::End) {
                break;
            }
            body.extend(self.statement()?);
        }
        if self.at_kind(TokenKind::Dedent) {
            self.bump();
        }
        Ok(body)
    }

    fn simple_stmts(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.small_stmt()?];
        while self.eat_op(";") {
            if self.at_kind(TokenKind::Newline) {
                break;
            }
            stmts.push(self.small_stmt()?);
        }
        if !self.at_kind(TokenKind::End) {
            self.expect_kind(TokenKind::Newline, "end of statement")?;
        }
        Ok(stmts)
    }

    fn at_stmt_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Newline | TokenKind::End) || self.at_op(";")
    }

    fn small_stmt(&mut self) -> PResult<Stmt> {
        let start = self.peek().span.start;
        let t = self.peek();
        let word = if t.kind == TokenKind::Name {
            self.text_of(t)
        } else {
            ""
        };

        let kind = match word {
            "pass" | "break" | "continue" => {
                self.bump();
                other(word, Vec::new())
            }
            "return" => {
                self.bump();
                let exprs = if self.at_stmt_end() {
                    Vec::new()
                } else {
                    vec![self.star_expressions()?]
                };
                other(word, exprs)
            }
            "raise" => {
                self.bump();
                let mut exprs = Vec::new();
                if !self.at_stmt_end() {
                    exprs.push(self.test()?);
                    if self.eat_name("from") {
                        exprs.push(self.test()?);
                    }
                }
                other(word, exprs)
            }
            "del" => {
                self.bump();
                other(word, vec![self.star_expressions()?])
            }
            "assert" => {
                self.bump();
                let mut exprs = vec![self.test()?];
                if self.eat_op(",") {
                    exprs.push(self.test()?);
                }
                other(word, exprs)
            }
            "global" | "nonlocal" => {
                self.bump();
                self.expect_name()?;
                while self.eat_op(",") {
                    self.expect_name()?;
                }
                other(word, Vec::new())
            }
            "import" => {
                self.bump();
                let mut names = vec![self.dotted_as_name()?];
                while self.eat_op(",") {
                    names.push(self.dotted_as_name()?);
                }
                StmtKind::Import { names }
            }
            "from" => {
                self.bump();
                self.import_from()?
            }
            "yield" => StmtKind::Expr(self.yield_expr()?),
            _ => self.expr_stmt()?,
        };

        Ok(Stmt {
            kind,
            span: self.span_from(start),
        })
    }

    fn expr_stmt(&mut self) -> PResult<StmtKind> {
        let first = self.star_expressions()?;

        if self.eat_op(":") {
            let annotation = self.test()?;
            let value = if self.eat_op("=") {
                Some(self.yield_or_star()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        if self.at_any_op(AUG_ASSIGN) {
            self.bump();
            let value = self.yield_or_star()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                value,
            });
        }

        if self.at_op("=") {
            let mut targets = vec![first];
            loop {
                self.bump();
                let next = self.yield_or_star()?;
                if self.at_op("=") {
                    targets.push(next);
                } else {
                    return Ok(StmtKind::Assign {
                        targets,
                        value: next,
                    });
                }
            }
        }

        Ok(StmtKind::Expr(first))
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?.to_string();
        while self.eat_op(".") {
            name.push('.');
            name.push_str(self.expect_name()?);
        }
        Ok(name)
    }

    fn dotted_as_name(&mut self) -> PResult<Alias> {
        let name = self.dotted_name()?;
        let asname = if self.eat_name("as") {
            Some(self.expect_name()?.to_string())
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn import_from(&mut self) -> PResult<StmtKind> {
        let mut level = 0;
        loop {
            if self.eat_op(".") {
                level += 1;
            } else if self.eat_op("...") {
                level += 3;
            } else {
                break;
            }
        }
        let module = if self.at_name("import") {
            None
        } else {
            Some(self.dotted_name()?)
        };
        if !self.eat_name("import") {
            return Err(self.error("expected 'import'"));
        }

        let mut names = Vec::new();
        if self.eat_op("*") {
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
            });
        } else {
            let parens = self.eat_op("(");
            loop {
                let name = self.expect_name()?.to_string();
                let asname = if self.eat_name("as") {
                    Some(self.expect_name()?.to_string())
                } else {
                    None
                };
                names.push(Alias { name, asname });
                if !self.eat_op(",") {
                    break;
                }
                if parens && self.at_op(")") {
                    break;
                }
            }
            if parens {
                self.expect_op(")")?;
            }
        }
        Ok(StmtKind::ImportFrom {
            module,
            level,
            names,
        })
    }

    // Expressions

    fn can_start_expr(&self) -> bool {
        let t = self.peek();
        match t.kind {
            TokenKind::Number | TokenKind::Str => true,
            TokenKind::Name => {
                let word = self.text_of(t);
                !HARD_KEYWORDS.contains(&word)
                    || matches!(word, "not" | "lambda" | "await" | "None" | "True" | "False")
            }
            TokenKind::Op => matches!(
                self.text_of(t),
                "(" | "[" | "{" | "-" | "+" | "~" | "*" | "..."
            ),
            _ => false,
        }
    }

    fn yield_or_star(&mut self) -> PResult<Expr> {
        if self.at_name("yield") {
            self.yield_expr()
        } else {
            self.star_expressions()
        }
    }

    fn yield_expr(&mut self) -> PResult<Expr> {
        let start = self.bump().span.start;
        let mut exprs = Vec::new();
        if self.eat_name("from") {
            exprs.push(self.test()?);
        } else if self.can_start_expr() {
            exprs.push(self.star_expressions()?);
        }
        Ok(Expr::new(ExprKind::Other(exprs), self.span_from(start)))
    }

    /// `a`, or `a, *b, c` as a tuple
    fn star_expressions(&mut self) -> PResult<Expr> {
        let start = self.peek().span.start;
        let first = self.star_or_test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.can_start_expr() {
                break;
            }
            items.push(self.star_or_test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), self.span_from(start)))
    }

    fn star_or_test(&mut self) -> PResult<Expr> {
        if self.at_op("*") {
            let start = self.bump().span.start;
            let inner = self.binary(0)?;
            return Ok(Expr::new(
                ExprKind::Starred(Box::new(inner)),
                self.span_from(start),
            ));
        }
        self.test()
    }

    fn star_or_named(&mut self) -> PResult<Expr> {
        if self.at_op("*") {
            return self.star_or_test();
        }
        self.named_test()
    }

    fn named_test(&mut self) -> PResult<Expr> {
        let start = self.peek().span.start;
        let target = self.test()?;
        if self.eat_op(":=") {
            let value = self.test()?;
            return Ok(Expr::new(
                ExprKind::Other(vec![target, value]),
                self.span_from(start),
            ));
        }
        Ok(target)
    }

    fn test(&mut self) -> PResult<Expr> {
        if self.at_name("lambda") {
            return self.lambda();
        }
        let start = self.peek().span.start;
        let body = self.or_test()?;
        if self.eat_name("if") {
            let cond = self.or_test()?;
            if !self.eat_name("else") {
                return Err(self.error("expected 'else'"));
            }
            self.enter()?;
            let orelse = self.test()?;
            self.leave();
            return Ok(Expr::new(
                ExprKind::Other(vec![body, cond, orelse]),
                self.span_from(start),
            ));
        }
        Ok(body)
    }

    fn lambda(&mut self) -> PResult<Expr> {
        let start = self.bump().span.start;
        let mut depth = 0usize;
        loop {
            let t = self.peek();
            match t.kind {
                TokenKind::Newline | TokenKind::End => return Err(self.error("expected ':'")),
                TokenKind::Op => match self.text_of(t) {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    ":" if depth == 0 => break,
                    _ => {}
                },
                _ => {}
            }
            self.bump();
        }
        self.bump();
        self.enter()?;
        let body = self.test()?;
        self.leave();
        Ok(Expr::new(ExprKind::Scoped(vec![body]), self.span_from(start)))
    }

    fn or_test(&mut self) -> PResult<Expr> {
        self.bool_chain("or", Self::and_test)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        self.bool_chain("and", Self::not_test)
    }

    fn bool_chain(
        &mut self,
        word: &str,
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let start = self.peek().span.start;
        let first = next(self)?;
        if !self.at_name(word) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_name(word) {
            items.push(next(self)?);
        }
        Ok(Expr::new(ExprKind::Other(items), self.span_from(start)))
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.at_name("not") {
            let start = self.bump().span.start;
            self.enter()?;
            let inner = self.not_test()?;
            self.leave();
            return Ok(Expr::new(ExprKind::Other(vec![inner]), self.span_from(start)));
        }
        self.comparison()
    }

    fn at_compare_op(&self) -> bool {
        if self.at_any_op(COMPARE_OPS) || self.at_name("in") || self.at_name("is") {
            return true;
        }
        self.at_name("not")
            && self.peek_at(1).is_some_and(|t| {
                t.kind == TokenKind::Name && self.text_of(t) == "in"
            })
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let start = self.peek().span.start;
        let first = self.binary(0)?;
        if !self.at_compare_op() {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.at_compare_op() {
            if self.eat_name("not") || self.eat_name("is") {
                self.eat_name("in");
                self.eat_name("not");
            } else {
                self.bump();
            }
            items.push(self.binary(0)?);
        }
        Ok(Expr::new(ExprKind::Other(items), self.span_from(start)))
    }

    fn binary(&mut self, level: usize) -> PResult<Expr> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.factor();
        };
        let start = self.peek().span.start;
        let first = self.binary(level + 1)?;
        if !self.at_any_op(ops) {
            return Ok(first);
        }
        // One flat node per operator run
        let mut items = vec![first];
        while self.at_any_op(ops) {
            self.bump();
            items.push(self.binary(level + 1)?);
        }
        Ok(Expr::new(ExprKind::Other(items), self.span_from(start)))
    }

    fn factor(&mut self) -> PResult<Expr> {
        if self.at_any_op(&["-", "+", "~"]) {
            let start = self.bump().span.start;
            self.enter()?;
            let inner = self.factor()?;
            self.leave();
            return Ok(Expr::new(ExprKind::Other(vec![inner]), self.span_from(start)));
        }
        self.power()
    }

    fn power(&mut self) -> PResult<Expr> {
        let start = self.peek().span.start;
        if self.eat_name("await") {
            self.enter()?;
            let inner = self.power()?;
            self.leave();
            return Ok(Expr::new(ExprKind::Other(vec![inner]), self.span_from(start)));
        }
        let base = self.primary()?;
        if self.eat_op("**") {
            self.enter()?;
            let exponent = self.factor()?;
            self.leave();
            return Ok(Expr::new(
                ExprKind::Other(vec![base, exponent]),
                self.span_from(start),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let start = self.peek().span.start;
        let mut expr = self.atom()?;
        // Every postfix wraps the expression once more
        let mut links = 0;
        loop {
            if self.at_op("(") || self.at_op("[") || self.at_op(".") {
                self.enter()?;
                links += 1;
            }
            if self.eat_op("(") {
                let (args, keywords) = self.arglist()?;
                self.expect_op(")")?;
                expr = Expr::new(
                    ExprKind::Call(Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    }),
                    self.span_from(start),
                );
            } else if self.eat_op("[") {
                let mut items = vec![expr];
                items.extend(self.subscript()?);
                self.expect_op("]")?;
                expr = Expr::new(ExprKind::Other(items), self.span_from(start));
            } else if self.eat_op(".") {
                let attr = self.expect_name()?.to_string();
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    self.span_from(start),
                );
            } else {
                self.nesting -= links;
                return Ok(expr);
            }
        }
    }

    fn arglist(&mut self) -> PResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.at_op(")") {
            let start = self.peek().span.start;
            if self.eat_op("**") {
                let value = self.test()?;
                keywords.push(Keyword {
                    arg: None,
                    value,
                    span: self.span_from(start),
                });
            } else if self.at_op("*") {
                args.push(self.star_or_test()?);
            } else if self.at_kind(TokenKind::Name)
                && self.peek_at(1).is_some_and(|t| {
                    t.kind == TokenKind::Op && self.text_of(t) == "="
                })
            {
                let arg = self.expect_name()?.to_string();
                self.bump();
                let value = self.test()?;
                keywords.push(Keyword {
                    arg: Some(arg),
                    value,
                    span: self.span_from(start),
                });
            } else {
                let value = self.named_test()?;
                if self.at_comp_for() {
                    let mut parts = vec![value];
                    parts.extend(self.comprehension()?);
                    args.push(Expr::new(ExprKind::Scoped(parts), self.span_from(start)));
                } else {
                    args.push(value);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn subscript(&mut self) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            if !self.at_op(":") && !self.at_op("]") {
                items.push(self.star_or_named()?);
            }
            while self.eat_op(":") {
                if !self.at_op(":") && !self.at_op("]") && !self.at_op(",") {
                    items.push(self.test()?);
                }
            }
            if !self.eat_op(",") || self.at_op("]") {
                break;
            }
        }
        Ok(items)
    }

    fn at_comp_for(&self) -> bool {
        self.at_name("for")
            || (self.at_name("async")
                && self.peek_at(1).is_some_and(|t| {
                    t.kind == TokenKind::Name && self.text_of(t) == "for"
                }))
    }

    /// `for ... in ... if ...` clauses following a comprehension element
    fn comprehension(&mut self) -> PResult<Vec<Expr>> {
        let mut parts = Vec::new();
        while self.at_comp_for() {
            self.eat_name("async");
            self.bump();
            loop {
                parts.push(self.star_or_test_target()?);
                if !self.eat_op(",") || self.at_name("in") {
                    break;
                }
            }
            if !self.eat_name("in") {
                return Err(self.error("expected 'in'"));
            }
            parts.push(self.or_test()?);
            while self.eat_name("if") {
                parts.push(self.or_test()?);
            }
        }
        Ok(parts)
    }

    fn star_or_test_target(&mut self) -> PResult<Expr> {
        if self.at_op("*") {
            return self.star_or_test();
        }
        self.binary(0)
    }

    fn atom(&mut self) -> PResult<Expr> {
        let t = self.peek();
        let start = t.span.start;
        match t.kind {
            TokenKind::Number => {
                self.bump();
                Ok(Expr::new(
                    ExprKind::Literal(Literal::Number(self.text_of(t).to_string())),
                    t.span,
                ))
            }
            TokenKind::Str => self.strings(),
            TokenKind::Name => {
                let word = self.text_of(t);
                let literal = match word {
                    "True" => Literal::Bool(true),
                    "False" => Literal::Bool(false),
                    "None" => Literal::None,
                    _ if HARD_KEYWORDS.contains(&word) => return Err(self.unexpected()),
                    _ => {
                        self.bump();
                        return Ok(Expr::new(ExprKind::Name(word.to_string()), t.span));
                    }
                };
                self.bump();
                Ok(Expr::new(ExprKind::Literal(literal), t.span))
            }
            TokenKind::Op => match self.text_of(t) {
                "..." => {
                    self.bump();
                    Ok(Expr::new(ExprKind::Literal(Literal::Ellipsis), t.span))
                }
                "(" => {
                    self.bump();
                    self.enter()?;
                    let expr = self.paren(start)?;
                    self.leave();
                    Ok(expr)
                }
                "[" => {
                    self.bump();
                    self.enter()?;
                    let expr = self.list(start)?;
                    self.leave();
                    Ok(expr)
                }
                "{" => {
                    self.bump();
                    self.enter()?;
                    let expr = self.brace(start)?;
                    self.leave();
                    Ok(expr)
                }
                _ => Err(self.unexpected()),
            },
            _ => Err(self.unexpected()),
        }
    }

    fn paren(&mut self, start: usize) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), self.span_from(start)));
        }
        if self.at_name("yield") {
            let inner = self.yield_expr()?;
            self.expect_op(")")?;
            return Ok(Expr::new(inner.kind, self.span_from(start)));
        }
        let first = self.star_or_named()?;
        if self.at_comp_for() {
            let mut parts = vec![first];
            parts.extend(self.comprehension()?);
            self.expect_op(")")?;
            return Ok(Expr::new(ExprKind::Scoped(parts), self.span_from(start)));
        }
        if !self.at_op(",") {
            self.expect_op(")")?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            items.push(self.star_or_named()?);
        }
        self.expect_op(")")?;
        Ok(Expr::new(ExprKind::Tuple(items), self.span_from(start)))
    }

    fn list(&mut self, start: usize) -> PResult<Expr> {
        let mut items = Vec::new();
        if !self.at_op("]") {
            let first = self.star_or_named()?;
            if self.at_comp_for() {
                let mut parts = vec![first];
                parts.extend(self.comprehension()?);
                self.expect_op("]")?;
                return Ok(Expr::new(ExprKind::Scoped(parts), self.span_from(start)));
            }
            items.push(first);
            while self.eat_op(",") {
                if self.at_op("]") {
                    break;
                }
                items.push(self.star_or_named()?);
            }
        }
        self.expect_op("]")?;
        Ok(Expr::new(ExprKind::List(items), self.span_from(start)))
    }

    fn brace(&mut self, start: usize) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), self.span_from(start)));
        }

        let first_key = if self.eat_op("**") {
            None
        } else {
            let key = self.star_or_named()?;
            if !self.at_op(":") {
                return self.set(start, key);
            }
            Some(key)
        };

        let first = self.dict_value(first_key)?;
        if first.key.is_some() && self.at_comp_for() {
            let mut parts = Vec::new();
            parts.extend(first.key);
            parts.push(first.value);
            parts.extend(self.comprehension()?);
            self.expect_op("}")?;
            return Ok(Expr::new(ExprKind::Scoped(parts), self.span_from(start)));
        }

        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            let key = if self.eat_op("**") {
                None
            } else {
                Some(self.test()?)
            };
            items.push(self.dict_value(key)?);
        }
        self.expect_op("}")?;
        Ok(Expr::new(ExprKind::Dict(items), self.span_from(start)))
    }

    /// Value half of a dict entry; `key` of `None` means `**mapping`
    fn dict_value(&mut self, key: Option<Expr>) -> PResult<DictItem> {
        if key.is_some() {
            self.expect_op(":")?;
            let value = self.test()?;
            Ok(DictItem { key, value })
        } else {
            let value = self.binary(0)?;
            Ok(DictItem { key: None, value })
        }
    }

    fn set(&mut self, start: usize, first: Expr) -> PResult<Expr> {
        if self.at_comp_for() {
            let mut parts = vec![first];
            parts.extend(self.comprehension()?);
            self.expect_op("}")?;
            return Ok(Expr::new(ExprKind::Scoped(parts), self.span_from(start)));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            items.push(self.star_or_named()?);
        }
        self.expect_op("}")?;
        Ok(Expr::new(ExprKind::Set(items), self.span_from(start)))
    }

    /// Adjacent string literals, concatenated
    fn strings(&mut self) -> PResult<Expr> {
        let start = self.peek().span.start;
        let mut value = String::new();
        let mut formatted = false;
        let mut bytes = false;
        while self.at_kind(TokenKind::Str) {
            let t = self.bump();
            let piece = decode_string(self.text_of(t)).ok_or_else(|| {
                ParseError::new("malformed string literal", t.span.start)
            })?;
            formatted |= piece.formatted;
            bytes |= piece.bytes;
            value.push_str(&piece.value);
        }
        let literal = if formatted {
            Literal::FString
        } else if bytes {
            Literal::Bytes
        } else {
            Literal::Str(value)
        };
        Ok(Expr::new(ExprKind::Literal(literal), self.span_from(start)))
    }
}

fn other(keyword: &str, exprs: Vec<Expr>) -> StmtKind {
    StmtKind::Other {
        keyword: keyword.to_string(),
        exprs,
    }
}

struct StringPiece {
    value: String,
    formatted: bool,
    bytes: bool,
}

/// Split a string token into prefix flags and decoded contents
fn decode_string(token: &str) -> Option<StringPiece> {
    let quote_at = token.find(['\'', '"'])?;
    let prefix = token[..quote_at].to_ascii_lowercase();
    let body = &token[quote_at..];
    let quote = body.as_bytes()[0];
    let triple = body.len() >= 6 && body.as_bytes()[1] == quote && body.as_bytes()[2] == quote;
    let q = if triple { 3 } else { 1 };
    if body.len() < 2 * q {
        return None;
    }
    let inner = &body[q..body.len() - q];

    let raw = prefix.contains('r');
    Some(StringPiece {
        value: if raw {
            inner.to_string()
        } else {
            unescape(inner)
        },
        formatted: prefix.contains('f'),
        bytes: prefix.contains('b'),
    })
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0'..='7' => {
                let mut digits = next.to_string();
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                match u32::from_str_radix(&digits, 8).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push('\\');
                        out.push_str(&digits);
                    }
                }
            }
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            '\\' | '\'' | '"' => out.push(next),
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = chars.clone().take(width).collect();
                match (hex.len() == width)
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32)
                {
                    Some(ch) => {
                        out.push(ch);
                        for _ in 0..width {
                            chars.next();
                        }
                    }
                    None => {
                        out.push('\\');
                        out.push(next);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_value(src: &str) -> Expr {
        let module = parse(src).unwrap();
        match module.body.into_iter().next().unwrap().kind {
            StmtKind::Assign { value, .. } => value,
            StmtKind::Expr(e) => e,
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_call_with_keywords() {
        let src = "build = Job(runs_on=\"ubuntu-latest\", steps=[checkout, Step(run='make')])\n";
        let value = first_value(src);
        let call = value.as_call().unwrap();
        assert!(call.is_call_to("Job"));
        assert_eq!(call.keyword("runs_on").unwrap().as_str(), Some("ubuntu-latest"));
        let ExprKind::List(steps) = &call.keyword("steps").unwrap().kind else {
            panic!("steps should be a list");
        };
        assert_eq!(steps[0].as_name(), Some("checkout"));
        assert!(steps[1].as_call().unwrap().is_call_to("Step"));
        assert_eq!(value.span.slice(src), &src.trim_end()["build = ".len()..]);
    }

    #[test]
    fn test_statement_kinds() {
        let src = "\
from wetwire_github.workflow import Job as J, Workflow
import os.path, sys as system
x: Job = J()
y += 1
a = b = c
print(x); pass
";
        let module = parse(src).unwrap();
        let kinds: Vec<_> = module.body.iter().map(|s| &s.kind).collect();
        assert!(matches!(
            kinds[0],
            StmtKind::ImportFrom { module: Some(m), level: 0, names } if m == "wetwire_github.workflow" && names.len() == 2
        ));
        assert!(matches!(kinds[1], StmtKind::Import { names } if names[0].bound_name() == "os" && names[1].bound_name() == "system"));
        assert!(matches!(kinds[2], StmtKind::AnnAssign { value: Some(_), .. }));
        assert!(matches!(kinds[3], StmtKind::AugAssign { .. }));
        assert!(matches!(kinds[4], StmtKind::Assign { targets, .. } if targets.len() == 2));
        assert!(matches!(kinds[5], StmtKind::Expr(_)));
        assert!(matches!(kinds[6], StmtKind::Other { keyword, .. } if keyword == "pass"));
        assert_eq!(module.body.len(), 7);
        assert_eq!(module.line_of(module.body[6].span.start), 6);
    }

    #[test]
    fn test_blocks_nest() {
        let src = "\
@decorator(arg=1)
def make(a, b=lambda: 1):
    inner = Job()
    return inner

if DEBUG:
    job = Job()
elif OTHER: job = Step()
else:
    pass

class Config(Base):
    x = 1
";
        let module = parse(src).unwrap();
        let mut depths = Vec::new();
        module.walk_stmts(&mut |stmt, depth| depths.push((stmt.span.start, depth)));
        assert_eq!(module.body.len(), 6);
        assert!(matches!(&module.body[1].kind, StmtKind::Block { keyword, name: Some(n), body, .. } if keyword == "def" && n == "make" && body.len() == 2));
        assert!(matches!(&module.body[2].kind, StmtKind::Block { header, .. } if header.len() == 1));
        assert!(matches!(&module.body[3].kind, StmtKind::Block { keyword, body, .. } if keyword == "elif" && body.len() == 1));
        assert_eq!(depths.iter().filter(|(_, d)| *d == 1).count(), 6);
        assert!(module.bound_names().contains(&"Config"));
        assert!(module.bound_names().contains(&"inner"));
    }

    #[test]
    fn test_string_decoding() {
        assert_eq!(first_value("'a\\tb' \"c\"\n").as_str(), Some("a\tbc"));
        assert_eq!(first_value("r'\\d'\n").as_str(), Some("\\d"));
        assert_eq!(first_value("'\\x41\\u00e9'\n").as_str(), Some("Aé"));
        assert_eq!(first_value("'''x\ny'''\n").as_str(), Some("x\ny"));
        assert_eq!(first_value("\"${{ secrets.TOKEN }}\"\n").as_str(), Some("${{ secrets.TOKEN }}"));
        assert!(matches!(first_value("f'{x}'\n").kind, ExprKind::Literal(Literal::FString)));
        assert!(matches!(first_value("b'x'\n").kind, ExprKind::Literal(Literal::Bytes)));
    }

    #[test]
    fn test_scoped_expressions() {
        let src = "x = [Step(run=c) for c in cmds if c] + list(map(lambda s: Job(), y))\n";
        let value = first_value(src);
        let mut seen = Vec::new();
        value.walk_scoped(false, &mut |expr, scoped| {
            if let Some(call) = expr.as_call() {
                seen.push((call.callee().unwrap().to_string(), scoped));
            }
        });
        assert_eq!(
            seen,
            vec![
                ("Step".to_string(), true),
                ("list".to_string(), false),
                ("map".to_string(), false),
                ("Job".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_dicts_and_operators() {
        let value = first_value("d = {'A': 1, **base, 'B': x if y else -z, 'C': a[1:2]}\n");
        let ExprKind::Dict(items) = &value.kind else {
            panic!("expected dict");
        };
        assert_eq!(items.len(), 4);
        assert!(items[1].key.is_none());
        assert_eq!(items[0].key.as_ref().unwrap().as_str(), Some("A"));

        let value = first_value("ok = a is not None and b not in c or not d\n");
        assert!(matches!(value.kind, ExprKind::Other(_)));
        assert!(parse("s = {1, 2}\nt = (1,)\nu = ()\nv = {k: v for k, v in items}\n").is_ok());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("x = (\n").is_err());
        assert!(parse("def f(:\n").is_err());
        assert!(parse("x = = 1\n").is_err());
        assert!(parse("if x\n    y = 1\n").is_err());
        assert!(parse("  x = 1\n").is_err());
        assert!(parse("x = import\n").is_err());
        let err = parse("x = 1\ny = (2\n").unwrap_err();
        assert!(err.offset >= 6);
        assert!(matches!(CoreError::from(err), CoreError::ParseError { .. }));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("x = {}1{}\n", "(".repeat(n), ")".repeat(n));
        assert!(parse(&nested(30)).is_ok());
        let err = parse(&nested(100)).unwrap_err();
        assert_eq!(err.message, "too many nested levels");
        assert!(parse(&nested(100_000)).is_err());

        let calls = format!("x = {}1{}\n", "f(".repeat(500), ")".repeat(500));
        assert!(parse(&calls).is_err());
        let attrs = format!("x = a{}\n", ".b".repeat(5_000));
        assert!(parse(&attrs).is_err());
        let unary = format!("x = {}1\n", "not ".repeat(5_000));
        assert!(parse(&unary).is_err());
        let ternary = format!("x = {}0\n", "1 if c else ".repeat(5_000));
        assert!(parse(&ternary).is_err());
    }

    #[test]
    fn test_operator_chains_are_flat() {
        let src = format!("x = 1{}\n", " + 1".repeat(5_000));
        let value = first_value(&src);
        let ExprKind::Other(items) = &value.kind else {
            panic!("expected operator chain");
        };
        assert_eq!(items.len(), 5_001);

        let module = parse(&src).unwrap();
        let mut count = 0;
        module.walk_exprs(&mut |_| count += 1);
        // target, chain node, and every operand
        assert_eq!(count, 5_003);
    }

    #[test]
    fn test_soft_keywords_as_names() {
        let module = parse("match = 1\ncase(x)\nmatch x:\n    case 1:\n        pass\n").unwrap();
        assert_eq!(module.body.len(), 3);
        assert!(matches!(&module.body[2].kind, StmtKind::Block { keyword, .. } if keyword == "match"));
    }

    #[test]
    fn test_empty_and_comment_only() {
        assert!(parse("").unwrap().body.is_empty());
        assert!(parse("# just a comment\n\n").unwrap().body.is_empty());
        assert!(parse("\u{feff}x = 1").unwrap().body.len() == 1);
    }
}
