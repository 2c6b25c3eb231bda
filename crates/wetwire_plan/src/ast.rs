//! Minimal syntax tree for declaration scripts.
//!
//! Only the shapes the analyses care about are modeled precisely: calls,
//! names, attribute access, literals, and containers. Everything else is
//! kept as [`ExprKind::Other`] with its children so walks still reach
//! nested calls. Block clauses (`if`/`elif`/`else`, `try`/`except`, ...)
//! appear as sibling [`StmtKind::Block`] statements.

use wetwire_core::{LineIndex, Span};

/// A parsed file
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Top-level statements
    pub body: Vec<Stmt>,
    /// Line lookup for the parsed text
    pub lines: LineIndex,
}

impl Module {
    /// 1-based line of a byte offset
    #[must_use]
    pub fn line_of(&self, offset: usize) -> usize {
        self.lines.line_col(offset).0
    }

    /// Visit every statement depth-first in source order.
    /// The callback receives the nesting depth (0 = module level).
    pub fn walk_stmts<'a>(&'a self, f: &mut dyn FnMut(&'a Stmt, usize)) {
        let mut stack: Vec<(&'a Stmt, usize)> = self.body.iter().rev().map(|s| (s, 0)).collect();
        while let Some((stmt, depth)) = stack.pop() {
            f(stmt, depth);
            if let StmtKind::Block { body, .. } = &stmt.kind {
                stack.extend(body.iter().rev().map(|s| (s, depth + 1)));
            }
        }
    }

    /// Visit every expression in every statement, pre-order
    pub fn walk_exprs<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        self.walk_stmts(&mut |stmt, _| {
            for expr in stmt.exprs() {
                expr.walk(f);
            }
        });
    }

    /// Every call expression in source order
    #[must_use]
    pub fn calls(&self) -> Vec<(&Expr, &Call)> {
        let mut out = Vec::new();
        self.walk_exprs(&mut |expr| {
            if let ExprKind::Call(call) = &expr.kind {
                out.push((expr, call));
            }
        });
        out
    }

    /// Every name bound anywhere in the module: assignment targets, imports,
    /// and function/class names
    #[must_use]
    pub fn bound_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk_stmts(&mut |stmt, _| match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    target.walk(&mut |e| {
                        if let ExprKind::Name(n) = &e.kind {
                            out.push(n.as_str());
                        }
                    });
                }
            }
            StmtKind::AnnAssign { target, .. } | StmtKind::AugAssign { target, .. } => {
                if let ExprKind::Name(n) = &target.kind {
                    out.push(n.as_str());
                }
            }
            StmtKind::Import { names } | StmtKind::ImportFrom { names, .. } => {
                out.extend(names.iter().map(Alias::bound_name));
            }
            StmtKind::Block { name: Some(n), .. } => out.push(n.as_str()),
            _ => {}
        });
        out
    }
}

/// A statement with its source span
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Statement shape
    pub kind: StmtKind,
    /// Covered bytes (excluding the trailing newline)
    pub span: Span,
}

/// Statement shapes
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `a = b = value`
    Assign {
        /// Targets, left to right
        targets: Vec<Expr>,
        /// Assigned value
        value: Expr,
    },
    /// `a: T = value`
    AnnAssign {
        /// Target
        target: Expr,
        /// Annotation
        annotation: Expr,
        /// Optional value
        value: Option<Expr>,
    },
    /// `a += value`
    AugAssign {
        /// Target
        target: Expr,
        /// Right-hand side
        value: Expr,
    },
    /// Bare expression
    Expr(Expr),
    /// `import a.b as c`
    Import {
        /// Imported names
        names: Vec<Alias>,
    },
    /// `from .a import b as c`
    ImportFrom {
        /// Dotted module path, if any
        module: Option<String>,
        /// Number of leading dots
        level: usize,
        /// Imported names (`*` is a single alias named `*`)
        names: Vec<Alias>,
    },
    /// One clause of a compound statement
    Block {
        /// Introducing keyword (`if`, `def`, `with`, ...)
        keyword: String,
        /// Function or class name
        name: Option<String>,
        /// Header expressions, when parsed
        header: Vec<Expr>,
        /// Clause body
        body: Vec<Stmt>,
    },
    /// Any other simple statement (`return`, `pass`, decorators, ...)
    Other {
        /// Introducing keyword
        keyword: String,
        /// Contained expressions
        exprs: Vec<Expr>,
    },
}

impl Stmt {
    /// Expressions directly owned by this statement
    #[must_use]
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            StmtKind::Assign { targets, value } => {
                targets.iter().chain(std::iter::once(value)).collect()
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => [Some(target), Some(annotation), value.as_ref()]
                .into_iter()
                .flatten()
                .collect(),
            StmtKind::AugAssign { target, value } => vec![target, value],
            StmtKind::Expr(e) => vec![e],
            StmtKind::Block { header, .. } => header.iter().collect(),
            StmtKind::Other { exprs, .. } => exprs.iter().collect(),
            StmtKind::Import { .. } | StmtKind::ImportFrom { .. } => Vec::new(),
        }
    }

    /// Check if this is a simple (non-block) statement
    #[must_use]
    pub fn is_simple(&self) -> bool {
        !matches!(self.kind, StmtKind::Block { .. })
    }

    /// Single plain-name binding: `name = value` or `name: T = value`
    #[must_use]
    pub fn single_binding(&self) -> Option<(&str, &Expr)> {
        match &self.kind {
            StmtKind::Assign { targets, value } if targets.len() == 1 => match &targets[0].kind {
                ExprKind::Name(n) => Some((n.as_str(), value)),
                _ => None,
            },
            StmtKind::AnnAssign {
                target,
                value: Some(value),
                ..
            } => match &target.kind {
                ExprKind::Name(n) => Some((n.as_str(), value)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Imported name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// Imported (possibly dotted) name
    pub name: String,
    /// `as` name
    pub asname: Option<String>,
}

impl Alias {
    /// Name bound in the importing scope
    #[must_use]
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(asname) => asname,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

/// An expression with its source span
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Expression shape
    pub kind: ExprKind,
    /// Covered bytes
    pub span: Span,
}

/// Expression shapes
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Identifier
    Name(String),
    /// `value.attr`
    Attribute {
        /// Receiver
        value: Box<Expr>,
        /// Attribute name
        attr: String,
    },
    /// Function call
    Call(Call),
    /// Constant
    Literal(Literal),
    /// `{k: v, **rest}`
    Dict(Vec<DictItem>),
    /// `[a, b]`
    List(Vec<Expr>),
    /// `(a, b)` or `a, b`
    Tuple(Vec<Expr>),
    /// `{a, b}`
    Set(Vec<Expr>),
    /// `*value`
    Starred(Box<Expr>),
    /// Lambda or comprehension; children see names the enclosing scope does not
    Scoped(Vec<Expr>),
    /// Anything else (operators, subscripts, conditionals, ...)
    Other(Vec<Expr>),
}

/// Call expression
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Callee
    pub func: Box<Expr>,
    /// Positional arguments
    pub args: Vec<Expr>,
    /// Keyword arguments (`arg` is `None` for `**kwargs`)
    pub keywords: Vec<Keyword>,
}

impl Call {
    /// Callee name: the identifier for `f(...)`, the attribute for `m.f(...)`
    #[must_use]
    pub fn callee(&self) -> Option<&str> {
        match &self.func.kind {
            ExprKind::Name(n) => Some(n),
            ExprKind::Attribute { attr, .. } => Some(attr),
            _ => None,
        }
    }

    /// Check if the callee resolves to `name`
    #[must_use]
    pub fn is_call_to(&self, name: &str) -> bool {
        self.callee() == Some(name)
    }

    /// Value of a keyword argument
    #[must_use]
    pub fn keyword(&self, name: &str) -> Option<&Expr> {
        self.keywords
            .iter()
            .find(|k| k.arg.as_deref() == Some(name))
            .map(|k| &k.value)
    }
}

/// Keyword argument
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// Argument name, `None` for `**mapping`
    pub arg: Option<String>,
    /// Value
    pub value: Expr,
    /// Covered bytes, name included
    pub span: Span,
}

/// Dict entry
#[derive(Debug, Clone, PartialEq)]
pub struct DictItem {
    /// Key, `None` for `**mapping`
    pub key: Option<Expr>,
    /// Value
    pub value: Expr,
}

/// Constant values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Decoded string (adjacent literals concatenated)
    Str(String),
    /// Bytes literal
    Bytes,
    /// f-string; contents are not interpreted
    FString,
    /// Numeric literal as written
    Number(String),
    /// `True` / `False`
    Bool(bool),
    /// `None`
    None,
    /// `...`
    Ellipsis,
}

impl Expr {
    /// Create an expression
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Direct children in source order
    #[must_use]
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Name(_) | ExprKind::Literal(_) => Vec::new(),
            ExprKind::Attribute { value, .. } | ExprKind::Starred(value) => vec![value],
            ExprKind::Call(call) => std::iter::once(call.func.as_ref())
                .chain(call.args.iter())
                .chain(call.keywords.iter().map(|k| &k.value))
                .collect(),
            ExprKind::Dict(items) => items
                .iter()
                .flat_map(|item| item.key.iter().chain(std::iter::once(&item.value)))
                .collect(),
            ExprKind::List(items)
            | ExprKind::Tuple(items)
            | ExprKind::Set(items)
            | ExprKind::Scoped(items)
            | ExprKind::Other(items) => items.iter().collect(),
        }
    }

    /// Visit this expression and all descendants, pre-order
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            f(expr);
            stack.extend(expr.children().into_iter().rev());
        }
    }

    /// Like [`walk`](Self::walk), also reporting whether each node sits
    /// inside a lambda or comprehension
    pub fn walk_scoped<'a>(&'a self, scoped: bool, f: &mut dyn FnMut(&'a Expr, bool)) {
        let mut stack = vec![(self, scoped)];
        while let Some((expr, scoped)) = stack.pop() {
            f(expr, scoped);
            let inner = scoped || matches!(expr.kind, ExprKind::Scoped(_));
            stack.extend(expr.children().into_iter().rev().map(|child| (child, inner)));
        }
    }

    /// The call, if this is one
    #[must_use]
    pub fn as_call(&self) -> Option<&Call> {
        match &self.kind {
            ExprKind::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Decoded string, if this is a plain string literal
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Literal(Literal::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Identifier, if this is a bare name
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(n) => Some(n),
            _ => None,
        }
    }
}
