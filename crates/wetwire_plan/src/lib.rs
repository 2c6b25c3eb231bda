//! WETWIRE Planner
//!
//! Parses declaration scripts into a minimal syntax tree, builds dependency
//! graphs over declared resources, and validates composed job sets before
//! any output is produced.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compose;
pub mod dag;
pub mod dsl;
pub mod lexer;
pub mod validate;

// Re-exports
pub use ast::{Alias, Call, DictItem, Expr, ExprKind, Keyword, Literal, Module, Stmt, StmtKind};
pub use compose::{ComposedWorkflow, TRIGGER_EVENTS};
pub use dag::{
    CycleError, DependencyMap, DependencyNode, Edge, Graph, detect_cycles, sanitize_id,
    topological_sort,
};
pub use dsl::{ParseError, PythonParser, SourceParser, parse};
pub use validate::{CompositionError, CompositionValidator};
