use super::ast::Node;
use super::eval::{Params, Row};
use crate::window::{Frame, WindowSpec};
use std::fmt;
use std::sync::Arc;
use tabula_columnar::Value;

/// Opaque user function evaluated per row, bypassing the compiler.
#[derive(Clone)]
pub struct EscapedFn(pub(crate) Arc<dyn Fn(&Row<'_>, &Params) -> Value + Send + Sync>);

impl fmt::Debug for EscapedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EscapedFn(..)")
    }
}

/// Everything a verb accepts in expression position.
#[derive(Clone, Debug)]
pub enum ExprSpec {
    /// Expression source text, optionally wrapped in an arrow function.
    Source(String),
    /// A pre-built syntax tree (for example one previously exported from a compiled query).
    Ast(Node),
    Escape(EscapedFn),
    /// A constant value.
    Value(Value),
    /// A bare column name from the primary table.
    Column(String),
    /// An expression evaluated over a sliding window frame.
    Window {
        expr: Box<ExprSpec>,
        window: WindowSpec,
    },
}

impl From<&str> for ExprSpec {
    fn from(source: &str) -> Self {
        ExprSpec::Source(source.to_string())
    }
}

impl From<String> for ExprSpec {
    fn from(source: String) -> Self {
        ExprSpec::Source(source)
    }
}

impl From<Node> for ExprSpec {
    fn from(node: Node) -> Self {
        ExprSpec::Ast(node)
    }
}

impl From<Value> for ExprSpec {
    fn from(value: Value) -> Self {
        ExprSpec::Value(value)
    }
}

/// Wrap a closure so it runs per row without being parsed or compiled.
pub fn escape<F>(f: F) -> ExprSpec
where
    F: Fn(&Row<'_>, &Params) -> Value + Send + Sync + 'static,
{
    ExprSpec::Escape(EscapedFn(Arc::new(f)))
}

/// Evaluate aggregate and window calls inside `expr` over a sliding frame rather than the
/// whole partition.
pub fn rolling(expr: impl Into<ExprSpec>, frame: Frame, peers: bool) -> ExprSpec {
    ExprSpec::Window {
        expr: Box::new(expr.into()),
        window: WindowSpec { frame, peers },
    }
}

pub fn column(name: impl Into<String>) -> ExprSpec {
    ExprSpec::Column(name.into())
}
