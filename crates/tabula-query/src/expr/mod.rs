//! The embedded expression language: syntax tree, parser, scalar functions, compiler and
//! evaluator.

mod ast;
mod compile;
mod eval;
mod functions;
mod parser;
mod spec;

pub use ast::{
    BinaryOp, DeclarationKind, Declarator, Literal, LogicalOp, LoopKind, Node, Pattern,
    PatternProperty, Property, UnaryOp,
};
pub use compile::{
    compile, AggregateCall, CompileContext, CompileOptions, CompiledExprs, WindowCall,
    WindowKind,
};
pub use eval::{Compiled, Env, NoOps, OpLookup, OpRef, Params, Row, Statement};
pub use functions::{iter_functions, lookup_function, lookup_math, ScalarFunction, ScalarImpl};
pub use parser::parse;
pub use spec::{column, escape, rolling, EscapedFn, ExprSpec};
