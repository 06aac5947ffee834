//! Expression compiler: scope binding, validation, reference rewriting and op extraction.

use super::ast::{BinaryOp, Declarator, Literal, Node, Pattern, Property, UnaryOp};
use super::eval::{Compiled, Env, NoOps, OpRef, Params, Statement};
use super::functions::{lookup_function, lookup_math, ScalarFunction};
use super::parser::parse;
use super::spec::ExprSpec;
use crate::agg::{lookup_aggregate, AggregateDef};
use crate::error::{QueryError, QueryResult};
use crate::window::{lookup_window, Frame, WindowDef, WindowSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tabula_columnar::{ColumnTable, DictionaryLookup, Value};

/// Which call kinds an expression may contain, and how it binds tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Allow aggregate function calls.
    pub aggregate: bool,
    /// Allow window function calls and rolling aggregates.
    pub window: bool,
    /// Reject column references outside aggregate calls.
    pub aggregate_only: bool,
    /// Bind two input tables (`d1`, `d2`) instead of one (`d`).
    pub join: bool,
}

impl CompileOptions {
    /// Plain row expressions: no aggregates or windows.
    pub fn rows() -> Self {
        Self::default()
    }

    pub fn derive() -> Self {
        Self {
            aggregate: true,
            window: true,
            ..Self::default()
        }
    }

    pub fn rollup() -> Self {
        Self {
            aggregate: true,
            aggregate_only: true,
            ..Self::default()
        }
    }

    pub fn join() -> Self {
        Self {
            join: true,
            ..Self::default()
        }
    }
}

pub struct CompileContext<'a> {
    pub tables: &'a [Arc<ColumnTable>],
    pub params: &'a Arc<Params>,
    pub options: CompileOptions,
}

#[derive(Clone, Debug)]
pub struct AggregateCall {
    pub def: &'static AggregateDef,
    pub fields: Vec<Compiled>,
    /// Rewritten field expressions; reducers are shared between calls with equal keys.
    pub field_key: Vec<Node>,
    pub params: Vec<Value>,
}

#[derive(Clone, Copy, Debug)]
pub enum WindowKind {
    Function(&'static WindowDef),
    Aggregate(&'static AggregateDef),
}

#[derive(Clone, Debug)]
pub struct WindowCall {
    pub kind: WindowKind,
    pub fields: Vec<Compiled>,
    pub field_key: Vec<Node>,
    pub params: Vec<Value>,
    pub window: WindowSpec,
}

/// Output of compiling a list of named expressions.
#[derive(Clone, Debug, Default)]
pub struct CompiledExprs {
    pub names: Vec<String>,
    pub exprs: Vec<Compiled>,
    /// Rewritten syntax tree per expression; `None` for escaped functions and opaque values.
    pub asts: Vec<Option<Node>>,
    pub aggregates: Vec<AggregateCall>,
    pub windows: Vec<WindowCall>,
    join: bool,
}

impl CompiledExprs {
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn has_ops(&self) -> bool {
        !self.aggregates.is_empty() || !self.windows.is_empty()
    }

    /// Rewritten tree for expression `idx` as JSON; re-import it with `ExprSpec::Ast`.
    pub fn to_json(&self, idx: usize) -> Option<serde_json::Value> {
        serde_json::to_value(self.asts.get(idx)?.as_ref()?).ok()
    }

    /// Source text for expression `idx`, as an arrow function over the default tuple names.
    pub fn to_source(&self, idx: usize) -> Option<String> {
        let body = self.asts.get(idx)?.clone()?;
        let tuples: &[&str] = if self.join { &["d1", "d2"] } else { &["d"] };
        let mut params: Vec<Pattern> = tuples
            .iter()
            .map(|t| Pattern::Identifier {
                name: t.to_string(),
            })
            .collect();
        params.push(Pattern::Identifier { name: "$".into() });
        let node = Node::ArrowFunction {
            params,
            body: Box::new(body),
        };
        Some(node.to_source(tuples, "$"))
    }
}

/// Compile named expressions against the context's tables and parameters.
pub fn compile<N, S>(
    exprs: impl IntoIterator<Item = (N, S)>,
    ctx: &CompileContext<'_>,
) -> QueryResult<CompiledExprs>
where
    N: Into<String>,
    S: Into<ExprSpec>,
{
    let mut compiler = Compiler::new(ctx);
    let mut out = CompiledExprs {
        join: ctx.options.join,
        ..CompiledExprs::default()
    };
    for (name, spec) in exprs {
        let (expr, ast) = compiler.compile_spec(&spec.into())?;
        out.names.push(name.into());
        out.exprs.push(expr);
        out.asts.push(ast);
    }
    out.aggregates = compiler.aggregates;
    out.windows = compiler.windows;
    Ok(out)
}

const MATH_CONSTANTS: &[(&str, f64)] = &[
    ("E", std::f64::consts::E),
    ("LN2", std::f64::consts::LN_2),
    ("LN10", std::f64::consts::LN_10),
    ("LOG2E", std::f64::consts::LOG2_E),
    ("LOG10E", std::f64::consts::LOG10_E),
    ("PI", std::f64::consts::PI),
    ("SQRT1_2", std::f64::consts::FRAC_1_SQRT_2),
    ("SQRT2", std::f64::consts::SQRT_2),
];

fn global_constant(name: &str) -> Option<Value> {
    match name {
        "undefined" => Some(Value::Null),
        "NaN" => Some(Value::Number(f64::NAN)),
        "Infinity" => Some(Value::Number(f64::INFINITY)),
        _ => math_constant(name),
    }
}

fn math_constant(name: &str) -> Option<Value> {
    MATH_CONSTANTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| Value::Number(*v))
}

#[derive(Clone, Debug, Default)]
struct Scope {
    /// Identifier bound to each input table.
    tuples: Vec<Option<String>>,
    /// Destructured tuple bindings: local name to (table, column).
    fields: HashMap<String, (usize, String)>,
    params: Option<String>,
    /// Destructured parameter bindings: local name to parameter name.
    param_fields: HashMap<String, String>,
}

impl Scope {
    fn default_for(tables: usize) -> Self {
        let tuples = if tables > 1 {
            vec![Some("d1".to_string()), Some("d2".to_string())]
        } else {
            vec![Some("d".to_string())]
        };
        Self {
            tuples,
            params: Some("$".to_string()),
            ..Self::default()
        }
    }

    fn bind(patterns: &[Pattern], tables: usize) -> Self {
        let mut scope = Self {
            tuples: vec![None; tables],
            ..Self::default()
        };
        for (i, pattern) in patterns.iter().enumerate() {
            match (pattern, i.cmp(&tables)) {
                (Pattern::Identifier { name }, std::cmp::Ordering::Less) => {
                    scope.tuples[i] = Some(name.clone())
                }
                (Pattern::Object { properties }, std::cmp::Ordering::Less) => {
                    for p in properties {
                        scope.fields.insert(p.binding.clone(), (i, p.key.clone()));
                    }
                }
                (Pattern::Identifier { name }, std::cmp::Ordering::Equal) => {
                    scope.params = Some(name.clone())
                }
                (Pattern::Object { properties }, std::cmp::Ordering::Equal) => {
                    for p in properties {
                        scope.param_fields.insert(p.binding.clone(), p.key.clone());
                    }
                }
                _ => {}
            }
        }
        scope
    }

    fn tuple_index(&self, name: &str) -> Option<usize> {
        self.tuples
            .iter()
            .position(|t| t.as_deref() == Some(name))
    }
}

#[derive(PartialEq, Eq, Hash)]
struct OpSignature {
    name: &'static str,
    fields: Vec<Node>,
    params: Vec<Value>,
    window: Option<WindowSpec>,
}

fn unsupported(node: &Node, construct: &str, hint: Option<&str>) -> QueryError {
    QueryError::UnsupportedSyntax {
        construct: construct.to_string(),
        snippet: node.to_string(),
        hint: hint.map(str::to_string),
    }
}

fn invalid_reference(node: &Node, message: String, hint: Option<&str>) -> QueryError {
    QueryError::InvalidReference {
        message,
        snippet: node.to_string(),
        hint: hint.map(str::to_string),
    }
}

fn invalid_call(node: &Node, message: String, hint: Option<&str>) -> QueryError {
    QueryError::InvalidCall {
        message,
        snippet: node.to_string(),
        hint: hint.map(str::to_string),
    }
}

/// The frame and body of a root-level `rolling(body, [start, end], peers)`, either as a
/// [`Node::Rolling`] or in its call form.
fn rolling_root(node: &Node) -> QueryResult<Option<(WindowSpec, &Node)>> {
    let arguments = match node {
        Node::Rolling { window, body } => return Ok(Some((*window, body.as_ref()))),
        Node::Call { callee, arguments }
            if matches!(callee.as_ref(), Node::Identifier { name } if name == "rolling") =>
        {
            arguments
        }
        _ => return Ok(None),
    };
    let malformed = || {
        invalid_call(
            node,
            "rolling expects an expression, a frame and an optional peers flag".to_string(),
            Some("write rolling(expr, [start, end], peers) with null for an unbounded side"),
        )
    };
    let (body, frame, peers) = match arguments.as_slice() {
        [body, frame] => (body, frame, None),
        [body, frame, peers] => (body, frame, Some(peers)),
        _ => return Err(malformed()),
    };
    let Node::Array { elements } = frame else {
        return Err(malformed());
    };
    let [start, end] = elements.as_slice() else {
        return Err(malformed());
    };
    let bound = |node: &Node| -> Option<Option<i64>> {
        let n = match node {
            Node::Literal {
                value: Literal::Null,
            } => return Some(None),
            Node::Literal {
                value: Literal::Number(n),
            } => *n,
            Node::Unary {
                operator: UnaryOp::Negate,
                argument,
            } => match argument.as_ref() {
                Node::Literal {
                    value: Literal::Number(n),
                } => -*n,
                _ => return None,
            },
            _ => return None,
        };
        (n.fract() == 0.0 && n.is_finite()).then_some(Some(n as i64))
    };
    let frame = Frame::new(
        bound(start).ok_or_else(malformed)?,
        bound(end).ok_or_else(malformed)?,
    );
    let peers = match peers {
        None => false,
        Some(Node::Literal {
            value: Literal::Boolean(b),
        }) => *b,
        Some(_) => return Err(malformed()),
    };
    Ok(Some((WindowSpec { frame, peers }, body)))
}

struct OpArgs {
    fields: Vec<Compiled>,
    field_nodes: Vec<Node>,
    params: Vec<Value>,
    param_nodes: Vec<Node>,
}

struct Compiler<'a> {
    ctx: &'a CompileContext<'a>,
    scope: Scope,
    locals: Vec<HashMap<String, usize>>,
    next_slot: usize,
    in_op: bool,
    rolling: Option<WindowSpec>,
    aggregates: Vec<AggregateCall>,
    windows: Vec<WindowCall>,
    signatures: HashMap<OpSignature, OpRef>,
}

impl<'a> Compiler<'a> {
    fn new(ctx: &'a CompileContext<'a>) -> Self {
        Self {
            ctx,
            scope: Scope::default(),
            locals: Vec::new(),
            next_slot: 0,
            in_op: false,
            rolling: None,
            aggregates: Vec::new(),
            windows: Vec::new(),
            signatures: HashMap::new(),
        }
    }

    fn compile_spec(&mut self, spec: &ExprSpec) -> QueryResult<(Compiled, Option<Node>)> {
        match spec {
            ExprSpec::Source(text) => {
                let node = parse(text)?;
                self.compile_root(&node)
            }
            ExprSpec::Ast(node) => self.compile_root(node),
            ExprSpec::Escape(func) => Ok((
                Compiled::Escape {
                    func: func.clone(),
                    tables: self.ctx.tables.to_vec(),
                    params: self.ctx.params.clone(),
                },
                None,
            )),
            ExprSpec::Value(value) => Ok((
                Compiled::Literal(value.clone()),
                Literal::from_value(value).map(Node::literal),
            )),
            ExprSpec::Column(name) => self.compile_root(&Node::column(0, name.as_str())),
            ExprSpec::Window { expr, window } => {
                let outer = self.rolling.replace(*window);
                let result = self.compile_spec(expr);
                self.rolling = outer;
                let (expr, node) = result?;
                Ok((expr, node.map(|body| Node::rolling(*window, body))))
            }
        }
    }

    fn compile_root(&mut self, node: &Node) -> QueryResult<(Compiled, Option<Node>)> {
        let tables = self.ctx.tables.len();
        let body = match node {
            Node::ArrowFunction { params, body } | Node::Function { params, body, .. } => {
                self.scope = Scope::bind(params, tables);
                body.as_ref()
            }
            _ => {
                self.scope = Scope::default_for(tables);
                node
            }
        };
        self.locals.clear();
        self.next_slot = 0;

        if let Some((window, inner)) = rolling_root(body)? {
            let outer = self.rolling.replace(window);
            let result = self.compile_body(inner);
            self.rolling = outer;
            let (expr, node) = result?;
            return Ok((expr, node.map(|body| Node::rolling(window, body))));
        }
        self.compile_body(body)
    }

    fn compile_body(&mut self, body: &Node) -> QueryResult<(Compiled, Option<Node>)> {
        match body {
            Node::Block { body } => {
                let (stmts, nodes) = self.block(body)?;
                Ok((Compiled::Block(stmts), Some(Node::Block { body: nodes })))
            }
            _ => {
                let (expr, node) = self.expr(body)?;
                Ok((expr, Some(node)))
            }
        }
    }

    fn lookup_local(&self, name: &str) -> Option<usize> {
        self.locals
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn block(&mut self, stmts: &[Node]) -> QueryResult<(Vec<Statement>, Vec<Node>)> {
        self.locals.push(HashMap::new());
        let result = self.statements(stmts);
        self.locals.pop();
        result
    }

    fn statements(&mut self, stmts: &[Node]) -> QueryResult<(Vec<Statement>, Vec<Node>)> {
        let mut out = Vec::new();
        let mut nodes = Vec::new();
        for stmt in stmts {
            let node = self.statement(stmt, &mut out)?;
            nodes.push(node);
        }
        Ok((out, nodes))
    }

    fn branch(&mut self, node: &Node) -> QueryResult<(Vec<Statement>, Node)> {
        match node {
            Node::Block { body } => {
                let (stmts, nodes) = self.block(body)?;
                Ok((stmts, Node::Block { body: nodes }))
            }
            _ => {
                self.locals.push(HashMap::new());
                let mut out = Vec::new();
                let result = self.statement(node, &mut out);
                self.locals.pop();
                Ok((out, result?))
            }
        }
    }

    fn statement(&mut self, node: &Node, out: &mut Vec<Statement>) -> QueryResult<Node> {
        match node {
            Node::Declaration { kind, declarations } => {
                let mut rewritten = Vec::new();
                for declarator in declarations {
                    let Pattern::Identifier { name } = &declarator.id else {
                        return Err(unsupported(
                            node,
                            "destructuring declarations",
                            Some("declare each value with its own const"),
                        ));
                    };
                    let Some(init) = &declarator.init else {
                        return Err(unsupported(node, "declarations without an initializer", None));
                    };
                    let (init, init_node) = self.expr(init)?;
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    if let Some(scope) = self.locals.last_mut() {
                        scope.insert(name.clone(), slot);
                    }
                    out.push(Statement::Let { slot, init });
                    rewritten.push(Declarator {
                        id: declarator.id.clone(),
                        init: Some(Box::new(init_node)),
                    });
                }
                Ok(Node::Declaration {
                    kind: *kind,
                    declarations: rewritten,
                })
            }
            Node::Return { argument } => match argument {
                Some(arg) => {
                    let (expr, node) = self.expr(arg)?;
                    out.push(Statement::Return(Some(expr)));
                    Ok(Node::Return {
                        argument: Some(Box::new(node)),
                    })
                }
                None => {
                    out.push(Statement::Return(None));
                    Ok(node.clone())
                }
            },
            Node::If {
                test,
                consequent,
                alternate,
            } => {
                let (test, test_node) = self.expr(test)?;
                let (then, then_node) = self.branch(consequent)?;
                let (otherwise, alt_node) = match alternate {
                    Some(alt) => {
                        let (stmts, node) = self.branch(alt)?;
                        (stmts, Some(Box::new(node)))
                    }
                    None => (Vec::new(), None),
                };
                out.push(Statement::If {
                    test,
                    then,
                    otherwise,
                });
                Ok(Node::If {
                    test: Box::new(test_node),
                    consequent: Box::new(then_node),
                    alternate: alt_node,
                })
            }
            Node::Block { body } => {
                let (stmts, nodes) = self.block(body)?;
                out.push(Statement::Block(stmts));
                Ok(Node::Block { body: nodes })
            }
            _ => {
                let (expr, node) = self.expr(node)?;
                out.push(Statement::Expr(expr));
                Ok(node)
            }
        }
    }

    fn expr(&mut self, node: &Node) -> QueryResult<(Compiled, Node)> {
        match node {
            Node::Literal { value } => Ok((Compiled::Literal(value.to_value()), node.clone())),
            Node::Identifier { name } => self.identifier(node, name),
            Node::Column { table, name } => self.column(node, *table, name),
            Node::Parameter { name } => self.parameter(node, name),
            Node::Member {
                object,
                property,
                computed,
            } => self.member(node, object, property, *computed),
            Node::Call { callee, arguments } => self.call(node, callee, arguments),
            Node::Unary { operator, argument } => {
                let (arg, arg_node) = self.expr(argument)?;
                Ok((
                    Compiled::Unary {
                        op: *operator,
                        arg: Box::new(arg),
                    },
                    Node::Unary {
                        operator: *operator,
                        argument: Box::new(arg_node),
                    },
                ))
            }
            Node::Binary {
                operator,
                left,
                right,
            } => self.binary(*operator, left, right),
            Node::Logical {
                operator,
                left,
                right,
            } => {
                let (l, l_node) = self.expr(left)?;
                let (r, r_node) = self.expr(right)?;
                Ok((
                    Compiled::Logical {
                        op: *operator,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                    Node::Logical {
                        operator: *operator,
                        left: Box::new(l_node),
                        right: Box::new(r_node),
                    },
                ))
            }
            Node::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let (t, t_node) = self.expr(test)?;
                let (c, c_node) = self.expr(consequent)?;
                let (a, a_node) = self.expr(alternate)?;
                Ok((
                    Compiled::Conditional {
                        test: Box::new(t),
                        then: Box::new(c),
                        otherwise: Box::new(a),
                    },
                    Node::Conditional {
                        test: Box::new(t_node),
                        consequent: Box::new(c_node),
                        alternate: Box::new(a_node),
                    },
                ))
            }
            Node::Array { elements } => {
                let mut items = Vec::with_capacity(elements.len());
                let mut nodes = Vec::with_capacity(elements.len());
                for element in elements {
                    let (item, node) = self.expr(element)?;
                    items.push(item);
                    nodes.push(node);
                }
                Ok((Compiled::Array(items), Node::Array { elements: nodes }))
            }
            Node::Object { properties } => {
                let mut props = Vec::with_capacity(properties.len());
                let mut nodes = Vec::with_capacity(properties.len());
                for property in properties {
                    let (value, node) = self.expr(&property.value)?;
                    props.push((Arc::from(property.key.as_str()), value));
                    nodes.push(Property {
                        key: property.key.clone(),
                        value: node,
                    });
                }
                Ok((Compiled::Object(props), Node::Object { properties: nodes }))
            }
            Node::ArrowFunction { .. } | Node::Function { .. } => Err(unsupported(
                node,
                "function definitions",
                Some("use escape() to run custom functions"),
            )),
            Node::Block { .. } | Node::Declaration { .. } | Node::Return { .. } | Node::If { .. } => {
                Err(unsupported(
                    node,
                    "statements outside a function body",
                    None,
                ))
            }
            Node::Loop { .. } => Err(unsupported(
                node,
                "loops",
                Some("use aggregate functions or escape() instead"),
            )),
            Node::Assignment { .. } | Node::Update { .. } => Err(unsupported(
                node,
                "assignments",
                Some("declare a new const instead of reassigning"),
            )),
            Node::Await { .. } | Node::Yield { .. } => {
                Err(unsupported(node, "await and yield", None))
            }
            Node::Rolling { .. } => Err(unsupported(
                node,
                "nested rolling windows",
                Some("wrap the whole expression in rolling()"),
            )),
        }
    }

    fn identifier(&mut self, node: &Node, name: &str) -> QueryResult<(Compiled, Node)> {
        if let Some(slot) = self.lookup_local(name) {
            if self.in_op {
                return Err(invalid_reference(
                    node,
                    format!("local variable '{name}' cannot be used inside an aggregate or window function"),
                    None,
                ));
            }
            return Ok((Compiled::Local(slot), node.clone()));
        }
        if let Some((table, column)) = self.scope.fields.get(name).cloned() {
            return self.column(node, table, &column);
        }
        if let Some(param) = self.scope.param_fields.get(name).cloned() {
            return self.parameter(node, &param);
        }
        if self.scope.tuple_index(name).is_some() {
            return Err(invalid_reference(
                node,
                format!("table row '{name}' can only be used to access columns"),
                Some("write d.column or d[\"column\"]"),
            ));
        }
        if self.scope.params.as_deref() == Some(name) {
            return Err(invalid_reference(
                node,
                format!("parameter object '{name}' can only be used to access parameters"),
                Some("write $.name"),
            ));
        }
        if let Some(value) = global_constant(name) {
            return Ok((Compiled::Literal(value), node.clone()));
        }
        Err(invalid_reference(
            node,
            format!("'{name}' is not defined"),
            Some("reference columns as d.name and parameters as $.name, or use escape()"),
        ))
    }

    fn column(&mut self, node: &Node, table: usize, name: &str) -> QueryResult<(Compiled, Node)> {
        let Some(data) = self.ctx.tables.get(table) else {
            return Err(invalid_reference(
                node,
                format!("no input table at position {table}"),
                None,
            ));
        };
        let Some(column) = data.column(name) else {
            return Err(invalid_reference(
                node,
                format!("unknown column '{name}'"),
                None,
            ));
        };
        if self.ctx.options.aggregate_only && !self.in_op {
            return Err(invalid_reference(
                node,
                format!("column '{name}' is referenced outside an aggregate function"),
                Some("wrap it in an aggregate such as any(d.x)"),
            ));
        }
        Ok((
            Compiled::Column {
                table,
                column: column.clone(),
            },
            Node::column(table, name),
        ))
    }

    fn parameter(&mut self, node: &Node, name: &str) -> QueryResult<(Compiled, Node)> {
        match self.ctx.params.get(name) {
            Some(value) => Ok((
                Compiled::Literal(value.clone()),
                Node::Parameter {
                    name: name.to_string(),
                },
            )),
            None => Err(invalid_reference(
                node,
                format!("unknown parameter '{name}'"),
                Some("declare it with params()"),
            )),
        }
    }

    fn constant(&self, expr: &Compiled) -> Option<Value> {
        expr.is_constant().then(|| expr.eval(&mut Env::new(&NoOps)))
    }

    fn member_key(&mut self, node: &Node, property: &Node, computed: bool) -> QueryResult<String> {
        match (computed, property) {
            (false, Node::Identifier { name }) => Ok(name.clone()),
            (true, Node::Literal { value }) => Ok(value.to_value().to_string()),
            _ => {
                let (expr, _) = self.expr(property)?;
                self.constant(&expr)
                    .map(|v| v.to_string())
                    .ok_or_else(|| QueryError::InvalidMember {
                        message: "column and parameter names must be constant".into(),
                        snippet: node.to_string(),
                    })
            }
        }
    }

    fn member(
        &mut self,
        node: &Node,
        object: &Node,
        property: &Node,
        computed: bool,
    ) -> QueryResult<(Compiled, Node)> {
        if let Node::Identifier { name } = object {
            if self.lookup_local(name).is_none() {
                if let Some(table) = self.scope.tuple_index(name) {
                    let key = self.member_key(node, property, computed)?;
                    return self.column(node, table, &key);
                }
                if self.scope.params.as_deref() == Some(name.as_str()) {
                    let key = self.member_key(node, property, computed)?;
                    return self.parameter(node, &key);
                }
                if name == "Math" {
                    let key = self.member_key(node, property, computed)?;
                    return match math_constant(&key) {
                        Some(value) => Ok((Compiled::Literal(value), node.clone())),
                        None => Err(QueryError::InvalidMember {
                            message: format!("unknown Math constant '{key}'"),
                            snippet: node.to_string(),
                        }),
                    };
                }
            }
        }

        let (object, object_node) = self.expr(object)?;
        let (property, property_node) = match (computed, property) {
            (false, Node::Identifier { name }) => (
                Compiled::Literal(Value::string(name)),
                property.clone(),
            ),
            _ => self.expr(property)?,
        };
        Ok((
            Compiled::Member {
                object: Box::new(object),
                property: Box::new(property),
            },
            Node::Member {
                object: Box::new(object_node),
                property: Box::new(property_node),
                computed,
            },
        ))
    }

    fn binary(&mut self, op: BinaryOp, left: &Node, right: &Node) -> QueryResult<(Compiled, Node)> {
        let (l, l_node) = self.expr(left)?;
        let (r, r_node) = self.expr(right)?;
        let node = Node::Binary {
            operator: op,
            left: Box::new(l_node),
            right: Box::new(r_node),
        };
        let negated = match op {
            BinaryOp::Equals | BinaryOp::StrictEquals => Some(false),
            BinaryOp::NotEquals | BinaryOp::StrictNotEquals => Some(true),
            _ => None,
        };
        if let Some(negated) = negated {
            if let Some(expr) =
                dictionary_equality(&l, &r, negated).or_else(|| dictionary_equality(&r, &l, negated))
            {
                return Ok((expr, node));
            }
        }
        Ok((
            Compiled::Binary {
                op,
                left: Box::new(l),
                right: Box::new(r),
            },
            node,
        ))
    }

    fn call(&mut self, node: &Node, callee: &Node, args: &[Node]) -> QueryResult<(Compiled, Node)> {
        let (name, namespace) = match callee {
            Node::Identifier { name } if self.lookup_local(name).is_none() => (name.as_str(), None),
            Node::Member {
                object,
                property,
                computed: false,
            } => match (object.as_ref(), property.as_ref()) {
                (Node::Identifier { name: ns }, Node::Identifier { name })
                    if (ns == "op" || ns == "Math") && self.lookup_local(ns).is_none() =>
                {
                    (name.as_str(), Some(ns.as_str()))
                }
                _ => {
                    return Err(invalid_call(
                        node,
                        "only registered functions can be called".into(),
                        Some("use escape() to run custom functions"),
                    ))
                }
            },
            Node::ArrowFunction { .. } | Node::Function { .. } => {
                return Err(unsupported(
                    callee,
                    "function definitions",
                    Some("use escape() to run custom functions"),
                ))
            }
            _ => {
                return Err(invalid_call(
                    node,
                    "only registered functions can be called".into(),
                    Some("use escape() to run custom functions"),
                ))
            }
        };

        if namespace == Some("Math") {
            return match lookup_math(name) {
                Some(func) => self.scalar_call(node, callee, func, args),
                None => Err(invalid_call(
                    node,
                    format!("unsupported Math function '{name}'"),
                    None,
                )),
            };
        }
        if let Some(def) = lookup_aggregate(name) {
            return self.aggregate_call(node, callee, def, args);
        }
        if let Some(def) = lookup_window(name) {
            return self.window_call(node, callee, def, args);
        }
        if let Some(func) = lookup_function(name) {
            return self.scalar_call(node, callee, func, args);
        }
        Err(invalid_call(
            node,
            format!("unknown function '{name}'"),
            Some("register it as a scalar function or use escape()"),
        ))
    }

    fn scalar_call(
        &mut self,
        node: &Node,
        callee: &Node,
        func: &'static ScalarFunction,
        args: &[Node],
    ) -> QueryResult<(Compiled, Node)> {
        if args.len() < func.min_args || args.len() > func.max_args {
            return Err(invalid_call(
                node,
                format!(
                    "{} expects between {} and {} arguments, got {}",
                    func.name,
                    func.min_args,
                    func.max_args,
                    args.len()
                ),
                None,
            ));
        }
        let mut compiled = Vec::with_capacity(args.len());
        let mut nodes = Vec::with_capacity(args.len());
        for arg in args {
            let (expr, arg_node) = self.expr(arg)?;
            compiled.push(expr);
            nodes.push(arg_node);
        }
        Ok((
            Compiled::Call {
                func,
                args: compiled,
            },
            Node::Call {
                callee: Box::new(callee.clone()),
                arguments: nodes,
            },
        ))
    }

    fn op_args(
        &mut self,
        node: &Node,
        name: &str,
        fields: usize,
        params: usize,
        args: &[Node],
    ) -> QueryResult<OpArgs> {
        if self.in_op {
            return Err(invalid_call(
                node,
                format!("{name} is nested inside another aggregate or window function"),
                None,
            ));
        }
        if args.len() < fields || args.len() > fields + params {
            return Err(invalid_call(
                node,
                format!(
                    "{name} expects {fields} field argument(s) and up to {params} parameter(s), got {} argument(s)",
                    args.len()
                ),
                None,
            ));
        }
        self.in_op = true;
        let result = self.op_args_inner(node, name, fields, args);
        self.in_op = false;
        result
    }

    fn op_args_inner(
        &mut self,
        node: &Node,
        name: &str,
        fields: usize,
        args: &[Node],
    ) -> QueryResult<OpArgs> {
        let mut out = OpArgs {
            fields: Vec::new(),
            field_nodes: Vec::new(),
            params: Vec::new(),
            param_nodes: Vec::new(),
        };
        for arg in &args[..fields] {
            let (expr, arg_node) = self.expr(arg)?;
            out.fields.push(expr);
            out.field_nodes.push(arg_node);
        }
        for arg in &args[fields..] {
            let (expr, arg_node) = self.expr(arg)?;
            let Some(value) = self.constant(&expr) else {
                return Err(invalid_call(
                    node,
                    format!("parameters of {name} must be constant"),
                    Some("pass row-dependent values as field arguments or use $.name"),
                ));
            };
            out.params.push(value);
            out.param_nodes.push(arg_node);
        }
        Ok(out)
    }

    fn register(&mut self, signature: OpSignature, make: impl FnOnce(&mut Self) -> OpRef) -> OpRef {
        if let Some(op) = self.signatures.get(&signature) {
            return *op;
        }
        let op = make(self);
        self.signatures.insert(signature, op);
        op
    }

    fn aggregate_call(
        &mut self,
        node: &Node,
        callee: &Node,
        def: &'static AggregateDef,
        args: &[Node],
    ) -> QueryResult<(Compiled, Node)> {
        let options = self.ctx.options;
        match self.rolling {
            Some(_) if !options.window => {
                return Err(invalid_call(
                    node,
                    format!("rolling aggregate {} is not allowed here", def.name),
                    None,
                ))
            }
            None if !options.aggregate => {
                return Err(invalid_call(
                    node,
                    format!("aggregate function {} is not allowed here", def.name),
                    Some("aggregates are supported in derive, filter and rollup"),
                ))
            }
            _ => {}
        }
        let OpArgs {
            fields,
            field_nodes,
            params,
            param_nodes,
        } = self.op_args(node, def.name, def.fields, def.params, args)?;

        let signature = OpSignature {
            name: def.name,
            fields: field_nodes.clone(),
            params: params.clone(),
            window: self.rolling,
        };
        let rolling = self.rolling;
        let key = field_nodes.clone();
        let op = self.register(signature, move |this| match rolling {
            Some(window) => {
                this.windows.push(WindowCall {
                    kind: WindowKind::Aggregate(def),
                    fields,
                    field_key: key,
                    params,
                    window,
                });
                OpRef::Window(this.windows.len() - 1)
            }
            None => {
                this.aggregates.push(AggregateCall {
                    def,
                    fields,
                    field_key: key,
                    params,
                });
                OpRef::Aggregate(this.aggregates.len() - 1)
            }
        });

        let mut arguments = field_nodes;
        arguments.extend(param_nodes);
        Ok((
            Compiled::Op(op),
            Node::Call {
                callee: Box::new(callee.clone()),
                arguments,
            },
        ))
    }

    fn window_call(
        &mut self,
        node: &Node,
        callee: &Node,
        def: &'static WindowDef,
        args: &[Node],
    ) -> QueryResult<(Compiled, Node)> {
        if !self.ctx.options.window {
            return Err(invalid_call(
                node,
                format!("window function {} is not allowed here", def.name),
                Some("window functions are supported in derive and filter"),
            ));
        }
        let OpArgs {
            fields,
            field_nodes,
            params,
            param_nodes,
        } = self.op_args(node, def.name, def.fields, def.params, args)?;

        let window = self.rolling.unwrap_or(WindowSpec {
            frame: Frame::UNBOUNDED,
            peers: false,
        });
        let signature = OpSignature {
            name: def.name,
            fields: field_nodes.clone(),
            params: params.clone(),
            window: Some(window),
        };
        let key = field_nodes.clone();
        let op = self.register(signature, move |this| {
            this.windows.push(WindowCall {
                kind: WindowKind::Function(def),
                fields,
                field_key: key,
                params,
                window,
            });
            OpRef::Window(this.windows.len() - 1)
        });

        let mut arguments = field_nodes;
        arguments.extend(param_nodes);
        Ok((
            Compiled::Op(op),
            Node::Call {
                callee: Box::new(callee.clone()),
                arguments,
            },
        ))
    }
}

/// Rewrite `column == "literal"` on dictionary columns into a key comparison. A literal that is
/// absent from the dictionary folds to a constant.
fn dictionary_equality(column: &Compiled, literal: &Compiled, negated: bool) -> Option<Compiled> {
    let Compiled::Column { table, column } = column else {
        return None;
    };
    let Compiled::Literal(value @ Value::String(_)) = literal else {
        return None;
    };
    Some(match column.dictionary_lookup(value)? {
        DictionaryLookup::Present(key) => Compiled::DictionaryEq {
            table: *table,
            column: column.clone(),
            key,
            negated,
        },
        DictionaryLookup::Absent => Compiled::Literal(Value::Boolean(negated)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabula_columnar::{ColumnRef, DictionaryColumn};

    fn table() -> Arc<ColumnTable> {
        let mut t = ColumnTable::from_values([
            ("x", vec![1.into(), 2.into(), 3.into()]),
            ("y", vec![10.into(), 20.into(), Value::Null]),
        ])
        .unwrap();
        let k: ColumnRef = Arc::new(DictionaryColumn::encode([Some("a"), Some("b"), None]));
        t.add_column("k", k).unwrap();
        Arc::new(t)
    }

    fn compile_with(
        source: &str,
        options: CompileOptions,
        params: Params,
    ) -> QueryResult<CompiledExprs> {
        let tables = [table()];
        let params = Arc::new(params);
        let ctx = CompileContext {
            tables: &tables,
            params: &params,
            options,
        };
        compile([("out", source)], &ctx)
    }

    fn eval_row(compiled: &CompiledExprs, row: usize) -> Value {
        compiled.exprs[0].eval(Env::new(&NoOps).at(row))
    }

    #[test]
    fn binds_default_and_explicit_tuple_names() {
        let c = compile_with("d.x * 2", CompileOptions::rows(), Params::new()).unwrap();
        assert_eq!(eval_row(&c, 1), Value::Number(4.0));

        let c = compile_with("(row) => row.x + row['y']", CompileOptions::rows(), Params::new())
            .unwrap();
        assert_eq!(eval_row(&c, 0), Value::Number(11.0));

        let c = compile_with("({ x, y: why }) => x - why", CompileOptions::rows(), Params::new())
            .unwrap();
        assert_eq!(eval_row(&c, 1), Value::Number(-18.0));
    }

    #[test]
    fn resolves_parameters_and_constants() {
        let params = Params::from([("lo".to_string(), Value::from(2))]);
        let c = compile_with("d.x >= $.lo && PI > 3", CompileOptions::rows(), params).unwrap();
        assert_eq!(eval_row(&c, 0), Value::Boolean(false));
        assert_eq!(eval_row(&c, 2), Value::Boolean(true));
        assert_eq!(
            c.asts[0],
            Some(Node::Logical {
                operator: crate::expr::ast::LogicalOp::And,
                left: Box::new(Node::Binary {
                    operator: BinaryOp::GreaterEquals,
                    left: Box::new(Node::column(0, "x")),
                    right: Box::new(Node::Parameter { name: "lo".into() }),
                }),
                right: Box::new(Node::Binary {
                    operator: BinaryOp::Greater,
                    left: Box::new(Node::identifier("PI")),
                    right: Box::new(Node::literal(Literal::Number(3.0))),
                }),
            })
        );
    }

    #[test]
    fn rejects_bad_references() {
        let err = compile_with("d.missing", CompileOptions::rows(), Params::new()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidReference { .. }));
        let err = compile_with("foo + 1", CompileOptions::rows(), Params::new()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidReference { hint: Some(_), .. }));
        let err = compile_with("$.nope", CompileOptions::rows(), Params::new()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidReference { .. }));
        let err = compile_with("d[d.x]", CompileOptions::rows(), Params::new()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidMember { .. }));
    }

    #[test]
    fn rejects_disallowed_syntax() {
        for source in [
            "d => { let t = 0; t = 1; return t; }",
            "d => { for (;;) {} }",
            "d => (x => x)(d.x)",
            "d => d.x++",
        ] {
            let err = compile_with(source, CompileOptions::derive(), Params::new()).unwrap_err();
            assert!(
                matches!(err, QueryError::UnsupportedSyntax { .. }),
                "{source}: {err:?}"
            );
        }
    }

    #[test]
    fn block_bodies_with_locals() {
        let c = compile_with(
            "d => { const a = d.x * 2; if (a > 3) { return 'big'; } return 'small'; }",
            CompileOptions::rows(),
            Params::new(),
        )
        .unwrap();
        assert_eq!(eval_row(&c, 0), Value::from("small"));
        assert_eq!(eval_row(&c, 2), Value::from("big"));
    }

    #[test]
    fn dictionary_equality_uses_keys() {
        let c = compile_with("d.k == 'b'", CompileOptions::rows(), Params::new()).unwrap();
        assert!(matches!(c.exprs[0], Compiled::DictionaryEq { key: 1, .. }));
        assert_eq!(eval_row(&c, 1), Value::Boolean(true));
        assert_eq!(eval_row(&c, 2), Value::Boolean(false));

        let c = compile_with("'zzz' != d.k", CompileOptions::rows(), Params::new()).unwrap();
        assert!(matches!(c.exprs[0], Compiled::Literal(Value::Boolean(true))));
    }

    #[test]
    fn dedupes_identical_ops() {
        let tables = [table()];
        let params = Arc::new(Params::new());
        let ctx = CompileContext {
            tables: &tables,
            params: &params,
            options: CompileOptions::derive(),
        };
        let c = compile(
            [
                ("a", "op.mean(d.x)"),
                ("b", "mean(d.x) + sum(d.x)"),
                ("c", "quantile(d.x, 0.5) - quantile(d.x, 0.25)"),
            ],
            &ctx,
        )
        .unwrap();
        assert_eq!(c.aggregates.len(), 4);
        assert!(c.windows.is_empty());
    }

    #[test]
    fn validates_op_context() {
        let err = compile_with("mean(d.x)", CompileOptions::rows(), Params::new()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidCall { .. }));
        let err = compile_with("mean(sum(d.x))", CompileOptions::derive(), Params::new())
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidCall { .. }));
        let err = compile_with("rank()", CompileOptions::rollup(), Params::new()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidCall { .. }));
        let err = compile_with("d.x + sum(d.x)", CompileOptions::rollup(), Params::new())
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidReference { .. }));
        let err = compile_with("quantile(d.x, d.y)", CompileOptions::derive(), Params::new())
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidCall { .. }));
    }

    #[test]
    fn rolling_call_sets_the_frame() {
        let c = compile_with(
            "(d) => rolling(sum(d.x), [-2, null], true)",
            CompileOptions::derive(),
            Params::new(),
        )
        .unwrap();
        assert!(c.aggregates.is_empty());
        assert_eq!(
            c.windows[0].window,
            WindowSpec {
                frame: Frame::new(Some(-2), None),
                peers: true,
            }
        );
        assert_eq!(c.to_source(0).unwrap(), "(d, $) => rolling(sum(d.x), [-2, null], true)");

        for bad in ["rolling(sum(d.x))", "rolling(sum(d.x), [0.5, 0])", "1 + rolling(sum(d.x), [0, 0])"] {
            assert!(compile_with(bad, CompileOptions::derive(), Params::new()).is_err(), "{bad}");
        }
    }

    #[test]
    fn exports_source_that_recompiles() {
        let c = compile_with(
            "({ x }, $) => x > 1 ? sum(x) : null",
            CompileOptions::derive(),
            Params::new(),
        )
        .unwrap();
        let source = c.to_source(0).unwrap();
        assert_eq!(source, "(d, $) => ((d.x > 1) ? sum(d.x) : null)");
        let again = compile_with(&source, CompileOptions::derive(), Params::new()).unwrap();
        assert_eq!(again.asts, c.asts);
    }
}
