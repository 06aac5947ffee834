use crate::window::WindowSpec;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use tabula_columnar::Value;

/// Expression syntax tree.
///
/// The parser produces the full surface grammar, including constructs the compiler later
/// rejects (loops, assignments, nested functions), so that errors can point at the offending
/// node. The compiler's rewrite pass replaces tuple and parameter member accesses with
/// [`Node::Column`] and [`Node::Parameter`]; the rewritten tree is what gets exported.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    Literal {
        value: Literal,
    },
    Identifier {
        name: String,
    },
    Member {
        object: Box<Node>,
        property: Box<Node>,
        computed: bool,
    },
    Call {
        callee: Box<Node>,
        arguments: Vec<Node>,
    },
    Unary {
        operator: UnaryOp,
        argument: Box<Node>,
    },
    Binary {
        operator: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Logical {
        operator: LogicalOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Conditional {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Box<Node>,
    },
    Array {
        elements: Vec<Node>,
    },
    Object {
        properties: Vec<Property>,
    },
    ArrowFunction {
        params: Vec<Pattern>,
        body: Box<Node>,
    },
    Function {
        name: Option<String>,
        params: Vec<Pattern>,
        body: Box<Node>,
    },
    Block {
        body: Vec<Node>,
    },
    Declaration {
        kind: DeclarationKind,
        declarations: Vec<Declarator>,
    },
    Return {
        argument: Option<Box<Node>>,
    },
    If {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Option<Box<Node>>,
    },
    Loop {
        kind: LoopKind,
        body: Box<Node>,
    },
    Assignment {
        operator: String,
        target: Box<Node>,
        value: Box<Node>,
    },
    Update {
        operator: String,
        prefix: bool,
        argument: Box<Node>,
    },
    Await {
        argument: Box<Node>,
    },
    Yield {
        argument: Option<Box<Node>>,
    },
    /// Resolved reference to a column of input table `table` (0 or 1).
    Column {
        table: usize,
        name: String,
    },
    /// Resolved reference to a named query parameter.
    Parameter {
        name: String,
    },
    /// Aggregate and window calls in `body` run over the sliding frame of `window`.
    /// Written in source as `rolling(body, [start, end], peers)`.
    Rolling {
        window: WindowSpec,
        body: Box<Node>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Boolean(a), Literal::Boolean(b)) => a == b,
            (Literal::Number(a), Literal::Number(b)) => OrderedFloat(*a) == OrderedFloat(*b),
            (Literal::String(a), Literal::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Literal::Null => {}
            Literal::Boolean(b) => b.hash(state),
            Literal::Number(n) => OrderedFloat(*n).hash(state),
            Literal::String(s) => s.hash(state),
        }
    }
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::string(s),
        }
    }

    /// Literal form of a constant value. Values without a literal syntax yield `None`.
    pub fn from_value(value: &Value) -> Option<Literal> {
        match value {
            Value::Null => Some(Literal::Null),
            Value::Boolean(b) => Some(Literal::Boolean(*b)),
            Value::Number(n) if n.is_finite() => Some(Literal::Number(*n)),
            Value::String(s) => Some(Literal::String(s.to_string())),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: Node,
}

/// Function parameter binding: a plain name or an object destructuring pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Pattern {
    Identifier { name: String },
    Object { properties: Vec<PatternProperty> },
}

/// `{ key: binding }` entry of a destructuring pattern (`{ key }` binds `key` to itself).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternProperty {
    pub key: String,
    pub binding: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Declarator {
    pub id: Pattern,
    pub init: Option<Box<Node>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationKind {
    Const,
    Let,
    Var,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopKind {
    For,
    While,
    DoWhile,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "-")]
    Negate,
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "!")]
    Not,
    #[serde(rename = "~")]
    BitNot,
    #[serde(rename = "typeof")]
    TypeOf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
    #[serde(rename = "%")]
    Modulo,
    #[serde(rename = "**")]
    Power,
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = "===")]
    StrictEquals,
    #[serde(rename = "!==")]
    StrictNotEquals,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessEquals,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterEquals,
    #[serde(rename = "&")]
    BitAnd,
    #[serde(rename = "|")]
    BitOr,
    #[serde(rename = "^")]
    BitXor,
    #[serde(rename = "<<")]
    ShiftLeft,
    #[serde(rename = ">>")]
    ShiftRight,
    #[serde(rename = ">>>")]
    UnsignedShiftRight,
    #[serde(rename = "in")]
    In,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
    #[serde(rename = "??")]
    Nullish,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::TypeOf => "typeof ",
        }
    }
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::StrictEquals => "===",
            BinaryOp::StrictNotEquals => "!==",
            BinaryOp::Less => "<",
            BinaryOp::LessEquals => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEquals => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::UnsignedShiftRight => ">>>",
            BinaryOp::In => "in",
        }
    }
}

impl LogicalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
            LogicalOp::Nullish => "??",
        }
    }
}

impl Node {
    pub fn literal(value: Literal) -> Node {
        Node::Literal { value }
    }

    pub fn identifier(name: impl Into<String>) -> Node {
        Node::Identifier { name: name.into() }
    }

    pub fn column(table: usize, name: impl Into<String>) -> Node {
        Node::Column {
            table,
            name: name.into(),
        }
    }

    pub fn rolling(window: WindowSpec, body: Node) -> Node {
        Node::Rolling {
            window,
            body: Box::new(body),
        }
    }

    /// Short construct name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Literal { .. } => "literal",
            Node::Identifier { .. } => "identifier",
            Node::Member { .. } => "member expression",
            Node::Call { .. } => "call",
            Node::Unary { .. } => "unary expression",
            Node::Binary { .. } => "binary expression",
            Node::Logical { .. } => "logical expression",
            Node::Conditional { .. } => "conditional expression",
            Node::Array { .. } => "array literal",
            Node::Object { .. } => "object literal",
            Node::ArrowFunction { .. } => "arrow function",
            Node::Function { .. } => "function definition",
            Node::Block { .. } => "block",
            Node::Declaration { .. } => "declaration",
            Node::Return { .. } => "return statement",
            Node::If { .. } => "if statement",
            Node::Loop { .. } => "loop",
            Node::Assignment { .. } => "assignment",
            Node::Update { .. } => "update expression",
            Node::Await { .. } => "await expression",
            Node::Yield { .. } => "yield expression",
            Node::Column { .. } => "column reference",
            Node::Parameter { .. } => "parameter reference",
            Node::Rolling { .. } => "rolling window",
        }
    }

    /// Render the node as source text, naming input tuples with `tuples` and the parameter
    /// object with `params`.
    pub fn to_source(&self, tuples: &[&str], params: &str) -> String {
        let mut out = String::new();
        Renderer { tuples, params }.node(self, &mut out);
        out
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_source(&["d", "d2"], "$"))
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn quote(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

struct Renderer<'a> {
    tuples: &'a [&'a str],
    params: &'a str,
}

impl Renderer<'_> {
    fn access(&self, object: &str, key: &str, out: &mut String) {
        out.push_str(object);
        if is_identifier(key) {
            out.push('.');
            out.push_str(key);
        } else {
            out.push('[');
            quote(key, out);
            out.push(']');
        }
    }

    fn list(&self, nodes: &[Node], out: &mut String) {
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.node(node, out);
        }
    }

    // Compound operands are parenthesized so the output never depends on precedence rules.
    fn operand(&self, node: &Node, out: &mut String) {
        let atomic = matches!(
            node,
            Node::Literal { .. }
                | Node::Identifier { .. }
                | Node::Member { .. }
                | Node::Call { .. }
                | Node::Array { .. }
                | Node::Column { .. }
                | Node::Parameter { .. }
                | Node::Rolling { .. }
        );
        let negative = matches!(node, Node::Literal { value: Literal::Number(n) } if *n < 0.0);
        if atomic && !negative {
            self.node(node, out);
        } else {
            out.push('(');
            self.node(node, out);
            out.push(')');
        }
    }

    fn pattern(&self, pattern: &Pattern, out: &mut String) {
        match pattern {
            Pattern::Identifier { name } => out.push_str(name),
            Pattern::Object { properties } => {
                out.push_str("{ ");
                for (i, p) in properties.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&p.key);
                    if p.key != p.binding {
                        out.push_str(": ");
                        out.push_str(&p.binding);
                    }
                }
                out.push_str(" }");
            }
        }
    }

    fn params_list(&self, params: &[Pattern], out: &mut String) {
        out.push('(');
        for (i, p) in params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.pattern(p, out);
        }
        out.push(')');
    }

    fn statement(&self, node: &Node, out: &mut String) {
        self.node(node, out);
        if !matches!(
            node,
            Node::Block { .. } | Node::If { .. } | Node::Loop { .. } | Node::Function { .. }
        ) {
            out.push(';');
        }
    }

    fn node(&self, node: &Node, out: &mut String) {
        match node {
            Node::Literal { value } => match value {
                Literal::Null => out.push_str("null"),
                Literal::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
                Literal::Number(n) => out.push_str(&Value::Number(*n).to_string()),
                Literal::String(s) => quote(s, out),
            },
            Node::Identifier { name } => out.push_str(name),
            Node::Member {
                object,
                property,
                computed,
            } => {
                self.operand(object, out);
                match (computed, property.as_ref()) {
                    (false, Node::Identifier { name }) => {
                        out.push('.');
                        out.push_str(name);
                    }
                    _ => {
                        out.push('[');
                        self.node(property, out);
                        out.push(']');
                    }
                }
            }
            Node::Call { callee, arguments } => {
                self.operand(callee, out);
                out.push('(');
                self.list(arguments, out);
                out.push(')');
            }
            Node::Unary { operator, argument } => {
                out.push_str(operator.symbol());
                self.operand(argument, out);
            }
            Node::Binary {
                operator,
                left,
                right,
            } => {
                self.operand(left, out);
                out.push(' ');
                out.push_str(operator.symbol());
                out.push(' ');
                self.operand(right, out);
            }
            Node::Logical {
                operator,
                left,
                right,
            } => {
                self.operand(left, out);
                out.push(' ');
                out.push_str(operator.symbol());
                out.push(' ');
                self.operand(right, out);
            }
            Node::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.operand(test, out);
                out.push_str(" ? ");
                self.operand(consequent, out);
                out.push_str(" : ");
                self.operand(alternate, out);
            }
            Node::Array { elements } => {
                out.push('[');
                self.list(elements, out);
                out.push(']');
            }
            Node::Object { properties } => {
                out.push_str("({ ");
                for (i, p) in properties.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    if is_identifier(&p.key) {
                        out.push_str(&p.key);
                    } else {
                        quote(&p.key, out);
                    }
                    out.push_str(": ");
                    self.node(&p.value, out);
                }
                out.push_str(" })");
            }
            Node::ArrowFunction { params, body } => {
                self.params_list(params, out);
                out.push_str(" => ");
                if matches!(body.as_ref(), Node::Object { .. }) {
                    self.node(body, out);
                } else {
                    self.operand(body, out);
                }
            }
            Node::Function { name, params, body } => {
                out.push_str("function");
                if let Some(name) = name {
                    out.push(' ');
                    out.push_str(name);
                }
                self.params_list(params, out);
                out.push(' ');
                self.node(body, out);
            }
            Node::Block { body } => {
                out.push_str("{ ");
                for stmt in body {
                    self.statement(stmt, out);
                    out.push(' ');
                }
                out.push('}');
            }
            Node::Declaration { kind, declarations } => {
                out.push_str(match kind {
                    DeclarationKind::Const => "const ",
                    DeclarationKind::Let => "let ",
                    DeclarationKind::Var => "var ",
                });
                for (i, d) in declarations.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.pattern(&d.id, out);
                    if let Some(init) = &d.init {
                        out.push_str(" = ");
                        self.node(init, out);
                    }
                }
            }
            Node::Return { argument } => {
                out.push_str("return");
                if let Some(arg) = argument {
                    out.push(' ');
                    self.node(arg, out);
                }
            }
            Node::If {
                test,
                consequent,
                alternate,
            } => {
                out.push_str("if (");
                self.node(test, out);
                out.push_str(") ");
                self.statement(consequent, out);
                if let Some(alt) = alternate {
                    out.push_str(" else ");
                    self.statement(alt, out);
                }
            }
            Node::Loop { kind, body } => {
                out.push_str(match kind {
                    LoopKind::For => "for (;;) ",
                    LoopKind::While => "while (true) ",
                    LoopKind::DoWhile => "do ",
                });
                self.statement(body, out);
                if *kind == LoopKind::DoWhile {
                    out.push_str(" while (true)");
                }
            }
            Node::Assignment {
                operator,
                target,
                value,
            } => {
                self.node(target, out);
                out.push(' ');
                out.push_str(operator);
                out.push(' ');
                self.node(value, out);
            }
            Node::Update {
                operator,
                prefix,
                argument,
            } => {
                if *prefix {
                    out.push_str(operator);
                    self.operand(argument, out);
                } else {
                    self.operand(argument, out);
                    out.push_str(operator);
                }
            }
            Node::Await { argument } => {
                out.push_str("await ");
                self.operand(argument, out);
            }
            Node::Yield { argument } => {
                out.push_str("yield");
                if let Some(arg) = argument {
                    out.push(' ');
                    self.operand(arg, out);
                }
            }
            Node::Column { table, name } => {
                let tuple = self.tuples.get(*table).copied().unwrap_or("d");
                self.access(tuple, name, out);
            }
            Node::Parameter { name } => self.access(self.params, name, out),
            Node::Rolling { window, body } => {
                let bound = |b: Option<i64>| b.map_or_else(|| "null".to_string(), |n| n.to_string());
                out.push_str("rolling(");
                self.node(body, out);
                out.push_str(", [");
                out.push_str(&bound(window.frame.start));
                out.push_str(", ");
                out.push_str(&bound(window.frame.end));
                out.push_str("], ");
                out.push_str(if window.peers { "true" } else { "false" });
                out.push(')');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_resolved_references() {
        let node = Node::Binary {
            operator: BinaryOp::Add,
            left: Box::new(Node::column(0, "price")),
            right: Box::new(Node::Parameter {
                name: "unit cost".into(),
            }),
        };
        assert_eq!(node.to_string(), "d.price + $[\"unit cost\"]");
        assert_eq!(
            node.to_source(&["a", "b"], "p"),
            "a.price + p[\"unit cost\"]"
        );
    }

    #[test]
    fn serializes_with_type_tags() {
        let node = Node::Call {
            callee: Box::new(Node::identifier("mean")),
            arguments: vec![Node::column(0, "x")],
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "Call");
        assert_eq!(json["arguments"][0]["type"], "Column");
        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
