use super::ast::{BinaryOp, LogicalOp, UnaryOp};
use super::functions::ScalarFunction;
use super::spec::EscapedFn;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tabula_columnar::{ColumnRef, ColumnTable, Value};

pub type Params = HashMap<String, Value>;

/// Handle to an aggregate or window result computed ahead of row evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpRef {
    Aggregate(usize),
    Window(usize),
}

/// Source of precomputed aggregate/window results during row evaluation.
pub trait OpLookup {
    fn op_value(&self, op: OpRef, row: usize) -> Value;
}

/// Lookup used where no ops were compiled.
pub struct NoOps;

impl OpLookup for NoOps {
    fn op_value(&self, _op: OpRef, _row: usize) -> Value {
        Value::Null
    }
}

/// Executable form of an expression.
#[derive(Clone, Debug)]
pub enum Compiled {
    Literal(Value),
    Column {
        table: usize,
        column: ColumnRef,
    },
    /// Equality against a dictionary literal, answered by comparing dictionary keys.
    DictionaryEq {
        table: usize,
        column: ColumnRef,
        key: u32,
        negated: bool,
    },
    Local(usize),
    Op(OpRef),
    Unary {
        op: UnaryOp,
        arg: Box<Compiled>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Compiled>,
        right: Box<Compiled>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Compiled>,
        right: Box<Compiled>,
    },
    Conditional {
        test: Box<Compiled>,
        then: Box<Compiled>,
        otherwise: Box<Compiled>,
    },
    Array(Vec<Compiled>),
    Object(Vec<(Arc<str>, Compiled)>),
    Member {
        object: Box<Compiled>,
        property: Box<Compiled>,
    },
    Call {
        func: &'static ScalarFunction,
        args: Vec<Compiled>,
    },
    Block(Vec<Statement>),
    Escape {
        func: EscapedFn,
        tables: Vec<Arc<ColumnTable>>,
        params: Arc<Params>,
    },
}

#[derive(Clone, Debug)]
pub enum Statement {
    Let { slot: usize, init: Compiled },
    Expr(Compiled),
    Return(Option<Compiled>),
    If {
        test: Compiled,
        then: Vec<Statement>,
        otherwise: Vec<Statement>,
    },
    Block(Vec<Statement>),
}

/// Row view handed to escaped functions.
pub struct Row<'a> {
    tables: &'a [Arc<ColumnTable>],
    rows: [Option<usize>; 2],
}

impl Row<'_> {
    /// Value of `column` in the primary table, or null when absent.
    pub fn get(&self, column: &str) -> Value {
        self.get_in(0, column)
    }

    /// Value of `column` in input table `table` (1 is the right side of a join).
    pub fn get_in(&self, table: usize, column: &str) -> Value {
        let (Some(data), Some(Some(row))) = (self.tables.get(table), self.rows.get(table)) else {
            return Value::Null;
        };
        data.column(column)
            .map(|c| c.get(*row))
            .unwrap_or(Value::Null)
    }

    pub fn index(&self) -> Option<usize> {
        self.rows[0]
    }
}

/// Per-evaluation state: the current row(s), op results and block locals.
pub struct Env<'a> {
    rows: [Option<usize>; 2],
    ops: &'a dyn OpLookup,
    locals: Vec<Value>,
}

impl<'a> Env<'a> {
    pub fn new(ops: &'a dyn OpLookup) -> Self {
        Self {
            rows: [None, None],
            ops,
            locals: Vec::new(),
        }
    }

    pub fn at(&mut self, row: usize) -> &mut Self {
        self.rows = [Some(row), None];
        self
    }

    /// Position on a join pair; either side may be absent for outer rows.
    pub fn at_pair(&mut self, left: Option<usize>, right: Option<usize>) -> &mut Self {
        self.rows = [left, right];
        self
    }
}

enum Flow {
    Next,
    Return(Value),
}

impl Compiled {
    /// True when the expression reads no row, local or op state.
    pub fn is_constant(&self) -> bool {
        match self {
            Compiled::Literal(_) => true,
            Compiled::Unary { arg, .. } => arg.is_constant(),
            Compiled::Binary { left, right, .. } | Compiled::Logical { left, right, .. } => {
                left.is_constant() && right.is_constant()
            }
            Compiled::Conditional {
                test,
                then,
                otherwise,
            } => test.is_constant() && then.is_constant() && otherwise.is_constant(),
            Compiled::Array(items) => items.iter().all(Compiled::is_constant),
            Compiled::Object(props) => props.iter().all(|(_, v)| v.is_constant()),
            Compiled::Member { object, property } => {
                object.is_constant() && property.is_constant()
            }
            Compiled::Call { args, .. } => args.iter().all(Compiled::is_constant),
            _ => false,
        }
    }

    pub fn eval(&self, env: &mut Env<'_>) -> Value {
        match self {
            Compiled::Literal(v) => v.clone(),
            Compiled::Column { table, column } => match env.rows[*table] {
                Some(row) => column.get(row),
                None => Value::Null,
            },
            Compiled::DictionaryEq {
                table,
                column,
                key,
                negated,
            } => {
                let stored = env.rows[*table].and_then(|row| column.key_at(row));
                Value::Boolean((stored == Some(*key)) != *negated)
            }
            Compiled::Local(slot) => env.locals.get(*slot).cloned().unwrap_or_default(),
            Compiled::Op(op) => env.ops.op_value(*op, env.rows[0].unwrap_or(0)),
            Compiled::Unary { op, arg } => unary(*op, arg.eval(env)),
            Compiled::Binary { op, left, right } => {
                let l = left.eval(env);
                let r = right.eval(env);
                binary(*op, &l, &r)
            }
            Compiled::Logical { op, left, right } => {
                let l = left.eval(env);
                let short_circuit = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_null(),
                };
                if short_circuit {
                    l
                } else {
                    right.eval(env)
                }
            }
            Compiled::Conditional {
                test,
                then,
                otherwise,
            } => {
                if test.eval(env).truthy() {
                    then.eval(env)
                } else {
                    otherwise.eval(env)
                }
            }
            Compiled::Array(items) => Value::array(items.iter().map(|c| c.eval(env)).collect::<Vec<_>>()),
            Compiled::Object(props) => {
                let map: BTreeMap<Arc<str>, Value> = props
                    .iter()
                    .map(|(k, v)| (k.clone(), v.eval(env)))
                    .collect();
                Value::Object(Arc::new(map))
            }
            Compiled::Member { object, property } => {
                let o = object.eval(env);
                let p = property.eval(env);
                member(&o, &p)
            }
            Compiled::Call { func, args } => {
                let values: Vec<Value> = args.iter().map(|a| a.eval(env)).collect();
                (func.implementation)(&values)
            }
            Compiled::Block(stmts) => match exec(stmts, env) {
                Flow::Return(v) => v,
                Flow::Next => Value::Null,
            },
            Compiled::Escape {
                func,
                tables,
                params,
            } => {
                let row = Row {
                    tables,
                    rows: env.rows,
                };
                (func.0)(&row, params)
            }
        }
    }
}

fn exec(stmts: &[Statement], env: &mut Env<'_>) -> Flow {
    for stmt in stmts {
        match stmt {
            Statement::Let { slot, init } => {
                let value = init.eval(env);
                if env.locals.len() <= *slot {
                    env.locals.resize(*slot + 1, Value::Null);
                }
                env.locals[*slot] = value;
            }
            Statement::Expr(expr) => {
                expr.eval(env);
            }
            Statement::Return(expr) => {
                return Flow::Return(expr.as_ref().map(|e| e.eval(env)).unwrap_or_default())
            }
            Statement::If {
                test,
                then,
                otherwise,
            } => {
                let branch = if test.eval(env).truthy() { then } else { otherwise };
                if let Flow::Return(v) = exec(branch, env) {
                    return Flow::Return(v);
                }
            }
            Statement::Block(inner) => {
                if let Flow::Return(v) = exec(inner, env) {
                    return Flow::Return(v);
                }
            }
        }
    }
    Flow::Next
}

fn unary(op: UnaryOp, v: Value) -> Value {
    match op {
        UnaryOp::Not => Value::Boolean(!v.truthy()),
        UnaryOp::TypeOf => Value::from(v.type_name()),
        _ if v.is_null() => Value::Null,
        UnaryOp::Negate => Value::Number(-v.to_f64()),
        UnaryOp::Plus => Value::Number(v.to_f64()),
        UnaryOp::BitNot => Value::Number(!to_i32(&v) as f64),
    }
}

fn to_u32(v: &Value) -> u32 {
    let n = v.to_f64();
    if n.is_finite() {
        n.trunc().rem_euclid(4_294_967_296.0) as u32
    } else {
        0
    }
}

fn to_i32(v: &Value) -> i32 {
    to_u32(v) as i32
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => a == b,
        _ => a.to_f64() == b.to_f64(),
    }
}

fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => std::mem::discriminant(a) == std::mem::discriminant(b) && a == b,
    }
}

pub(crate) fn binary(op: BinaryOp, a: &Value, b: &Value) -> Value {
    use std::cmp::Ordering::{Equal, Greater, Less};
    let compare = |accept: &[std::cmp::Ordering]| {
        Value::Boolean(a.partial_compare(b).is_some_and(|o| accept.contains(&o)))
    };
    match op {
        BinaryOp::Equals => return Value::Boolean(loose_equals(a, b)),
        BinaryOp::NotEquals => return Value::Boolean(!loose_equals(a, b)),
        BinaryOp::StrictEquals => return Value::Boolean(strict_equals(a, b)),
        BinaryOp::StrictNotEquals => return Value::Boolean(!strict_equals(a, b)),
        BinaryOp::Less => return compare(&[Less]),
        BinaryOp::LessEquals => return compare(&[Less, Equal]),
        BinaryOp::Greater => return compare(&[Greater]),
        BinaryOp::GreaterEquals => return compare(&[Greater, Equal]),
        BinaryOp::In => {
            return Value::Boolean(match b {
                Value::Object(map) => map.contains_key(a.to_string().as_str()),
                Value::Array(items) => a
                    .as_f64()
                    .is_some_and(|i| i >= 0.0 && i.fract() == 0.0 && (i as usize) < items.len()),
                _ => false,
            })
        }
        _ => {}
    }

    if a.is_null() || b.is_null() {
        return Value::Null;
    }
    let (x, y) = (a.to_f64(), b.to_f64());
    let n = match op {
        BinaryOp::Add => {
            if matches!(a, Value::String(_)) || matches!(b, Value::String(_)) {
                return Value::from(format!("{a}{b}"));
            }
            x + y
        }
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide => x / y,
        BinaryOp::Modulo => x % y,
        BinaryOp::Power => x.powf(y),
        BinaryOp::BitAnd => (to_i32(a) & to_i32(b)) as f64,
        BinaryOp::BitOr => (to_i32(a) | to_i32(b)) as f64,
        BinaryOp::BitXor => (to_i32(a) ^ to_i32(b)) as f64,
        BinaryOp::ShiftLeft => to_i32(a).wrapping_shl(to_u32(b) & 31) as f64,
        BinaryOp::ShiftRight => (to_i32(a) >> (to_u32(b) & 31)) as f64,
        BinaryOp::UnsignedShiftRight => (to_u32(a) >> (to_u32(b) & 31)) as f64,
        _ => f64::NAN,
    };
    Value::Number(n)
}

fn member(object: &Value, property: &Value) -> Value {
    let index = |len: usize| {
        property
            .as_f64()
            .filter(|i| *i >= 0.0 && i.fract() == 0.0 && (*i as usize) < len)
            .map(|i| i as usize)
    };
    match object {
        Value::Array(items) => {
            if property.as_str() == Some("length") {
                return Value::from(items.len());
            }
            index(items.len())
                .map(|i| items[i].clone())
                .unwrap_or_default()
        }
        Value::Object(map) => map
            .get(property.to_string().as_str())
            .cloned()
            .unwrap_or_default(),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            if property.as_str() == Some("length") {
                return Value::from(chars.len());
            }
            index(chars.len())
                .map(|i| Value::from(chars[i].to_string()))
                .unwrap_or_default()
        }
        _ => Value::Null,
    }
}
