//! Predicate expressions and their evaluation

use std::cmp::Ordering;

use crate::error::{NetconfError, Result};
use crate::tree::{NodeId, NodeSet, Tree};
use crate::value::Value;

/// Binary operators, lowest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Plus,
    Minus,
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    String,
    Number,
    Boolean,
    Not,
    True,
    False,
    Position,
    Last,
    Count,
    Concat,
}

impl Function {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "string" => Function::String,
            "number" => Function::Number,
            "boolean" => Function::Boolean,
            "not" => Function::Not,
            "true" => Function::True,
            "false" => Function::False,
            "position" => Function::Position,
            "last" => Function::Last,
            "count" => Function::Count,
            "concat" => Function::Concat,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive
    pub(crate) fn arity(self) -> (usize, usize) {
        match self {
            Function::String | Function::Number | Function::Boolean => (0, 1),
            Function::Not | Function::Count => (1, 1),
            Function::True | Function::False | Function::Position | Function::Last => (0, 0),
            Function::Concat => (2, usize::MAX),
        }
    }
}

/// Literal operand
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
}

impl Literal {
    /// Text form, as assigned by create paths
    pub fn to_text(&self) -> String {
        match self {
            Literal::Str(s) => s.clone(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
        }
    }
}

/// Predicate expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Value of the first child with this name
    Child {
        prefix: Option<String>,
        name: String,
    },
    /// Value of an attribute
    Attr(String),
    Literal(Literal),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Call(Function, Vec<Expr>),
}

/// Intermediate result of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum PValue {
    /// Missing child, attribute or value
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Nodes(NodeSet),
}

impl PValue {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Integer(i) => PValue::Int(*i),
            Value::Decimal(d) => PValue::Float(*d),
            Value::Boolean(b) => PValue::Bool(*b),
            other => PValue::Str(other.to_string()),
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, PValue::Int(_) | PValue::Float(_))
    }

    /// boolean() coercion
    pub fn to_bool(&self) -> bool {
        match self {
            PValue::Null => false,
            PValue::Bool(b) => *b,
            PValue::Int(i) => *i != 0,
            PValue::Float(f) => *f != 0.0 && !f.is_nan(),
            PValue::Str(s) => !s.is_empty(),
            PValue::Nodes(n) => !n.is_empty(),
        }
    }

    /// number() coercion; strings try integer, then float, then NaN
    pub fn to_number(&self, tree: &Tree) -> PValue {
        match self {
            PValue::Int(_) | PValue::Float(_) => self.clone(),
            PValue::Bool(b) => PValue::Int(i64::from(*b)),
            PValue::Str(s) => parse_number(s),
            PValue::Nodes(_) => parse_number(&self.to_text(tree)),
            PValue::Null => PValue::Float(f64::NAN),
        }
    }

    /// string() coercion. A node set yields the value of its first node.
    pub fn to_text(&self, tree: &Tree) -> String {
        match self {
            PValue::Null => String::new(),
            PValue::Bool(b) => b.to_string(),
            PValue::Int(i) => i.to_string(),
            PValue::Float(f) => format_float(*f),
            PValue::Str(s) => s.clone(),
            PValue::Nodes(n) => n
                .first()
                .and_then(|&id| tree.value(id))
                .map(Value::to_string)
                .unwrap_or_default(),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            PValue::Int(i) => *i as f64,
            PValue::Float(f) => *f,
            _ => f64::NAN,
        }
    }
}

fn parse_number(s: &str) -> PValue {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return PValue::Int(i);
    }
    PValue::Float(s.parse::<f64>().unwrap_or(f64::NAN))
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Evaluation context of one candidate node
pub struct EvalContext<'a> {
    pub tree: &'a Tree,
    pub node: NodeId,
    /// Result set of the previous filter stage
    pub set: &'a [NodeId],
}

impl EvalContext<'_> {
    fn position(&self) -> i64 {
        self.set
            .iter()
            .position(|&n| n == self.node)
            .map_or(0, |p| p as i64 + 1)
    }
}

impl Expr {
    /// Evaluate a predicate to a boolean. A numeric result selects by
    /// position.
    pub fn matches(&self, ctx: &EvalContext<'_>) -> Result<bool> {
        Ok(match self.eval(ctx)? {
            PValue::Int(i) => i == ctx.position(),
            PValue::Float(f) => f == ctx.position() as f64,
            other => other.to_bool(),
        })
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<PValue> {
        let tree = ctx.tree;
        match self {
            Expr::Child { prefix, name } => Ok(self
                .child_nodes(ctx, prefix.as_deref(), name)
                .first()
                .and_then(|&c| tree.value(c))
                .map_or(PValue::Null, PValue::from_value)),
            Expr::Attr(name) => Ok(tree
                .get_attr_value(ctx.node, name)
                .map_or(PValue::Null, |v| PValue::Str(v.to_string()))),
            Expr::Literal(Literal::Str(s)) => Ok(PValue::Str(s.clone())),
            Expr::Literal(Literal::Int(i)) => Ok(PValue::Int(*i)),
            Expr::Literal(Literal::Float(f)) => Ok(PValue::Float(*f)),
            Expr::Neg(inner) => match inner.eval(ctx)? {
                PValue::Null => Err(badarg("neg", &PValue::Null)),
                v => match v.to_number(tree) {
                    PValue::Int(i) => i
                        .checked_neg()
                        .map(PValue::Int)
                        .ok_or_else(|| NetconfError::Path("integer overflow".into())),
                    n => Ok(PValue::Float(-n.as_f64())),
                },
            },
            Expr::Binary(BinOp::Or, l, r) => {
                Ok(PValue::Bool(l.eval(ctx)?.to_bool() || r.eval(ctx)?.to_bool()))
            }
            Expr::Binary(BinOp::And, l, r) => {
                Ok(PValue::Bool(l.eval(ctx)?.to_bool() && r.eval(ctx)?.to_bool()))
            }
            Expr::Binary(op, l, r) => {
                let lv = l.eval(ctx)?;
                let rv = r.eval(ctx)?;
                binary(tree, *op, lv, rv)
            }
            Expr::Call(func, args) => self.call(ctx, *func, args),
        }
    }

    fn child_nodes(&self, ctx: &EvalContext<'_>, prefix: Option<&str>, name: &str) -> NodeSet {
        let tree = ctx.tree;
        tree.children(ctx.node)
            .iter()
            .copied()
            .filter(|&c| tree.name(c) == name)
            .filter(|&c| match prefix {
                Some(p) => tree.lookup_context_prefix(c, p).as_deref() == tree.ns(c),
                None => true,
            })
            .collect()
    }

    fn call(&self, ctx: &EvalContext<'_>, func: Function, args: &[Expr]) -> Result<PValue> {
        let tree = ctx.tree;
        let arg = |i: usize| -> Result<PValue> {
            match args.get(i) {
                Some(e) => e.eval(ctx),
                None => Ok(tree
                    .value(ctx.node)
                    .map_or(PValue::Null, PValue::from_value)),
            }
        };
        Ok(match func {
            Function::String => PValue::Str(arg(0)?.to_text(tree)),
            Function::Number => arg(0)?.to_number(tree),
            Function::Boolean => PValue::Bool(arg(0)?.to_bool()),
            Function::Not => PValue::Bool(!arg(0)?.to_bool()),
            Function::True => PValue::Bool(true),
            Function::False => PValue::Bool(false),
            Function::Position => PValue::Int(ctx.position()),
            Function::Last => PValue::Int(ctx.set.len() as i64),
            Function::Count => match args.first() {
                Some(Expr::Child { prefix, name }) => {
                    PValue::Int(self.child_nodes(ctx, prefix.as_deref(), name).len() as i64)
                }
                Some(other) => match other.eval(ctx)? {
                    PValue::Nodes(n) => PValue::Int(n.len() as i64),
                    v => return Err(badarg("count", &v)),
                },
                None => return Err(NetconfError::Path("count() takes one argument".into())),
            },
            Function::Concat => {
                let mut s = String::new();
                for a in args {
                    s.push_str(&a.eval(ctx)?.to_text(tree));
                }
                PValue::Str(s)
            }
        })
    }
}

fn badarg(func: &str, v: &PValue) -> NetconfError {
    NetconfError::Path(format!("badarg to function {}(): {:?}", func, v))
}

fn binary(tree: &Tree, op: BinOp, lv: PValue, rv: PValue) -> Result<PValue> {
    match op {
        BinOp::Eq | BinOp::Ne => {
            if lv == PValue::Null || rv == PValue::Null {
                return Ok(PValue::Bool(op == BinOp::Ne));
            }
            let equal = if matches!(lv, PValue::Bool(_)) || matches!(rv, PValue::Bool(_)) {
                lv.to_bool() == rv.to_bool()
            } else if lv.is_number() || rv.is_number() {
                compare_numbers(&lv.to_number(tree), &rv.to_number(tree)) == Some(Ordering::Equal)
            } else {
                lv.to_text(tree) == rv.to_text(tree)
            };
            Ok(PValue::Bool(equal == (op == BinOp::Eq)))
        }
        BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le => {
            if lv == PValue::Null || rv == PValue::Null {
                return Ok(PValue::Bool(false));
            }
            let ord = compare_numbers(&lv.to_number(tree), &rv.to_number(tree));
            Ok(PValue::Bool(match (op, ord) {
                (_, None) => false,
                (BinOp::Gt, Some(o)) => o == Ordering::Greater,
                (BinOp::Ge, Some(o)) => o != Ordering::Less,
                (BinOp::Lt, Some(o)) => o == Ordering::Less,
                (_, Some(o)) => o != Ordering::Greater,
            }))
        }
        BinOp::Plus | BinOp::Minus => {
            let name = if op == BinOp::Plus { "plus" } else { "minus" };
            if lv == PValue::Null {
                return Err(badarg(name, &lv));
            }
            if rv == PValue::Null {
                return Err(badarg(name, &rv));
            }
            match (lv.to_number(tree), rv.to_number(tree)) {
                (PValue::Int(a), PValue::Int(b)) => {
                    let r = if op == BinOp::Plus {
                        a.checked_add(b)
                    } else {
                        a.checked_sub(b)
                    };
                    r.map(PValue::Int)
                        .ok_or_else(|| NetconfError::Path("integer overflow".into()))
                }
                (a, b) => {
                    let (a, b) = (a.as_f64(), b.as_f64());
                    Ok(PValue::Float(if op == BinOp::Plus { a + b } else { a - b }))
                }
            }
        }
        BinOp::Or | BinOp::And => Ok(PValue::Bool(match op {
            BinOp::Or => lv.to_bool() || rv.to_bool(),
            _ => lv.to_bool() && rv.to_bool(),
        })),
    }
}

fn compare_numbers(a: &PValue, b: &PValue) -> Option<Ordering> {
    match (a, b) {
        (PValue::Int(x), PValue::Int(y)) => Some(x.cmp(y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}
