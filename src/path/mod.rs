//! Path query language
//!
//! A small XPath subset over configuration trees:
//!
//! - location steps `tag`, `prefix:tag`, `axis::tag`, `axis::prefix:tag`,
//!   `.` and `..`, with the `child`, `self` and `parent` axes
//! - a leading `/` selecting the top node of the context tree
//! - predicates `[expr]`; `[e1, e2]` applies `e1` then `e2`
//! - comparisons, `and`/`or`, `+`/`-`, unary minus, and the functions
//!   `string number boolean not true false position last count concat`
//!
//! The same grammar drives [`Tree::create_path`](crate::tree::Tree::create_path),
//! where each step builds a node instead of filtering.

mod create;
mod expr;
mod parser;
mod tokenizer;

pub use create::CreateMode;
pub use expr::{BinOp, Expr, Function, Literal, PValue};
pub use tokenizer::{CmpOp, Token, tokenize};

use crate::error::Result;
use crate::tree::{NodeId, NodeSet, Tree};
use expr::EvalContext;
use parser::PathParser;

/// Axis of a location step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    SelfAxis,
    Parent,
    Root,
}

/// One `/`-separated segment of a path
#[derive(Debug, Clone, PartialEq)]
pub struct LocationStep {
    pub axis: Axis,
    pub prefix: Option<String>,
    /// Name test; `None` for `.` and `..`
    pub name: Option<String>,
    pub predicates: Vec<Expr>,
}

/// Position in a query. The document sits above the top node of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Document(NodeId),
    Node(NodeId),
}

impl LocationStep {
    pub(crate) fn new(axis: Axis, prefix: Option<String>, name: Option<String>) -> Self {
        Self {
            axis,
            prefix,
            name,
            predicates: Vec::new(),
        }
    }

    pub(crate) fn root() -> Self {
        Self::new(Axis::Root, None, None)
    }

    /// Apply this step to a set of nodes
    pub fn select(&self, tree: &Tree, nodes: &[NodeId]) -> Result<NodeSet> {
        let input: Vec<Context> = nodes.iter().map(|&n| Context::Node(n)).collect();
        Ok(nodes_of(&self.step(tree, &input)?))
    }

    fn step(&self, tree: &Tree, input: &[Context]) -> Result<Vec<Context>> {
        if self.axis == Axis::Root {
            let mut docs = Vec::new();
            for ctx in input {
                let top = match *ctx {
                    Context::Document(top) => top,
                    Context::Node(n) => tree.root_of(n),
                };
                if !docs.contains(&Context::Document(top)) {
                    docs.push(Context::Document(top));
                }
            }
            return Ok(docs);
        }

        let mut result = Vec::new();
        for ctx in input {
            match (self.axis, *ctx) {
                (Axis::SelfAxis, Context::Document(_)) if self.name.is_none() => result.push(*ctx),
                (Axis::Child, Context::Document(top)) => {
                    result.extend(self.filter(tree, &[top])?.into_iter().map(Context::Node));
                }
                (Axis::Child, Context::Node(n)) => {
                    result.extend(
                        self.filter(tree, tree.children(n))?
                            .into_iter()
                            .map(Context::Node),
                    );
                }
                (Axis::SelfAxis, Context::Node(n)) => {
                    result.extend(self.filter(tree, &[n])?.into_iter().map(Context::Node));
                }
                (Axis::Parent, Context::Node(n)) => {
                    if let Some(p) = tree.parent(n) {
                        result.extend(self.filter(tree, &[p])?.into_iter().map(Context::Node));
                    }
                }
                _ => {}
            }
        }
        Ok(result)
    }

    /// Name test followed by the predicates in order. Each predicate sees
    /// the result of the previous one as its context set.
    fn filter(&self, tree: &Tree, candidates: &[NodeId]) -> Result<NodeSet> {
        let mut result: NodeSet = candidates
            .iter()
            .copied()
            .filter(|&n| self.name_test(tree, n))
            .collect();

        for pred in &self.predicates {
            if result.is_empty() {
                break;
            }
            let set = std::mem::take(&mut result);
            for &node in &set {
                let ctx = EvalContext {
                    tree,
                    node,
                    set: &set,
                };
                if pred.matches(&ctx)? {
                    result.push(node);
                }
            }
        }
        Ok(result)
    }

    fn name_test(&self, tree: &Tree, id: NodeId) -> bool {
        let Some(name) = &self.name else {
            return true;
        };
        if tree.name(id) != name {
            return false;
        }
        match &self.prefix {
            // The prefix is resolved in the context of the matched node
            Some(p) => {
                let ns = tree.lookup_context_prefix(id, p);
                ns.is_some() && ns.as_deref() == tree.ns(id)
            }
            None => true,
        }
    }
}

fn nodes_of(set: &[Context]) -> NodeSet {
    set.iter()
        .filter_map(|c| match c {
            Context::Node(n) => Some(*n),
            Context::Document(_) => None,
        })
        .collect()
}

/// A parsed path expression
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    text: String,
    steps: Vec<LocationStep>,
}

impl Path {
    /// Parse a path expression
    pub fn parse(text: &str) -> Result<Self> {
        let steps = PathParser::new(tokenize(text)?).parse_path()?;
        tracing::trace!(path = text, ?steps, "parsed path");
        Ok(Self {
            text: text.to_string(),
            steps,
        })
    }

    pub fn steps(&self) -> &[LocationStep] {
        &self.steps
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Select nodes starting from a context node
    pub fn eval(&self, tree: &Tree, context: NodeId) -> Result<NodeSet> {
        let mut set = vec![Context::Node(context)];
        for step in &self.steps {
            if set.is_empty() {
                break;
            }
            set = step.step(tree, &set)?;
        }
        Ok(nodes_of(&set))
    }
}

impl std::str::FromStr for Path {
    type Err = crate::error::NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        Path::parse(s)
    }
}
