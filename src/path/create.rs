//! Create-mode evaluation of paths

use super::expr::{BinOp, Expr};
use super::{Axis, LocationStep, Path};
use crate::error::{NetconfError, Result};
use crate::prefix::{Prefix, PrefixMap};
use crate::tree::{NodeId, NodeSet, Tree};

/// How [`Tree::create_path`] treats nodes that already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// Always build the full path as a new subtree
    New,
    /// Reuse the existing prefix of the path; fail if it is ambiguous
    #[default]
    Merge,
    /// Reuse the existing prefix of the path and build the rest under every
    /// deepest match
    MergeMulti,
}

impl LocationStep {
    /// Build a detached node for this step. Root steps build nothing.
    fn create_node(
        &self,
        tree: &mut Tree,
        prefixes: &PrefixMap,
        parent: Option<NodeId>,
    ) -> Result<Option<NodeId>> {
        let name = match (self.axis, &self.name) {
            (Axis::Root, _) => return Ok(None),
            (Axis::Child, Some(name)) => name,
            _ => {
                return Err(NetconfError::PathCreate(
                    "unknown axis in create path".into(),
                ));
            }
        };

        let ns = match &self.prefix {
            Some(p) => prefixes.prefix_to_ns(p).map(str::to_string),
            None => match parent {
                Some(parent) => tree.ns(parent).map(str::to_string),
                None => prefixes.prefix_to_ns("").map(str::to_string),
            },
        };
        let ns = ns.ok_or_else(|| {
            NetconfError::PathCreate(format!(
                "missing namespace for prefix: \"{}\"",
                self.prefix.as_deref().unwrap_or("")
            ))
        })?;

        let node = tree.create_node(&ns, name);
        for pred in &self.predicates {
            assign(tree, prefixes, node, pred)?;
        }
        Ok(Some(node))
    }
}

/// Apply one `child='value'` or `@attr='value'` predicate to a new node
fn assign(tree: &mut Tree, prefixes: &PrefixMap, node: NodeId, pred: &Expr) -> Result<()> {
    let illegal = || NetconfError::PathCreate(format!("illegal path create expr: {:?}", pred));
    let Expr::Binary(BinOp::Eq, left, right) = pred else {
        return Err(illegal());
    };
    let Expr::Literal(value) = right.as_ref() else {
        return Err(illegal());
    };

    match left.as_ref() {
        Expr::Child { prefix, name } => {
            let ns = match prefix {
                Some(p) => prefixes.prefix_to_ns(p).map(str::to_string).ok_or_else(|| {
                    NetconfError::PathCreate(format!("missing namespace for prefix: \"{}\"", p))
                })?,
                None => tree.ns(node).unwrap_or_default().to_string(),
            };
            let child = tree.create_leaf(&ns, name, value.to_text());
            tree.add_child(node, child)
        }
        Expr::Attr(name) => {
            tree.set_attr(node, name, &value.to_text());
            Ok(())
        }
        _ => Err(illegal()),
    }
}

impl Path {
    fn create_steps(&self) -> Result<Vec<&LocationStep>> {
        let steps: Vec<&LocationStep> = self
            .steps()
            .iter()
            .filter(|s| s.axis != Axis::Root)
            .collect();
        if steps.is_empty() {
            return Err(NetconfError::PathCreate(format!(
                "nothing to create in \"{}\"",
                self.as_str()
            )));
        }
        if steps.iter().any(|s| s.axis != Axis::Child) {
            return Err(NetconfError::PathCreate("unknown axis in create path".into()));
        }
        Ok(steps)
    }
}

impl Tree {
    /// Build a detached chain of nodes from a path; returns its top node.
    ///
    /// Namespaces come from the step prefixes looked up in `prefixes`, or
    /// from the parent step. The first unprefixed step uses the default
    /// namespace of `prefixes`.
    pub fn create_from_path(&mut self, prefixes: &PrefixMap, path: &str) -> Result<NodeId> {
        let path = Path::parse(path)?;
        let mut top = None;
        let mut parent = None;
        for step in path.create_steps()? {
            if let Some(node) = step.create_node(self, prefixes, parent)? {
                if let Some(p) = parent {
                    self.add_child(p, node)?;
                }
                top.get_or_insert(node);
                parent = Some(node);
            }
        }
        top.ok_or_else(|| NetconfError::PathCreate("empty create path".into()))
    }

    /// Build a detached chain in a single namespace; returns its top node
    pub fn create_in_ns(&mut self, ns: &str, path: &str) -> Result<NodeId> {
        self.create_from_path(&PrefixMap::with(Prefix::default_ns(ns)), path)
    }

    /// Create the nodes of a path below `id`; returns the nodes at the end
    /// of the path.
    ///
    /// `prefixes` are bound on `id` first. In the merge modes existing
    /// nodes matching a leading part of the path are reused, and a path
    /// that already exists creates nothing. Leading `/` is ignored; the
    /// path is always relative to `id`.
    pub fn create_path(
        &mut self,
        id: NodeId,
        mode: CreateMode,
        prefixes: Option<&PrefixMap>,
        path: &str,
    ) -> Result<NodeSet> {
        tracing::debug!(path, ?mode, "create path");
        let parsed = Path::parse(path)?;
        let steps = parsed.create_steps()?;
        if let Some(map) = prefixes {
            self.set_prefix_map(id, map);
        }

        if mode == CreateMode::New {
            let map = self.context_prefix_map(id);
            return Ok(vec![self.create_chain(&steps, &map, id)?]);
        }

        let mut set = vec![id];
        let mut deepest = set.clone();
        let mut step = 0;
        while !set.is_empty() && step < steps.len() {
            set = steps[step].select(self, &set)?;
            if !set.is_empty() {
                deepest = set.clone();
            }
            step += 1;
        }
        if step == steps.len() && !set.is_empty() {
            return Ok(set);
        }
        if mode == CreateMode::Merge && deepest.len() > 1 {
            return Err(NetconfError::PathCreate(format!(
                "multiple nodes found by path: \"{}\"",
                path
            )));
        }

        // the step that selected nothing is built first
        let rest = &steps[step - 1..];
        let mut ends = Vec::with_capacity(deepest.len());
        for parent in deepest {
            let map = self.context_prefix_map(parent);
            ends.push(self.create_chain(rest, &map, parent)?);
        }
        Ok(ends)
    }

    fn create_chain(
        &mut self,
        steps: &[&LocationStep],
        prefixes: &PrefixMap,
        mut parent: NodeId,
    ) -> Result<NodeId> {
        for step in steps {
            if let Some(node) = step.create_node(self, prefixes, Some(parent))? {
                self.add_child(parent, node)?;
                parent = node;
            }
        }
        Ok(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "urn:example:hosts";

    fn root() -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let config = tree.create_node(NS, "config");
        tree.set_default_prefix(config);
        (tree, config)
    }

    #[test]
    fn test_create_new_then_get() {
        let (mut tree, config) = root();
        let path = "hosts/host[name='joe', @tag='x']/ip";
        let ends = tree.create_path(config, CreateMode::New, None, path).unwrap();

        assert_eq!(ends.len(), 1);
        assert_eq!(tree.name(ends[0]), "ip");
        assert_eq!(tree.get(config, "hosts/host[name='joe']/ip").unwrap(), ends);

        let host = tree.parent(ends[0]).unwrap();
        assert_eq!(tree.get_attr_value(host, "tag"), Some("x"));
        assert_eq!(tree.ns(host), Some(NS));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (mut tree, config) = root();
        let first = tree
            .create_path(config, CreateMode::Merge, None, "hosts/host[name='joe']/ip")
            .unwrap();
        let second = tree
            .create_path(config, CreateMode::Merge, None, "hosts/host[name='joe']/ip")
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(tree.children(config).len(), 1);

        tree.create_path(config, CreateMode::Merge, None, "hosts/host[name='anne']")
            .unwrap();
        let hosts = tree.children(config)[0];
        assert_eq!(tree.children(hosts).len(), 2);
    }

    #[test]
    fn test_merge_ambiguous() {
        let (mut tree, config) = root();
        for name in ["joe", "anne"] {
            tree.create_path(config, CreateMode::Merge, None, &format!("hosts/host[name='{}']", name))
                .unwrap();
        }

        let err = tree
            .create_path(config, CreateMode::Merge, None, "hosts/host/ip")
            .unwrap_err();
        assert!(err.to_string().contains("multiple nodes found by path"));

        let ends = tree
            .create_path(config, CreateMode::MergeMulti, None, "hosts/host/ip")
            .unwrap();
        assert_eq!(ends.len(), 2);
    }

    #[test]
    fn test_prefixes() {
        let (mut tree, config) = root();
        let map = PrefixMap::with(Prefix::new("o", "urn:other"));
        let ends = tree
            .create_path(config, CreateMode::New, Some(&map), "o:extra/leaf")
            .unwrap();
        assert_eq!(tree.ns(ends[0]), Some("urn:other"));

        let err = tree
            .create_path(config, CreateMode::New, None, "zz:extra")
            .unwrap_err();
        assert!(err.to_string().contains("missing namespace for prefix: \"zz\""));
    }

    #[test]
    fn test_illegal_create_exprs() {
        let (mut tree, config) = root();
        for path in ["a[b > '1']", "a[b = c]", "../a", "self::a"] {
            assert!(
                matches!(
                    tree.create_path(config, CreateMode::New, None, path),
                    Err(NetconfError::PathCreate(_))
                ),
                "{}",
                path
            );
        }
    }

    #[test]
    fn test_create_detached_chain() {
        let mut tree = Tree::new();
        let top = tree.create_in_ns(NS, "/hosts/host[name='joe']").unwrap();
        assert_eq!(tree.name(top), "hosts");
        assert_eq!(tree.get_value(top, "host/name").unwrap().unwrap().to_string(), "joe");

        assert!(tree.create_from_path(&PrefixMap::new(), "hosts").is_err());
    }
}
