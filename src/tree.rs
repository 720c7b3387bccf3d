//! Configuration tree model
//!
//! Nodes live in an arena owned by [`Tree`] and are addressed by [`NodeId`].
//! A node refers to its parent by id; deleting a node detaches it from its
//! parent but keeps its slot, so ids stay valid for the tree's lifetime.
//!
//! # Example
//!
//! ```
//! use rust_netconf::tree::Tree;
//!
//! let mut tree = Tree::new();
//! let hosts = tree.create_node("urn:example:hosts", "hosts");
//! let host = tree.create_child(hosts, "host").unwrap();
//! tree.create_child_value(host, "name", "joe").unwrap();
//!
//! let found = tree.get(hosts, "host[name='joe']").unwrap();
//! assert_eq!(found, vec![host]);
//! assert_eq!(tree.path(host), "/hosts/host");
//! ```

use crate::error::{NetconfError, Result};
use crate::path::Path;
use crate::prefix::{NS_NETCONF, NS_XMLNS, Prefix, PrefixMap, PrefixRegistry};
use crate::schema::NodeKind;
use crate::sync::{Compare, compare};
use crate::value::Value;

/// Handle of a node inside its [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Index of the node slot
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ordered set of nodes, as produced by path queries
pub type NodeSet = Vec<NodeId>;

/// An attribute of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Namespace of a prefixed attribute; unprefixed attributes have none
    pub ns: Option<String>,
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(ns: Option<&str>, name: &str, value: &str) -> Self {
        Self {
            ns: ns.map(str::to_string),
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// edit-config operation marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Delete,
    Replace,
    Merge,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Replace => "replace",
            Operation::Merge => "merge",
        }
    }
}

/// A single tree node
#[derive(Debug, Clone)]
pub struct Node {
    ns: Option<String>,
    name: String,
    value: Option<Value>,
    attrs: Vec<Attribute>,
    prefixes: PrefixMap,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    kind: NodeKind,
}

impl Node {
    fn new(ns: Option<&str>, name: &str) -> Self {
        Self {
            ns: ns.map(str::to_string),
            name: name.to_string(),
            value: None,
            attrs: Vec::new(),
            prefixes: PrefixMap::new(),
            children: Vec::new(),
            parent: None,
            kind: NodeKind::Plain,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ns(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn prefixes(&self) -> &PrefixMap {
        &self.prefixes
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Same name, namespace and value
    pub fn shallow_eq(&self, other: &Node) -> bool {
        self.name == other.name && self.ns == other.ns && self.value == other.value
    }

    fn detached_copy(&self) -> Node {
        Node {
            children: Vec::new(),
            parent: None,
            ..self.clone()
        }
    }
}

/// Arena of configuration nodes
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    defaults: PrefixRegistry,
}

/// A tree together with the node of interest, usually its top node
#[derive(Debug, Clone)]
pub struct Document {
    pub tree: Tree,
    pub root: NodeId,
}

impl Document {
    pub fn new(tree: Tree, root: NodeId) -> Self {
        Self { tree, root }
    }

    /// Evaluate a path from the root node
    pub fn get(&self, path: &str) -> Result<NodeSet> {
        self.tree.get(self.root, path)
    }

    /// Pretty XML of the root subtree
    pub fn to_xml_string(&self) -> String {
        self.tree.to_xml_string(self.root)
    }
}

impl Tree {
    /// Create an empty tree with the standard default prefixes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty tree sharing a default prefix registry
    pub fn with_defaults(defaults: PrefixRegistry) -> Self {
        Self {
            nodes: Vec::new(),
            defaults,
        }
    }

    /// The default prefix registry consulted by prefix resolution
    pub fn defaults(&self) -> &PrefixRegistry {
        &self.defaults
    }

    /// Number of node slots, including detached nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrow a node. Panics if `id` belongs to another tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a detached node in a namespace
    pub fn create_node(&mut self, ns: &str, name: &str) -> NodeId {
        self.push(Node::new(Some(ns), name))
    }

    /// Create a detached node, optionally without namespace
    pub fn create_node_opt(&mut self, ns: Option<&str>, name: &str) -> NodeId {
        self.push(Node::new(ns, name))
    }

    /// Create a detached node with a value
    pub fn create_leaf(&mut self, ns: &str, name: &str, value: impl Into<Value>) -> NodeId {
        let id = self.create_node(ns, name);
        self.node_mut(id).value = Some(value.into());
        id
    }

    /// Create a child in the parent's namespace
    pub fn create_child(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let ns = self.node(parent).ns.clone();
        let child = self.create_node_opt(ns.as_deref(), name);
        self.add_child(parent, child)?;
        Ok(child)
    }

    /// Create a child with a value in the parent's namespace
    pub fn create_child_value(
        &mut self,
        parent: NodeId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<NodeId> {
        let child = self.create_child(parent, name)?;
        self.node_mut(child).value = Some(value.into());
        Ok(child)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    pub fn ns(&self, id: NodeId) -> Option<&str> {
        self.node(id).ns.as_deref()
    }

    pub fn value(&self, id: NodeId) -> Option<&Value> {
        self.node(id).value.as_ref()
    }

    pub fn set_value(&mut self, id: NodeId, value: impl Into<Value>) {
        self.node_mut(id).value = Some(value.into());
    }

    /// Remove the value of a node
    pub fn delete_value(&mut self, id: NodeId) -> Option<Value> {
        self.node_mut(id).value.take()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.node_mut(id).kind = kind;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        !self.node(id).children.is_empty()
    }

    pub fn attrs(&self, id: NodeId) -> &[Attribute] {
        &self.node(id).attrs
    }

    /// Topmost ancestor of a node (the node itself when detached)
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(p) = self.node(cur).parent {
            cur = p;
        }
        cur
    }

    /// Ancestors from the top down to and including `id`
    pub fn ancestry(&self, id: NodeId) -> NodeSet {
        let mut chain = vec![id];
        let mut cur = id;
        while let Some(p) = self.node(cur).parent {
            chain.push(p);
            cur = p;
        }
        chain.reverse();
        chain
    }

    /// Is `ancestor` equal to `id` or above it
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.node(c).parent;
        }
        false
    }

    /// First child with a given name
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).name == name)
    }

    /// All children with a given name
    pub fn children_named(&self, id: NodeId, name: &str) -> NodeSet {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|&c| self.node(c).name == name)
            .collect()
    }

    /// Value of the first child with a given name
    pub fn get_value_of_child(&self, id: NodeId, name: &str) -> Option<&Value> {
        self.child(id, name).and_then(|c| self.value(c))
    }

    /// Index of a node among its siblings
    pub fn position(&self, id: NodeId) -> Option<usize> {
        let parent = self.node(id).parent?;
        self.node(parent).children.iter().position(|&c| c == id)
    }

    /// Is this a list key leaf of its parent
    pub fn is_key(&self, id: NodeId) -> bool {
        match self.node(id).parent {
            Some(p) => self
                .node(p)
                .kind
                .schema()
                .is_some_and(|s| s.is_key(&self.node(id).name)),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    fn check_insert(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.node(child).parent.is_some() || self.is_ancestor_or_self(child, parent) {
            return Err(NetconfError::ElementAlreadyInUse(
                self.node(child).name.clone(),
            ));
        }
        Ok(())
    }

    /// Append a detached node as the last child
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_child_at(parent, child, usize::MAX)
    }

    /// Insert a detached node at an index, clamped to the child count
    pub fn insert_child_at(&mut self, parent: NodeId, child: NodeId, index: usize) -> Result<()> {
        self.check_insert(parent, child)?;
        let children = &mut self.node_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.node_mut(child).parent = Some(parent);
        Ok(())
    }

    /// Insert as the first child
    pub fn insert_first(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_child_at(parent, child, 0)
    }

    /// Insert as the last child
    pub fn insert_last(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.add_child(parent, child)
    }

    /// Insert a detached node among its siblings following a schema order.
    ///
    /// The node is placed after every existing child whose name does not
    /// come later in `order`. Names missing from `order` sort last.
    pub fn insert_child_ordered(
        &mut self,
        parent: NodeId,
        child: NodeId,
        order: &[&str],
    ) -> Result<()> {
        let rank = |name: &str| order.iter().position(|n| *n == name).unwrap_or(usize::MAX);
        let child_rank = rank(&self.node(child).name);
        let index = self
            .node(parent)
            .children
            .iter()
            .position(|&c| rank(&self.node(c).name) > child_rank)
            .unwrap_or(usize::MAX);
        self.insert_child_at(parent, child, index)
    }

    /// Detach a node from its parent. The subtree stays intact.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node_mut(id).parent.take() {
            self.node_mut(parent).children.retain(|&c| c != id);
        }
    }

    /// Remove a child from its parent
    pub fn delete_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.node(child).parent != Some(parent) {
            return Err(NetconfError::ElementMissing(format!(
                "{} is not a child of {}",
                self.node(child).name,
                self.path(parent)
            )));
        }
        self.detach(child);
        Ok(())
    }

    /// Remove every node selected by a path; returns the removed nodes
    pub fn delete(&mut self, id: NodeId, path: &str) -> Result<NodeSet> {
        let found = self.get(id, path)?;
        for &n in &found {
            self.detach(n);
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    /// Set an unqualified attribute. `xmlns` and `xmlns:p` become prefix
    /// bindings instead.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if name == "xmlns" {
            self.set_prefix(id, Prefix::default_ns(value));
            return;
        }
        if let Some(p) = name.strip_prefix("xmlns:") {
            self.set_prefix(id, Prefix::new(p, value));
            return;
        }
        let attrs = &mut self.node_mut(id).attrs;
        match attrs.iter_mut().find(|a| a.ns.is_none() && a.name == name) {
            Some(a) => a.value = value.to_string(),
            None => attrs.push(Attribute::new(None, name, value)),
        }
    }

    /// Set an attribute in a namespace
    pub fn set_attr_ns(&mut self, id: NodeId, ns: &str, name: &str, value: &str) {
        if ns == NS_XMLNS {
            if name.starts_with("xmlns") {
                self.set_attr(id, name, value);
            } else {
                self.set_prefix(id, Prefix::new(name, value));
            }
            return;
        }
        let attrs = &mut self.node_mut(id).attrs;
        match attrs
            .iter_mut()
            .find(|a| a.ns.as_deref() == Some(ns) && a.name == name)
        {
            Some(a) => a.value = value.to_string(),
            None => attrs.push(Attribute::new(Some(ns), name, value)),
        }
    }

    /// First attribute with a name, in any namespace
    pub fn get_attr(&self, id: NodeId, name: &str) -> Option<&Attribute> {
        self.node(id).attrs.iter().find(|a| a.name == name)
    }

    /// Attribute with a name in a namespace
    pub fn get_attr_ns(&self, id: NodeId, ns: &str, name: &str) -> Option<&Attribute> {
        self.node(id)
            .attrs
            .iter()
            .find(|a| a.ns.as_deref() == Some(ns) && a.name == name)
    }

    pub fn get_attr_value(&self, id: NodeId, name: &str) -> Option<&str> {
        self.get_attr(id, name).map(|a| a.value.as_str())
    }

    /// Remove the first attribute with a name
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<Attribute> {
        let attrs = &mut self.node_mut(id).attrs;
        let i = attrs.iter().position(|a| a.name == name)?;
        Some(attrs.remove(i))
    }

    pub fn remove_attr_ns(&mut self, id: NodeId, ns: &str, name: &str) -> Option<Attribute> {
        let attrs = &mut self.node_mut(id).attrs;
        let i = attrs
            .iter()
            .position(|a| a.ns.as_deref() == Some(ns) && a.name == name)?;
        Some(attrs.remove(i))
    }

    // ------------------------------------------------------------------
    // Prefixes
    // ------------------------------------------------------------------

    pub fn prefixes(&self, id: NodeId) -> &PrefixMap {
        &self.node(id).prefixes
    }

    /// Bind a prefix on a node, overwriting an existing binding
    pub fn set_prefix(&mut self, id: NodeId, prefix: Prefix) {
        self.node_mut(id).prefixes.set(prefix);
    }

    /// Bind all prefixes of a map on a node
    pub fn set_prefix_map(&mut self, id: NodeId, map: &PrefixMap) {
        self.node_mut(id).prefixes.set_all(map);
    }

    /// Add the absent bindings of a map on a node
    pub fn merge_prefix_map(&mut self, id: NodeId, map: &PrefixMap) {
        self.node_mut(id).prefixes.merge(map);
    }

    /// Declare the node's own namespace as the default namespace
    pub fn set_default_prefix(&mut self, id: NodeId) {
        if let Some(ns) = self.node(id).ns.clone() {
            self.set_prefix(id, Prefix::default_ns(ns));
        }
    }

    /// Bind a prefix name to the node's own namespace
    pub fn set_own_prefix(&mut self, id: NodeId, name: &str) {
        if let Some(ns) = self.node(id).ns.clone() {
            self.set_prefix(id, Prefix::new(name, ns));
        }
    }

    pub fn remove_prefix(&mut self, id: NodeId, name: &str) -> Option<Prefix> {
        self.node_mut(id).prefixes.remove(name)
    }

    /// Resolve a prefix from a node, walking ancestors then the defaults
    pub fn lookup_context_prefix(&self, id: NodeId, prefix: &str) -> Option<String> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if let Some(ns) = self.node(c).prefixes.prefix_to_ns(prefix) {
                return Some(ns.to_string());
            }
            cur = self.node(c).parent;
        }
        self.defaults.prefix_to_ns(prefix)
    }

    /// Find a prefix bound to a namespace, walking ancestors then the defaults
    pub fn ns_to_prefix(&self, id: NodeId, ns: &str) -> Option<String> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if let Some(p) = self.node(c).prefixes.ns_to_prefix(ns) {
                return Some(p.to_string());
            }
            cur = self.node(c).parent;
        }
        self.defaults.ns_to_prefix(ns)
    }

    /// All bindings visible from a node, innermost first
    pub fn context_prefix_map(&self, id: NodeId) -> PrefixMap {
        let mut map = PrefixMap::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            map.merge(&self.node(c).prefixes);
            cur = self.node(c).parent;
        }
        map.merge(&self.defaults.snapshot());
        map
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    /// `prefix:name`, or the bare name for the default namespace or when no
    /// prefix is bound
    pub fn qualified_name(&self, id: NodeId) -> String {
        let node = self.node(id);
        let prefix = node.ns.as_deref().and_then(|ns| self.ns_to_prefix(id, ns));
        match prefix {
            Some(p) if !p.is_empty() => format!("{}:{}", p, node.name),
            _ => node.name.clone(),
        }
    }

    /// Absolute path of a node. The prefix is only written where the
    /// namespace changes from the parent.
    pub fn path(&self, id: NodeId) -> String {
        let mut out = String::new();
        for n in self.ancestry(id) {
            out.push('/');
            let node = self.node(n);
            match node.parent {
                Some(p) if self.node(p).ns == node.ns => out.push_str(&node.name),
                _ => out.push_str(&self.qualified_name(n)),
            }
        }
        out
    }

    /// Absolute path of bare names
    pub fn tagpath(&self, id: NodeId) -> String {
        self.ancestry(id)
            .into_iter()
            .map(|n| format!("/{}", self.node(n).name))
            .collect()
    }

    // ------------------------------------------------------------------
    // Path queries
    // ------------------------------------------------------------------

    /// Evaluate a path from a context node
    pub fn get(&self, id: NodeId, path: &str) -> Result<NodeSet> {
        Path::parse(path)?.eval(self, id)
    }

    pub fn get_first(&self, id: NodeId, path: &str) -> Result<Option<NodeId>> {
        Ok(self.get(id, path)?.first().copied())
    }

    pub fn get_last(&self, id: NodeId, path: &str) -> Result<Option<NodeId>> {
        Ok(self.get(id, path)?.last().copied())
    }

    pub fn exists(&self, id: NodeId, path: &str) -> Result<bool> {
        Ok(!self.get(id, path)?.is_empty())
    }

    /// Value of the first node selected by a path
    pub fn get_value(&self, id: NodeId, path: &str) -> Result<Option<Value>> {
        Ok(self
            .get_first(id, path)?
            .and_then(|n| self.value(n).cloned()))
    }

    /// Values of all selected nodes that have one
    pub fn get_values(&self, id: NodeId, path: &str) -> Result<Vec<Value>> {
        Ok(self
            .get(id, path)?
            .into_iter()
            .filter_map(|n| self.value(n).cloned())
            .collect())
    }

    /// Set the value of every node selected by a path
    pub fn set_value_at(&mut self, id: NodeId, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        for n in self.get(id, path)? {
            self.node_mut(n).value = Some(value.clone());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cloning
    // ------------------------------------------------------------------

    /// Deep copy of a subtree, detached
    pub fn clone_node(&mut self, id: NodeId) -> NodeId {
        let snapshot = Snapshot::deep(self, id);
        self.graft(snapshot)
    }

    /// Copy of a node without children, keeping list keys, detached
    pub fn clone_shallow(&mut self, id: NodeId) -> NodeId {
        let snapshot = Snapshot::shallow(self, id);
        self.graft(snapshot)
    }

    /// Deep copy of a subtree of another tree, detached
    pub fn import_node(&mut self, src: &Tree, id: NodeId) -> NodeId {
        let snapshot = Snapshot::deep(src, id);
        self.graft(snapshot)
    }

    /// Shallow copy of a node of another tree, keeping list keys, detached
    pub fn import_shallow(&mut self, src: &Tree, id: NodeId) -> NodeId {
        let snapshot = Snapshot::shallow(src, id);
        self.graft(snapshot)
    }

    fn graft(&mut self, snapshot: Snapshot) -> NodeId {
        let base = self.nodes.len();
        for (mut node, parent) in snapshot.nodes {
            node.parent = parent.map(|p| NodeId(base + p));
            let id = self.push(node);
            if let Some(p) = parent {
                self.nodes[base + p].children.push(id);
            }
        }
        NodeId(base)
    }

    // ------------------------------------------------------------------
    // Operation markers
    // ------------------------------------------------------------------

    /// Set the `operation` attribute in the NETCONF namespace
    pub fn mark(&mut self, id: NodeId, op: Operation) {
        self.set_attr_ns(id, NS_NETCONF, "operation", op.as_str());
    }

    pub fn mark_create(&mut self, id: NodeId) {
        self.mark(id, Operation::Create);
    }

    pub fn mark_delete(&mut self, id: NodeId) {
        self.mark(id, Operation::Delete);
    }

    pub fn mark_replace(&mut self, id: NodeId) {
        self.mark(id, Operation::Replace);
    }

    pub fn mark_merge(&mut self, id: NodeId) {
        self.mark(id, Operation::Merge);
    }

    /// Mark every node selected by a path
    pub fn mark_at(&mut self, id: NodeId, path: &str, op: Operation) -> Result<()> {
        for n in self.get(id, path)? {
            self.mark(n, op);
        }
        Ok(())
    }

    /// Current operation marker of a node
    pub fn operation(&self, id: NodeId) -> Option<&str> {
        self.get_attr_ns(id, NS_NETCONF, "operation")
            .map(|a| a.value.as_str())
    }

    pub fn remove_mark(&mut self, id: NodeId) {
        self.remove_attr_ns(id, NS_NETCONF, "operation");
    }

    /// Remove operation markers from a whole subtree
    pub fn remove_marks(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            self.remove_mark(n);
            stack.extend(self.node(n).children.iter().copied());
        }
    }

    /// Remove operation markers from every node selected by a path
    pub fn remove_mark_at(&mut self, id: NodeId, path: &str) -> Result<()> {
        for n in self.get(id, path)? {
            self.remove_mark(n);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    /// Copy `id` into `dst` under the minimal skeleton of its ancestors and
    /// mark the copy with `op`.
    ///
    /// With `root == None` a new skeleton is started from this node's
    /// topmost ancestor. Returns the root of the result in `dst`. A delete
    /// copies the node shallowly (keys kept); other operations copy the
    /// whole subtree.
    pub fn merge_into(
        &self,
        id: NodeId,
        dst: &mut Tree,
        root: Option<NodeId>,
        op: Operation,
    ) -> Result<NodeId> {
        let chain = self.ancestry(id);
        let top = chain[0];

        let root = match root {
            Some(r) => r,
            None if chain.len() > 1 => dst.import_shallow(self, top),
            None => {
                let copy = self.copy_for(id, dst, op);
                dst.mark(copy, op);
                return Ok(copy);
            }
        };

        if compare(self, top, dst, root) == Compare::Different {
            return Err(NetconfError::ElementMissing(format!(
                "{}, {}",
                self.path(top),
                dst.path(root)
            )));
        }

        let mut parent = root;
        for &x in &chain[1..chain.len() - 1] {
            let existing = dst
                .children(parent)
                .iter()
                .copied()
                .find(|&c| compare(self, x, dst, c) != Compare::Different);
            parent = match existing {
                Some(c) => c,
                None => {
                    let c = dst.import_shallow(self, x);
                    dst.add_child(parent, c)?;
                    c
                }
            };
        }

        if chain.len() > 1 {
            let copy = self.copy_for(id, dst, op);
            dst.mark(copy, op);
            dst.add_child(parent, copy)?;
        }
        Ok(root)
    }

    fn copy_for(&self, id: NodeId, dst: &mut Tree, op: Operation) -> NodeId {
        match op {
            Operation::Delete => dst.import_shallow(self, id),
            _ => dst.import_node(self, id),
        }
    }
}

/// Detached copy of a subtree in preorder, with parent indices local to
/// the snapshot
struct Snapshot {
    nodes: Vec<(Node, Option<usize>)>,
}

impl Snapshot {
    fn deep(tree: &Tree, id: NodeId) -> Self {
        let mut nodes = Vec::new();
        let mut stack = vec![(id, None)];
        while let Some((n, parent)) = stack.pop() {
            let index = nodes.len();
            nodes.push((tree.node(n).detached_copy(), parent));
            for &c in tree.node(n).children.iter().rev() {
                stack.push((c, Some(index)));
            }
        }
        Self { nodes }
    }

    fn shallow(tree: &Tree, id: NodeId) -> Self {
        let node = tree.node(id);
        let mut snapshot = Self {
            nodes: vec![(node.detached_copy(), None)],
        };
        let keys = node.kind.keys();
        for &c in &node.children {
            if keys.iter().any(|k| *k == tree.node(c).name) {
                let offset = snapshot.nodes.len();
                for (n, parent) in Snapshot::deep(tree, c).nodes {
                    snapshot.nodes.push((n, Some(parent.map_or(0, |p| p + offset))));
                }
            }
        }
        snapshot
    }
}
