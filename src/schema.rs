//! Schema metadata attached to tree nodes
//!
//! Generated data models describe list keys and child order for their
//! containers. The [`SchemaRegistry`] maps `(namespace, tag)` to a factory
//! producing that metadata, and is applied to trees after parsing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Kind of a tree node
#[derive(Debug, Clone, Default)]
pub enum NodeKind {
    /// Node without schema knowledge
    #[default]
    Plain,
    /// Schema-aware container or list entry
    Container(Arc<ContainerSchema>),
    /// Schema-aware leaf
    Leaf,
}

impl NodeKind {
    /// Container kind with the given keys and children order
    pub fn container(keys: &[&str], children: &[&str]) -> Self {
        NodeKind::Container(Arc::new(ContainerSchema::new(keys, children)))
    }

    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Container(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeKind::Leaf)
    }

    /// Schema of a container node
    pub fn schema(&self) -> Option<&ContainerSchema> {
        match self {
            NodeKind::Container(s) => Some(s),
            _ => None,
        }
    }

    /// Key names, empty for non-list nodes
    pub fn keys(&self) -> &[String] {
        self.schema().map(|s| s.keys.as_slice()).unwrap_or(&[])
    }
}

/// How a schema node changed in a later revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionChange {
    /// The node did not exist before `introduced`
    NodeAdded,
    /// max-elements was raised; older peers accept at most this many children
    MaxElementsRaised(usize),
    /// The enum value was added
    EnumAdded(String),
    /// The bit was added
    BitsAdded(String),
    /// Changes that need no special handling on encode
    Other,
}

/// One revision record of a schema node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub change: RevisionChange,
    /// Revision date, `YYYY-MM-DD`
    pub introduced: String,
}

impl RevisionInfo {
    pub fn new(change: RevisionChange, introduced: impl Into<String>) -> Self {
        Self {
            change,
            introduced: introduced.into(),
        }
    }

    /// Whether this change is newer than the peer's revision
    pub fn is_newer_than(&self, peer_revision: &str) -> bool {
        self.introduced.as_str() > peer_revision
    }
}

/// Metadata for a container or list entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSchema {
    /// List key leaf names, in key order
    pub keys: Vec<String>,
    /// All child names in schema order; keys come first
    pub children: Vec<String>,
    /// Revision history of the container itself
    pub revisions: Vec<RevisionInfo>,
    /// Revision history of its leaves, by leaf name
    pub leaf_revisions: HashMap<String, Vec<RevisionInfo>>,
}

impl ContainerSchema {
    pub fn new(keys: &[&str], children: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|s| s.to_string()).collect(),
            children: children.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Add a revision record for the container
    pub fn with_revision(mut self, info: RevisionInfo) -> Self {
        self.revisions.push(info);
        self
    }

    /// Add a revision record for one of its leaves
    pub fn with_leaf_revision(mut self, leaf: &str, info: RevisionInfo) -> Self {
        self.leaf_revisions
            .entry(leaf.to_string())
            .or_default()
            .push(info);
        self
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.keys.iter().any(|k| k == name)
    }

    pub fn is_child(&self, name: &str) -> bool {
        self.children.iter().any(|c| c == name)
    }
}

type KindFactory = Arc<dyn Fn() -> NodeKind + Send + Sync>;

/// Registry mapping `(namespace, tag)` to a node kind factory
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    factories: HashMap<(String, String), KindFactory>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("entries", &self.factories.len())
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a tag
    pub fn register<F>(&mut self, ns: &str, tag: &str, factory: F)
    where
        F: Fn() -> NodeKind + Send + Sync + 'static,
    {
        self.factories
            .insert((ns.to_string(), tag.to_string()), Arc::new(factory));
    }

    /// Register a container with fixed schema
    pub fn register_container(&mut self, ns: &str, tag: &str, schema: ContainerSchema) {
        let schema = Arc::new(schema);
        self.register(ns, tag, move || NodeKind::Container(schema.clone()));
    }

    /// Kind of a node named `tag` in `ns`, given the kind of its parent.
    ///
    /// Registered tags use their factory. Unregistered children named by a
    /// schema-aware parent are leaves.
    pub fn kind_for(&self, ns: Option<&str>, tag: &str, parent: Option<&NodeKind>) -> NodeKind {
        if let Some(ns) = ns {
            if let Some(factory) = self.factories.get(&(ns.to_string(), tag.to_string())) {
                return factory();
            }
        }
        match parent.and_then(NodeKind::schema) {
            Some(schema) if schema.is_child(tag) => NodeKind::Leaf,
            _ => NodeKind::Plain,
        }
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
