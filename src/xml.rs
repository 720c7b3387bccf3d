//! XML parsing and serialization of configuration trees
//!
//! Parsing turns quick-xml events into a [`Tree`]. Namespace declarations
//! become prefix bindings on the declaring node. Serialization writes the
//! declarations back and adds any that are needed but missing.

use std::borrow::Cow;
use std::path::Path as FsPath;
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::capabilities::Capabilities;
use crate::error::{NetconfError, Result};
use crate::prefix::{Prefix, PrefixMap, PrefixRegistry};
use crate::schema::{NodeKind, RevisionChange, RevisionInfo, SchemaRegistry};
use crate::tree::{Document, NodeId, Tree};
use crate::value::Value;

/// Namespace of the reserved `xml` prefix
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";

/// Parser producing trees from XML text
#[derive(Debug, Clone, Default)]
pub struct XmlParser {
    defaults: PrefixRegistry,
    schema: Option<Arc<SchemaRegistry>>,
}

impl XmlParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a default prefix registry with the parsed trees
    pub fn with_defaults(mut self, defaults: PrefixRegistry) -> Self {
        self.defaults = defaults;
        self
    }

    /// Assign node kinds from a schema registry while parsing
    pub fn with_schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Parse a document; the result's root is the top element
    pub fn parse(&self, xml: &str) -> Result<Document> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut tree = Tree::with_defaults(self.defaults.clone());
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let node = self.start_element(&mut tree, stack.last().copied(), e)?;
                    root.get_or_insert(node);
                    stack.push(node);
                }
                Ok(Event::Empty(ref e)) => {
                    let node = self.start_element(&mut tree, stack.last().copied(), e)?;
                    root.get_or_insert(node);
                }
                Ok(Event::End(_)) => {
                    stack
                        .pop()
                        .ok_or_else(|| NetconfError::Parser("unexpected closing tag".into()))?;
                }
                Ok(Event::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| NetconfError::Parser(format!("text error: {}", err)))?;
                    append_text(&mut tree, stack.last().copied(), text.trim());
                }
                Ok(Event::CData(ref e)) => {
                    let text = std::str::from_utf8(e.as_ref())
                        .map_err(|err| NetconfError::Parser(format!("CDATA error: {}", err)))?;
                    append_text(&mut tree, stack.last().copied(), text.trim());
                }
                Ok(Event::Eof) => {
                    if let Some(&open) = stack.last() {
                        return Err(NetconfError::Parser(format!(
                            "unclosed element: <{}>",
                            tree.name(open)
                        )));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(NetconfError::Parser(format!(
                        "XML parse error at position {}: {}",
                        reader.error_position(),
                        e
                    )));
                }
            }
        }

        let root = root.ok_or_else(|| NetconfError::Parser("no root element".into()))?;
        Ok(Document::new(tree, root))
    }

    /// Parse a file
    pub fn read_file(&self, path: impl AsRef<FsPath>) -> Result<Document> {
        let xml = std::fs::read_to_string(path)?;
        self.parse(&xml)
    }

    fn start_element(
        &self,
        tree: &mut Tree,
        parent: Option<NodeId>,
        e: &BytesStart<'_>,
    ) -> Result<NodeId> {
        let name = e.name();
        let qname = utf8(name.as_ref())?;
        let (prefix, local) = split_qname(qname);

        let mut declared = PrefixMap::new();
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| NetconfError::Parser(format!("attribute error: {}", err)))?;
            let key = utf8(attr.key.as_ref())?;
            let value = attr
                .unescape_value()
                .map_err(|err| NetconfError::Parser(format!("attribute value error: {}", err)))?
                .into_owned();
            if key == "xmlns" {
                declared.set(Prefix::default_ns(value));
            } else if let Some(p) = key.strip_prefix("xmlns:") {
                declared.set(Prefix::new(p, value));
            } else {
                attrs.push((key.to_string(), value));
            }
        }

        let ns = resolve(tree, &declared, parent, prefix);
        if ns.is_none() && !prefix.is_empty() {
            return Err(NetconfError::Parser(format!("unbound prefix: {}", prefix)));
        }

        let node = tree.create_node_opt(ns.as_deref(), local);
        tree.set_prefix_map(node, &declared);

        for (key, value) in attrs {
            let (p, name) = split_qname(&key);
            if p.is_empty() {
                tree.set_attr(node, name, &value);
            } else {
                let attr_ns = resolve(tree, &declared, parent, p)
                    .ok_or_else(|| NetconfError::Parser(format!("unbound prefix: {}", p)))?;
                tree.set_attr_ns(node, &attr_ns, name, &value);
            }
        }

        if let Some(schema) = &self.schema {
            let kind = schema.kind_for(ns.as_deref(), local, parent.map(|p| tree.kind(p)));
            tree.set_kind(node, kind);
        }
        if let Some(p) = parent {
            tree.add_child(p, node)?;
        }
        Ok(node)
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| NetconfError::Parser(format!("invalid UTF-8: {}", e)))
}

fn split_qname(qname: &str) -> (&str, &str) {
    qname.split_once(':').unwrap_or(("", qname))
}

fn resolve(tree: &Tree, declared: &PrefixMap, parent: Option<NodeId>, prefix: &str) -> Option<String> {
    if prefix == "xml" {
        return Some(NS_XML.to_string());
    }
    let ns = match (declared.prefix_to_ns(prefix), parent) {
        (Some(ns), _) => Some(ns.to_string()),
        (None, Some(p)) => tree.lookup_context_prefix(p, prefix),
        (None, None) => tree.defaults().prefix_to_ns(prefix),
    };
    // xmlns="" undeclares the default namespace
    ns.filter(|ns| !ns.is_empty())
}

fn append_text(tree: &mut Tree, node: Option<NodeId>, text: &str) {
    let Some(node) = node else { return };
    if text.is_empty() {
        return;
    }
    let value = match tree.value(node) {
        Some(existing) => format!("{}{}", existing, text),
        None => text.to_string(),
    };
    tree.set_value(node, value);
}

pub(crate) fn escape_text(s: &str) -> Cow<'_, str> {
    escape(s, false)
}

pub(crate) fn escape_attr(s: &str) -> Cow<'_, str> {
    escape(s, true)
}

fn escape(s: &str, quotes: bool) -> Cow<'_, str> {
    let special = |b: u8| matches!(b, b'&' | b'<' | b'>') || (quotes && b == b'"');
    if !s.bytes().any(special) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quotes => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Serialization options
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions<'a> {
    /// Indent with two spaces per level
    pub pretty: bool,
    /// Peer capabilities; enables the revision compatibility check
    pub capabilities: Option<&'a Capabilities>,
}

struct Encoder<'a> {
    tree: &'a Tree,
    opts: EncodeOptions<'a>,
    out: String,
    /// Bindings declared on each open element
    scope: Vec<PrefixMap>,
}

impl Tree {
    /// Pretty printed XML of a subtree
    pub fn to_xml_string(&self, id: NodeId) -> String {
        self.encode(id, EncodeOptions { pretty: true, capabilities: None })
            .unwrap_or_default()
    }

    /// XML of a subtree without added whitespace
    pub fn to_xml_compact(&self, id: NodeId) -> String {
        self.encode(id, EncodeOptions::default()).unwrap_or_default()
    }

    /// Serialize a subtree.
    ///
    /// With capabilities given, nodes newer than the revision the peer
    /// advertised for their namespace are skipped, and values the peer
    /// cannot accept fail with a revision error.
    pub fn encode(&self, id: NodeId, opts: EncodeOptions<'_>) -> Result<String> {
        let mut enc = Encoder {
            tree: self,
            opts,
            out: String::new(),
            scope: Vec::new(),
        };
        enc.node(id, 0)?;
        Ok(enc.out)
    }

    /// Write a subtree to a file as pretty printed XML
    pub fn write_file(&self, id: NodeId, path: impl AsRef<FsPath>) -> Result<()> {
        std::fs::write(path, self.to_xml_string(id))?;
        Ok(())
    }
}

impl Encoder<'_> {
    fn scope_ns(&self, prefix: &str) -> Option<&str> {
        self.scope.iter().rev().find_map(|m| m.prefix_to_ns(prefix))
    }

    /// An in-scope prefix for a namespace that is not shadowed further in
    fn scope_prefix(&self, ns: &str, allow_default: bool) -> Option<String> {
        for map in self.scope.iter().rev() {
            for p in map.iter() {
                if p.ns == ns
                    && (allow_default || !p.is_default())
                    && self.scope_ns(&p.name) == Some(ns)
                {
                    return Some(p.name.clone());
                }
            }
        }
        None
    }

    /// Choose a prefix for a namespace, declaring it on the current element
    /// when needed
    fn prefix_for(&mut self, id: NodeId, ns: &str, element: bool) -> String {
        if ns == NS_XML {
            return "xml".to_string();
        }
        if let Some(p) = self.scope_prefix(ns, element) {
            return p;
        }
        let candidate = self
            .tree
            .ns_to_prefix(id, ns)
            .filter(|p| element || !p.is_empty())
            .filter(|p| self.scope_ns(p).is_none());
        let name = match candidate {
            Some(p) => p,
            // redeclare the default namespace unless this element binds it
            None if element && self.scope.last().is_some_and(|m| m.prefix_to_ns("").is_none()) => {
                String::new()
            }
            None => {
                let mut i = 0;
                loop {
                    let p = format!("ns{}", i);
                    if self.scope_ns(&p).is_none() {
                        break p;
                    }
                    i += 1;
                }
            }
        };
        if let Some(current) = self.scope.last_mut() {
            current.set(Prefix::new(name.clone(), ns));
        }
        name
    }

    fn node(&mut self, id: NodeId, depth: usize) -> Result<()> {
        let tree = self.tree;
        if self.skip_for_revision(id)? {
            return Ok(());
        }

        self.scope.push(tree.prefixes(id).clone());

        let tag = match tree.ns(id) {
            Some(ns) => {
                let p = self.prefix_for(id, ns, true);
                qualify(&p, tree.name(id))
            }
            None => {
                // an unqualified element must not inherit a default namespace
                if self.scope_ns("").is_some_and(|d| !d.is_empty()) {
                    if let Some(current) = self.scope.last_mut() {
                        current.set(Prefix::default_ns(""));
                    }
                }
                tree.name(id).to_string()
            }
        };

        let mut attrs = Vec::new();
        for attr in tree.attrs(id) {
            let name = match &attr.ns {
                Some(ns) => {
                    let p = self.prefix_for(id, ns, false);
                    qualify(&p, &attr.name)
                }
                None => attr.name.clone(),
            };
            attrs.push((name, attr.value.clone()));
        }
        tracing::trace!(node = %tag, "encoding element");

        self.indent(depth);
        self.out.push('<');
        self.out.push_str(&tag);
        if let Some(declared) = self.scope.last() {
            for p in declared.iter() {
                self.out.push(' ');
                self.out.push_str(&p.qualified_name());
                self.out.push_str("=\"");
                self.out.push_str(&escape_attr(&p.ns));
                self.out.push('"');
            }
        }
        for (name, value) in &attrs {
            self.out.push(' ');
            self.out.push_str(name);
            self.out.push_str("=\"");
            self.out.push_str(&escape_attr(value));
            self.out.push('"');
        }

        let children = tree.children(id);
        let value = tree.value(id).map(Value::to_string);
        if children.is_empty() && value.is_none() {
            self.out.push_str("/>");
        } else {
            self.out.push('>');
            if let Some(v) = &value {
                self.out.push_str(&escape_text(v));
            }
            if !children.is_empty() {
                for &c in children {
                    self.newline();
                    self.node(c, depth + 1)?;
                }
                self.newline();
                self.indent(depth);
            }
            self.out.push_str("</");
            self.out.push_str(&tag);
            self.out.push('>');
        }
        self.scope.pop();
        Ok(())
    }

    fn newline(&mut self) {
        if self.opts.pretty {
            self.out.push('\n');
        }
    }

    fn indent(&mut self, depth: usize) {
        if self.opts.pretty {
            for _ in 0..depth {
                self.out.push_str("  ");
            }
        }
    }

    /// Check a node against the peer's revision. Returns true if the node
    /// must be left out.
    fn skip_for_revision(&self, id: NodeId) -> Result<bool> {
        let Some(caps) = self.opts.capabilities else {
            return Ok(false);
        };
        let tree = self.tree;
        let Some(peer) = tree.ns(id).and_then(|ns| caps.revision(ns)) else {
            return Ok(false);
        };

        let own: &[RevisionInfo] = match tree.kind(id) {
            NodeKind::Container(schema) => &schema.revisions,
            _ => match tree.parent(id).and_then(|p| tree.kind(p).schema()) {
                Some(parent) => parent
                    .leaf_revisions
                    .get(tree.name(id))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
                None => &[],
            },
        };

        for info in own.iter().filter(|i| i.is_newer_than(peer)) {
            match &info.change {
                RevisionChange::NodeAdded => {
                    tracing::debug!(
                        node = %tree.path(id),
                        introduced = %info.introduced,
                        peer,
                        "skipping node unknown to peer"
                    );
                    return Ok(true);
                }
                RevisionChange::MaxElementsRaised(max) => {
                    let count = tree
                        .parent(id)
                        .map_or(1, |p| tree.children_named(p, tree.name(id)).len());
                    if count > *max {
                        return Err(NetconfError::Revision(format!(
                            "{}: {} entries, peer revision {} allows {}",
                            tree.path(id),
                            count,
                            peer,
                            max
                        )));
                    }
                }
                RevisionChange::EnumAdded(v) => {
                    if tree.value(id).is_some_and(|val| val.to_string() == *v) {
                        return Err(NetconfError::Revision(format!(
                            "{}: enum {} is newer than peer revision {}",
                            tree.path(id),
                            v,
                            peer
                        )));
                    }
                }
                RevisionChange::BitsAdded(v) => {
                    let set = tree.value(id).map(Value::to_string).unwrap_or_default();
                    if set.split_whitespace().any(|b| b == v) {
                        return Err(NetconfError::Revision(format!(
                            "{}: bit {} is newer than peer revision {}",
                            tree.path(id),
                            v,
                            peer
                        )));
                    }
                }
                RevisionChange::Other => {}
            }
        }
        Ok(false)
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}:{}", prefix, name)
    }
}
