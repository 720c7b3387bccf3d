//! Comparing configuration trees and computing edits between them
//!
//! [`diff`] splits two trees into nodes unique to either side and list
//! entries whose non-key content changed. [`sync`] turns a diff into one
//! edit tree using create, delete and replace operations; [`sync_merge`]
//! produces a smaller edit that relies on the default merge operation.
//! Both edit trees, applied to the first tree, make it equal to the second.

use crate::error::{NetconfError, Result};
use crate::schema::NodeKind;
use crate::tree::{Document, NodeId, NodeSet, Operation, Tree};

/// Namespace and name of the synthetic root wrapping node sets
pub const DUMMY_NS: &str = "DUMMY";
pub const DUMMY_NAME: &str = "dummy";

/// Outcome of comparing two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    /// Not the same node
    Different,
    /// The same list entry or leaf with other content
    Changed,
    Equal,
}

/// Compare two nodes.
///
/// Containers are the same entry when their keys match, and changed when a
/// non-key child differs. Leaves are changed when only the value differs.
/// Plain nodes are either equal or different.
pub fn compare(ta: &Tree, a: NodeId, tb: &Tree, b: NodeId) -> Compare {
    let (na, nb) = (ta.node(a), tb.node(b));
    match ta.kind(a) {
        NodeKind::Container(schema) => {
            if !na.shallow_eq(nb) {
                return Compare::Different;
            }
            for key in &schema.keys {
                let same = match (ta.child(a, key), tb.child(b, key)) {
                    (Some(x), Some(y)) => ta.node(x).shallow_eq(tb.node(y)),
                    (None, None) => true,
                    _ => false,
                };
                if !same {
                    return Compare::Different;
                }
            }
            for name in non_key_names(ta, a, tb, b, &schema.keys, &schema.children) {
                let xs = ta.children_named(a, &name);
                let ys = tb.children_named(b, &name);
                let hits = xs
                    .iter()
                    .filter(|&&x| ys.iter().any(|&y| ta.node(x).shallow_eq(tb.node(y))))
                    .count();
                if xs.len() != ys.len() || hits != xs.len() {
                    return Compare::Changed;
                }
            }
            Compare::Equal
        }
        NodeKind::Leaf => {
            if na.name() != nb.name() || na.ns() != nb.ns() {
                Compare::Different
            } else if na.value() != nb.value() {
                Compare::Changed
            } else {
                Compare::Equal
            }
        }
        NodeKind::Plain => {
            if na.shallow_eq(nb) {
                Compare::Equal
            } else {
                Compare::Different
            }
        }
    }
}

/// Schema child names followed by any other child names present on either
/// side, keys excluded
fn non_key_names(
    ta: &Tree,
    a: NodeId,
    tb: &Tree,
    b: NodeId,
    keys: &[String],
    declared: &[String],
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let present = ta
        .children(a)
        .iter()
        .map(|&c| ta.name(c))
        .chain(tb.children(b).iter().map(|&c| tb.name(c)));
    for name in declared.iter().map(String::as_str).chain(present) {
        if !keys.iter().any(|k| k == name) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Nodes that differ between two trees
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Nodes of A with no counterpart in B
    pub unique_a: NodeSet,
    /// Nodes of B with no counterpart in A
    pub unique_b: NodeSet,
    /// Entries of A whose content changed
    pub changed_a: NodeSet,
    /// The matching entries of B
    pub changed_b: NodeSet,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.unique_a.is_empty()
            && self.unique_b.is_empty()
            && self.changed_a.is_empty()
            && self.changed_b.is_empty()
    }
}

/// Diff two subtrees. Attributes are ignored.
pub fn diff(ta: &Tree, a: NodeId, tb: &Tree, b: NodeId) -> DiffResult {
    let mut result = DiffResult::default();
    diff_into(ta, a, tb, b, &mut result);
    tracing::debug!(
        unique_a = result.unique_a.len(),
        unique_b = result.unique_b.len(),
        changed = result.changed_a.len(),
        "diff"
    );
    result
}

fn diff_into(ta: &Tree, a: NodeId, tb: &Tree, b: NodeId, result: &mut DiffResult) {
    if compare(ta, a, tb, b) == Compare::Different {
        result.unique_a.push(a);
        result.unique_b.push(b);
        return;
    }

    let (a_children, b_children) = (ta.children(a), tb.children(b));
    if a_children.is_empty() || b_children.is_empty() {
        result.unique_a.extend_from_slice(a_children);
        result.unique_b.extend_from_slice(b_children);
        return;
    }

    let mut remaining: NodeSet = b_children.to_vec();
    for &x in a_children {
        let found = remaining.iter().enumerate().find_map(|(i, &y)| {
            let cmp = compare(ta, x, tb, y);
            (cmp != Compare::Different).then_some((i, y, cmp))
        });
        match found {
            None => result.unique_a.push(x),
            Some((i, y, cmp)) => {
                remaining.remove(i);
                match cmp {
                    Compare::Changed => {
                        result.changed_a.push(x);
                        result.changed_b.push(y);
                    }
                    _ if is_container_like(ta, x) || is_container_like(tb, y) => {
                        diff_into(ta, x, tb, y, result);
                    }
                    _ => {}
                }
            }
        }
    }
    result.unique_b.extend(remaining);
}

fn is_container_like(tree: &Tree, id: NodeId) -> bool {
    tree.kind(id).is_container() || (!tree.kind(id).is_leaf() && tree.has_children(id))
}

/// Are two subtrees equal for configuration purposes
pub fn check_sync(ta: &Tree, a: NodeId, tb: &Tree, b: NodeId) -> bool {
    diff(ta, a, tb, b).is_empty()
}

/// Edit that turns A into B using explicit operations.
///
/// Nodes only in A are deleted (sent with their keys), nodes only in B are
/// created and changed entries are replaced. Returns `None` when the trees
/// are in sync.
pub fn sync(ta: &Tree, a: NodeId, tb: &Tree, b: NodeId) -> Result<Option<Document>> {
    let d = diff(ta, a, tb, b);
    let mut out = Tree::with_defaults(ta.defaults().clone());
    let mut root = None;
    for &x in &d.unique_a {
        root = Some(ta.merge_into(x, &mut out, root, Operation::Delete)?);
    }
    for &x in &d.unique_b {
        root = Some(tb.merge_into(x, &mut out, root, Operation::Create)?);
    }
    for &x in &d.changed_b {
        root = Some(tb.merge_into(x, &mut out, root, Operation::Replace)?);
    }
    Ok(root.map(|r| Document::new(out, r)))
}

/// Edit that turns A into B relying on merge.
///
/// Starts from a copy of B and removes everything A already has, then adds
/// what A has beyond B marked for deletion. Key leaves of list entries are
/// kept so entries stay addressable.
pub fn sync_merge(ta: &Tree, a: NodeId, tb: &Tree, b: NodeId) -> Result<Document> {
    let mut out = Tree::with_defaults(tb.defaults().clone());
    let copy = out.import_node(tb, b);
    let mut to_delete = Vec::new();
    let diffs = merge_walk(ta, a, &mut out, copy, &mut to_delete)?;
    tracing::debug!(diffs, pruned = to_delete.len(), "sync merge");
    for n in to_delete {
        out.detach(n);
    }
    Ok(Document::new(out, copy))
}

/// Walk A against the copy of B; returns the number of differences found
fn merge_walk(
    ta: &Tree,
    a: NodeId,
    out: &mut Tree,
    b: NodeId,
    to_delete: &mut NodeSet,
) -> Result<usize> {
    let mut diffs = 0;
    let mut remaining: NodeSet = ta.children(a).to_vec();
    let in_list = !ta.kind(a).keys().is_empty();

    for bc in out.children(b).to_vec() {
        if in_list && !is_container_like(out, bc) && out.is_key(bc) {
            continue;
        }
        let Some(ac) = take_match(ta, &mut remaining, out, bc) else {
            // new in B, stays in the edit
            diffs += 1;
            continue;
        };
        if is_container_like(ta, ac) || is_container_like(out, bc) {
            let d = merge_walk(ta, ac, out, bc, to_delete)?;
            diffs += d;
            if d == 0 {
                to_delete.push(bc);
            }
        } else if ta.node(ac).shallow_eq(out.node(bc)) {
            to_delete.push(bc);
        } else {
            diffs += 1;
        }
    }

    for x in remaining {
        let copy = if is_container_like(ta, x) {
            out.import_shallow(ta, x)
        } else if ta.is_key(x) {
            continue;
        } else {
            out.import_node(ta, x)
        };
        diffs += 1;
        out.add_child(b, copy)?;
        out.mark_delete(copy);
    }
    Ok(diffs)
}

/// Find and remove the child of A that corresponds to `bc`
fn take_match(ta: &Tree, remaining: &mut NodeSet, out: &Tree, bc: NodeId) -> Option<NodeId> {
    let bnode = out.node(bc);
    let pos = if is_container_like(out, bc) {
        let keys = out.kind(bc).keys();
        remaining.iter().position(|&x| {
            if !is_container_like(ta, x) || !ta.node(x).shallow_eq(bnode) {
                return false;
            }
            keys.iter().all(|k| match (ta.child(x, k), out.child(bc, k)) {
                (Some(kx), Some(kb)) => ta.node(kx).shallow_eq(out.node(kb)),
                (None, None) => true,
                _ => false,
            })
        })
    } else {
        remaining.iter().position(|&x| {
            !is_container_like(ta, x) && ta.name(x) == bnode.name() && ta.ns(x) == bnode.ns()
        })
    };
    pos.map(|i| remaining.remove(i))
}

/// Copy node sets under a synthetic root so they can be compared as trees
fn wrap(tree: &Tree, nodes: &[NodeId]) -> Result<(Tree, NodeId)> {
    let mut out = Tree::with_defaults(tree.defaults().clone());
    let root = out.create_node(DUMMY_NS, DUMMY_NAME);
    for &n in nodes {
        let copy = out.import_node(tree, n);
        out.add_child(root, copy)?;
    }
    Ok((out, root))
}

/// Detach the children of a synthetic root
fn unwrap(mut doc: Document) -> (Tree, NodeSet) {
    let children = doc.tree.children(doc.root).to_vec();
    for &c in &children {
        doc.tree.detach(c);
    }
    (doc.tree, children)
}

/// [`check_sync`] over node sets
pub fn check_sync_sets(ta: &Tree, a: &[NodeId], tb: &Tree, b: &[NodeId]) -> Result<bool> {
    let (wa, ra) = wrap(ta, a)?;
    let (wb, rb) = wrap(tb, b)?;
    Ok(check_sync(&wa, ra, &wb, rb))
}

/// [`sync`] over node sets; the edit's top nodes, empty when in sync
pub fn sync_sets(ta: &Tree, a: &[NodeId], tb: &Tree, b: &[NodeId]) -> Result<(Tree, NodeSet)> {
    let (wa, ra) = wrap(ta, a)?;
    let (wb, rb) = wrap(tb, b)?;
    Ok(match sync(&wa, ra, &wb, rb)? {
        Some(doc) => unwrap(doc),
        None => (Tree::with_defaults(ta.defaults().clone()), Vec::new()),
    })
}

/// [`sync_merge`] over node sets
pub fn sync_merge_sets(ta: &Tree, a: &[NodeId], tb: &Tree, b: &[NodeId]) -> Result<(Tree, NodeSet)> {
    let (wa, ra) = wrap(ta, a)?;
    let (wb, rb) = wrap(tb, b)?;
    Ok(unwrap(sync_merge(&wa, ra, &wb, rb)?))
}

/// Apply an edit tree to a configuration the way a server would.
///
/// Each edit node is matched against the target's children; its operation
/// mark, inherited from above and `merge` by default, decides what happens.
/// Operation marks are not copied into the target.
pub fn apply_edit(target: &mut Tree, root: NodeId, edit: &Tree, edit_root: NodeId) -> Result<()> {
    if compare(edit, edit_root, target, root) == Compare::Different {
        return Err(NetconfError::ElementMissing(format!(
            "{}, {}",
            edit.path(edit_root),
            target.path(root)
        )));
    }
    let op = edit_operation(edit, edit_root, Operation::Merge);
    apply_children(target, root, edit, edit_root, op)
}

fn apply_children(
    target: &mut Tree,
    parent: NodeId,
    edit: &Tree,
    edit_parent: NodeId,
    inherited: Operation,
) -> Result<()> {
    for &e in edit.children(edit_parent) {
        let op = edit_operation(edit, e, inherited);
        let existing = target.children(parent).iter().copied().find(|&t| {
            if is_container_like(edit, e) {
                compare(edit, e, target, t) != Compare::Different
            } else {
                edit.name(e) == target.name(t) && edit.ns(e) == target.ns(t)
            }
        });

        match (op, existing) {
            (Operation::Delete, Some(t)) => target.delete_child(parent, t)?,
            (Operation::Delete, None) => {
                return Err(NetconfError::ElementMissing(edit.path(e)));
            }
            (Operation::Create, Some(t)) => {
                return Err(NetconfError::ElementAlreadyInUse(target.path(t)));
            }
            (Operation::Replace, Some(t)) => {
                let index = target.children(parent).iter().position(|&c| c == t).unwrap_or(0);
                target.delete_child(parent, t)?;
                let copy = import_unmarked(target, edit, e);
                target.insert_child_at(parent, copy, index)?;
            }
            (Operation::Merge, Some(t)) => {
                if is_container_like(edit, e) {
                    apply_children(target, t, edit, e, op)?;
                } else {
                    match edit.value(e).cloned() {
                        Some(v) => target.set_value(t, v),
                        None => {
                            target.delete_value(t);
                        }
                    }
                }
            }
            (_, None) => {
                let copy = import_unmarked(target, edit, e);
                target.add_child(parent, copy)?;
            }
        }
    }
    Ok(())
}

fn import_unmarked(target: &mut Tree, edit: &Tree, id: NodeId) -> NodeId {
    let copy = target.import_node(edit, id);
    target.remove_marks(copy);
    copy
}

fn edit_operation(edit: &Tree, id: NodeId, inherited: Operation) -> Operation {
    match edit.operation(id) {
        Some("create") => Operation::Create,
        Some("delete") => Operation::Delete,
        Some("replace") => Operation::Replace,
        Some("merge") => Operation::Merge,
        _ => inherited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ContainerSchema, SchemaRegistry};
    use crate::xml::XmlParser;
    use std::sync::Arc;

    const NS: &str = "urn:example:hosts";

    const HOSTS_A: &str = r#"<hosts xmlns="urn:example:hosts">
  <host><name>joe</name><ip>10.0.0.1</ip></host>
  <host><name>anne</name><ip>10.0.0.2</ip></host>
  <host><name>bob</name><ip>10.0.0.3</ip></host>
</hosts>"#;

    const HOSTS_B: &str = r#"<hosts xmlns="urn:example:hosts">
  <host><name>joe</name><ip>10.0.0.1</ip></host>
  <host><name>anne</name><ip>10.0.0.9</ip></host>
  <host><name>eve</name><ip>10.0.0.4</ip></host>
</hosts>"#;

    fn parser() -> XmlParser {
        let mut schema = SchemaRegistry::new();
        schema.register_container(NS, "hosts", ContainerSchema::new(&[], &["host"]));
        schema.register_container(NS, "host", ContainerSchema::new(&["name"], &["name", "ip"]));
        XmlParser::new().with_schema(Arc::new(schema))
    }

    fn parse(xml: &str) -> Document {
        parser().parse(xml).unwrap()
    }

    fn host(doc: &Document, name: &str) -> NodeId {
        doc.get(&format!("host[name='{}']", name)).unwrap()[0]
    }

    #[test]
    fn test_compare() {
        let a = parse(HOSTS_A);
        let b = parse(HOSTS_B);
        let joe = compare(&a.tree, host(&a, "joe"), &b.tree, host(&b, "joe"));
        let anne = compare(&a.tree, host(&a, "anne"), &b.tree, host(&b, "anne"));
        let other = compare(&a.tree, host(&a, "bob"), &b.tree, host(&b, "eve"));
        assert_eq!(joe, Compare::Equal);
        assert_eq!(anne, Compare::Changed);
        assert_eq!(other, Compare::Different);

        let ip_a = a.get("host[name='anne']/ip").unwrap()[0];
        let ip_b = b.get("host[name='anne']/ip").unwrap()[0];
        assert_eq!(compare(&a.tree, ip_a, &b.tree, ip_b), Compare::Changed);
    }

    #[test]
    fn test_plain_compare_is_shallow() {
        let a = XmlParser::new().parse("<a><x>1</x></a>").unwrap();
        let b = XmlParser::new().parse("<a><x>2</x></a>").unwrap();
        assert_eq!(compare(&a.tree, a.root, &b.tree, b.root), Compare::Equal);
        let xa = a.tree.children(a.root)[0];
        let xb = b.tree.children(b.root)[0];
        assert_eq!(compare(&a.tree, xa, &b.tree, xb), Compare::Different);
    }

    #[test]
    fn test_diff() {
        let a = parse(HOSTS_A);
        let b = parse(HOSTS_B);
        let d = diff(&a.tree, a.root, &b.tree, b.root);
        assert_eq!(d.unique_a, vec![host(&a, "bob")]);
        assert_eq!(d.unique_b, vec![host(&b, "eve")]);
        assert_eq!(d.changed_a, vec![host(&a, "anne")]);
        assert_eq!(d.changed_b, vec![host(&b, "anne")]);
        assert!(!check_sync(&a.tree, a.root, &b.tree, b.root));
    }

    #[test]
    fn test_check_sync_with_clone() {
        let mut a = parse(HOSTS_A);
        let copy = a.tree.clone_node(a.root);
        assert!(check_sync(&a.tree, a.root, &a.tree, copy));
        assert!(sync(&a.tree, a.root, &a.tree, copy).unwrap().is_none());
    }

    #[test]
    fn test_sync_operations() {
        let a = parse(HOSTS_A);
        let b = parse(HOSTS_B);
        let edit = sync(&a.tree, a.root, &b.tree, b.root).unwrap().unwrap();

        let bob = host(&edit, "bob");
        assert_eq!(edit.tree.operation(bob), Some("delete"));
        assert!(edit.tree.child(bob, "ip").is_none());
        assert_eq!(edit.tree.operation(host(&edit, "eve")), Some("create"));
        let anne = host(&edit, "anne");
        assert_eq!(edit.tree.operation(anne), Some("replace"));
        assert_eq!(edit.get("host[name='anne']/ip").unwrap().len(), 1);
        assert!(edit.get("host[name='joe']").unwrap().is_empty());
    }

    #[test]
    fn test_sync_applied_yields_target() {
        let mut a = parse(HOSTS_A);
        let b = parse(HOSTS_B);
        let edit = sync(&a.tree, a.root, &b.tree, b.root).unwrap().unwrap();
        apply_edit(&mut a.tree, a.root, &edit.tree, edit.root).unwrap();
        assert!(check_sync(&a.tree, a.root, &b.tree, b.root));
    }

    #[test]
    fn test_sync_merge() {
        let mut a = parse(HOSTS_A);
        let b = parse(HOSTS_B);
        let edit = sync_merge(&a.tree, a.root, &b.tree, b.root).unwrap();

        // joe is unchanged and pruned, anne keeps only the new ip
        assert!(edit.get("host[name='joe']").unwrap().is_empty());
        let anne = host(&edit, "anne");
        assert_eq!(edit.tree.operation(anne), None);
        assert_eq!(
            edit.tree.get_value(anne, "ip").unwrap().unwrap().to_string(),
            "10.0.0.9"
        );
        let bob = host(&edit, "bob");
        assert_eq!(edit.tree.operation(bob), Some("delete"));
        assert!(edit.tree.child(bob, "ip").is_none());
        assert!(edit.tree.operation(host(&edit, "eve")).is_none());

        apply_edit(&mut a.tree, a.root, &edit.tree, edit.root).unwrap();
        assert!(check_sync(&a.tree, a.root, &b.tree, b.root));
    }

    #[test]
    fn test_sync_merge_deletes_leaf() {
        let a = parse(r#"<hosts xmlns="urn:example:hosts"><host><name>joe</name><ip>1</ip></host></hosts>"#);
        let b = parse(r#"<hosts xmlns="urn:example:hosts"><host><name>joe</name></host></hosts>"#);
        let edit = sync_merge(&a.tree, a.root, &b.tree, b.root).unwrap();
        let ip = edit.get("host/ip").unwrap()[0];
        assert_eq!(edit.tree.operation(ip), Some("delete"));
        assert_eq!(edit.get("host/name").unwrap().len(), 1);
    }

    #[test]
    fn test_node_set_variants() {
        let a = parse(HOSTS_A);
        let b = parse(HOSTS_B);
        let hosts_a = a.get("host").unwrap();
        let hosts_b = b.get("host").unwrap();

        assert!(check_sync_sets(&a.tree, &hosts_a, &a.tree, &hosts_a).unwrap());
        assert!(!check_sync_sets(&a.tree, &hosts_a, &b.tree, &hosts_b).unwrap());

        let (tree, tops) = sync_sets(&a.tree, &hosts_a, &b.tree, &hosts_b).unwrap();
        assert_eq!(tops.len(), 3);
        assert!(tops.iter().all(|&t| tree.parent(t).is_none()));

        let (_, tops) = sync_merge_sets(&a.tree, &hosts_a, &b.tree, &hosts_b).unwrap();
        assert_eq!(tops.len(), 3);

        let (_, none) = sync_sets(&a.tree, &hosts_a, &a.tree, &hosts_a).unwrap();
        assert!(none.is_empty());
    }
}
