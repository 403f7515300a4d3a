//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Candidate-configuration overlay.
//!
//! A [`Union`] projects, in order: the session's own edits (set tree and
//! deletion markers), the shared base (running) tree, and schema-derived
//! defaults. It is the only surface the edit verbs operate on. The union
//! exclusively owns its delta; base and schema are shared, read-only.

use std::sync::Arc;

use cfgd_utils::path::Path;
use cfgd_yang::xpath::XpathContext;
use cfgd_yang::{ModelSet, NodeKind, Resolved, SchemaNode, View};

use crate::node::{Node, NodeFlags};
use crate::render::{self, RenderOpts};

/// Change status of a node relative to the base tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Unchanged,
    Changed,
    Added,
    Deleted,
}

/// Where a visible node's content comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Origin {
    Set,
    Base,
    Default,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ShowOpts {
    pub hide_secrets: bool,
    pub show_defaults: bool,
}

#[derive(Clone, Debug)]
pub struct Union {
    schema: Arc<ModelSet>,
    base: Arc<Node>,
    set_tree: Node,
    del_tree: Node,
}

// ===== impl Union =====

impl Union {
    pub fn new(schema: Arc<ModelSet>, base: Arc<Node>) -> Union {
        Union {
            schema,
            base,
            set_tree: Node::root(),
            del_tree: Node::root(),
        }
    }

    pub fn schema(&self) -> &Arc<ModelSet> {
        &self.schema
    }

    pub fn base(&self) -> &Arc<Node> {
        &self.base
    }

    /// Rebases the overlay onto a new running tree, keeping the delta.
    pub fn rebase(&mut self, base: Arc<Node>) {
        self.base = base;
    }

    /// Drops all pending edits.
    pub fn discard(&mut self) {
        self.set_tree = Node::root();
        self.del_tree = Node::root();
    }

    /// Whether the candidate carries any edits at all. Edits that happen
    /// to reproduce the base tree still count; semantic divergence is
    /// what [`Union::changed`] answers.
    pub fn dirty(&self) -> bool {
        !self.set_tree.is_empty() || !self.del_tree.is_empty()
    }

    /// Whether the materialised candidate differs from the base tree.
    /// Comparison happens on the canonical rendering, so storage-order
    /// differences do not count as changes.
    pub fn changed(&self) -> bool {
        let opts = RenderOpts::default();
        let schema = self.schema.root();
        render::render(&self.to_node(false), Some(schema), opts)
            != render::render(&self.base, Some(schema), opts)
    }

    // --- existence and status ---

    pub fn exists(&self, path: &Path) -> bool {
        self.origin(path).is_some()
    }

    /// True when the schema admits the path even if no value is present.
    pub fn could_exist(&self, path: &Path) -> bool {
        self.schema.resolve(path, View::Full).is_ok()
    }

    pub fn is_default(&self, path: &Path) -> bool {
        self.origin(path) == Some(Origin::Default)
    }

    pub fn status(&self, path: &Path) -> Status {
        let in_candidate = self.exists(path);
        let in_base = self.base.exists(path);
        match (in_candidate, in_base) {
            (true, false) => Status::Added,
            (false, true) => Status::Deleted,
            (false, false) => Status::Unchanged,
            (true, true) => {
                let candidate = self.subtree(path, false);
                let base = self
                    .base
                    .get(path)
                    .cloned()
                    .unwrap_or_else(|| Node::new(path.last().unwrap_or("")));
                if candidate == base {
                    Status::Unchanged
                } else {
                    Status::Changed
                }
            }
        }
    }

    /// The value visible at a leaf path.
    pub fn get_value(&self, path: &Path) -> Option<String> {
        let snode = self.schema.descendant(path, View::Full)?;
        if snode.kind != NodeKind::Leaf {
            return None;
        }
        self.child_names(path, true).into_iter().next()
    }

    /// Values visible at a leaf-list path, in display order.
    pub fn get_values(&self, path: &Path) -> Vec<String> {
        self.child_names(path, true)
    }

    /// Visible child names below `path`, in display order.
    pub fn children(&self, path: &Path, defaults: bool) -> Vec<String> {
        self.child_names(path, defaults)
    }

    /// Flattened visible paths below `path`, parents first, in display
    /// order. Value elements are included as terminal path elements.
    pub fn descendants(&self, path: &Path, defaults: bool) -> Vec<Path> {
        let mut out = Vec::new();
        self.collect_descendants(path, defaults, &mut out);
        out
    }

    fn collect_descendants(
        &self,
        path: &Path,
        defaults: bool,
        out: &mut Vec<Path>,
    ) {
        for name in self.child_names(path, defaults) {
            let child = path.join(&name);
            out.push(child.clone());
            self.collect_descendants(&child, defaults, out);
        }
    }

    // --- mutation primitives (schema checks are the session's job) ---

    /// Records a leaf value, replacing any previous one.
    pub fn set_leaf(&mut self, path: &Path, value: &str) {
        self.uncover(path);
        self.set_tree.set_value(path, value);
    }

    /// Appends a leaf-list value.
    pub fn add_value(&mut self, path: &Path, value: &str) {
        self.uncover(path);
        self.set_tree.set(&path.join(value));
    }

    /// Records the existence of a presence container, list entry or
    /// empty-typed leaf.
    pub fn add_node(&mut self, path: &Path) {
        self.uncover(path);
        self.set_tree.set(path);
    }

    /// Removes the subtree at `path` from the candidate. Returns whether
    /// anything visible was removed.
    pub fn delete(&mut self, path: &Path) -> bool {
        if !self.exists(path) {
            return false;
        }

        self.set_tree.delete(path);
        let schema = self.schema.clone();
        self.set_tree.prune(&path.parent(), |p| {
            keeps_presence(&schema, p)
        });

        if self.base.exists(path) && !self.covered(path) {
            self.del_tree.set(path);
            if let Some(marker) = self.del_tree.get_mut(path) {
                marker.retain_children(|_| false);
            }
        }
        true
    }

    // --- materialisation ---

    /// Materialises the candidate as a plain data tree. Defaults are
    /// included (flagged `DEFAULT`) only when requested.
    pub fn to_node(&self, defaults: bool) -> Node {
        self.subtree(&Path::root(), defaults)
    }

    /// Materialises the subtree at `path` (the returned node is named
    /// after the final path element).
    pub fn subtree(&self, path: &Path, defaults: bool) -> Node {
        let mut node = Node::new(path.last().unwrap_or(""));
        if let Some(src) = self.comment_source(path) {
            node.set_comment(src.comment().map(String::from));
        }
        if self.is_default(path) {
            node.set_flags(NodeFlags::DEFAULT);
        }
        for name in self.child_names(path, defaults) {
            node.push_child(self.subtree(&path.join(&name), defaults));
        }
        node
    }

    /// Renders the subtree at `path` in the configuration file grammar.
    pub fn show(&self, path: &Path, opts: ShowOpts) -> String {
        let render_opts = RenderOpts {
            hide_secrets: opts.hide_secrets,
        };
        let node = self.subtree(path, opts.show_defaults);
        if path.is_root() {
            return render::render(&node, Some(self.schema.root()), render_opts);
        }
        let Ok(resolved) = self.schema.resolve(path, View::Full) else {
            return String::new();
        };
        match resolved {
            // Containers and list entries render their children directly.
            Resolved::Node(snode)
                if matches!(snode.kind, NodeKind::Container) =>
            {
                render::render(&node, Some(snode), render_opts)
            }
            Resolved::ListEntry(snode, _) => {
                render::render(&node, Some(snode), render_opts)
            }
            // Lists, leaves and leaf-lists render as a child of a
            // synthetic wrapper so their own statement line appears.
            _ => {
                let snode = resolved.snode();
                let mut wrapper = Node::root();
                wrapper.push_child(node);
                let wrapper_schema =
                    SchemaNode::tree().with_child(snode.clone());
                render::render(&wrapper, Some(&wrapper_schema), render_opts)
            }
        }
    }

    // --- internals ---

    fn origin(&self, path: &Path) -> Option<Origin> {
        if path.is_root() {
            return Some(Origin::Base);
        }
        // A leaf's set value shadows any base value: once the session
        // wrote the leaf, only the written value exists.
        if let Ok(Resolved::Value(snode, _)) =
            self.schema.resolve(path, View::Full)
        {
            if snode.kind == NodeKind::Leaf
                && self.set_tree.exists(&path.parent())
            {
                return match self.set_tree.exists(path) {
                    true => Some(Origin::Set),
                    false => None,
                };
            }
        }
        if self.set_tree.exists(path) {
            return Some(Origin::Set);
        }
        if self.base.exists(path) && !self.covered(path) {
            return Some(Origin::Base);
        }
        if self.default_applies(path) {
            return Some(Origin::Default);
        }
        None
    }

    /// Whether a deletion marker covers the path.
    fn covered(&self, path: &Path) -> bool {
        let mut node = &self.del_tree;
        for elem in path.iter() {
            match node.child(elem) {
                Some(child) => {
                    if child.is_empty() {
                        return true;
                    }
                    node = child;
                }
                None => return false,
            }
        }
        false
    }

    /// Expands deletion markers so that a re-added path below a deleted
    /// subtree does not resurrect its siblings.
    fn uncover(&mut self, path: &Path) {
        for depth in 0..path.len() {
            let prefix = Path::new(path.elems()[..depth].to_vec());
            let covered = match self.del_tree.get(&prefix) {
                Some(node) => node.is_empty() && !prefix.is_root(),
                None => continue,
            };
            if !covered {
                continue;
            }
            // Push the marker one level down, onto every base sibling of
            // the re-added element.
            let keep = &path.elems()[depth];
            if let Some(base_node) = self.base.get(&prefix) {
                let siblings: Vec<String> = base_node
                    .children()
                    .iter()
                    .map(|child| child.name().to_owned())
                    .filter(|name| name != keep)
                    .collect();
                for name in siblings {
                    self.del_tree.set(&prefix.join(&name));
                }
            }
            // If nothing was pushed down, drop the marker entirely.
            if let Some(node) = self.del_tree.get(&prefix) {
                if node.is_empty() {
                    self.del_tree.delete(&prefix);
                    let schema = self.schema.clone();
                    self.del_tree
                        .prune(&prefix.parent(), |p| keeps_presence(&schema, p));
                }
            }
        }
    }

    fn default_applies(&self, path: &Path) -> bool {
        let Ok(resolved) = self.schema.resolve(path, View::Full) else {
            return false;
        };
        let (snode, value) = match resolved {
            Resolved::Node(snode) => (snode, None),
            Resolved::Value(snode, value) => (snode, Some(value)),
            Resolved::ListEntry(..) => return false,
        };
        if snode.kind != NodeKind::Leaf {
            return false;
        }
        let Some(default) = snode.default.as_deref() else {
            return false;
        };
        if let Some(value) = value {
            if value != default {
                return false;
            }
        }

        // The leaf itself must be absent from both delta and base.
        let leaf_path = match value {
            Some(_) => path.parent(),
            None => path.clone(),
        };
        if self.set_tree.exists(&leaf_path) {
            return false;
        }
        if self.base.exists(&leaf_path) && !self.covered(&leaf_path) {
            return false;
        }

        // Presence containers and list entries gate the defaults beneath
        // them; non-presence containers are transparent.
        match self.gating_ancestor(&leaf_path) {
            Some(ancestor) => {
                self.set_tree.exists(&ancestor)
                    || (self.base.exists(&ancestor)
                        && !self.covered(&ancestor))
            }
            None => true,
        }
    }

    /// Deepest strict ancestor whose concrete presence gates defaults:
    /// the nearest presence container or list entry above the path.
    fn gating_ancestor(&self, path: &Path) -> Option<Path> {
        let mut prefix = path.parent();
        while !prefix.is_root() {
            match self.schema.resolve(&prefix, View::Full) {
                Ok(Resolved::ListEntry(..)) => return Some(prefix),
                Ok(Resolved::Node(snode)) if snode.is_presence() => {
                    return Some(prefix);
                }
                _ => {}
            }
            prefix = prefix.parent();
        }
        None
    }

    fn comment_source(&self, path: &Path) -> Option<&Node> {
        self.set_tree
            .get(path)
            .filter(|node| node.comment().is_some())
            .or_else(|| self.base.get(path))
    }

    fn child_names(&self, path: &Path, defaults: bool) -> Vec<String> {
        let Ok(resolved) = self.schema.resolve(path, View::Full) else {
            return Vec::new();
        };
        let snode = resolved.snode();

        match (resolved, snode.kind) {
            // Interior node: schema children in declaration order.
            (Resolved::Node(_), NodeKind::Tree)
            | (Resolved::Node(_), NodeKind::Container)
            | (Resolved::ListEntry(..), NodeKind::List) => {
                let list_entry = matches!(resolved, Resolved::ListEntry(..));
                let mut out = Vec::new();
                for child in snode.children(View::Config) {
                    // List entries never carry their key leaf as a child.
                    if list_entry && snode.is_key(&child.name) {
                        continue;
                    }
                    let child_path = path.join(&child.name);
                    match child.kind {
                        NodeKind::List => {
                            if !self.entry_names(&child_path, child).is_empty()
                            {
                                out.push(child.name.clone());
                            }
                        }
                        _ => {
                            let visible = match self.origin(&child_path) {
                                Some(Origin::Default) => defaults,
                                Some(_) => true,
                                None => false,
                            };
                            if visible {
                                out.push(child.name.clone());
                            }
                        }
                    }
                }
                out
            }
            // List node: its entries.
            (Resolved::Node(_), NodeKind::List) => {
                self.entry_names(path, snode)
            }
            // Leaf / leaf-list node: its value(s).
            (Resolved::Node(_), NodeKind::Leaf) => {
                match self.leaf_value(path, snode, defaults) {
                    Some(value) => vec![value],
                    None => Vec::new(),
                }
            }
            (Resolved::Node(_), NodeKind::LeafList) => {
                self.entry_names(path, snode)
            }
            _ => Vec::new(),
        }
    }

    fn leaf_value(
        &self,
        path: &Path,
        snode: &SchemaNode,
        defaults: bool,
    ) -> Option<String> {
        if let Some(node) = self.set_tree.get(path) {
            if let Some(value) = node.value() {
                return Some(value.to_owned());
            }
            // Empty-typed leaves have no value child.
            return None;
        }
        if !self.covered(path) {
            if let Some(node) = self.base.get(path) {
                return node.value().map(String::from);
            }
        }
        if defaults && self.default_applies(path) {
            return snode.default.clone();
        }
        None
    }

    /// List or leaf-list entry names in display order.
    fn entry_names(&self, path: &Path, snode: &SchemaNode) -> Vec<String> {
        let set_entries: Vec<String> = self
            .set_tree
            .get(path)
            .map(|node| node.values().map(String::from).collect())
            .unwrap_or_default();
        let base_entries: Vec<String> = match self.covered(path) {
            true => Vec::new(),
            false => self
                .base
                .get(path)
                .map(|node| {
                    node.values()
                        .map(String::from)
                        .filter(|name| !self.covered(&path.join(name)))
                        .collect()
                })
                .unwrap_or_default(),
        };

        let mut out = base_entries;
        for name in set_entries {
            if !out.contains(&name) {
                out.push(name);
            }
        }
        if !snode.ordered_by_user {
            out.sort();
            out.dedup();
        }
        out
    }
}

// ===== impl XpathContext for Union =====

impl XpathContext for Union {
    fn step(&self, from: &Path, name: &str) -> Vec<Path> {
        let child = from.join(name);
        let Some(snode) = self.schema.descendant(&child, View::Full) else {
            return Vec::new();
        };

        // Stepping into a list yields its entries.
        if snode.kind == NodeKind::List
            && self
                .schema
                .resolve(&child, View::Full)
                .map(|resolved| matches!(resolved, Resolved::Node(_)))
                .unwrap_or(false)
        {
            return self
                .children(&child, false)
                .into_iter()
                .map(|entry| child.join(entry))
                .collect();
        }

        // A list key reads through to the entry name.
        if let Ok(Resolved::ListEntry(list, _)) =
            self.schema.resolve(from, View::Full)
        {
            if list.is_key(name) {
                return vec![child];
            }
        }

        if self.exists(&child) || self.is_default_visible(&child) {
            vec![child]
        } else {
            Vec::new()
        }
    }

    fn parent(&self, of: &Path) -> Option<Path> {
        if of.is_root() {
            return None;
        }
        let parent = of.parent();
        // Skip the synthetic list level above entries.
        match self.schema.resolve(of, View::Full) {
            Ok(Resolved::ListEntry(..)) => Some(parent.parent()),
            _ => Some(parent),
        }
    }

    fn string_value(&self, path: &Path) -> String {
        match self.schema.resolve(path, View::Full) {
            Ok(Resolved::Value(_, value)) => value.to_owned(),
            Ok(Resolved::ListEntry(_, key)) => {
                // Entries concatenate their descendants, keyed leaves
                // excluded; a bare entry reads as its key.
                let concat = self.concat_values(path);
                if concat.is_empty() {
                    key.to_owned()
                } else {
                    concat
                }
            }
            Ok(Resolved::Node(snode)) => match snode.kind {
                NodeKind::Leaf => {
                    // A key leaf reads through to the entry name.
                    if let Ok(Resolved::ListEntry(list, key)) =
                        self.schema.resolve(&path.parent(), View::Full)
                    {
                        if list.is_key(&snode.name) {
                            return key.to_owned();
                        }
                    }
                    self.get_value(path).unwrap_or_default()
                }
                NodeKind::LeafList => self.get_values(path).join(""),
                _ => self.concat_values(path),
            },
            Err(_) => String::new(),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        if Union::exists(self, path) {
            return true;
        }
        // Key leaves exist whenever their entry does.
        if let Ok(Resolved::Node(snode)) =
            self.schema.resolve(path, View::Full)
        {
            if snode.kind == NodeKind::Leaf {
                if let Ok(Resolved::ListEntry(list, _)) =
                    self.schema.resolve(&path.parent(), View::Full)
                {
                    return list.is_key(&snode.name)
                        && Union::exists(self, &path.parent());
                }
            }
        }
        self.is_default_visible(path)
    }
}

impl Union {
    fn is_default_visible(&self, path: &Path) -> bool {
        self.default_applies(path)
    }

    /// Concatenated descendant leaf values, in display order.
    fn concat_values(&self, path: &Path) -> String {
        let mut out = String::new();
        for descendant in self.descendants(path, true) {
            if let Ok(Resolved::Value(_, value)) =
                self.schema.resolve(&descendant, View::Full)
            {
                out.push_str(value);
            }
        }
        out
    }
}

// ===== helper functions =====

/// Whether an empty node at `path` still asserts configuration (presence
/// containers, list entries, empty-typed leaves).
fn keeps_presence(schema: &ModelSet, path: &Path) -> bool {
    match schema.resolve(path, View::Full) {
        Ok(Resolved::ListEntry(..)) => true,
        Ok(Resolved::Node(snode)) => match snode.kind {
            NodeKind::Container => snode.is_presence(),
            NodeKind::Leaf => snode
                .typ
                .as_ref()
                .map(|typ| typ.is_empty_type())
                .unwrap_or(false),
            _ => false,
        },
        _ => false,
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use cfgd_yang::DataType;

    use super::*;

    fn schema() -> Arc<ModelSet> {
        Arc::new(ModelSet::new(
            SchemaNode::tree()
                .with_child(
                    SchemaNode::container("interfaces").with_child(
                        SchemaNode::list("dataplane", "name")
                            .with_child(SchemaNode::leaf(
                                "name",
                                DataType::string(),
                            ))
                            .with_child(
                                SchemaNode::leaf(
                                    "mtu",
                                    DataType::uint_range(32, 68, 9000),
                                )
                                .with_default("1500"),
                            )
                            .with_child(
                                SchemaNode::leaf_list(
                                    "address",
                                    DataType::string(),
                                )
                                .with_ordered_by_user(),
                            ),
                    ),
                )
                .with_child(
                    SchemaNode::container("tunnels")
                        .with_presence()
                        .with_child(
                            SchemaNode::leaf(
                                "keepalive",
                                DataType::uint(8),
                            )
                            .with_default("10"),
                        ),
                ),
        ))
    }

    fn entry_path() -> Path {
        Path::new(["interfaces", "dataplane", "dp0s3"])
    }

    fn base() -> Arc<Node> {
        let mut base = Node::root();
        base.set_value(&entry_path().join("mtu"), "9000");
        base.set(&entry_path().join("address").join("192.0.2.1/24"));
        Arc::new(base)
    }

    #[test]
    fn overlay_precedence() {
        let mut union = Union::new(schema(), base());
        let mtu: Path = "/interfaces/dataplane/dp0s3/mtu".parse().unwrap();

        assert!(union.exists(&mtu));
        assert_eq!(union.get_value(&mtu).as_deref(), Some("9000"));
        assert_eq!(union.status(&mtu), Status::Unchanged);

        union.set_leaf(&mtu, "1400");
        assert_eq!(union.get_value(&mtu).as_deref(), Some("1400"));
        assert_eq!(union.status(&mtu), Status::Changed);
        assert!(!union.is_default(&mtu));
    }

    #[test]
    fn delete_reveals_default() {
        let mut union = Union::new(schema(), base());
        let mtu: Path = "/interfaces/dataplane/dp0s3/mtu".parse().unwrap();

        assert!(union.delete(&mtu));
        // The schema default shows through once the explicit value is
        // gone.
        assert!(union.is_default(&mtu));
        assert_eq!(
            union.get_value(&mtu).as_deref(),
            Some("1500")
        );
        assert!(union.exists(&mtu));
    }

    #[test]
    fn presence_gates_defaults() {
        let union = Union::new(schema(), base());
        let keepalive: Path = "/tunnels/keepalive".parse().unwrap();

        // The presence container is absent, so its default stays hidden.
        assert!(!union.exists(&keepalive));

        let mut union = union;
        union.add_node(&"/tunnels".parse().unwrap());
        assert!(union.exists(&keepalive));
        assert!(union.is_default(&keepalive));
    }

    #[test]
    fn delete_then_set_below() {
        let mut union = Union::new(schema(), base());
        let entry = entry_path();
        let mtu = entry.join("mtu");
        let addresses = entry.join("address");

        union.delete(&entry);
        assert!(!union.exists(&entry));

        // Re-adding one descendant must not resurrect its siblings.
        union.set_leaf(&mtu, "2000");
        assert!(union.exists(&mtu));
        assert!(union.get_values(&addresses).is_empty());
    }

    #[test]
    fn ordered_by_user_entries() {
        let mut union = Union::new(schema(), base());
        let addresses = entry_path().join("address");

        union.add_value(&addresses, "198.51.100.1/24");
        assert_eq!(
            union.get_values(&addresses),
            ["192.0.2.1/24", "198.51.100.1/24"]
        );

        // Replace wholesale: delete then re-add in a new order.
        union.delete(&addresses);
        union.add_value(&addresses, "198.51.100.1/24");
        union.add_value(&addresses, "192.0.2.1/24");
        assert_eq!(
            union.get_values(&addresses),
            ["198.51.100.1/24", "192.0.2.1/24"]
        );
    }

    #[test]
    fn changed_tracking() {
        let mut union = Union::new(schema(), base());
        assert!(!union.changed());

        let mtu: Path = "/interfaces/dataplane/dp0s3/mtu".parse().unwrap();
        union.set_leaf(&mtu, "9000");
        // Same value as base: dirty but not semantically changed.
        assert!(union.dirty());
        assert!(!union.changed());

        union.set_leaf(&mtu, "1400");
        assert!(union.changed());
    }
}
