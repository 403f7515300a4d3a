//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use cfgd_utils::path::Path;

bitflags! {
    /// Opaque data-node markers.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct NodeFlags: u8 {
        /// The node was materialised from a schema default.
        const DEFAULT = 0x01;
        /// The node was accepted verbatim without schema backing.
        const OPAQUE = 0x02;
    }
}

/// A configuration data node.
///
/// Leaves and leaf-list entries store their value as the name of a
/// synthetic child; list entries are addressed by their key value. A node
/// exclusively owns its children; parents are reached by walking from the
/// root, never through back-pointers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Node {
    name: String,
    #[serde(default, skip_serializing_if = "NodeFlags::is_empty")]
    flags: NodeFlags,
    /// Annotation rendered as a block comment ahead of the node on save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Node>,
}

// ===== impl Node =====

impl Node {
    pub fn new(name: impl Into<String>) -> Node {
        Node {
            name: name.into(),
            flags: NodeFlags::empty(),
            comment: None,
            children: Vec::new(),
        }
    }

    pub fn root() -> Node {
        Node::new("")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: NodeFlags) {
        self.flags = flags;
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }

    pub fn is_root(&self) -> bool {
        self.name.is_empty()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn is_leaf_like(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|child| child.name == name)
    }

    /// Position of the named child within the child list.
    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|child| child.name == name)
    }

    pub fn child_at_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.children[idx]
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// The value of a leaf node (the name of its only child).
    pub fn value(&self) -> Option<&str> {
        self.children.first().map(|child| child.name.as_str())
    }

    /// All values below this node, in stored order (leaf-list entries).
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|child| child.name.as_str())
    }

    pub fn get(&self, path: &Path) -> Option<&Node> {
        let mut node = self;
        for elem in path.iter() {
            node = node.child(elem)?;
        }
        Some(node)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Inserts every element of the path, creating intermediate nodes as
    /// needed, and returns whether the final element was newly created.
    pub fn set(&mut self, path: &Path) -> bool {
        let mut node = self;
        let mut created = false;
        for elem in path.iter() {
            let found = node.children.iter().position(|c| c.name == elem);
            let idx = match found {
                Some(idx) => idx,
                None => {
                    created = true;
                    node.children.push(Node::new(elem));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[idx];
        }
        created
    }

    /// Replaces the value child of the leaf at `path` (clearing any
    /// previous value first).
    pub fn set_value(&mut self, path: &Path, value: &str) {
        self.set(path);
        if let Some(node) = self.get_mut(path) {
            node.children.clear();
            node.children.push(Node::new(value));
        }
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Node> {
        let mut node = self;
        for elem in path.iter() {
            node = node.child_mut(elem)?;
        }
        Some(node)
    }

    /// Removes the subtree at `path`. Empty intermediate nodes are left in
    /// place; callers prune them when the schema says they carry no
    /// meaning. Returns whether anything was removed.
    pub fn delete(&mut self, path: &Path) -> bool {
        let Some(last) = path.last() else {
            let had_children = !self.children.is_empty();
            self.children.clear();
            return had_children;
        };
        let Some(parent) = self.get_mut(&path.parent()) else {
            return false;
        };
        let before = parent.children.len();
        parent.children.retain(|child| child.name != last);
        parent.children.len() != before
    }

    /// Removes childless interior nodes along `path`, bottom-up. Presence
    /// of meaning for empty nodes is a schema question, so callers pass
    /// `keep` to protect paths that must stay.
    pub fn prune(&mut self, path: &Path, keep: impl Fn(&Path) -> bool) {
        let mut path = path.clone();
        while !path.is_empty() {
            let Some(node) = self.get(&path) else {
                path.pop();
                continue;
            };
            if !node.children.is_empty() || keep(&path) {
                break;
            }
            self.delete(&path);
            path.pop();
        }
    }

    pub fn push_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn sort_children(&mut self) {
        self.children.sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub fn retain_children(&mut self, f: impl FnMut(&Node) -> bool) {
        self.children.retain(f);
    }

    /// Depth-first paths of every node in the subtree, parents first.
    pub fn paths(&self, base: &Path) -> Vec<Path> {
        let mut out = Vec::new();
        for child in &self.children {
            let path = base.join(&child.name);
            out.push(path.clone());
            out.extend(child.paths(&path));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let mut root = Node::root();
        root.set(&"/interfaces/dataplane/dp0s3/mtu/1500".parse().unwrap());
        assert!(root.exists(&"/interfaces/dataplane/dp0s3".parse().unwrap()));

        let mtu = root
            .get(&"/interfaces/dataplane/dp0s3/mtu".parse().unwrap())
            .unwrap();
        assert_eq!(mtu.value(), Some("1500"));

        root.set_value(
            &"/interfaces/dataplane/dp0s3/mtu".parse().unwrap(),
            "9000",
        );
        let mtu = root
            .get(&"/interfaces/dataplane/dp0s3/mtu".parse().unwrap())
            .unwrap();
        assert_eq!(mtu.value(), Some("9000"));
        assert_eq!(mtu.children().len(), 1);

        assert!(root.delete(&"/interfaces/dataplane".parse().unwrap()));
        assert!(!root.delete(&"/interfaces/dataplane".parse().unwrap()));
        assert!(root.exists(&"/interfaces".parse().unwrap()));
    }

    #[test]
    fn prune_empty_interior() {
        let mut root = Node::root();
        root.set(&"/a/b/c/v".parse().unwrap());
        root.delete(&"/a/b/c/v".parse().unwrap());
        root.prune(&"/a/b/c".parse().unwrap(), |_| false);
        assert!(!root.exists(&"/a".parse().unwrap()));

        root.set(&"/a/b/v".parse().unwrap());
        root.delete(&"/a/b/v".parse().unwrap());
        root.prune(&"/a/b".parse().unwrap(), |path| path.len() == 1);
        assert!(root.exists(&"/a".parse().unwrap()));
        assert!(!root.exists(&"/a/b".parse().unwrap()));
    }
}
