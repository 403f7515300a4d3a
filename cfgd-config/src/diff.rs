//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Change-set extraction for the commit planner, and textual diffs for
//! `compare` and the pretty-printer.

use similar::TextDiff;

use cfgd_utils::path::Path;
use cfgd_yang::{NodeKind, SchemaNode, View};

use crate::node::Node;
use crate::union::Union;

/// Observable change kind, as recorded by the commit audit trail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
}

/// One planned configuration change.
#[derive(Clone, Debug)]
pub struct Change {
    pub op: ChangeOp,
    /// Value-bearing path for leaves; node path otherwise.
    pub path: Path,
    /// Commit ordering priority, inherited from the nearest prioritised
    /// ancestor.
    pub priority: u32,
    /// Top-level schema node the change belongs to, for component
    /// dispatch.
    pub top_level: String,
    /// Module owning the top-level node.
    pub module: String,
    pub secret: bool,
    /// The change only materialises a schema default.
    pub is_default: bool,
}

// ===== global functions =====

/// Computes the candidate-vs-base change set, ordered for dispatch:
/// ascending priority, deletions ahead of additions within a priority
/// level, schema declaration order between siblings, and user order
/// within `ordered-by user` lists.
///
/// The comparison runs over the concrete trees (no defaults); a schema
/// default is reported only when its gating ancestor is newly created,
/// as an implicit-default write.
pub fn changes(union: &Union) -> Vec<Change> {
    let mut out = Vec::new();
    let schema = union.schema().clone();
    let base = union.base().clone();
    let candidate = union.to_node(false);

    for child in schema.root().children(View::Config) {
        let walk = Walk {
            union,
            top_level: &child.name,
            module: &child.module,
        };
        walk.walk(
            child,
            &Path::root(),
            child.ext.priority,
            base.child(&child.name),
            candidate.child(&child.name),
            false,
            &mut out,
        );
    }
    // Stable sort preserves the schema-order emission within each
    // (priority, op-rank) class.
    out.sort_by_key(|change| {
        (change.priority, (change.op != ChangeOp::Deleted) as u8)
    });
    out
}

/// Context diff between two renderings, in the shape the pretty-printer
/// expects.
pub fn context_diff(old: &str, new: &str, radius: usize) -> String {
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(radius)
        .header("running configuration", "candidate configuration")
        .to_string()
}

/// Full diff: every line, prefixed with its change marker.
pub fn full_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => "-",
            similar::ChangeTag::Insert => "+",
            similar::ChangeTag::Equal => " ",
        };
        out.push_str(sign);
        out.push_str(change.value());
        if !change.value().ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

// ===== helper structs =====

struct Walk<'a> {
    union: &'a Union,
    top_level: &'a str,
    module: &'a str,
}

impl<'a> Walk<'a> {
    fn change(
        &self,
        op: ChangeOp,
        path: Path,
        priority: u32,
        snode: &SchemaNode,
        is_default: bool,
    ) -> Change {
        Change {
            op,
            path,
            priority,
            top_level: self.top_level.to_owned(),
            module: self.module.to_owned(),
            secret: snode.ext.secret,
            is_default,
        }
    }

    fn effective_priority(&self, snode: &SchemaNode, inherited: u32) -> u32 {
        match snode.ext.priority {
            0 => inherited,
            priority => priority,
        }
    }

    /// Walks one schema child, comparing its base and candidate
    /// subtrees. `ancestor_added` is true below a presence container or
    /// list entry the candidate newly creates (gating new defaults).
    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        snode: &SchemaNode,
        parent: &Path,
        inherited: u32,
        base: Option<&Node>,
        cand: Option<&Node>,
        ancestor_added: bool,
        out: &mut Vec<Change>,
    ) {
        let path = parent.join(&snode.name);
        let priority = self.effective_priority(snode, inherited);

        match snode.kind {
            NodeKind::Container => {
                let mut added = ancestor_added;
                if snode.is_presence() {
                    match (base.is_some(), cand.is_some()) {
                        (false, true) => {
                            added = true;
                            out.push(self.change(
                                ChangeOp::Created,
                                path.clone(),
                                priority,
                                snode,
                                false,
                            ));
                        }
                        (true, false) => {
                            out.push(self.change(
                                ChangeOp::Deleted,
                                path.clone(),
                                priority,
                                snode,
                                false,
                            ));
                            // Descendant deletes collapse into this one.
                            return;
                        }
                        _ => {}
                    }
                }
                for child in snode.children(View::Config) {
                    self.walk(
                        child,
                        &path,
                        priority,
                        base.and_then(|node| node.child(&child.name)),
                        cand.and_then(|node| node.child(&child.name)),
                        added,
                        out,
                    );
                }
            }
            NodeKind::List => {
                let base_entries: Vec<&Node> = base
                    .map(|node| node.children().iter().collect())
                    .unwrap_or_default();
                let cand_entries: Vec<&Node> = cand
                    .map(|node| node.children().iter().collect())
                    .unwrap_or_default();

                for entry in &base_entries {
                    if !cand_entries
                        .iter()
                        .any(|cand| cand.name() == entry.name())
                    {
                        out.push(self.change(
                            ChangeOp::Deleted,
                            path.join(entry.name()),
                            priority,
                            snode,
                            false,
                        ));
                    }
                }
                for entry in &cand_entries {
                    let entry_path = path.join(entry.name());
                    let base_entry = base_entries
                        .iter()
                        .find(|base| base.name() == entry.name())
                        .copied();
                    let mut added = ancestor_added;
                    if base_entry.is_none() {
                        added = true;
                        out.push(self.change(
                            ChangeOp::Created,
                            entry_path.clone(),
                            priority,
                            snode,
                            false,
                        ));
                    }
                    for child in snode.children(View::Config) {
                        if snode.is_key(&child.name) {
                            continue;
                        }
                        self.walk(
                            child,
                            &entry_path,
                            priority,
                            base_entry
                                .and_then(|node| node.child(&child.name)),
                            entry.child(&child.name),
                            added,
                            out,
                        );
                    }
                }
            }
            NodeKind::Leaf => {
                let base_value = base.and_then(Node::value);
                let cand_value = cand.and_then(Node::value);
                match (base_value, cand_value) {
                    (None, Some(value)) => out.push(self.change(
                        ChangeOp::Created,
                        path.join(value),
                        priority,
                        snode,
                        false,
                    )),
                    (Some(_), None) => {
                        // A leaf going implicit-default again is still a
                        // delete of the explicit value.
                        out.push(self.change(
                            ChangeOp::Deleted,
                            path.clone(),
                            priority,
                            snode,
                            false,
                        ));
                    }
                    (Some(old), Some(new)) if old != new => {
                        out.push(self.change(
                            ChangeOp::Updated,
                            path.join(new),
                            priority,
                            snode,
                            false,
                        ));
                    }
                    (None, None) => {
                        // Empty-typed leaves have no value child.
                        match (base.is_some(), cand.is_some()) {
                            (false, true) => out.push(self.change(
                                ChangeOp::Created,
                                path.clone(),
                                priority,
                                snode,
                                false,
                            )),
                            (true, false) => out.push(self.change(
                                ChangeOp::Deleted,
                                path.clone(),
                                priority,
                                snode,
                                false,
                            )),
                            (false, false) => {
                                // Implicit default under a newly created
                                // gate: audited without its value.
                                if ancestor_added
                                    && self.union.is_default(&path)
                                {
                                    out.push(self.change(
                                        ChangeOp::Created,
                                        path.clone(),
                                        priority,
                                        snode,
                                        true,
                                    ));
                                }
                            }
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }
            NodeKind::LeafList => {
                let base_values: Vec<&str> =
                    base.map(|node| node.values().collect())
                        .unwrap_or_default();
                let cand_values: Vec<&str> =
                    cand.map(|node| node.values().collect())
                        .unwrap_or_default();
                for value in &base_values {
                    if !cand_values.contains(value) {
                        out.push(self.change(
                            ChangeOp::Deleted,
                            path.join(*value),
                            priority,
                            snode,
                            false,
                        ));
                    }
                }
                for value in &cand_values {
                    if !base_values.contains(value) {
                        out.push(self.change(
                            ChangeOp::Created,
                            path.join(*value),
                            priority,
                            snode,
                            false,
                        ));
                    }
                }
            }
            NodeKind::Tree | NodeKind::Rpc | NodeKind::Notification => {}
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cfgd_yang::{DataType, ExtensionSet, ModelSet};

    use super::*;

    fn schema() -> Arc<ModelSet> {
        Arc::new(ModelSet::new(
            SchemaNode::tree()
                .with_child(
                    SchemaNode::container("routing")
                        .with_module("cfgd-routing")
                        .with_ext(ExtensionSet::default().with_priority(400))
                        .with_child(SchemaNode::leaf(
                            "router-id",
                            DataType::string(),
                        )),
                )
                .with_child(
                    SchemaNode::container("interfaces")
                        .with_module("cfgd-interfaces")
                        .with_ext(ExtensionSet::default().with_priority(300))
                        .with_child(
                            SchemaNode::list("dataplane", "name")
                                .with_child(SchemaNode::leaf(
                                    "name",
                                    DataType::string(),
                                ))
                                .with_child(SchemaNode::leaf(
                                    "mtu",
                                    DataType::uint(32),
                                )),
                        ),
                )
                .with_child(
                    SchemaNode::container("tunnels")
                        .with_module("cfgd-interfaces")
                        .with_presence()
                        .with_child(
                            SchemaNode::leaf("keepalive", DataType::uint(8))
                                .with_default("10"),
                        ),
                ),
        ))
    }

    #[test]
    fn priority_and_op_ordering() {
        let mut base = Node::root();
        base.set_value(
            &Path::new(["interfaces", "dataplane", "dp0s3", "mtu"]),
            "1500",
        );
        let mut union = Union::new(schema(), Arc::new(base));

        union.set_leaf(&Path::new(["routing", "router-id"]), "10.0.0.1");
        union.delete(&Path::new(["interfaces", "dataplane", "dp0s3"]));
        union.add_node(&Path::new(["interfaces", "dataplane", "dp0s4"]));

        let changes = changes(&union);
        let summary: Vec<(ChangeOp, String, u32)> = changes
            .iter()
            .map(|c| (c.op, c.path.to_string(), c.priority))
            .collect();

        // Interfaces (300) ahead of routing (400); the delete ahead of
        // the create within the same priority.
        assert_eq!(
            summary,
            vec![
                (
                    ChangeOp::Deleted,
                    "/interfaces/dataplane/dp0s3".to_owned(),
                    300
                ),
                (
                    ChangeOp::Created,
                    "/interfaces/dataplane/dp0s4".to_owned(),
                    300
                ),
                (
                    ChangeOp::Created,
                    "/routing/router-id/10.0.0.1".to_owned(),
                    400
                ),
            ]
        );
    }

    #[test]
    fn unchanged_defaults_stay_quiet() {
        let mut union = Union::new(schema(), Arc::new(Node::root()));

        // Creating the presence container materialises its default,
        // which is reported exactly once, as an implicit write.
        union.add_node(&Path::new(["tunnels"]));
        let first = changes(&union);
        let summary: Vec<(ChangeOp, String, bool)> = first
            .iter()
            .map(|c| (c.op, c.path.to_string(), c.is_default))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChangeOp::Created, "/tunnels".to_owned(), false),
                (ChangeOp::Created, "/tunnels/keepalive".to_owned(), true),
            ]
        );

        // Once committed, an untouched candidate reports no changes.
        let committed = Arc::new(union.to_node(false));
        let union = Union::new(schema(), committed);
        assert!(changes(&union).is_empty());
    }

    #[test]
    fn context_diff_output() {
        let old = "system {\n    host-name r1\n}\n";
        let new = "system {\n    host-name r2\n}\n";
        let diff = context_diff(old, new, 3);
        assert!(diff.contains("-    host-name r1"));
        assert!(diff.contains("+    host-name r2"));
    }
}
