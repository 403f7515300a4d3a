//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Schema-directed conversion of a raw parsed tree into edit operations.
//!
//! The planner is pure: it validates names and values against the schema
//! and emits the operations a merge would perform, in input order, along
//! with warnings for content it had to skip. The session applies the
//! operations after running authorisation and value normalisation on
//! them.

use cfgd_utils::mgmt::{MgmtError, MgmtErrorList};
use cfgd_utils::path::Path;
use cfgd_yang::{ModelSet, NodeKind, View};

use crate::node::Node;

/// One planned edit, in input order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EditOp {
    /// Set a leaf value (replacing any current value).
    SetLeaf { path: Path, value: String },
    /// Append a leaf-list value.
    AddValue { path: Path, value: String },
    /// Record existence of a presence container, list entry or
    /// empty-typed leaf.
    AddNode { path: Path },
}

/// A merge plan: ordered operations plus the warnings produced while
/// planning.
#[derive(Clone, Debug, Default)]
pub struct MergePlan {
    pub ops: Vec<EditOp>,
    pub warnings: MgmtErrorList,
}

// ===== impl EditOp =====

impl EditOp {
    /// The full data path of the edit, value element included.
    pub fn full_path(&self) -> Path {
        match self {
            EditOp::SetLeaf { path, value }
            | EditOp::AddValue { path, value } => path.join(value),
            EditOp::AddNode { path } => path.clone(),
        }
    }
}

// ===== global functions =====

/// Plans the merge of a raw (schema-free) tree into a candidate.
pub fn plan_merge(schema: &ModelSet, raw: &Node) -> MergePlan {
    let mut plan = MergePlan::default();
    walk(schema.root(), raw, &Path::root(), &mut plan);
    plan
}

// ===== helper functions =====

fn walk(
    snode: &cfgd_yang::SchemaNode,
    raw: &Node,
    path: &Path,
    plan: &mut MergePlan,
) {
    for child in raw.children() {
        let name = child.name();
        let child_path = path.join(name);
        let Some(child_schema) = snode.child(name, View::Config) else {
            plan.warnings.push(MgmtError::unknown_element(
                &child_path,
                name,
                unknown_message(&child_path, name),
            ));
            continue;
        };

        match child_schema.kind {
            NodeKind::Container => {
                if child_schema.is_presence() {
                    plan.ops.push(EditOp::AddNode {
                        path: child_path.clone(),
                    });
                }
                walk(child_schema, child, &child_path, plan);
            }
            NodeKind::List => {
                for entry in child.children() {
                    let entry_path = child_path.join(entry.name());
                    if let Some(key_leaf) = child_schema.key_leaf() {
                        if let Some(typ) = &key_leaf.typ {
                            if let Err(message) = typ.check(entry.name()) {
                                plan.warnings.push(
                                    MgmtError::invalid_value(
                                        &entry_path,
                                        message,
                                    ),
                                );
                                continue;
                            }
                        }
                    }
                    plan.ops.push(EditOp::AddNode {
                        path: entry_path.clone(),
                    });
                    walk_entry(child_schema, entry, &entry_path, plan);
                }
            }
            NodeKind::Leaf => {
                let is_empty_type = child_schema
                    .typ
                    .as_ref()
                    .map(|typ| typ.is_empty_type())
                    .unwrap_or(false);
                if is_empty_type {
                    plan.ops.push(EditOp::AddNode {
                        path: child_path.clone(),
                    });
                    continue;
                }
                let Some(value) = child.value() else {
                    plan.warnings.push(MgmtError::invalid_value(
                        &child_path,
                        format!("Node '{name}' requires a value"),
                    ));
                    continue;
                };
                if let Some(typ) = &child_schema.typ {
                    if let Err(message) = typ.check(value) {
                        plan.warnings.push(MgmtError::invalid_value(
                            &child_path.join(value),
                            message,
                        ));
                        continue;
                    }
                }
                plan.ops.push(EditOp::SetLeaf {
                    path: child_path,
                    value: value.to_owned(),
                });
            }
            NodeKind::LeafList => {
                for value in child.values() {
                    if let Some(typ) = &child_schema.typ {
                        if let Err(message) = typ.check(value) {
                            plan.warnings.push(MgmtError::invalid_value(
                                &child_path.join(value),
                                message,
                            ));
                            continue;
                        }
                    }
                    plan.ops.push(EditOp::AddValue {
                        path: child_path.clone(),
                        value: value.to_owned(),
                    });
                }
            }
            NodeKind::Tree | NodeKind::Rpc | NodeKind::Notification => {}
        }
    }
}

/// List entries ignore a redundant key leaf in the input and descend
/// through the list schema node.
fn walk_entry(
    list_schema: &cfgd_yang::SchemaNode,
    entry: &Node,
    entry_path: &Path,
    plan: &mut MergePlan,
) {
    let mut filtered = Node::new(entry.name());
    for child in entry.children() {
        if list_schema.is_key(child.name()) {
            continue;
        }
        filtered.push_child(child.clone());
    }
    walk(list_schema, &filtered, entry_path, plan);
}

/// Distinct unknown-element messages for top-level, one-level-down and
/// deeper failures.
pub fn unknown_message(path: &Path, element: &str) -> String {
    match path.len() {
        1 => format!("Invalid top-level element: '{element}'"),
        2 => format!(
            "Configuration path '{}' contains no element '{element}'",
            path.parent()
        ),
        _ => format!(
            "Configuration path '{}' is not valid: unknown element \
             '{element}'",
            path.parent()
        ),
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use cfgd_utils::mgmt::ErrTag;
    use cfgd_yang::{DataType, SchemaNode};

    use super::*;
    use crate::parser;

    fn schema() -> ModelSet {
        ModelSet::new(
            SchemaNode::tree()
                .with_child(
                    SchemaNode::container("system")
                        .with_child(SchemaNode::leaf(
                            "host-name",
                            DataType::string(),
                        ))
                        .with_child(SchemaNode::leaf(
                            "mtu",
                            DataType::uint_range(32, 68, 9000),
                        )),
                )
                .with_child(
                    SchemaNode::leaf_list("dns", DataType::string())
                        .with_ordered_by_user(),
                ),
        )
    }

    #[test]
    fn plan_in_input_order() {
        let input = "\
dns 10.0.0.2
dns 10.0.0.1
system {
    host-name r1
}
";
        let file = parser::parse(input).unwrap();
        let plan = plan_merge(&schema(), &file.root);
        assert!(plan.warnings.is_empty());
        assert_eq!(
            plan.ops,
            vec![
                EditOp::AddValue {
                    path: Path::new(["dns"]),
                    value: "10.0.0.2".to_owned()
                },
                EditOp::AddValue {
                    path: Path::new(["dns"]),
                    value: "10.0.0.1".to_owned()
                },
                EditOp::SetLeaf {
                    path: Path::new(["system", "host-name"]),
                    value: "r1".to_owned()
                },
            ]
        );
    }

    #[test]
    fn plan_warnings() {
        let input = "\
bogus-top enabled
system {
    mtu 20000
}
";
        let file = parser::parse(input).unwrap();
        let plan = plan_merge(&schema(), &file.root);
        assert_eq!(plan.ops, vec![]);

        let tags: Vec<_> =
            plan.warnings.iter().map(|error| error.tag).collect();
        assert_eq!(tags, [ErrTag::UnknownElement, ErrTag::InvalidValue]);
        assert_eq!(
            plan.warnings.iter().next().unwrap().message.as_deref(),
            Some("Invalid top-level element: 'bogus-top'")
        );
    }
}
