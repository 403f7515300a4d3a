//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Schema validation of a candidate configuration: `must`/`when`
//! expressions, mandatory nodes, `unique` clauses, leafref targets and
//! list cardinality. The pass never aborts early; every failure is
//! collected into the returned list.

use std::collections::BTreeMap;

use cfgd_utils::mgmt::{MgmtError, MgmtErrorList};
use cfgd_utils::path::Path;
use cfgd_yang::xpath;
use cfgd_yang::{DataType, NodeKind, SchemaNode, View};

use crate::union::Union;

// ===== global functions =====

/// Runs the full validation pass against the candidate.
pub fn validate(union: &Union) -> MgmtErrorList {
    let mut errors = MgmtErrorList::new();
    let schema = union.schema().clone();
    let root = schema.root();
    for child in root.children(View::Config) {
        validate_child(union, child, &Path::root(), true, &mut errors);
    }
    errors
}

// ===== helper functions =====

/// Validates the child schema node `snode` under the data path `parent`.
/// `ctx` is true when the enclosing context concretely exists (the root,
/// a present presence-container, or a list entry).
fn validate_child(
    union: &Union,
    snode: &SchemaNode,
    parent: &Path,
    ctx: bool,
    errors: &mut MgmtErrorList,
) {
    let path = parent.join(&snode.name);

    match snode.kind {
        NodeKind::Container => {
            let exists = union.exists(&path);
            if exists {
                check_constraints(union, snode, &path, errors);
            }
            // Non-presence containers are transparent contexts; presence
            // containers gate their descendants.
            let child_ctx = match snode.is_presence() {
                true => exists,
                false => ctx,
            };
            if exists || (!snode.is_presence() && child_ctx) {
                for child in snode.children(View::Config) {
                    validate_child(union, child, &path, child_ctx, errors);
                }
            }
        }
        NodeKind::List => {
            let entries = union.children(&path, false);
            if ctx {
                check_cardinality(snode, &path, entries.len(), errors);
            }
            check_unique(union, snode, &path, &entries, errors);
            for entry in &entries {
                let entry_path = path.join(entry);
                check_constraints(union, snode, &entry_path, errors);
                check_key_value(union, snode, &entry_path, entry, errors);
                for child in snode.children(View::Config) {
                    if snode.is_key(&child.name) {
                        continue;
                    }
                    validate_child(union, child, &entry_path, true, errors);
                }
            }
        }
        NodeKind::Leaf => {
            let exists = union.exists(&path);
            if exists {
                check_constraints(union, snode, &path, errors);
                check_leafref(union, snode, &path, errors);
            } else if ctx && snode.mandatory {
                errors.push(MgmtError::missing_mandatory(
                    parent,
                    &snode.name,
                ));
            }
        }
        NodeKind::LeafList => {
            let values = union.get_values(&path);
            if ctx {
                check_cardinality(snode, &path, values.len(), errors);
            }
            if !values.is_empty() {
                check_constraints(union, snode, &path, errors);
            }
            check_leafref(union, snode, &path, errors);
        }
        NodeKind::Tree | NodeKind::Rpc | NodeKind::Notification => {}
    }
}

/// `must` and `when` checks for an existing node.
fn check_constraints(
    union: &Union,
    snode: &SchemaNode,
    path: &Path,
    errors: &mut MgmtErrorList,
) {
    for must in &snode.musts {
        match xpath::eval_boolean(&must.xpath, union, path) {
            Ok(true) => {}
            Ok(false) => {
                errors.push(MgmtError::must_violation(
                    path,
                    &must.xpath,
                    must.message.as_deref(),
                ));
            }
            Err(error) => {
                errors.push(
                    MgmtError::operation_failed(error.to_string())
                        .with_path(path),
                );
            }
        }
    }
    if let Some(when) = &snode.when {
        match xpath::eval_boolean(when, union, path) {
            Ok(true) => {}
            Ok(false) => {
                errors.push(MgmtError::must_violation(
                    path,
                    when,
                    Some(&format!("'when' condition is false: '{when}'")),
                ));
            }
            Err(error) => {
                errors.push(
                    MgmtError::operation_failed(error.to_string())
                        .with_path(path),
                );
            }
        }
    }
}

fn check_cardinality(
    snode: &SchemaNode,
    path: &Path,
    count: usize,
    errors: &mut MgmtErrorList,
) {
    if let Some(min) = snode.min_elements {
        if (count as u64) < min {
            errors.push(MgmtError::invalid_value(
                path,
                format!("Must have at least {min} element(s)"),
            ));
        }
    }
    if let Some(max) = snode.max_elements {
        if (count as u64) > max {
            errors.push(MgmtError::invalid_value(
                path,
                format!("Must have at most {max} element(s)"),
            ));
        }
    }
}

/// List key values are re-checked against the key leaf type, since load
/// and merge accept keys straight from input files.
fn check_key_value(
    _union: &Union,
    snode: &SchemaNode,
    entry_path: &Path,
    entry: &str,
    errors: &mut MgmtErrorList,
) {
    if let Some(key_leaf) = snode.key_leaf() {
        if let Some(typ) = &key_leaf.typ {
            if let Err(message) = typ.check(entry) {
                errors.push(MgmtError::invalid_value(entry_path, message));
            }
        }
    }
}

fn check_unique(
    union: &Union,
    snode: &SchemaNode,
    path: &Path,
    entries: &[String],
    errors: &mut MgmtErrorList,
) {
    for unique in &snode.uniques {
        let mut seen: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
        for entry in entries {
            let entry_path = path.join(entry);
            let tuple: Option<Vec<String>> = unique
                .iter()
                .map(|leaf| union.get_value(&entry_path.join(leaf)))
                .collect();
            // Entries missing any of the leaves do not participate.
            if let Some(tuple) = tuple {
                seen.entry(tuple).or_default().push(entry.clone());
            }
        }
        for (_, offenders) in seen {
            if offenders.len() > 1 {
                errors.push(MgmtError::unique_violation(path, &offenders));
            }
        }
    }
}

fn check_leafref(
    union: &Union,
    snode: &SchemaNode,
    path: &Path,
    errors: &mut MgmtErrorList,
) {
    let Some(DataType::Leafref { path: target }) = &snode.typ else {
        return;
    };

    let values = match snode.kind {
        NodeKind::Leaf => match union.get_value(path) {
            Some(value) => vec![value],
            None => return,
        },
        _ => union.get_values(path),
    };
    if values.is_empty() {
        return;
    }

    use cfgd_yang::xpath::XpathContext;
    let allowed: Vec<String> = match xpath::eval_path(target, union, path) {
        Ok(nodes) => nodes
            .iter()
            .map(|node| union.string_value(node))
            .collect(),
        Err(error) => {
            errors.push(
                MgmtError::operation_failed(error.to_string())
                    .with_path(path),
            );
            return;
        }
    };

    for value in values {
        if !allowed.contains(&value) {
            errors.push(MgmtError::invalid_value(
                &path.join(&value),
                format!(
                    "Value '{value}' does not match any target of \
                     leafref path '{target}'"
                ),
            ));
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cfgd_utils::mgmt::ErrTag;
    use cfgd_yang::ModelSet;

    use super::*;
    use crate::node::Node;

    fn union(schema: ModelSet) -> Union {
        Union::new(Arc::new(schema), Arc::new(Node::root()))
    }

    #[test]
    fn must_violation_on_commit_shape() {
        // container c { presence; leaf v; must "not(contains(., 'foo'))" }
        let schema = ModelSet::new(
            SchemaNode::tree().with_child(
                SchemaNode::container("c")
                    .with_presence()
                    .with_must("not(contains(., 'foo'))")
                    .with_child(SchemaNode::leaf("v", DataType::string())),
            ),
        );
        let mut union = union(schema);
        union.add_node(&Path::new(["c"]));
        union.set_leaf(&Path::new(["c", "v"]), "foo");

        let errors = validate(&union);
        assert_eq!(errors.len(), 1);
        let error = errors.iter().next().unwrap();
        assert_eq!(error.tag, ErrTag::MustViolation);
        assert_eq!(error.path.as_deref(), Some("/c"));
        assert_eq!(
            error.message.as_deref(),
            Some("'must' condition is false: 'not(contains(., 'foo'))'")
        );

        // The other value passes.
        union.set_leaf(&Path::new(["c", "v"]), "bar");
        assert!(validate(&union).is_empty());
    }

    #[test]
    fn mandatory_under_presence() {
        let schema = ModelSet::new(
            SchemaNode::tree().with_child(
                SchemaNode::container("tunnel")
                    .with_presence()
                    .with_child(
                        SchemaNode::leaf("local-ip", DataType::string())
                            .with_mandatory(),
                    ),
            ),
        );
        let mut union = union(schema);

        // Absent presence container: nothing to complain about.
        assert!(validate(&union).is_empty());

        union.add_node(&Path::new(["tunnel"]));
        let errors = validate(&union);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.iter().next().unwrap().tag,
            ErrTag::MissingMandatoryNode
        );

        union.set_leaf(&Path::new(["tunnel", "local-ip"]), "192.0.2.1");
        assert!(validate(&union).is_empty());
    }

    #[test]
    fn unique_and_cardinality() {
        let schema = ModelSet::new(
            SchemaNode::tree().with_child(
                SchemaNode::list("server", "name")
                    .with_min_elements(1)
                    .with_unique(["port"])
                    .with_child(SchemaNode::leaf("name", DataType::string()))
                    .with_child(SchemaNode::leaf("port", DataType::uint(16))),
            ),
        );
        let mut union = union(schema);

        let errors = validate(&union);
        assert!(errors.iter().any(|e| e.tag == ErrTag::InvalidValue));

        union.add_node(&Path::new(["server", "a"]));
        union.set_leaf(&Path::new(["server", "a", "port"]), "80");
        union.add_node(&Path::new(["server", "b"]));
        union.set_leaf(&Path::new(["server", "b", "port"]), "80");

        let errors = validate(&union);
        assert!(errors.iter().any(|e| e.tag == ErrTag::UniqueViolation));

        union.set_leaf(&Path::new(["server", "b", "port"]), "443");
        assert!(validate(&union).is_empty());
    }

    #[test]
    fn leafref_targets() {
        let schema = ModelSet::new(
            SchemaNode::tree()
                .with_child(
                    SchemaNode::list("groups", "name").with_child(
                        SchemaNode::leaf("name", DataType::string()),
                    ),
                )
                .with_child(SchemaNode::leaf(
                    "default-group",
                    DataType::leafref("/groups/name"),
                )),
        );
        let mut union = union(schema);
        union.add_node(&Path::new(["groups", "admins"]));
        union.set_leaf(&Path::new(["default-group"]), "admins");
        assert!(validate(&union).is_empty());

        union.set_leaf(&Path::new(["default-group"]), "nosuch");
        let errors = validate(&union);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.iter().next().unwrap().tag, ErrTag::InvalidValue);
    }
}
