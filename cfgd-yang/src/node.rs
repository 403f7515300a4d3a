//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

use cfgd_utils::path::Path;

use crate::ext::ExtensionSet;
use crate::types::DataType;

/// Schema node tag. Every schema operation switches on this.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// The synthetic root above all top-level module nodes.
    Tree,
    Container,
    List,
    Leaf,
    LeafList,
    Rpc,
    Notification,
}

/// Schema view selector: configuration-only or config+state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum View {
    Config,
    Full,
}

/// A `must` expression with its optional schema-declared error message.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Must {
    pub xpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One compiled schema node.
///
/// The tree is immutable after startup; the whole daemon holds it behind a
/// shared reference.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SchemaNode {
    pub name: String,
    pub kind: NodeKind,
    /// Module the node was defined in; set on top-level nodes and RPCs.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module: String,
    #[serde(default = "default_true")]
    pub config: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub presence: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ordered_by_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_elements: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_elements: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub musts: Vec<Must>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uniques: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "is_default_ext")]
    pub ext: ExtensionSet,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SchemaNode>,
}

/// Role a data-path token plays against the schema.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepRole {
    /// The token names a schema child.
    Name,
    /// The token is a list-entry key value.
    KeyValue,
    /// The token is a leaf or leaf-list value.
    Value,
}

/// One resolved data-path token.
#[derive(Clone, Copy, Debug)]
pub struct Step<'a> {
    pub snode: &'a SchemaNode,
    pub role: StepRole,
    pub token: &'a str,
}

/// What a data path addresses once resolved against the schema.
#[derive(Clone, Copy, Debug)]
pub enum Resolved<'a> {
    /// The schema node itself (container, list without entry, leaf
    /// without value, ...).
    Node(&'a SchemaNode),
    /// A list entry, with its key value token.
    ListEntry(&'a SchemaNode, &'a str),
    /// A leaf or leaf-list value position.
    Value(&'a SchemaNode, &'a str),
}

/// Schema lookup failure, pointing at the offending path element.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolveError {
    /// Index of the failing element within the path.
    pub depth: usize,
    pub element: String,
}

fn default_true() -> bool {
    true
}

fn is_default_ext(ext: &ExtensionSet) -> bool {
    *ext == ExtensionSet::default()
}

// ===== impl SchemaNode =====

impl SchemaNode {
    fn new(name: impl Into<String>, kind: NodeKind) -> SchemaNode {
        SchemaNode {
            name: name.into(),
            kind,
            module: String::new(),
            config: true,
            presence: false,
            keys: Vec::new(),
            ordered_by_user: false,
            typ: None,
            default: None,
            mandatory: false,
            min_elements: None,
            max_elements: None,
            musts: Vec::new(),
            when: None,
            uniques: Vec::new(),
            ext: ExtensionSet::default(),
            children: Vec::new(),
        }
    }

    pub fn tree() -> SchemaNode {
        SchemaNode::new("", NodeKind::Tree)
    }

    pub fn container(name: impl Into<String>) -> SchemaNode {
        SchemaNode::new(name, NodeKind::Container)
    }

    pub fn list(name: impl Into<String>, key: impl Into<String>) -> SchemaNode {
        let mut snode = SchemaNode::new(name, NodeKind::List);
        snode.keys = vec![key.into()];
        snode
    }

    pub fn leaf(name: impl Into<String>, typ: DataType) -> SchemaNode {
        let mut snode = SchemaNode::new(name, NodeKind::Leaf);
        snode.typ = Some(typ);
        snode
    }

    pub fn leaf_list(name: impl Into<String>, typ: DataType) -> SchemaNode {
        let mut snode = SchemaNode::new(name, NodeKind::LeafList);
        snode.typ = Some(typ);
        snode
    }

    pub fn rpc(name: impl Into<String>) -> SchemaNode {
        SchemaNode::new(name, NodeKind::Rpc)
    }

    // --- builder-style modifiers, used by the schema loader tests and the
    // compiled-schema fixtures ---

    #[must_use]
    pub fn with_child(mut self, child: SchemaNode) -> SchemaNode {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> SchemaNode {
        self.module = module.into();
        self
    }

    #[must_use]
    pub fn with_presence(mut self) -> SchemaNode {
        self.presence = true;
        self
    }

    #[must_use]
    pub fn with_state(mut self) -> SchemaNode {
        self.config = false;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<String>) -> SchemaNode {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_mandatory(mut self) -> SchemaNode {
        self.mandatory = true;
        self
    }

    #[must_use]
    pub fn with_ordered_by_user(mut self) -> SchemaNode {
        self.ordered_by_user = true;
        self
    }

    #[must_use]
    pub fn with_min_elements(mut self, min: u64) -> SchemaNode {
        self.min_elements = Some(min);
        self
    }

    #[must_use]
    pub fn with_max_elements(mut self, max: u64) -> SchemaNode {
        self.max_elements = Some(max);
        self
    }

    #[must_use]
    pub fn with_must(mut self, xpath: impl Into<String>) -> SchemaNode {
        self.musts.push(Must {
            xpath: xpath.into(),
            message: None,
        });
        self
    }

    #[must_use]
    pub fn with_must_message(
        mut self,
        xpath: impl Into<String>,
        message: impl Into<String>,
    ) -> SchemaNode {
        self.musts.push(Must {
            xpath: xpath.into(),
            message: Some(message.into()),
        });
        self
    }

    #[must_use]
    pub fn with_when(mut self, xpath: impl Into<String>) -> SchemaNode {
        self.when = Some(xpath.into());
        self
    }

    #[must_use]
    pub fn with_unique<I, S>(mut self, leaves: I) -> SchemaNode
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uniques
            .push(leaves.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_ext(mut self, ext: ExtensionSet) -> SchemaNode {
        self.ext = ext;
        self
    }

    // --- accessors ---

    pub fn is_config(&self) -> bool {
        self.config
    }

    pub fn is_presence(&self) -> bool {
        self.kind == NodeKind::Container && self.presence
    }

    pub fn has_value(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf | NodeKind::LeafList)
    }

    /// Visible children under the given view, in declaration order.
    pub fn children(
        &self,
        view: View,
    ) -> impl Iterator<Item = &SchemaNode> + '_ {
        self.children
            .iter()
            .filter(move |child| view == View::Full || child.config)
    }

    pub fn child(&self, name: &str, view: View) -> Option<&SchemaNode> {
        self.children(view).find(|child| child.name == name)
    }

    /// The leaf schema of the first list key.
    pub fn key_leaf(&self) -> Option<&SchemaNode> {
        let key = self.keys.first()?;
        self.children.iter().find(|child| &child.name == key)
    }

    /// Whether the named child is one of this list's keys.
    pub fn is_key(&self, name: &str) -> bool {
        self.keys.iter().any(|key| key == name)
    }

    /// Resolves a data path into per-token steps, or points at the first
    /// token the schema does not admit.
    pub fn trace<'a>(
        &'a self,
        path: &'a Path,
        view: View,
    ) -> Result<Vec<Step<'a>>, ResolveError> {
        let mut steps = Vec::with_capacity(path.len());
        let mut snode = self;
        // Tracks whether a list node still expects its key-value token.
        let mut entered = snode.kind != NodeKind::List;

        for (depth, token) in path.iter().enumerate() {
            let err = || ResolveError {
                depth,
                element: token.to_owned(),
            };

            if !entered {
                // Key value of the list entry.
                steps.push(Step {
                    snode,
                    role: StepRole::KeyValue,
                    token,
                });
                entered = true;
                continue;
            }

            match snode.kind {
                NodeKind::Leaf | NodeKind::LeafList => {
                    // Only a single trailing value token is admitted.
                    if depth + 1 != path.len() {
                        return Err(err());
                    }
                    steps.push(Step {
                        snode,
                        role: StepRole::Value,
                        token,
                    });
                }
                _ => {
                    let child = snode.child(token, view).ok_or_else(err)?;
                    snode = child;
                    entered = snode.kind != NodeKind::List;
                    steps.push(Step {
                        snode,
                        role: StepRole::Name,
                        token,
                    });
                }
            }
        }

        Ok(steps)
    }

    /// Resolves a data path to what it addresses.
    pub fn resolve<'a>(
        &'a self,
        path: &'a Path,
        view: View,
    ) -> Result<Resolved<'a>, ResolveError> {
        let steps = self.trace(path, view)?;
        Ok(match steps.last() {
            None => Resolved::Node(self),
            Some(step) => match step.role {
                StepRole::Name => Resolved::Node(step.snode),
                StepRole::KeyValue => Resolved::ListEntry(step.snode, step.token),
                StepRole::Value => Resolved::Value(step.snode, step.token),
            },
        })
    }

    /// Schema lookup tolerant of a trailing value element.
    pub fn descendant(&self, path: &Path, view: View) -> Option<&SchemaNode> {
        let mut snode = self;
        let mut entered = snode.kind != NodeKind::List;

        for (depth, token) in path.iter().enumerate() {
            if !entered {
                entered = true;
                continue;
            }

            match snode.kind {
                NodeKind::Leaf | NodeKind::LeafList => {
                    if depth + 1 != path.len() {
                        return None;
                    }
                }
                _ => {
                    snode = snode.child(token, view)?;
                    entered = snode.kind != NodeKind::List;
                }
            }
        }

        Some(snode)
    }
}

// ===== impl Resolved =====

impl<'a> Resolved<'a> {
    pub fn snode(&self) -> &'a SchemaNode {
        match self {
            Resolved::Node(snode)
            | Resolved::ListEntry(snode, _)
            | Resolved::Value(snode, _) => snode,
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> SchemaNode {
        SchemaNode::tree().with_child(
            SchemaNode::container("interfaces").with_child(
                SchemaNode::list("dataplane", "name")
                    .with_child(SchemaNode::leaf("name", DataType::string()))
                    .with_child(SchemaNode::leaf(
                        "mtu",
                        DataType::uint_range(32, 68, 9000),
                    ))
                    .with_child(
                        SchemaNode::leaf("oper-status", DataType::string())
                            .with_state(),
                    ),
            ),
        )
    }

    #[test]
    fn resolve_roles() {
        let root = test_schema();

        let path: Path = "/interfaces/dataplane/dp0s3/mtu/1500".parse().unwrap();
        let steps = root.trace(&path, View::Config).unwrap();
        let roles: Vec<_> = steps.iter().map(|s| s.role).collect();
        assert_eq!(
            roles,
            [
                StepRole::Name,
                StepRole::Name,
                StepRole::KeyValue,
                StepRole::Name,
                StepRole::Value
            ]
        );

        match root.resolve(&path, View::Config).unwrap() {
            Resolved::Value(snode, value) => {
                assert_eq!(snode.name, "mtu");
                assert_eq!(value, "1500");
            }
            other => panic!("unexpected resolution: {other:?}"),
        }

        let path: Path = "/interfaces/dataplane/dp0s3".parse().unwrap();
        assert!(matches!(
            root.resolve(&path, View::Config).unwrap(),
            Resolved::ListEntry(_, "dp0s3")
        ));
    }

    #[test]
    fn resolve_errors() {
        let root = test_schema();

        let path: Path = "/interfaces/bridge".parse().unwrap();
        let error = root.resolve(&path, View::Config).unwrap_err();
        assert_eq!(error.depth, 1);
        assert_eq!(error.element, "bridge");

        // A value token below a leaf value is one token too deep.
        let path: Path =
            "/interfaces/dataplane/dp0s3/mtu/1500/extra".parse().unwrap();
        assert!(root.resolve(&path, View::Config).is_err());
    }

    #[test]
    fn view_filtering() {
        let root = test_schema();
        let path: Path =
            "/interfaces/dataplane/dp0s3/oper-status".parse().unwrap();
        assert!(root.descendant(&path, View::Config).is_none());
        assert!(root.descendant(&path, View::Full).is_some());
    }
}
