//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Encoded-configuration conversion: canonical JSON (the component wire
//! encoding), RFC 7951-style module-qualified JSON, and the XML form the
//! legacy NETCONF surface submits. Decoding is schema-directed and
//! tolerant: schema mismatches become per-path warnings, not aborts.

use std::str::FromStr;

use serde_json::{Map, Value};
use xml::reader::{EventReader, XmlEvent};

use cfgd_utils::mgmt::{MgmtError, MgmtErrorList};
use cfgd_utils::path::Path;
use cfgd_yang::{DataType, NodeKind, SchemaNode, View};

use crate::node::Node;

/// Wire encodings accepted by copy-config, get-config and call-rpc.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    Json,
    Rfc7951,
    Xml,
}

// ===== impl Encoding =====

impl FromStr for Encoding {
    type Err = ();

    fn from_str(s: &str) -> Result<Encoding, ()> {
        match s {
            "json" => Ok(Encoding::Json),
            "rfc7951" => Ok(Encoding::Rfc7951),
            "xml" | "netconf" => Ok(Encoding::Xml),
            _ => Err(()),
        }
    }
}

// ===== encoding =====

/// Renders a data subtree as canonical JSON. `snode` corresponds to
/// `node`; for the tree root pass the schema root.
pub fn to_json(node: &Node, snode: &SchemaNode, qualified: bool) -> Value {
    let mut map = Map::new();
    for child_schema in snode.children(View::Full) {
        let Some(child) = node.child(&child_schema.name) else {
            continue;
        };
        let name = match qualified && !child_schema.module.is_empty() {
            true => format!("{}:{}", child_schema.module, child_schema.name),
            false => child_schema.name.clone(),
        };
        map.insert(name, child_to_json(child, child_schema, qualified));
    }
    Value::Object(map)
}

/// Renders a single named subtree (the node itself, not a wrapping
/// object) as canonical JSON.
pub fn subtree_to_json(
    node: &Node,
    snode: &SchemaNode,
    qualified: bool,
) -> Value {
    child_to_json(node, snode, qualified)
}

fn child_to_json(node: &Node, snode: &SchemaNode, qualified: bool) -> Value {
    match snode.kind {
        NodeKind::Container => to_json(node, snode, qualified),
        NodeKind::List => {
            let entries = node
                .children()
                .iter()
                .map(|entry| {
                    let mut object =
                        to_json(entry, snode, qualified).as_object().cloned()
                            .unwrap_or_default();
                    if let Some(key) = snode.keys.first() {
                        object.insert(
                            key.clone(),
                            Value::String(entry.name().to_owned()),
                        );
                    }
                    Value::Object(object)
                })
                .collect();
            Value::Array(entries)
        }
        NodeKind::Leaf => match node.value() {
            Some(value) => scalar_to_json(value, snode),
            // RFC 7951 renders empty-typed leaves as [null].
            None => Value::Array(vec![Value::Null]),
        },
        NodeKind::LeafList => Value::Array(
            node.values()
                .map(|value| scalar_to_json(value, snode))
                .collect(),
        ),
        NodeKind::Tree | NodeKind::Rpc | NodeKind::Notification => {
            Value::Null
        }
    }
}

fn scalar_to_json(value: &str, snode: &SchemaNode) -> Value {
    match &snode.typ {
        Some(DataType::Integer { .. }) | Some(DataType::Unsigned { .. }) => {
            match serde_json::Number::from_str(value) {
                Ok(number) => Value::Number(number),
                Err(_) => Value::String(value.to_owned()),
            }
        }
        Some(DataType::Boolean) => match value {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(value.to_owned()),
        },
        _ => Value::String(value.to_owned()),
    }
}

// ===== decoding =====

/// Converts a JSON document into a data subtree under `snode` at `path`.
/// Unknown elements and type failures are collected as warnings and the
/// offending content is skipped.
pub fn json_to_node(
    value: &Value,
    snode: &SchemaNode,
    path: &Path,
    view: View,
    warnings: &mut MgmtErrorList,
) -> Node {
    let mut node = Node::new(&snode.name);
    let Some(object) = value.as_object() else {
        warnings.push(MgmtError::invalid_value(
            path,
            "Expected a JSON object",
        ));
        return node;
    };

    for (name, child_value) in object {
        // RFC 7951 module-qualified member names read the same as bare
        // ones.
        let bare = name.rsplit(':').next().unwrap_or(name);
        let child_path = path.join(bare);
        let Some(child_schema) = snode.child(bare, view) else {
            warnings.push(MgmtError::unknown_element(
                &child_path,
                bare,
                format!("Node '{bare}' does not exist in the schema"),
            ));
            continue;
        };
        if let Some(child) = decode_child(
            child_value,
            child_schema,
            &child_path,
            view,
            warnings,
        ) {
            node.push_child(child);
        }
    }

    node
}

fn decode_child(
    value: &Value,
    snode: &SchemaNode,
    path: &Path,
    view: View,
    warnings: &mut MgmtErrorList,
) -> Option<Node> {
    match snode.kind {
        NodeKind::Container => {
            Some(json_to_node(value, snode, path, view, warnings))
        }
        NodeKind::List => {
            let Some(entries) = value.as_array() else {
                warnings.push(MgmtError::invalid_value(
                    path,
                    "Expected a JSON array of list entries",
                ));
                return None;
            };
            let mut node = Node::new(&snode.name);
            let Some(key) = snode.keys.first() else {
                return None;
            };
            for entry_value in entries {
                let Some(key_value) =
                    entry_value.get(key).and_then(json_scalar)
                else {
                    warnings.push(MgmtError::missing_element(path, key));
                    continue;
                };
                let entry_path = path.join(&key_value);
                let mut entry = json_to_node(
                    entry_value,
                    snode,
                    &entry_path,
                    view,
                    warnings,
                );
                // The key leaf lives in the entry name, not as a child.
                entry.delete(&Path::new([key.as_str()]));
                let mut named = Node::new(&key_value);
                for child in entry.children() {
                    named.push_child(child.clone());
                }
                node.push_child(named);
            }
            Some(node)
        }
        NodeKind::Leaf => {
            let mut node = Node::new(&snode.name);
            // [null] is the empty-leaf encoding.
            let is_empty_encoding = matches!(
                value,
                Value::Array(items) if items.len() == 1 && items[0].is_null()
            );
            if is_empty_encoding || value.is_null() {
                return Some(node);
            }
            let Some(scalar) = json_scalar(value) else {
                warnings.push(MgmtError::invalid_value(
                    path,
                    "Expected a scalar value",
                ));
                return None;
            };
            if let Some(typ) = &snode.typ {
                if let Err(message) = typ.check(&scalar) {
                    warnings.push(MgmtError::invalid_value(
                        &path.join(&scalar),
                        message,
                    ));
                    return None;
                }
            }
            node.push_child(Node::new(scalar));
            Some(node)
        }
        NodeKind::LeafList => {
            let Some(items) = value.as_array() else {
                warnings.push(MgmtError::invalid_value(
                    path,
                    "Expected a JSON array",
                ));
                return None;
            };
            let mut node = Node::new(&snode.name);
            for item in items {
                let Some(scalar) = json_scalar(item) else {
                    warnings.push(MgmtError::invalid_value(
                        path,
                        "Expected a scalar value",
                    ));
                    continue;
                };
                if let Some(typ) = &snode.typ {
                    if let Err(message) = typ.check(&scalar) {
                        warnings.push(MgmtError::invalid_value(
                            &path.join(&scalar),
                            message,
                        ));
                        continue;
                    }
                }
                node.push_child(Node::new(scalar));
            }
            Some(node)
        }
        NodeKind::Tree | NodeKind::Rpc | NodeKind::Notification => None,
    }
}

/// Renders a data subtree as an XML fragment (children of `node`,
/// without a wrapping element).
pub fn to_xml(node: &Node, snode: &SchemaNode) -> String {
    let mut out = String::new();
    for child_schema in snode.children(View::Full) {
        let Some(child) = node.child(&child_schema.name) else {
            continue;
        };
        child_to_xml(&mut out, child, child_schema);
    }
    out
}

fn child_to_xml(out: &mut String, node: &Node, snode: &SchemaNode) {
    let name = &snode.name;
    match snode.kind {
        NodeKind::Container => {
            out.push_str(&format!("<{name}>"));
            out.push_str(&to_xml(node, snode));
            out.push_str(&format!("</{name}>"));
        }
        NodeKind::List => {
            let Some(key) = snode.keys.first() else { return };
            for entry in node.children() {
                out.push_str(&format!("<{name}>"));
                out.push_str(&format!(
                    "<{key}>{}</{key}>",
                    xml_escape(entry.name())
                ));
                out.push_str(&to_xml(entry, snode));
                out.push_str(&format!("</{name}>"));
            }
        }
        NodeKind::Leaf => match node.value() {
            Some(value) => out.push_str(&format!(
                "<{name}>{}</{name}>",
                xml_escape(value)
            )),
            None => out.push_str(&format!("<{name}/>")),
        },
        NodeKind::LeafList => {
            for value in node.values() {
                out.push_str(&format!(
                    "<{name}>{}</{name}>",
                    xml_escape(value)
                ));
            }
        }
        NodeKind::Tree | NodeKind::Rpc | NodeKind::Notification => {}
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parses an XML configuration document into a data subtree under
/// `snode`. A malformed document is a hard error; schema mismatches are
/// warnings, as with JSON.
pub fn xml_to_node(
    text: &str,
    snode: &SchemaNode,
    path: &Path,
    view: View,
    warnings: &mut MgmtErrorList,
) -> Result<Node, MgmtError> {
    let elem = parse_xml(text)?;
    // The outer element (e.g. <config>) wraps the subtree content.
    Ok(elem_to_node(&elem, snode, path, view, warnings))
}

#[derive(Debug, Default)]
struct XmlElem {
    name: String,
    text: String,
    children: Vec<XmlElem>,
}

fn parse_xml(text: &str) -> Result<XmlElem, MgmtError> {
    let reader = EventReader::from_str(text);
    let mut stack: Vec<XmlElem> = vec![XmlElem::default()];

    for event in reader {
        match event {
            Ok(XmlEvent::StartElement { name, .. }) => {
                stack.push(XmlElem {
                    name: name.local_name,
                    ..Default::default()
                });
            }
            Ok(XmlEvent::Characters(text)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(XmlEvent::EndElement { .. }) => {
                let elem = stack.pop().unwrap();
                stack.last_mut().unwrap().children.push(elem);
            }
            Ok(_) => {}
            Err(error) => {
                return Err(MgmtError::malformed_message(format!(
                    "Invalid XML: {error}"
                )));
            }
        }
    }

    let mut root = stack.pop().unwrap();
    match root.children.len() {
        1 => Ok(root.children.remove(0)),
        _ => Err(MgmtError::malformed_message(
            "Expected a single XML root element",
        )),
    }
}

fn elem_to_node(
    elem: &XmlElem,
    snode: &SchemaNode,
    path: &Path,
    view: View,
    warnings: &mut MgmtErrorList,
) -> Node {
    let mut node = Node::new(&snode.name);

    for child_elem in &elem.children {
        let name = &child_elem.name;
        let child_path = path.join(name);
        let Some(child_schema) = snode.child(name, view) else {
            warnings.push(MgmtError::unknown_element(
                &child_path,
                name,
                format!("Node '{name}' does not exist in the schema"),
            ));
            continue;
        };

        match child_schema.kind {
            NodeKind::Container => {
                let child = elem_to_node(
                    child_elem,
                    child_schema,
                    &child_path,
                    view,
                    warnings,
                );
                merge_child(&mut node, child);
            }
            NodeKind::List => {
                let Some(key) = child_schema.keys.first() else {
                    continue;
                };
                let Some(key_value) = child_elem
                    .children
                    .iter()
                    .find(|c| &c.name == key)
                    .map(|c| c.text.trim().to_owned())
                else {
                    warnings
                        .push(MgmtError::missing_element(&child_path, key));
                    continue;
                };
                let entry_path = child_path.join(&key_value);
                let mut entry = Node::new(&key_value);
                for grandchild in &child_elem.children {
                    if &grandchild.name == key {
                        continue;
                    }
                    let decoded = elem_to_node(
                        &XmlElem {
                            name: String::new(),
                            text: String::new(),
                            children: vec![clone_elem(grandchild)],
                        },
                        child_schema,
                        &entry_path,
                        view,
                        warnings,
                    );
                    for child in decoded.children() {
                        merge_child(&mut entry, child.clone());
                    }
                }
                let idx = match node.child_index(name) {
                    Some(idx) => idx,
                    None => {
                        node.push_child(Node::new(name));
                        node.children().len() - 1
                    }
                };
                node.child_at_mut(idx).push_child(entry);
            }
            NodeKind::Leaf => {
                let value = child_elem.text.trim();
                let mut child = Node::new(name);
                if !value.is_empty() {
                    if let Some(typ) = &child_schema.typ {
                        if let Err(message) = typ.check(value) {
                            warnings.push(MgmtError::invalid_value(
                                &child_path.join(value),
                                message,
                            ));
                            continue;
                        }
                    }
                    child.push_child(Node::new(value));
                }
                merge_child(&mut node, child);
            }
            NodeKind::LeafList => {
                let value = child_elem.text.trim();
                if let Some(typ) = &child_schema.typ {
                    if let Err(message) = typ.check(value) {
                        warnings.push(MgmtError::invalid_value(
                            &child_path.join(value),
                            message,
                        ));
                        continue;
                    }
                }
                let idx = match node.child_index(name) {
                    Some(idx) => idx,
                    None => {
                        node.push_child(Node::new(name));
                        node.children().len() - 1
                    }
                };
                node.child_at_mut(idx).push_child(Node::new(value));
            }
            _ => {}
        }
    }

    node
}

fn clone_elem(elem: &XmlElem) -> XmlElem {
    XmlElem {
        name: elem.name.clone(),
        text: elem.text.clone(),
        children: elem.children.iter().map(clone_elem).collect(),
    }
}

fn merge_child(node: &mut Node, child: Node) {
    match node.child_index(child.name()) {
        Some(idx) => {
            let existing = node.child_at_mut(idx);
            for grandchild in child.children() {
                existing.push_child(grandchild.clone());
            }
        }
        None => node.push_child(child),
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaNode {
        SchemaNode::tree()
            .with_child(
                SchemaNode::container("system")
                    .with_module("cfgd-system")
                    .with_child(SchemaNode::leaf(
                        "host-name",
                        DataType::string(),
                    ))
                    .with_child(SchemaNode::leaf(
                        "enabled",
                        DataType::Boolean,
                    )),
            )
            .with_child(
                SchemaNode::list("server", "name")
                    .with_module("cfgd-servers")
                    .with_child(SchemaNode::leaf("name", DataType::string()))
                    .with_child(SchemaNode::leaf(
                        "port",
                        DataType::uint_range(16, 1, 65535),
                    )),
            )
    }

    #[test]
    fn json_roundtrip() {
        let schema = schema();
        let text = r#"{
            "system": {"host-name": "r1", "enabled": true},
            "server": [{"name": "a", "port": 80}]
        }"#;
        let value: Value = serde_json::from_str(text).unwrap();
        let mut warnings = MgmtErrorList::new();
        let node = json_to_node(
            &value,
            &schema,
            &Path::root(),
            View::Full,
            &mut warnings,
        );
        assert!(warnings.is_empty());

        let port = Path::new(["server", "a", "port"]);
        assert_eq!(node.get(&port).unwrap().value(), Some("80"));

        let encoded = to_json(&node, &schema, false);
        assert_eq!(encoded["system"]["enabled"], Value::Bool(true));
        assert_eq!(encoded["server"][0]["port"], Value::from(80));
        assert_eq!(encoded["server"][0]["name"], Value::from("a"));
    }

    #[test]
    fn json_warnings() {
        let schema = schema();
        let text = r#"{
            "system": {"no-such-leaf": 1},
            "server": [{"name": "a", "port": 99999}]
        }"#;
        let value: Value = serde_json::from_str(text).unwrap();
        let mut warnings = MgmtErrorList::new();
        let node = json_to_node(
            &value,
            &schema,
            &Path::root(),
            View::Full,
            &mut warnings,
        );
        assert_eq!(warnings.len(), 2);
        // The valid part of the document still decodes.
        assert!(node.exists(&Path::new(["server", "a"])));
        assert!(!node.exists(&Path::new(["server", "a", "port"])));
    }

    #[test]
    fn rfc7951_qualified_names() {
        let schema = schema();
        let text = r#"{"cfgd-system:system": {"host-name": "r1"}}"#;
        let value: Value = serde_json::from_str(text).unwrap();
        let mut warnings = MgmtErrorList::new();
        let node = json_to_node(
            &value,
            &schema,
            &Path::root(),
            View::Full,
            &mut warnings,
        );
        assert!(warnings.is_empty());
        assert_eq!(
            node.get(&Path::new(["system", "host-name"]))
                .unwrap()
                .value(),
            Some("r1")
        );

        let qualified = to_json(&node, &schema, true);
        assert!(qualified.get("cfgd-system:system").is_some());
    }

    #[test]
    fn xml_decode() {
        let schema = schema();
        let text = "<config>\
            <system><host-name>r1</host-name></system>\
            <server><name>a</name><port>80</port></server>\
            <server><name>b</name><port>443</port></server>\
        </config>";
        let mut warnings = MgmtErrorList::new();
        let node = xml_to_node(
            text,
            &schema,
            &Path::root(),
            View::Full,
            &mut warnings,
        )
        .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(
            node.get(&Path::new(["server", "b", "port"]))
                .unwrap()
                .value(),
            Some("443")
        );

        assert!(xml_to_node(
            "<config><oops></config>",
            &schema,
            &Path::root(),
            View::Full,
            &mut MgmtErrorList::new(),
        )
        .is_err());
    }
}
