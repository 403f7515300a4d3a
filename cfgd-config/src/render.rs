//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Schema-directed rendering of a data tree back into the configuration
//! file grammar. `parse(render(tree)) == tree` for any tree the schema
//! admits.

use cfgd_utils::auth::REDACTED;
use cfgd_yang::{NodeKind, SchemaNode, View};

use crate::node::Node;
use crate::parser::ConfigFile;

const INDENT: &str = "    ";

#[derive(Clone, Copy, Debug, Default)]
pub struct RenderOpts {
    /// Mask secret-tagged values for callers outside the secrets group.
    pub hide_secrets: bool,
}

// ===== global functions =====

/// Renders a full configuration file, including the schema-revision
/// trailer when one is supplied.
pub fn render_file(
    root: &Node,
    schema: &SchemaNode,
    version: Option<&str>,
    opts: RenderOpts,
) -> String {
    let mut out = String::new();
    render_children(&mut out, root, Some(schema), 0, opts);
    if let Some(version) = version {
        out.push_str(&ConfigFile::version_trailer(version));
        out.push('\n');
    }
    out
}

/// Renders a subtree without the trailer, for `show` and diff output.
pub fn render(
    node: &Node,
    snode: Option<&SchemaNode>,
    opts: RenderOpts,
) -> String {
    let mut out = String::new();
    render_children(&mut out, node, snode, 0, opts);
    out
}

// ===== helper functions =====

fn render_children(
    out: &mut String,
    node: &Node,
    snode: Option<&SchemaNode>,
    indent: usize,
    opts: RenderOpts,
) {
    match snode {
        Some(snode) => {
            // Schema declaration order wins over storage order.
            for child_schema in snode.children(View::Full) {
                if let Some(child) = node.child(&child_schema.name) {
                    render_node(out, child, child_schema, indent, opts);
                }
            }
            // Nodes the schema does not know are preserved verbatim.
            for child in node.children() {
                if snode.child(child.name(), View::Full).is_none() {
                    render_opaque(out, child, indent);
                }
            }
        }
        None => {
            for child in node.children() {
                render_opaque(out, child, indent);
            }
        }
    }
}

fn render_node(
    out: &mut String,
    node: &Node,
    snode: &SchemaNode,
    indent: usize,
    opts: RenderOpts,
) {
    match snode.kind {
        NodeKind::Container => {
            render_comment(out, node, indent);
            push_indent(out, indent);
            out.push_str(node.name());
            out.push_str(" {\n");
            render_children(out, node, Some(snode), indent + 1, opts);
            push_indent(out, indent);
            out.push_str("}\n");
        }
        NodeKind::List => {
            for entry in sorted_entries(node, snode) {
                render_comment(out, entry, indent);
                push_indent(out, indent);
                out.push_str(node.name());
                out.push(' ');
                out.push_str(&quote(entry.name()));
                if entry.is_empty() {
                    out.push('\n');
                } else {
                    out.push_str(" {\n");
                    render_children(out, entry, Some(snode), indent + 1, opts);
                    push_indent(out, indent);
                    out.push_str("}\n");
                }
            }
        }
        NodeKind::Leaf => {
            render_comment(out, node, indent);
            push_indent(out, indent);
            out.push_str(node.name());
            if let Some(value) = node.value() {
                out.push(' ');
                out.push_str(&render_value(value, snode, opts));
            }
            out.push('\n');
        }
        NodeKind::LeafList => {
            for entry in sorted_entries(node, snode) {
                render_comment(out, node, indent);
                push_indent(out, indent);
                out.push_str(node.name());
                out.push(' ');
                out.push_str(&render_value(entry.name(), snode, opts));
                out.push('\n');
            }
        }
        NodeKind::Tree | NodeKind::Rpc | NodeKind::Notification => {}
    }
}

fn render_opaque(out: &mut String, node: &Node, indent: usize) {
    render_comment(out, node, indent);
    push_indent(out, indent);
    out.push_str(&quote(node.name()));
    let children = node.children();
    if children.len() == 1 && children[0].is_empty() {
        // Single valueless child reads as a leaf value.
        out.push(' ');
        out.push_str(&quote(children[0].name()));
        out.push('\n');
    } else if children.is_empty() {
        out.push('\n');
    } else {
        out.push_str(" {\n");
        for child in children {
            render_opaque(out, child, indent + 1);
        }
        push_indent(out, indent);
        out.push_str("}\n");
    }
}

fn render_comment(out: &mut String, node: &Node, indent: usize) {
    if let Some(comment) = node.comment() {
        push_indent(out, indent);
        out.push_str("/* ");
        out.push_str(comment);
        out.push_str(" */\n");
    }
}

fn render_value(value: &str, snode: &SchemaNode, opts: RenderOpts) -> String {
    if opts.hide_secrets && snode.ext.secret {
        return REDACTED.to_owned();
    }
    quote(value)
}

/// List or leaf-list entries in display order: user order when the schema
/// says so, name order otherwise.
fn sorted_entries<'a>(node: &'a Node, snode: &SchemaNode) -> Vec<&'a Node> {
    let mut entries: Vec<_> = node.children().iter().collect();
    if !snode.ordered_by_user {
        entries.sort_by(|a, b| a.name().cmp(b.name()));
    }
    entries
}

fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.chars().any(|c| {
            c.is_whitespace() || c == '{' || c == '}' || c == '"'
        });
    if !needs_quotes {
        return value.to_owned();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn push_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str(INDENT);
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use cfgd_yang::DataType;

    use super::*;
    use crate::parser;

    fn schema() -> SchemaNode {
        SchemaNode::tree()
            .with_child(
                SchemaNode::container("interfaces").with_child(
                    SchemaNode::list("dataplane", "name")
                        .with_child(SchemaNode::leaf(
                            "name",
                            DataType::string(),
                        ))
                        .with_child(SchemaNode::leaf(
                            "mtu",
                            DataType::uint_range(32, 68, 9000),
                        ))
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
                SchemaNode::container("system").with_child(
                    SchemaNode::leaf("host-name", DataType::string()),
                ),
            )
    }

    #[test]
    fn roundtrip() {
        let input = "\
interfaces {
    dataplane dp0s3 {
        mtu 1500
        address 192.0.2.2/24
        address 192.0.2.1/24
    }
}
system {
    host-name \"core router\"
}
";
        let schema = schema();
        let file = parser::parse(input).unwrap();
        let output =
            render(&file.root, Some(&schema), RenderOpts::default());
        assert_eq!(input, output);

        // Parse of the rendering reproduces the tree.
        let reparsed = parser::parse(&output).unwrap();
        assert_eq!(file.root, reparsed.root);
    }

    #[test]
    fn trailer() {
        let root = Node::root();
        let out = render_file(
            &root,
            &schema(),
            Some("cfgd-system@2024-06-01"),
            RenderOpts::default(),
        );
        assert_eq!(
            out,
            "/* === vyatta-config-version: \"cfgd-system@2024-06-01\" === */\n"
        );
    }
}
