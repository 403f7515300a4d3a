//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! State-tree retrieval: the union of configuration and
//! component-reported operational state.
//!
//! Every ancestor's and descendant's state script runs and its JSON is
//! merged in; a script or decode failure on one node degrades to a
//! warning attached to that node's path and the walk continues.

use serde_json::Value;

use cfgd_config::encoding::{self, Encoding};
use cfgd_config::Node;
use cfgd_utils::auth::UserContext;
use cfgd_utils::mgmt::{MgmtError, MgmtErrorList};
use cfgd_utils::path::Path;
use cfgd_utils::script::Cmd;
use cfgd_yang::{NodeKind, SchemaNode, View};

use crate::debug::Debug;
use crate::session::Session;
use crate::Shared;

// ===== global functions =====

/// Retrieves the full (config + state) tree at `path` in the requested
/// encoding, along with per-node warnings.
pub async fn get_full_tree(
    shared: &Shared,
    session: &Session,
    ctx: &UserContext,
    path: &Path,
    enc: Encoding,
) -> Result<(String, MgmtErrorList), MgmtError> {
    let state = session.read_state(shared).await;
    let exists = state.union.exists(path) || path.is_root();

    // JSON encodings accept a valid-but-empty path (NETCONF semantics);
    // the legacy XML surface requires the path to exist.
    if !exists {
        if !state.union.could_exist(path) {
            return Err(MgmtError::unknown_element(
                path,
                path.last().unwrap_or(""),
                "Path is not valid",
            ));
        }
        if enc == Encoding::Xml {
            return Err(MgmtError::operation_failed(
                "Path does not exist",
            ));
        }
    }

    // Configuration portion, defaults materialised.
    let mut result = state.union.to_node(true);
    drop(state);

    let mut warnings = MgmtErrorList::new();

    // Ancestor state scripts, outermost first.
    let mut prefix = Path::root();
    let mut ancestors: Vec<(Path, Cmd)> = Vec::new();
    for elem in path.iter() {
        prefix.push(elem);
        if let Some(snode) = shared.schema.descendant(&prefix, View::Full) {
            if let Some(cmd) = &snode.ext.state {
                ancestors.push((prefix.clone(), cmd.clone()));
            }
        }
    }
    for (script_path, cmd) in ancestors {
        run_state_script(
            shared,
            ctx,
            &script_path,
            &cmd,
            &mut result,
            &mut warnings,
        )
        .await;
    }

    // State-bearing descendants.
    let start = match path.is_root() {
        true => Some(shared.schema.root()),
        false => shared.schema.descendant(path, View::Full),
    };
    if let Some(snode) = start {
        let mut contexts: Vec<(Path, Cmd)> = Vec::new();
        collect_descendant_scripts(
            snode, path, &result, &mut contexts,
        );
        for (script_path, cmd) in contexts {
            run_state_script(
                shared,
                ctx,
                &script_path,
                &cmd,
                &mut result,
                &mut warnings,
            )
            .await;
        }
    }

    // Component-reported state, merged through the schema.
    for component in shared.components.iter() {
        for model in component.models() {
            match component.store_state_into(&model).await {
                Ok(value) => {
                    merge_json(
                        shared,
                        &value,
                        &Path::root(),
                        &mut result,
                        &mut warnings,
                    );
                }
                Err(error) => {
                    warnings.push(
                        MgmtError::operation_failed(format!(
                            "Failed to fetch state for model \
                             '{model}': {error}"
                        ))
                        .as_warning(),
                    );
                }
            }
        }
    }

    // Encode the subtree at `path`.
    let node = match path.is_root() {
        true => result,
        false => result
            .get(path)
            .cloned()
            .unwrap_or_else(|| Node::new(path.last().unwrap_or(""))),
    };
    let snode = match path.is_root() {
        true => shared.schema.root(),
        false => shared
            .schema
            .descendant(path, View::Full)
            .expect("path resolved above"),
    };

    let text = match enc {
        Encoding::Json => {
            serde_json::to_string(&encoding::to_json(&node, snode, false))
                .unwrap()
        }
        Encoding::Rfc7951 => {
            serde_json::to_string(&encoding::to_json(&node, snode, true))
                .unwrap()
        }
        Encoding::Xml => {
            format!("<data>{}</data>", encoding::to_xml(&node, snode))
        }
    };

    Ok((text, warnings))
}

// ===== helper functions =====

/// Collects `(data path, script)` contexts for state-bearing descendant
/// nodes, expanding list entries from the tree assembled so far.
fn collect_descendant_scripts(
    snode: &SchemaNode,
    path: &Path,
    result: &Node,
    out: &mut Vec<(Path, Cmd)>,
) {
    for child in snode.children(View::Full) {
        let child_path = path.join(&child.name);
        match child.kind {
            NodeKind::List => {
                let entries: Vec<String> = result
                    .get(&child_path)
                    .map(|node| {
                        node.values().map(String::from).collect()
                    })
                    .unwrap_or_default();
                for entry in entries {
                    let entry_path = child_path.join(&entry);
                    if let Some(cmd) = &child.ext.state {
                        out.push((entry_path.clone(), cmd.clone()));
                    }
                    collect_descendant_scripts(
                        child, &entry_path, result, out,
                    );
                }
            }
            NodeKind::Container => {
                if let Some(cmd) = &child.ext.state {
                    out.push((child_path.clone(), cmd.clone()));
                }
                collect_descendant_scripts(
                    child, &child_path, result, out,
                );
            }
            NodeKind::Leaf | NodeKind::LeafList => {
                if let Some(cmd) = &child.ext.state {
                    out.push((child_path, cmd.clone()));
                }
            }
            _ => {}
        }
    }
}

/// Runs one state script and merges its JSON at the node's position.
/// Failures degrade to warnings naming the node.
async fn run_state_script(
    shared: &Shared,
    ctx: &UserContext,
    path: &Path,
    cmd: &Cmd,
    result: &mut Node,
    warnings: &mut MgmtErrorList,
) {
    Debug::StateScript(&path.to_string()).log();
    let env = [("CONFIG_PATH".to_owned(), path.to_string())];
    let output = match shared.scripts.run(cmd, ctx, &env, None).await {
        Ok(output) => output,
        Err(error) => {
            warnings.push(
                MgmtError::exec_failed(
                    path,
                    format!("Failed to run state script: {error}"),
                )
                .as_warning(),
            );
            return;
        }
    };
    if !output.success() {
        warnings.push(
            MgmtError::exec_failed(
                path,
                format!(
                    "State script exited {}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            )
            .as_warning(),
        );
        return;
    }
    if output.stdout.trim().is_empty() {
        return;
    }

    let value: Value = match serde_json::from_str(&output.stdout) {
        Ok(value) => value,
        Err(error) => {
            warnings.push(
                MgmtError::invalid_value(
                    path,
                    format!("State script returned invalid JSON: {error}"),
                )
                .as_warning(),
            );
            return;
        }
    };
    merge_json(shared, &value, path, result, warnings);
}

/// Decodes a JSON object at `path` through the schema and merges it into
/// the result tree. Schema mismatches become warnings.
fn merge_json(
    shared: &Shared,
    value: &Value,
    path: &Path,
    result: &mut Node,
    warnings: &mut MgmtErrorList,
) {
    let snode = match path.is_root() {
        true => Some(shared.schema.root()),
        false => shared.schema.descendant(path, View::Full),
    };
    let Some(snode) = snode else {
        return;
    };

    let mut decode_warnings = MgmtErrorList::new();
    let decoded =
        encoding::json_to_node(value, snode, path, View::Full, &mut decode_warnings);
    for warning in decode_warnings {
        warnings.push(warning.as_warning());
    }

    // Graft at the path position, creating interior nodes as needed.
    result.set(path);
    if let Some(target) = result.get_mut(path) {
        merge_into(target, &decoded);
    }
}

fn merge_into(dst: &mut Node, src: &Node) {
    for child in src.children() {
        match dst.child_index(child.name()) {
            Some(idx) => merge_into(dst.child_at_mut(idx), child),
            None => dst.push_child(child.clone()),
        }
    }
}
