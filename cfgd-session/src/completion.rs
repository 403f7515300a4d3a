//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Help and completion support for interactive front-ends.

use std::collections::BTreeMap;

use cfgd_utils::auth::UserContext;
use cfgd_utils::mgmt::MgmtError;
use cfgd_utils::path::Path;
use cfgd_yang::xpath;
use cfgd_yang::{DataType, NodeKind, Resolved, View};

use crate::error::Result;
use crate::session::Session;
use crate::Shared;

/// Literal completion offered at positions where the command may end.
pub const ENTER: &str = "<Enter>";

// ===== global functions =====

/// Returns candidate next tokens at `path` mapped to their help text.
/// With `from_schema`, schema-defined placeholders and `<Enter>` are
/// included; otherwise only currently configured values complete.
pub async fn get_help(
    shared: &Shared,
    session: &Session,
    path: &Path,
    from_schema: bool,
) -> Result<BTreeMap<String, String>> {
    let state = session.read_state(shared).await;
    let union = &state.union;
    let mut out = BTreeMap::new();

    let resolved = match path.is_root() {
        true => Resolved::Node(shared.schema.root()),
        false => shared
            .schema
            .resolve(path, View::Config)
            .map_err(|error| crate::session::unknown_element(path, &error))?,
    };

    match resolved {
        Resolved::Node(snode) => match snode.kind {
            NodeKind::Tree | NodeKind::Container => {
                for child in snode.children(View::Config) {
                    let configured =
                        union.exists(&path.join(&child.name));
                    if from_schema || configured {
                        out.insert(
                            child.name.clone(),
                            child.ext.help.clone().unwrap_or_default(),
                        );
                    }
                }
                if from_schema && snode.is_presence() {
                    out.insert(ENTER.to_owned(), "Execute".to_owned());
                }
            }
            NodeKind::List => {
                for entry in union.children(path, false) {
                    out.insert(entry, String::new());
                }
                if from_schema {
                    if let Some(key) = snode.key_leaf() {
                        if let Some(typ) = &key.typ {
                            out.insert(
                                typ.placeholder(),
                                key.ext
                                    .help
                                    .clone()
                                    .unwrap_or_default(),
                            );
                        }
                    }
                }
            }
            NodeKind::Leaf | NodeKind::LeafList => {
                for value in union.children(path, true) {
                    out.insert(value, String::new());
                }
                if from_schema {
                    if let Some(typ) = &snode.typ {
                        if typ.is_empty_type() {
                            out.insert(
                                ENTER.to_owned(),
                                "Execute".to_owned(),
                            );
                        } else {
                            out.insert(
                                typ.placeholder(),
                                snode
                                    .ext
                                    .help
                                    .clone()
                                    .unwrap_or_default(),
                            );
                        }
                    }
                }
            }
            _ => {}
        },
        Resolved::ListEntry(snode, _) => {
            for child in snode.children(View::Config) {
                if snode.is_key(&child.name) {
                    continue;
                }
                let configured = union.exists(&path.join(&child.name));
                if from_schema || configured {
                    out.insert(
                        child.name.clone(),
                        child.ext.help.clone().unwrap_or_default(),
                    );
                }
            }
            if from_schema {
                out.insert(ENTER.to_owned(), "Execute".to_owned());
            }
        }
        Resolved::Value(..) => {
            if from_schema {
                out.insert(ENTER.to_owned(), "Execute".to_owned());
            }
        }
    }

    Ok(out)
}

/// Completion candidates for a leaf, evaluating leafref targets against
/// the current candidate.
///
/// The leafref XPath runs with a temporary dummy node synthesised at
/// `path` (on a scratch copy of the overlay), so relative expressions
/// anchored at the leaf resolve even when nothing is configured there
/// yet. The session's own candidate is left untouched.
pub async fn get_allowed(
    shared: &Shared,
    session: &Session,
    ctx: &UserContext,
    path: &Path,
) -> Result<Vec<String>> {
    let state = session.read_state(shared).await;
    let snode = shared
        .schema
        .descendant(path, View::Config)
        .ok_or_else(|| {
            MgmtError::operation_failed("Path not found in schema")
        })?;

    // Schema-declared allowed-values script wins when present.
    if let Some(allowed) = &snode.ext.allowed {
        let output = shared
            .scripts
            .run(allowed, ctx, &[], None)
            .await
            .map_err(|error| {
                MgmtError::exec_failed(
                    path,
                    format!("Failed to run allowed script: {error}"),
                )
            })?;
        return Ok(output
            .stdout
            .split_whitespace()
            .map(String::from)
            .collect());
    }

    match &snode.typ {
        Some(DataType::Leafref { path: target }) => {
            let mut scratch = state.union.clone();
            drop(state);
            if !scratch.exists(path) {
                scratch.add_node(path);
            }
            let nodes = xpath::eval_path(target, &scratch, path)
                .map_err(|error| {
                    MgmtError::operation_failed(error.to_string())
                        .with_path(path)
                })?;
            use cfgd_yang::xpath::XpathContext;
            Ok(nodes
                .iter()
                .map(|node| scratch.string_value(node))
                .collect())
        }
        Some(DataType::Enumeration { values }) => Ok(values.clone()),
        Some(DataType::Boolean) => {
            Ok(vec!["true".to_owned(), "false".to_owned()])
        }
        _ => Ok(Vec::new()),
    }
}

/// Disambiguates an unambiguous name prefix at position `pos` of the
/// path. Two or more sibling matches yield `PathAmbiguous`.
pub async fn expand(
    shared: &Shared,
    session: &Session,
    path: &Path,
    prefix: &str,
    pos: usize,
) -> Result<Path> {
    if pos > path.len() {
        return Err(MgmtError::operation_failed(
            "Expansion position beyond path",
        ));
    }
    let state = session.read_state(shared).await;
    let parent = Path::new(path.elems()[..pos].to_vec());

    // Candidate names at this position: schema children plus configured
    // list entries.
    let mut names: Vec<String> = Vec::new();
    match parent.is_root() {
        true => {
            for child in shared.schema.root().children(View::Config) {
                names.push(child.name.clone());
            }
        }
        false => match shared.schema.resolve(&parent, View::Config) {
            Ok(Resolved::Node(snode))
                if snode.kind == NodeKind::List =>
            {
                names.extend(state.union.children(&parent, false));
            }
            Ok(Resolved::Node(snode)) => {
                for child in snode.children(View::Config) {
                    names.push(child.name.clone());
                }
            }
            Ok(Resolved::ListEntry(snode, _)) => {
                for child in snode.children(View::Config) {
                    if !snode.is_key(&child.name) {
                        names.push(child.name.clone());
                    }
                }
            }
            _ => {}
        },
    }

    let matches: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect();

    match matches.len() {
        0 => Err(MgmtError::unknown_element(
            &parent.join(prefix),
            prefix,
            cfgd_config::convert::unknown_message(
                &parent.join(prefix),
                prefix,
            ),
        )),
        1 => {
            let mut elems: Vec<String> = path.elems().to_vec();
            if pos == elems.len() {
                elems.push(matches[0].clone());
            } else {
                elems[pos] = matches[0].clone();
            }
            Ok(Path::new(elems))
        }
        _ => {
            // An exact match among several candidates is unambiguous.
            if matches.iter().any(|name| name == prefix) {
                let mut elems: Vec<String> = path.elems().to_vec();
                if pos == elems.len() {
                    elems.push(prefix.to_owned());
                } else {
                    elems[pos] = prefix.to_owned();
                }
                return Ok(Path::new(elems));
            }
            Err(MgmtError::path_ambiguous(
                &parent.join(prefix),
                &matches,
            ))
        }
    }
}
