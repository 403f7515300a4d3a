//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! The two-phase commit engine.
//!
//! Changes are grouped by schema priority (lower first) and dispatched to
//! the owning components one priority level at a time: each level is
//! dry-run through `check_config` and applied through `set_config`
//! before the next level starts. A failure inside a level stops dispatch
//! to higher levels only; siblings within the level and the levels
//! already applied below it stand, and the engine reports partial
//! success. Full success swaps the running tree, saves the boot
//! configuration and rotates the archive atomically with respect to
//! readers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use cfgd_config::convert;
use cfgd_config::diff::{self, Change, ChangeOp};
use cfgd_config::encoding;
use cfgd_config::{Node, Union, validate};
use cfgd_utils::auth::{REDACTED, UserContext};
use cfgd_utils::mgmt::{MgmtError, MgmtErrorList};
use cfgd_utils::path::Path;
use cfgd_utils::script::Cmd;
use cfgd_yang::{SchemaNode, View};

use crate::confirmed::Precheck;
use crate::debug::Debug;
use crate::running::Revision;
use crate::session::Session;
use crate::{SessionId, Shared};

/// Per-commit options.
#[derive(Clone, Debug, Default)]
pub struct CommitContext {
    pub message: String,
    pub debug: bool,
    /// Minutes until an unconfirmed commit reverts.
    pub confirm_timeout: Option<u32>,
    pub persist_id: Option<String>,
    /// Set only by the confirmed-commit revert path; suppresses the
    /// "no changes to commit" error and confirms the pending commit.
    pub revert: bool,
}

/// Successful (or partially successful) commit result. `errors` holds
/// non-fatal script warnings and per-component apply failures; it is
/// empty on full success.
#[derive(Clone, Debug, Default)]
pub struct CommitOutcome {
    pub output: String,
    pub errors: MgmtErrorList,
}

// ===== global functions =====

/// Commits a session's candidate configuration.
pub async fn commit(
    shared: &Shared,
    session: &Session,
    ctx: &UserContext,
    commit_ctx: CommitContext,
) -> Result<CommitOutcome, MgmtErrorList> {
    let mut state = session
        .write_state(shared, ctx)
        .await
        .map_err(MgmtErrorList::from)?;

    let outcome = commit_union(
        shared,
        &mut state.union,
        session.id(),
        ctx,
        commit_ctx,
    )
    .await?;
    state.saved = true;
    Ok(outcome)
}

/// Rolls the candidate back to an archived revision and commits it.
/// Requires an unmodified candidate.
pub async fn rollback(
    shared: &Shared,
    session: &Session,
    ctx: &UserContext,
    revision: Revision,
) -> Result<CommitOutcome, MgmtErrorList> {
    let mut state = session
        .write_state(shared, ctx)
        .await
        .map_err(MgmtErrorList::from)?;
    if state.union.changed() {
        return Err(MgmtError::operation_failed(
            "Cannot rollback: configuration modified",
        )
        .into());
    }

    if let Revision::Number(n) = &revision {
        if !shared.commitd.archive().log().contains_key(n) {
            return Err(MgmtError::operation_failed(format!(
                "No such revision: {n}"
            ))
            .into());
        }
    }

    let tree = shared
        .commitd
        .revision_tree(&revision)
        .map_err(MgmtErrorList::from)?;
    replace_union(shared, &mut state.union, &tree);

    let outcome = commit_union(
        shared,
        &mut state.union,
        session.id(),
        ctx,
        CommitContext {
            message: format!("rollback to {revision:?}"),
            ..Default::default()
        },
    )
    .await?;
    state.saved = true;
    Ok(outcome)
}

/// Cancels a pending confirmed commit, restoring the pre-commit
/// revision.
pub async fn cancel_commit(
    shared: &Shared,
    ctx: &UserContext,
    persist_id: Option<&str>,
) -> Result<CommitOutcome, MgmtErrorList> {
    let (session_id, rollback) = shared
        .confirmed
        .take_rollback(persist_id)
        .map_err(MgmtErrorList::from)?;
    revert_to(shared, ctx, &session_id, rollback).await
}

/// Confirmed-commit deadline handler: reverts exactly as a cancel-commit
/// issued by the timer.
pub async fn revert_expired(
    shared: &Shared,
) -> Result<CommitOutcome, MgmtErrorList> {
    let (session_id, rollback) = shared
        .confirmed
        .take_expired()
        .map_err(MgmtErrorList::from)?;
    info!(%session_id, "confirmed commit expired, reverting");
    let ctx = UserContext::system();
    revert_to(shared, &ctx, &session_id, rollback).await
}

// ===== helper functions =====

async fn revert_to(
    shared: &Shared,
    ctx: &UserContext,
    session_id: &SessionId,
    rollback: Node,
) -> Result<CommitOutcome, MgmtErrorList> {
    let mut union =
        Union::new(shared.schema.clone(), shared.commitd.snapshot());
    replace_union(shared, &mut union, &rollback);
    commit_union(
        shared,
        &mut union,
        session_id,
        ctx,
        CommitContext {
            message: "confirmed commit rollback".to_owned(),
            revert: true,
            ..Default::default()
        },
    )
    .await
}

/// Replaces a union's candidate content with the given tree. The tree
/// comes from our own archive, so values are already normalised.
fn replace_union(shared: &Shared, union: &mut Union, tree: &Node) {
    for name in union.children(&Path::root(), false) {
        union.delete(&Path::new([name]));
    }
    let plan = convert::plan_merge(&shared.schema, tree);
    for op in &plan.ops {
        match op {
            convert::EditOp::SetLeaf { path, value } => {
                union.set_leaf(path, value);
            }
            convert::EditOp::AddValue { path, value } => {
                union.add_value(path, value);
            }
            convert::EditOp::AddNode { path } => {
                union.add_node(path);
            }
        }
    }
}

/// The engine proper, operating on a union.
async fn commit_union(
    shared: &Shared,
    union: &mut Union,
    session_id: &SessionId,
    ctx: &UserContext,
    commit_ctx: CommitContext,
) -> Result<CommitOutcome, MgmtErrorList> {
    // Pre-check against a pending confirmed commit; the pending state
    // is only cleared once this commit is known good.
    let precheck = shared
        .confirmed
        .check(
            session_id,
            commit_ctx.persist_id.as_deref(),
            commit_ctx.confirm_timeout.is_some(),
        )
        .map_err(MgmtErrorList::from)?;

    // Serialise writers for the whole engine; readers keep their
    // snapshots. The candidate is rebased onto the tree current under
    // the lock so racing committers compose.
    let _commit_lock = shared.commitd.lock().await;
    let old_running = shared.commitd.snapshot();
    union.rebase(old_running.clone());

    // Full validation pass; all failures are collected.
    let errors = validate::validate(union);
    if errors.has_errors() {
        return Err(errors);
    }

    // Plan.
    let changes = diff::changes(union);
    if changes.is_empty() && !commit_ctx.revert {
        if precheck == Precheck::Confirms {
            shared.confirmed.clear_pending();
            return Ok(CommitOutcome::default());
        }
        return Err(MgmtError::operation_failed(
            "No configuration changes to commit",
        )
        .into());
    }
    for change in &changes {
        let path = change.path.to_string();
        Debug::CommitChange(change.op, change.priority, &path).log();
    }

    let new_running = Arc::new(union.to_node(false));

    // Group (priority -> module -> changes).
    let mut groups: BTreeMap<u32, BTreeMap<String, Vec<&Change>>> =
        BTreeMap::new();
    for change in &changes {
        groups
            .entry(change.priority)
            .or_default()
            .entry(change.module.clone())
            .or_default()
            .push(change);
    }

    let mut outcome = CommitOutcome::default();

    // Begin scripts, outermost first. A fatal begin failure aborts.
    let script_nodes = script_nodes(shared, &changes);
    for (path, snode) in &script_nodes {
        if let Some(begin) = &snode.ext.begin {
            run_commit_script(
                shared,
                ctx,
                "begin",
                path,
                begin,
                snode.ext.script_fatal,
                &mut outcome,
            )
            .await
            .map_err(MgmtErrorList::from)?;
        }
    }

    // Dispatch, one priority level at a time: dry-run each model's
    // group, apply it when accepted, then move to the next level. A
    // failure (check or apply) stops dispatch to higher levels only;
    // siblings within the level still run.
    let mut failed = false;
    let mut any_accepted = false;
    for (priority, modules) in &groups {
        if failed {
            outcome.errors.push(
                MgmtError::operation_failed(format!(
                    "Skipped priority {priority} after earlier failure"
                ))
                .as_warning(),
            );
            continue;
        }
        let mut level_failed = false;
        for module in modules.keys() {
            let Some(component) = shared.components.for_module(module)
            else {
                continue;
            };
            Debug::CommitDispatch(module, *priority).log();
            let config = model_config(shared, &new_running, module);
            if let Err(error) =
                component.check_config(module, &config).await
            {
                outcome.errors.push(error.to_mgmt(module));
                level_failed = true;
                continue;
            }
            any_accepted = true;
            if let Err(error) = component.set_config(module, &config).await
            {
                outcome.errors.push(error.to_mgmt(module));
                level_failed = true;
            }
        }
        failed = failed || level_failed;
    }

    // No level accepted anything: the commit failed outright and the
    // running tree stays untouched.
    if failed && !any_accepted {
        return Err(outcome.errors);
    }

    // End scripts; non-zero exits are warnings unless marked fatal.
    for (path, snode) in script_nodes.iter().rev() {
        if let Some(end) = &snode.ext.end {
            if let Err(error) = run_commit_script(
                shared,
                ctx,
                "end",
                path,
                end,
                snode.ext.script_fatal,
                &mut outcome,
            )
            .await
            {
                outcome.errors.push(error);
            }
        }
    }

    // Finalise: publish the new running tree and persist it.
    shared.commitd.publish(new_running.clone());
    union.discard();
    union.rebase(new_running.clone());
    if let Err(error) = shared.commitd.save_boot() {
        outcome.errors.push(error.as_warning());
    }
    if precheck == Precheck::Confirms {
        shared.confirmed.clear_pending();
    }

    // Arm (or re-arm) the confirmed-commit revert timer.
    if let Some(minutes) = commit_ctx.confirm_timeout {
        Debug::ConfirmedCommitArmed(minutes).log();
        shared.confirmed.arm(
            session_id.clone(),
            commit_ctx.persist_id.clone(),
            (*old_running).clone(),
            minutes,
        );
    }

    // Audit: one record per observable change.
    for change in &changes {
        audit_change(change);
    }
    if !commit_ctx.message.is_empty() {
        info!(target: "audit", comment = %commit_ctx.message, "commit");
    }

    Ok(outcome)
}

/// Canonical JSON configuration for one model: the new running subtrees
/// of every top-level node owned by the module.
fn model_config(
    shared: &Shared,
    running: &Node,
    module: &str,
) -> Value {
    let mut object = serde_json::Map::new();
    for top in shared.schema.root().children(View::Config) {
        if top.module != module {
            continue;
        }
        if let Some(node) = running.child(&top.name) {
            let value = encoding::subtree_to_json(node, top, false);
            object.insert(top.name.clone(), value);
        }
    }
    Value::Object(object)
}

/// Schema nodes with begin/end scripts whose subtree carries changes,
/// outermost first, deduplicated.
fn script_nodes<'a>(
    shared: &'a Shared,
    changes: &[Change],
) -> Vec<(Path, &'a SchemaNode)> {
    let mut out: Vec<(Path, &'a SchemaNode)> = Vec::new();
    for change in changes {
        let mut prefix = Path::root();
        for elem in change.path.iter() {
            prefix.push(elem);
            let Some(snode) =
                shared.schema.descendant(&prefix, View::Config)
            else {
                break;
            };
            if (snode.ext.begin.is_some() || snode.ext.end.is_some())
                && !out.iter().any(|(path, _)| path == &prefix)
            {
                out.push((prefix.clone(), snode));
            }
        }
    }
    out.sort_by_key(|(path, _)| path.len());
    out
}

async fn run_commit_script(
    shared: &Shared,
    ctx: &UserContext,
    phase: &str,
    path: &Path,
    cmd: &Cmd,
    fatal: bool,
    outcome: &mut CommitOutcome,
) -> Result<(), MgmtError> {
    Debug::CommitScript(phase, &path.to_string()).log();
    let env = [
        ("COMMIT_PHASE".to_owned(), phase.to_owned()),
        ("CONFIG_PATH".to_owned(), path.to_string()),
    ];
    let output = shared
        .scripts
        .run(cmd, ctx, &env, None)
        .await
        .map_err(|error| {
            MgmtError::exec_failed(
                path,
                format!("Failed to run {phase} script: {error}"),
            )
        })?;

    if !output.stdout.is_empty() {
        outcome.output.push_str(&format!("[{path}]\n"));
        outcome.output.push_str(&output.stdout);
        if !output.stdout.ends_with('\n') {
            outcome.output.push('\n');
        }
    }

    if !output.success() {
        let error = MgmtError::exec_failed(
            path,
            format!(
                "{phase} script exited {}: {}",
                output.status,
                output.stderr.trim()
            ),
        );
        if fatal {
            return Err(error);
        }
        outcome.errors.push(error.as_warning());
    }
    Ok(())
}

/// Emits one audit record for an observable change, with secret values
/// redacted and implicit default writes rendered without their value.
fn audit_change(change: &Change) {
    let op = match change.op {
        ChangeOp::Created => "created",
        ChangeOp::Updated => "updated",
        ChangeOp::Deleted => "deleted",
    };
    // Secret values are masked; implicit default writes already carry a
    // value-less path.
    let path = match change.secret {
        true => {
            let mut path = change.path.parent();
            path.push(REDACTED);
            path.to_string()
        }
        false => change.path.to_string(),
    };
    info!(target: "audit", %op, %path, "configuration change");
}
