//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! The in-process command surface.
//!
//! Every verb the daemon exposes is a method here; the wire front-ends
//! only tokenise frames and marshal them onto [`Commands::dispatch`].
//! Each verb flows through command authorisation and accounting before
//! it touches a session.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Value, json};

use cfgd_config::encoding::Encoding;
use cfgd_session::commit::{self, CommitContext};
use cfgd_session::manager::SessionManager;
use cfgd_session::running::Revision;
use cfgd_session::session::{LoadSource, Sharing};
use cfgd_session::{authz, completion, rpc, state};
use cfgd_utils::auth::{CommandArgs, UserContext};
use cfgd_utils::mgmt::{MgmtError, MgmtErrorList};
use cfgd_utils::path::Path;

/// A failed command: either a single error or the error list the
/// validate/commit surfaces produce. Serialised as `error` or
/// `mgmterrorlist` on the wire.
#[derive(Debug)]
pub enum CommandError {
    Single(MgmtError),
    List(MgmtErrorList),
}

pub type CmdResult = Result<Value, CommandError>;

#[derive(Clone)]
pub struct Commands {
    manager: Arc<SessionManager>,
}

// ===== impl CommandError =====

impl From<MgmtError> for CommandError {
    fn from(error: MgmtError) -> CommandError {
        CommandError::Single(error)
    }
}

impl From<MgmtErrorList> for CommandError {
    fn from(errors: MgmtErrorList) -> CommandError {
        CommandError::List(errors)
    }
}

// ===== impl Commands =====

impl Commands {
    pub fn new(manager: Arc<SessionManager>) -> Commands {
        Commands { manager }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Executes one named verb with positional parameters.
    pub async fn dispatch(
        &self,
        ctx: &UserContext,
        method: &str,
        params: &[Value],
    ) -> CmdResult {
        let shared = self.manager.shared().clone();
        let auther = &shared.auther;

        match method {
            "session-setup" => {
                let sid = str_param(params, 0)?;
                let sharing = match bool_param(params, 1).unwrap_or(true) {
                    true => Sharing::Shared,
                    false => Sharing::Unshared,
                };
                self.manager.setup(sid.to_owned(), ctx.pid, sharing)?;
                Ok(Value::Null)
            }
            "session-teardown" => {
                let sid = str_param(params, 0)?;
                self.manager.destroy(sid)?;
                Ok(Value::Null)
            }
            "session-changed" => {
                let session = self.manager.get(str_param(params, 0)?);
                Ok(json!(session.changed(&shared).await))
            }
            "session-saved" => {
                let session = self.manager.get(str_param(params, 0)?);
                Ok(json!(session.saved(&shared).await))
            }
            "lock" => {
                let sid = str_param(params, 0)?;
                self.manager.lock(sid, ctx.pid).await?;
                Ok(Value::Null)
            }
            "unlock" => {
                let sid = str_param(params, 0)?;
                self.manager.unlock(sid, ctx.pid).await?;
                Ok(Value::Null)
            }
            "locked" => {
                let sid = str_param(params, 0)?;
                Ok(json!(self.manager.locked(sid).await?))
            }
            "set" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                let args =
                    authz::command_args(&shared.schema, "set", &path);
                authz::run_command(auther, ctx, args, async {
                    session.set(&shared, ctx, &path).await
                })
                .await?;
                Ok(Value::Null)
            }
            "delete" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                let args =
                    authz::command_args(&shared.schema, "delete", &path);
                authz::run_command(auther, ctx, args, async {
                    session.delete(&shared, ctx, &path).await
                })
                .await?;
                Ok(Value::Null)
            }
            "show" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                let hide_secrets =
                    bool_param(params, 2).unwrap_or(true);
                let show_defaults =
                    bool_param(params, 3).unwrap_or(false);
                let args =
                    authz::command_args(&shared.schema, "show", &path);
                let output = authz::run_command(auther, ctx, args, async {
                    session
                        .show(&shared, ctx, &path, hide_secrets, show_defaults)
                        .await
                })
                .await?;
                Ok(json!(output))
            }
            "exists" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                Ok(json!(session.exists(&shared, &path).await))
            }
            "load" | "merge" => {
                let session = self.manager.get(str_param(params, 0)?);
                let source = match str_param(params, 1)? {
                    "text" => {
                        LoadSource::Text(str_param(params, 2)?.to_owned())
                    }
                    "file" => LoadSource::File(
                        str_param(params, 2)?.to_owned().into(),
                    ),
                    other => {
                        return Err(MgmtError::malformed_message(format!(
                            "Unknown load source kind '{other}'"
                        ))
                        .into());
                    }
                };
                let args = CommandArgs::new([method]);
                let warnings =
                    authz::run_command(auther, ctx, args, async {
                        match method {
                            "load" => {
                                session.load(&shared, ctx, source).await
                            }
                            _ => session.merge(&shared, ctx, source).await,
                        }
                    })
                    .await?;
                Ok(json!({ "warnings": warnings }))
            }
            "copy-config" => {
                let session = self.manager.get(str_param(params, 0)?);
                let source_datastore = opt_str_param(params, 1);
                let enc = encoding_param(params, 2)?;
                let source_config = opt_str_param(params, 3);
                let source_url = opt_str_param(params, 4);
                let target_datastore =
                    opt_str_param(params, 5).unwrap_or("candidate");
                let target_url = opt_str_param(params, 6);
                let args = CommandArgs::new(["copy-config"]);
                authz::run_command(auther, ctx, args, async {
                    session
                        .copy_config(
                            &shared,
                            ctx,
                            source_datastore,
                            enc,
                            source_config,
                            source_url,
                            target_datastore,
                            target_url,
                        )
                        .await
                })
                .await?;
                Ok(Value::Null)
            }
            "validate" => {
                let session = self.manager.get(str_param(params, 0)?);
                let output = session
                    .validate(&shared)
                    .await
                    .map_err(CommandError::from)?;
                Ok(json!(output))
            }
            "discard" => {
                let session = self.manager.get(str_param(params, 0)?);
                session.discard(&shared, ctx).await?;
                Ok(Value::Null)
            }
            "commit" => {
                let session = self.manager.get(str_param(params, 0)?);
                let message =
                    opt_str_param(params, 1).unwrap_or("").to_owned();
                let outcome = commit::commit(
                    &shared,
                    &session,
                    ctx,
                    CommitContext {
                        message,
                        ..Default::default()
                    },
                )
                .await
                .map_err(CommandError::from)?;
                Ok(json!({
                    "output": outcome.output,
                    "errors": outcome.errors,
                }))
            }
            "commit-confirm" => {
                let session = self.manager.get(str_param(params, 0)?);
                let message =
                    opt_str_param(params, 1).unwrap_or("").to_owned();
                let minutes = u32_param(params, 2)?;
                let persist_id =
                    opt_str_param(params, 3).map(String::from);
                let outcome = commit::commit(
                    &shared,
                    &session,
                    ctx,
                    CommitContext {
                        message,
                        confirm_timeout: Some(minutes),
                        persist_id,
                        ..Default::default()
                    },
                )
                .await
                .map_err(CommandError::from)?;
                Ok(json!({
                    "output": outcome.output,
                    "errors": outcome.errors,
                }))
            }
            "confirm" => {
                let session = self.manager.get(str_param(params, 0)?);
                let outcome = commit::commit(
                    &shared,
                    &session,
                    ctx,
                    CommitContext::default(),
                )
                .await
                .map_err(CommandError::from)?;
                Ok(json!({ "output": outcome.output }))
            }
            "cancel-commit" => {
                let persist_id = opt_str_param(params, 1);
                let outcome =
                    commit::cancel_commit(&shared, ctx, persist_id)
                        .await
                        .map_err(CommandError::from)?;
                Ok(json!({ "output": outcome.output }))
            }
            "rollback" => {
                let session = self.manager.get(str_param(params, 0)?);
                let revision = revision_param(params, 1)?;
                let args = CommandArgs::new(["rollback"]);
                let outcome = authz::run_command(auther, ctx, args, async {
                    commit::rollback(&shared, &session, ctx, revision)
                        .await
                        .map_err(|errors| {
                            // Accounting wants a single error; the full
                            // list still reaches the caller below.
                            MgmtError::operation_failed(
                                errors.to_string(),
                            )
                        })
                })
                .await?;
                Ok(json!({
                    "output": outcome.output,
                    "errors": outcome.errors,
                }))
            }
            "compare" => {
                let session = self.manager.get(str_param(params, 0)?);
                let rev1 = opt_revision_param(params, 1)?;
                let rev2 = opt_revision_param(params, 2)?;
                let context = bool_param(params, 3).unwrap_or(false);
                let output = session
                    .compare(&shared, ctx, rev1, rev2, context)
                    .await?;
                Ok(json!(output))
            }
            "save" => {
                let session = self.manager.get(str_param(params, 0)?);
                let target =
                    opt_str_param(params, 1).map(|s| s.to_owned().into());
                let args = CommandArgs::new(["save"]);
                let output = authz::run_command(auther, ctx, args, async {
                    session.save(&shared, ctx, target).await
                })
                .await?;
                Ok(json!(output))
            }
            "get-config" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                let enc = encoding_param(params, 2)?;
                let output =
                    session.get_config(&shared, ctx, &path, enc).await?;
                Ok(json!(output))
            }
            "get-full-tree" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                let enc = encoding_param(params, 2)?;
                let (output, warnings) =
                    state::get_full_tree(&shared, &session, ctx, &path, enc)
                        .await?;
                Ok(json!({ "data": output, "warnings": warnings }))
            }
            "get-help" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                let from_schema = bool_param(params, 2).unwrap_or(true);
                let help = completion::get_help(
                    &shared,
                    &session,
                    &path,
                    from_schema,
                )
                .await?;
                Ok(json!(help))
            }
            "tmpl-get-allowed" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                let allowed =
                    completion::get_allowed(&shared, &session, ctx, &path)
                        .await?;
                Ok(json!(allowed))
            }
            "expand" => {
                let session = self.manager.get(str_param(params, 0)?);
                let path = path_param(params, 1)?;
                let prefix = str_param(params, 2)?;
                let pos = u32_param(params, 3)? as usize;
                let expanded = completion::expand(
                    &shared, &session, &path, prefix, pos,
                )
                .await?;
                Ok(json!(expanded.to_string()))
            }
            "call-rpc" => {
                let module_or_ns = str_param(params, 0)?;
                let name = str_param(params, 1)?;
                let args = opt_str_param(params, 2).unwrap_or("");
                let enc = encoding_param(params, 3)?;
                let output = rpc::call_rpc(
                    &shared,
                    ctx,
                    module_or_ns,
                    name,
                    args,
                    enc,
                )
                .await?;
                Ok(json!(output))
            }
            "schema-get" => {
                let modules: Vec<Value> = shared
                    .schema
                    .modules()
                    .map(|module| {
                        json!({
                            "identifier": module.identifier,
                            "version": module.version,
                            "namespace": module.namespace,
                        })
                    })
                    .collect();
                Ok(json!(modules))
            }
            "commit-log" => {
                let log: Vec<Value> = shared
                    .commitd
                    .archive()
                    .log()
                    .into_iter()
                    .map(|(revision, timestamp)| {
                        json!({
                            "revision": revision,
                            "timestamp": timestamp.to_rfc3339(),
                        })
                    })
                    .collect();
                Ok(json!(log))
            }
            _ => Err(MgmtError::malformed_message(format!(
                "Unknown method '{method}'"
            ))
            .into()),
        }
    }
}

// ===== helper functions =====

fn str_param<'a>(
    params: &'a [Value],
    idx: usize,
) -> Result<&'a str, MgmtError> {
    params
        .get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MgmtError::malformed_message(format!(
                "Missing or invalid parameter {idx}"
            ))
        })
}

fn opt_str_param(params: &[Value], idx: usize) -> Option<&str> {
    params.get(idx).and_then(Value::as_str)
}

fn bool_param(params: &[Value], idx: usize) -> Option<bool> {
    params.get(idx).and_then(Value::as_bool)
}

fn u32_param(params: &[Value], idx: usize) -> Result<u32, MgmtError> {
    params
        .get(idx)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            MgmtError::malformed_message(format!(
                "Missing or invalid parameter {idx}"
            ))
        })
}

/// Paths arrive either as a single `/`-separated string or as an array
/// of tokens (needed when values themselves contain slashes).
fn path_param(params: &[Value], idx: usize) -> Result<Path, MgmtError> {
    match params.get(idx) {
        Some(Value::String(s)) => {
            Ok(Path::from_str(s).expect("infallible"))
        }
        Some(Value::Array(items)) => {
            let elems: Option<Vec<&str>> =
                items.iter().map(Value::as_str).collect();
            elems.map(Path::new).ok_or_else(|| {
                MgmtError::malformed_message(
                    "Path tokens must be strings",
                )
            })
        }
        _ => Err(MgmtError::malformed_message(format!(
            "Missing or invalid path parameter {idx}"
        ))),
    }
}

fn encoding_param(
    params: &[Value],
    idx: usize,
) -> Result<Encoding, MgmtError> {
    let text = str_param(params, idx)?;
    Encoding::from_str(text).map_err(|_| {
        MgmtError::malformed_message(format!("Unknown encoding '{text}'"))
    })
}

fn revision_param(
    params: &[Value],
    idx: usize,
) -> Result<Revision, MgmtError> {
    match opt_revision_param(params, idx)? {
        Some(revision) => Ok(revision),
        None => Err(MgmtError::malformed_message(format!(
            "Missing revision parameter {idx}"
        ))),
    }
}

fn opt_revision_param(
    params: &[Value],
    idx: usize,
) -> Result<Option<Revision>, MgmtError> {
    match params.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s == "saved" => {
            Ok(Some(Revision::Saved))
        }
        Some(Value::String(s)) => s
            .parse()
            .map(|n| Some(Revision::Number(n)))
            .map_err(|_| {
                MgmtError::malformed_message(format!(
                    "Invalid revision '{s}'"
                ))
            }),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(|n| Some(Revision::Number(n)))
            .ok_or_else(|| {
                MgmtError::malformed_message("Invalid revision number")
            }),
        _ => Err(MgmtError::malformed_message(format!(
            "Invalid revision parameter {idx}"
        ))),
    }
}
