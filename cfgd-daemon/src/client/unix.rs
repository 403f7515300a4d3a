//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Thin local-socket front-end.
//!
//! Frames are newline-delimited JSON objects `{method, params[], id}`;
//! replies are `{result, id}`, `{error, id}` or `{mgmterrorlist, id}`.
//! Each accepted connection is served by its own task; the caller
//! identity comes from the socket peer credentials. Closing the
//! connection releases every session lock held by the peer and cancels a
//! pending confirmed commit owned by its sessions.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use cfgd_session::SessionId;
use cfgd_session::manager::SessionManager;
use cfgd_utils::auth::UserContext;
use cfgd_utils::task::Task;

use crate::client::api::{CommandError, Commands};

#[derive(Debug, Deserialize)]
struct Frame {
    method: String,
    #[serde(default)]
    params: Vec<Value>,
    #[serde(default)]
    id: Value,
}

// ===== global functions =====

/// Binds the local socket and starts the accept loop.
pub async fn start(
    socket: &str,
    manager: Arc<SessionManager>,
) -> std::io::Result<Task<()>> {
    // A stale socket from a previous run blocks the bind.
    if let Err(error) = std::fs::remove_file(socket) {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(%socket, %error, "failed to remove stale socket");
        }
    }
    if let Some(parent) = std::path::Path::new(socket).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(socket)?;
    info!(%socket, "listening for front-end connections");

    Ok(Task::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let manager = manager.clone();
                    let mut task = Task::spawn(async move {
                        serve_connection(stream, manager).await;
                    });
                    task.detach();
                }
                Err(error) => {
                    warn!(%error, "failed to accept connection");
                }
            }
        }
    }))
}

// ===== helper functions =====

async fn serve_connection(stream: UnixStream, manager: Arc<SessionManager>) {
    let ctx = match peer_context(&stream) {
        Some(ctx) => ctx,
        None => {
            warn!("failed to read peer credentials, dropping connection");
            return;
        }
    };
    debug!(uid = %ctx.uid, pid = %ctx.pid, "client connected");

    let commands = Commands::new(manager.clone());
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut sessions: HashSet<SessionId> = HashSet::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Frame>(&line) {
            Ok(frame) => {
                // Remember which sessions this connection touched, for
                // teardown.
                if frame.method == "session-setup" {
                    if let Some(sid) =
                        frame.params.first().and_then(Value::as_str)
                    {
                        sessions.insert(sid.to_owned());
                    }
                }
                let result = commands
                    .dispatch(&ctx, &frame.method, &frame.params)
                    .await;
                reply_frame(frame.id, result)
            }
            Err(error) => reply_frame(
                Value::Null,
                Err(cfgd_utils::mgmt::MgmtError::malformed_message(
                    format!("Invalid frame: {error}"),
                )
                .into()),
            ),
        };

        let mut data = reply.to_string();
        data.push('\n');
        if write_half.write_all(data.as_bytes()).await.is_err() {
            break;
        }
    }

    // Connection teardown: locks go, candidates stay, a pending
    // confirmed commit owned by this peer's sessions is cancelled.
    debug!(pid = %ctx.pid, "client disconnected");
    manager.unlock_all_pid(ctx.pid).await;
    let shared = manager.shared();
    for sid in sessions {
        shared.confirmed.session_closed(&sid);
    }
}

fn reply_frame(
    id: Value,
    result: Result<Value, CommandError>,
) -> Value {
    match result {
        Ok(result) => json!({ "result": result, "id": id }),
        Err(CommandError::Single(error)) => {
            json!({ "error": error, "id": id })
        }
        Err(CommandError::List(errors)) => {
            json!({ "mgmterrorlist": errors, "id": id })
        }
    }
}

/// Caller identity from the socket peer credentials. Group membership
/// for non-root peers comes from the system user database.
fn peer_context(stream: &UnixStream) -> Option<UserContext> {
    let cred = stream.peer_cred().ok()?;
    let uid = cred.uid();
    let pid = cred.pid().unwrap_or(0) as u32;

    let username = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(
        uid,
    ))
    .ok()
    .flatten()
    .map(|user| user.name)
    .unwrap_or_else(|| uid.to_string());

    let groups = nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(
        cred.gid(),
    ))
    .ok()
    .flatten()
    .map(|group| vec![group.name])
    .unwrap_or_default();

    Some(UserContext {
        uid,
        username,
        groups,
        pid,
        sandboxed: false,
    })
}
