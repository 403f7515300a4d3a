//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mgmt::MgmtError;
use crate::path::Path;

/// Replacement text used whenever a secret value must be rendered for a
/// caller outside the secrets group.
pub const REDACTED: &str = "**";

/// Identity of the client a request is executed on behalf of.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UserContext {
    pub uid: u32,
    pub username: String,
    pub groups: Vec<String>,
    pub pid: u32,
    /// Sandboxed callers may only load from and save to the config
    /// directory.
    pub sandboxed: bool,
}

/// Path permission classes checked by the data-authorisation hook.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Permission {
    Read,
    Create,
    Update,
    Delete,
}

/// One token of an externally observable command, tagged when it carries a
/// secret value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandToken {
    pub text: String,
    pub secret: bool,
}

/// A fully tokenised command as submitted to command authorisation and
/// accounting.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandArgs {
    pub tokens: Vec<CommandToken>,
}

/// Accounting handle returned by `account_start` and redeemed by
/// `account_stop`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccountTask(pub u64);

/// Pluggable authorisation and accounting back-end.
///
/// The daemon holds exactly one implementation for its lifetime; tests
/// substitute their own through the session-manager harness.
#[async_trait]
pub trait Auther: Send + Sync {
    async fn authorize_command(
        &self,
        ctx: &UserContext,
        args: &CommandArgs,
    ) -> bool;

    async fn authorize_path(
        &self,
        ctx: &UserContext,
        path: &Path,
        perm: Permission,
    ) -> bool;

    async fn authorize_rpc(
        &self,
        ctx: &UserContext,
        module: &str,
        rpc: &str,
    ) -> bool;

    async fn account_start(
        &self,
        ctx: &UserContext,
        args: &CommandArgs,
    ) -> AccountTask;

    async fn account_stop(
        &self,
        ctx: &UserContext,
        task: AccountTask,
        error: Option<&MgmtError>,
    );

    /// Whether the caller may see secret-tagged values unredacted.
    fn allows_secrets(&self, ctx: &UserContext) -> bool;
}

/// Default back-end: permits everything, reveals secrets only to root.
/// Accounting is satisfied by the audit log alone.
#[derive(Debug, Default)]
pub struct OpenAuther {
    next_task: AtomicU64,
}

pub type ArcAuther = Arc<dyn Auther>;

// ===== impl UserContext =====

impl UserContext {
    pub fn system() -> UserContext {
        UserContext {
            uid: 0,
            username: "root".to_owned(),
            groups: Vec::new(),
            pid: std::process::id(),
            sandboxed: false,
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn is_privileged(&self) -> bool {
        self.uid == 0
    }
}

// ===== impl CommandArgs =====

impl CommandArgs {
    pub fn new<I, S>(tokens: I) -> CommandArgs
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandArgs {
            tokens: tokens
                .into_iter()
                .map(|text| CommandToken {
                    text: text.into(),
                    secret: false,
                })
                .collect(),
        }
    }

    pub fn push(&mut self, text: impl Into<String>, secret: bool) {
        self.tokens.push(CommandToken {
            text: text.into(),
            secret,
        });
    }

    /// Rendering with secret tokens masked, for audit and accounting
    /// records.
    pub fn redacted(&self) -> String {
        self.tokens
            .iter()
            .map(|token| {
                if token.secret {
                    REDACTED
                } else {
                    token.text.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Unmasked rendering. Only ever sent to the authorisation back-end
    /// itself, never to logs.
    pub fn plain(&self) -> String {
        self.tokens
            .iter()
            .map(|token| token.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

// ===== impl OpenAuther =====

#[async_trait]
impl Auther for OpenAuther {
    async fn authorize_command(
        &self,
        _ctx: &UserContext,
        _args: &CommandArgs,
    ) -> bool {
        true
    }

    async fn authorize_path(
        &self,
        _ctx: &UserContext,
        _path: &Path,
        _perm: Permission,
    ) -> bool {
        true
    }

    async fn authorize_rpc(
        &self,
        _ctx: &UserContext,
        _module: &str,
        _rpc: &str,
    ) -> bool {
        true
    }

    async fn account_start(
        &self,
        _ctx: &UserContext,
        _args: &CommandArgs,
    ) -> AccountTask {
        AccountTask(self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    async fn account_stop(
        &self,
        _ctx: &UserContext,
        _task: AccountTask,
        _error: Option<&MgmtError>,
    ) {
    }

    fn allows_secrets(&self, ctx: &UserContext) -> bool {
        ctx.is_privileged()
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction() {
        let mut args = CommandArgs::new(["set", "user", "admin", "password"]);
        args.push("hunter2", true);
        assert_eq!(args.redacted(), "set user admin password **");
        assert_eq!(args.plain(), "set user admin password hunter2");
    }
}
