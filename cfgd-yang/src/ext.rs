//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

use cfgd_utils::script::Cmd;

/// Per-node extension payload.
///
/// The compiler folds the vendor extension statements into this fixed,
/// enumerated struct; nothing here is interpreted reflectively at runtime.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default)]
pub struct ExtensionSet {
    /// One-line help text shown by completion.
    pub help: Option<String>,
    /// Values under this node are redacted for callers outside the
    /// secrets group.
    pub secret: bool,
    /// Commit ordering priority, lower first.
    pub priority: u32,
    /// Value canonicalisation script. Must be idempotent.
    pub normalize: Option<Cmd>,
    /// Completion-candidate script for values the schema cannot enumerate.
    pub allowed: Option<Cmd>,
    /// Script run before this node's subtree is dispatched on commit.
    pub begin: Option<Cmd>,
    /// Script run after this node's subtree is dispatched on commit.
    pub end: Option<Cmd>,
    /// Command substitution hook run on behalf of the caller.
    pub subst: Option<Cmd>,
    /// Operational-state script merged by get-full-tree.
    pub state: Option<Cmd>,
    /// A non-zero script exit fails the commit instead of warning.
    pub script_fatal: bool,
}

// ===== impl ExtensionSet =====

impl ExtensionSet {
    pub fn with_help(mut self, help: impl Into<String>) -> ExtensionSet {
        self.help = Some(help.into());
        self
    }

    pub fn with_secret(mut self) -> ExtensionSet {
        self.secret = true;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> ExtensionSet {
        self.priority = priority;
        self
    }

    pub fn with_normalize(mut self, cmd: Cmd) -> ExtensionSet {
        self.normalize = Some(cmd);
        self
    }

    pub fn with_allowed(mut self, cmd: Cmd) -> ExtensionSet {
        self.allowed = Some(cmd);
        self
    }

    pub fn with_begin(mut self, cmd: Cmd) -> ExtensionSet {
        self.begin = Some(cmd);
        self
    }

    pub fn with_end(mut self, cmd: Cmd) -> ExtensionSet {
        self.end = Some(cmd);
        self
    }

    pub fn with_state(mut self, cmd: Cmd) -> ExtensionSet {
        self.state = Some(cmd);
        self
    }

    pub fn with_script_fatal(mut self) -> ExtensionSet {
        self.script_fatal = true;
        self
    }
}
