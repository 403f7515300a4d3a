//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::auth::UserContext;

/// Parsed schema extension command (e.g. a `normalize` or `begin` script).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
}

/// Captured result of a script run.
#[derive(Clone, Debug, Default)]
pub struct ScriptOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Script execution seam. The daemon installs [`SystemScripts`]; tests
/// install an in-process fake so no subprocess is ever spawned.
#[async_trait]
pub trait Scripts: Send + Sync {
    async fn run(
        &self,
        cmd: &Cmd,
        caller: &UserContext,
        env: &[(String, String)],
        input: Option<&str>,
    ) -> std::io::Result<ScriptOutput>;
}

/// Runs scripts as subprocesses. Commands issued on behalf of a
/// non-privileged caller drop to the caller's uid on the child process
/// itself, so no intermediate setuid helper (and no window in which a
/// filesystem race could swap the helper) is involved.
#[derive(Debug, Default)]
pub struct SystemScripts {}

// ===== impl Cmd =====

impl Cmd {
    /// Parses an extension command string into program and arguments.
    /// Double-quoted arguments may contain spaces.
    pub fn parse(s: &str) -> Option<Cmd> {
        let mut words = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        for c in s.chars() {
            match c {
                '"' => quoted = !quoted,
                c if c.is_whitespace() && !quoted => {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            words.push(current);
        }

        let mut words = words.into_iter();
        let program = words.next()?;
        Some(Cmd {
            program,
            args: words.collect(),
        })
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ===== impl ScriptOutput =====

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

// ===== impl SystemScripts =====

#[async_trait]
impl Scripts for SystemScripts {
    async fn run(
        &self,
        cmd: &Cmd,
        caller: &UserContext,
        env: &[(String, String)],
        input: Option<&str>,
    ) -> std::io::Result<ScriptOutput> {
        debug!(cmd = %cmd, uid = %caller.uid, "running script");

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in env {
            command.env(name, value);
        }
        if !caller.is_privileged() {
            command.uid(caller.uid);
        }

        let mut child = command.spawn()?;
        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
            }
        }
        let output = child.wait_with_output().await?;

        Ok(ScriptOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_parse() {
        let cmd = Cmd::parse("/opt/cfgd/bin/normalize --lower").unwrap();
        assert_eq!(cmd.program, "/opt/cfgd/bin/normalize");
        assert_eq!(cmd.args, ["--lower"]);

        let cmd = Cmd::parse(r#"check "a b" c"#).unwrap();
        assert_eq!(cmd.args, ["a b", "c"]);

        assert!(Cmd::parse("   ").is_none());
    }
}
