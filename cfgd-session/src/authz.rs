//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Command authorisation and accounting wrappers.
//!
//! Every externally observable verb flows through [`run_command`]: the
//! command is tokenised with its secret mask, authorised, bracketed by
//! accounting, and logged to the user audit trail with secret tokens
//! masked. Nothing user-supplied executes before authorisation has
//! succeeded.

use std::future::Future;

use tracing::info;

use cfgd_utils::auth::{ArcAuther, CommandArgs, UserContext};
use cfgd_utils::mgmt::MgmtError;
use cfgd_utils::path::Path;
use cfgd_yang::{ModelSet, StepRole, View};

/// Verbs that skip command authorisation (they act on state the caller
/// already owns).
const ALLOW_LIST: [&str; 5] =
    ["commit", "commit-confirm", "confirm", "discard", "validate"];

/// Builds the tokenised command for a path-addressed verb, tagging value
/// tokens under secret-marked schema nodes.
pub fn command_args(
    schema: &ModelSet,
    verb: &str,
    path: &Path,
) -> CommandArgs {
    let mut args = CommandArgs::new([verb]);
    match schema.trace(path, View::Full) {
        Ok(steps) => {
            for step in steps {
                let secret = step.snode.ext.secret
                    && matches!(step.role, StepRole::Value);
                args.push(step.token, secret);
            }
        }
        // Unresolvable paths are authorised on their raw tokens; the
        // verb itself will fail schema lookup afterwards.
        Err(_) => {
            for token in path.iter() {
                args.push(token, false);
            }
        }
    }
    args
}

/// Runs a verb under command authorisation and accounting.
pub async fn run_command<F, T>(
    auther: &ArcAuther,
    ctx: &UserContext,
    args: CommandArgs,
    work: F,
) -> Result<T, MgmtError>
where
    F: Future<Output = Result<T, MgmtError>>,
{
    let verb = args
        .tokens
        .first()
        .map(|token| token.text.clone())
        .unwrap_or_default();

    if !ALLOW_LIST.contains(&verb.as_str())
        && !auther.authorize_command(ctx, &args).await
    {
        info!(target: "audit", user = %ctx.username, cmd = %args.redacted(),
            "command denied");
        return Err(MgmtError::access_denied());
    }

    let task = auther.account_start(ctx, &args).await;
    let result = work.await;
    auther
        .account_stop(ctx, task, result.as_ref().err())
        .await;

    info!(target: "audit", user = %ctx.username, cmd = %args.redacted(),
        ok = %result.is_ok(), "command");

    result
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cfgd_utils::auth::OpenAuther;
    use cfgd_yang::{DataType, ExtensionSet, SchemaNode};

    use super::*;

    #[test]
    fn secret_tokens_masked() {
        let schema = ModelSet::new(
            SchemaNode::tree().with_child(
                SchemaNode::container("user").with_child(
                    SchemaNode::leaf("password", DataType::string())
                        .with_ext(ExtensionSet::default().with_secret()),
                ),
            ),
        );
        let path = Path::new(["user", "password", "hunter2"]);
        let args = command_args(&schema, "set", &path);
        assert_eq!(args.redacted(), "set user password **");
        assert_eq!(args.plain(), "set user password hunter2");
    }

    #[tokio::test]
    async fn allow_list_skips_authorisation() {
        struct DenyAll;
        #[async_trait::async_trait]
        impl cfgd_utils::auth::Auther for DenyAll {
            async fn authorize_command(
                &self,
                _: &UserContext,
                _: &CommandArgs,
            ) -> bool {
                false
            }
            async fn authorize_path(
                &self,
                _: &UserContext,
                _: &Path,
                _: cfgd_utils::auth::Permission,
            ) -> bool {
                false
            }
            async fn authorize_rpc(
                &self,
                _: &UserContext,
                _: &str,
                _: &str,
            ) -> bool {
                false
            }
            async fn account_start(
                &self,
                _: &UserContext,
                _: &CommandArgs,
            ) -> cfgd_utils::auth::AccountTask {
                cfgd_utils::auth::AccountTask(0)
            }
            async fn account_stop(
                &self,
                _: &UserContext,
                _: cfgd_utils::auth::AccountTask,
                _: Option<&MgmtError>,
            ) {
            }
            fn allows_secrets(&self, _: &UserContext) -> bool {
                false
            }
        }

        let ctx = UserContext::system();
        let deny: ArcAuther = Arc::new(DenyAll);

        // A denied ordinary verb.
        let result = run_command(
            &deny,
            &ctx,
            CommandArgs::new(["set", "x"]),
            async { Ok(()) },
        )
        .await;
        assert!(result.is_err());

        // Allow-listed verbs run regardless.
        let result = run_command(
            &deny,
            &ctx,
            CommandArgs::new(["commit"]),
            async { Ok(()) },
        )
        .await;
        assert!(result.is_ok());

        let open: ArcAuther = Arc::new(OpenAuther::default());
        let result = run_command(
            &open,
            &ctx,
            CommandArgs::new(["set", "x"]),
            async { Ok(42) },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }
}
