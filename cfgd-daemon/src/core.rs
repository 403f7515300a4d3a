//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Daemon wiring: the four process-wide subsystems (schema facade,
//! commit manager, session manager, authorisation), the local-socket
//! front-end task, and the main event loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;
use tracing::{error, info, instrument, warn};

use cfgd_session::component::ComponentRegistry;
use cfgd_session::confirmed::ConfirmedCommit;
use cfgd_session::manager::SessionManager;
use cfgd_session::running::{CommitManager, Revision};
use cfgd_session::{Shared, commit};
use cfgd_utils::auth::{
    AccountTask, Auther, CommandArgs, Permission, UserContext,
};
use cfgd_utils::mgmt::MgmtError;
use cfgd_utils::path::Path;
use cfgd_utils::script::SystemScripts;
use cfgd_utils::task::Task;
use cfgd_yang::ModelSet;

use crate::client::unix;
use crate::config::Config;
use crate::error::{Error, Result};

pub struct Configd {
    manager: Arc<SessionManager>,
    // Confirmed-commit timeout events.
    confirmed_rx: Receiver<()>,
    // The local-socket front-end.
    _listener: Task<()>,
}

/// Default authorisation back-end: permits all operations, restricts
/// secret visibility to root and the secrets group. A real AAA plugin
/// replaces this through the same trait.
pub struct GroupAuther {
    secrets_group: String,
    super_group: String,
    next_task: AtomicU64,
}

// ===== impl Configd =====

impl Configd {
    pub(crate) async fn init(config: &Config) -> Result<Configd> {
        // Load the compiled schema and apply the enabled-features file.
        let mut modelset =
            ModelSet::load(&config.yangdir).map_err(Error::Schema)?;
        if let Ok(features) = std::fs::read_to_string(&config.capabilities)
        {
            for feature in features.lines() {
                let feature = feature.trim();
                if !feature.is_empty() {
                    modelset = modelset.with_feature(feature);
                }
            }
        }
        let schema = Arc::new(modelset);

        // Commit manager and boot configuration.
        let commitd = Arc::new(CommitManager::new(
            schema.clone(),
            &config.runfile,
            &config.archive_dir,
            config.archive_limit,
        ));
        commitd.load_boot().map_err(Error::BootConfig)?;

        let config_dir = std::path::Path::new(&config.runfile)
            .parent()
            .unwrap_or_else(|| std::path::Path::new("/config"))
            .to_owned();
        let (confirmed, confirmed_rx) = ConfirmedCommit::new(&config_dir);

        let shared = Arc::new(Shared {
            schema,
            auther: Arc::new(GroupAuther {
                secrets_group: config.secrets_group.clone(),
                super_group: config.super_group.clone(),
                next_task: AtomicU64::new(1),
            }),
            scripts: Arc::new(SystemScripts::default()),
            commitd,
            components: Arc::new(ComponentRegistry::new()),
            confirmed: Arc::new(confirmed),
        });

        // A pending confirmed-commit record from a previous run means
        // the daemon died before the commit was confirmed: restore the
        // previous revision.
        if let Some(record) = shared.confirmed.read_record() {
            warn!(session = %record.session,
                "unconfirmed commit from previous run, reverting");
            revert_stale_commit(&shared);
        }

        let manager = Arc::new(SessionManager::new(shared));

        // Start serving front-end connections.
        let listener = unix::start(&config.socket, manager.clone()).await?;

        Ok(Configd {
            manager,
            confirmed_rx,
            _listener: listener,
        })
    }

    // Main event loop.
    #[instrument(skip_all, name = "cfgd")]
    pub(crate) async fn run(mut self) {
        let mut sigint = tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::interrupt(),
        )
        .expect("failed to install SIGINT handler");
        let mut sigterm = tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )
        .expect("failed to install SIGTERM handler");
        let mut sigusr1 = tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::user_defined1(),
        )
        .expect("failed to install SIGUSR1 handler");
        let mut sigusr2 = tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::user_defined2(),
        )
        .expect("failed to install SIGUSR2 handler");

        loop {
            tokio::select! {
                Some(_) = self.confirmed_rx.recv() => {
                    let shared = self.manager.shared();
                    if let Err(error) =
                        commit::revert_expired(shared).await
                    {
                        error!(%error,
                            "failed to revert unconfirmed commit");
                    }
                }
                _ = sigusr1.recv() => {
                    // Diagnostic toggle: dump the session registry.
                    for id in self.manager.ids() {
                        info!(session = %id, "active session");
                    }
                }
                _ = sigusr2.recv() => {
                    let running =
                        self.manager.shared().commitd.render_running();
                    info!(bytes = running.len(),
                        "running configuration snapshot");
                }
                _ = sigint.recv() => break,
                _ = sigterm.recv() => break,
            }
        }

        info!("shutting down");
    }
}

// ===== impl GroupAuther =====

#[async_trait]
impl Auther for GroupAuther {
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
            || ctx.in_group(&self.secrets_group)
            || ctx.in_group(&self.super_group)
    }
}

// ===== helper functions =====

/// Restores the newest-but-one archive revision after finding a stale
/// confirmed-commit record at startup.
fn revert_stale_commit(shared: &Arc<Shared>) {
    let archive = shared.commitd.archive();
    let revisions: Vec<u32> = archive.log().keys().copied().collect();
    let Some(previous) = revisions.iter().rev().nth(1).copied() else {
        warn!("no previous revision to revert to, keeping current");
        shared.confirmed.clear_stale_record();
        return;
    };

    match shared.commitd.revision_tree(&Revision::Number(previous)) {
        Ok(tree) => {
            shared.commitd.publish(Arc::new(tree));
            if let Err(error) = shared.commitd.save_boot() {
                error!(%error, "failed to save reverted configuration");
            }
            info!(%previous, "reverted to archived revision");
        }
        Err(error) => {
            error!(%error, "failed to load previous revision");
        }
    }
    shared.confirmed.clear_stale_record();
}
