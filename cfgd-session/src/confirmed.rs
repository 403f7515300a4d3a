//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Confirmed-commit controller.
//!
//! A confirmed commit arms a revert timer and persists a small pending
//! record so an unconfirmed commit can be rolled back even across a
//! daemon restart. The controller only raises the timeout event; the
//! owning event loop performs the revert through the commit engine.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tracing::{debug, warn};

use cfgd_config::Node;
use cfgd_utils::mgmt::MgmtError;
use cfgd_utils::task::TimeoutTask;

use crate::SessionId;

/// Name of the persisted pending-commit record inside the config
/// directory.
pub const PENDING_FILE: &str = "confirmed_commit.job";

/// The persisted record: absent file means no pending confirmed commit.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PendingRecord {
    pub session: SessionId,
    #[serde(rename = "persist-id", skip_serializing_if = "Option::is_none")]
    pub persist_id: Option<String>,
}

struct Pending {
    record: PendingRecord,
    /// Snapshot to restore when the timer fires.
    rollback: Node,
    _timeout: TimeoutTask,
}

pub struct ConfirmedCommit {
    path: PathBuf,
    tx: Sender<()>,
    pending: Mutex<Option<Pending>>,
}

/// Outcome of checking a new commit against a pending confirmed commit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Precheck {
    /// No pending confirmed commit, or the commit is a fresh
    /// confirmed-commit renewal.
    Clear,
    /// The commit is the confirming commit; the caller clears the timer
    /// with [`ConfirmedCommit::clear_pending`] once the commit is known
    /// good.
    Confirms,
}

// ===== impl ConfirmedCommit =====

impl ConfirmedCommit {
    /// Creates the controller and the timeout event stream its owner
    /// selects on.
    pub fn new(config_dir: impl Into<PathBuf>) -> (ConfirmedCommit, Receiver<()>) {
        let (tx, rx) = channel(4);
        let controller = ConfirmedCommit {
            path: config_dir.into().join(PENDING_FILE),
            tx,
            pending: Mutex::new(None),
        };
        (controller, rx)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    /// Validates an incoming commit against the pending record, per the
    /// confirming/foreign-session rules. Does not mutate the pending
    /// state.
    pub fn check(
        &self,
        session: &SessionId,
        persist_id: Option<&str>,
        renew: bool,
    ) -> Result<Precheck, MgmtError> {
        let pending = self.pending.lock().unwrap();
        let Some(current) = pending.as_ref() else {
            return Ok(Precheck::Clear);
        };

        match (persist_id, &current.record.persist_id) {
            // No persist-id: only the initiating session may confirm.
            (None, None) => {
                if session != &current.record.session {
                    return Err(MgmtError::access_denied().with_message(
                        "A confirmed commit by another session is pending",
                    ));
                }
            }
            (Some(given), Some(expected)) => {
                if given != expected {
                    return Err(MgmtError::invalid_value(
                        &cfgd_utils::path::Path::root(),
                        "persist-id does not match the pending confirmed \
                         commit",
                    ));
                }
            }
            (None, Some(_)) => {
                return Err(MgmtError::invalid_value(
                    &cfgd_utils::path::Path::root(),
                    "The pending confirmed commit requires a persist-id",
                ));
            }
            (Some(_), None) => {
                return Err(MgmtError::invalid_value(
                    &cfgd_utils::path::Path::root(),
                    "No persist-id was recorded for the pending confirmed \
                     commit",
                ));
            }
        }

        if renew {
            // A fresh confirmed commit by the owner restarts the window;
            // `arm` replaces the pending state.
            return Ok(Precheck::Clear);
        }

        Ok(Precheck::Confirms)
    }

    /// Clears the pending commit once its confirming commit succeeded.
    pub fn clear_pending(&self) {
        debug!("confirmed commit accepted");
        *self.pending.lock().unwrap() = None;
        self.clear_record();
    }

    /// Arms (or re-arms) the revert timer and persists the pending
    /// record.
    pub fn arm(
        &self,
        session: SessionId,
        persist_id: Option<String>,
        rollback: Node,
        minutes: u32,
    ) {
        let record = PendingRecord {
            session,
            persist_id,
        };
        self.write_record(&record);

        let tx = self.tx.clone();
        let timeout = Duration::from_secs(minutes as u64 * 60);
        let timeout = TimeoutTask::new(timeout, move || async move {
            let _ = tx.send(()).await;
        });

        *self.pending.lock().unwrap() = Some(Pending {
            record,
            rollback,
            _timeout: timeout,
        });
    }

    /// Cancels the pending commit, returning the rollback snapshot for
    /// the caller to restore. Used by cancel-commit and by the timeout
    /// path itself.
    pub fn take_rollback(
        &self,
        persist_id: Option<&str>,
    ) -> Result<(SessionId, Node), MgmtError> {
        let mut pending = self.pending.lock().unwrap();
        let Some(current) = pending.as_ref() else {
            return Err(MgmtError::operation_failed(
                "No confirmed commit is pending",
            ));
        };
        if current.record.persist_id.as_deref() != persist_id {
            return Err(MgmtError::invalid_value(
                &cfgd_utils::path::Path::root(),
                "persist-id does not match the pending confirmed commit",
            ));
        }
        let current = pending.take().unwrap();
        self.clear_record();
        Ok((current.record.session, current.rollback))
    }

    /// Takes the pending commit unconditionally; the deadline path, where
    /// persist-id matching does not apply.
    pub fn take_expired(&self) -> Result<(SessionId, Node), MgmtError> {
        let mut pending = self.pending.lock().unwrap();
        let Some(current) = pending.take() else {
            return Err(MgmtError::operation_failed(
                "No confirmed commit is pending",
            ));
        };
        self.clear_record();
        Ok((current.record.session, current.rollback))
    }

    /// Releases the pending commit when its owning session goes away.
    /// Sessions with a persist-id survive their creator (the persist-id
    /// is the handle to confirm from elsewhere).
    pub fn session_closed(&self, session: &SessionId) -> bool {
        let pending = self.pending.lock().unwrap();
        let Some(current) = pending.as_ref() else {
            return false;
        };
        if &current.record.session != session
            || current.record.persist_id.is_some()
        {
            return false;
        }
        drop(pending);
        // Fire the revert through the owner's event loop.
        let _ = self.tx.try_send(());
        true
    }

    /// Drops a leftover on-disk record (startup recovery path).
    pub fn clear_stale_record(&self) {
        self.clear_record();
    }

    /// The pending record as read back from disk (daemon restart path).
    pub fn read_record(&self) -> Option<PendingRecord> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn write_record(&self, record: &PendingRecord) {
        let text = serde_json::to_string(record).unwrap();
        if let Err(error) = std::fs::write(&self.path, text) {
            warn!(path = %self.path.display(), %error,
                "failed to persist confirmed-commit record");
        }
    }

    fn clear_record(&self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %error,
                    "failed to clear confirmed-commit record");
            }
        }
    }
}
