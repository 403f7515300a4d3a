//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span, trace_span, trace};

use cfgd_config::diff::ChangeOp;

#[derive(Debug)]
pub enum Debug<'a> {
    SessionVerb(&'a str, &'a str),
    CommitChange(ChangeOp, u32, &'a str),
    CommitDispatch(&'a str, u32),
    CommitScript(&'a str, &'a str),
    StateScript(&'a str),
    ConfirmedCommitArmed(u32),
}

// ===== impl Debug =====

impl<'a> Debug<'a> {
    pub fn log(&self) {
        match self {
            Debug::SessionVerb(session, verb) => {
                debug_span!("session").in_scope(|| {
                    debug!(%session, %verb, "{}", self);
                });
            }
            Debug::CommitChange(op, priority, path) => {
                debug_span!("commit").in_scope(|| {
                    debug!(?op, %priority, %path, "{}", self);
                });
            }
            Debug::CommitDispatch(model, priority) => {
                debug_span!("commit").in_scope(|| {
                    debug!(%model, %priority, "{}", self);
                });
            }
            Debug::CommitScript(phase, path) => {
                debug_span!("commit").in_scope(|| {
                    debug!(%phase, %path, "{}", self);
                });
            }
            Debug::StateScript(path) => {
                trace_span!("state").in_scope(|| {
                    trace!(%path, "{}", self);
                });
            }
            Debug::ConfirmedCommitArmed(minutes) => {
                debug_span!("commit").in_scope(|| {
                    debug!(%minutes, "{}", self);
                });
            }
        }
    }
}

impl<'a> std::fmt::Display for Debug<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionVerb(..) => {
                write!(f, "processing verb")
            }
            Debug::CommitChange(..) => {
                write!(f, "planned change")
            }
            Debug::CommitDispatch(..) => {
                write!(f, "dispatching to component")
            }
            Debug::CommitScript(..) => {
                write!(f, "running commit script")
            }
            Debug::StateScript(..) => {
                write!(f, "running state script")
            }
            Debug::ConfirmedCommitArmed(..) => {
                write!(f, "confirmed commit armed")
            }
        }
    }
}
