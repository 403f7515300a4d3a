//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! The session manager: registry of candidate sessions, pid-owned
//! cooperative locks, and the permanently locked RUNNING and EFFECTIVE
//! pseudo-sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use cfgd_config::Union;

use crate::error::{Error, Result};
use crate::session::{Session, Sharing};
use crate::{EFFECTIVE_SESSION, RUNNING_SESSION, SessionId, Shared};

pub struct SessionManager {
    shared: Arc<Shared>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

// ===== impl SessionManager =====

impl SessionManager {
    /// Creates the registry with the two system pseudo-sessions already
    /// installed.
    pub fn new(shared: Arc<Shared>) -> SessionManager {
        let mut sessions = HashMap::new();
        for id in [RUNNING_SESSION, EFFECTIVE_SESSION] {
            let union = Union::new(
                shared.schema.clone(),
                shared.commitd.snapshot(),
            );
            sessions.insert(
                id.to_owned(),
                Arc::new(Session::system(id.to_owned(), union)),
            );
        }
        SessionManager {
            shared,
            sessions: Mutex::new(sessions),
        }
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Registers a new session owned by `pid`.
    pub fn create(
        &self,
        id: SessionId,
        pid: u32,
        sharing: Sharing,
    ) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&id) {
            return Err(Error::SessionExists(id).into());
        }

        debug!(%id, %pid, ?sharing, "creating session");
        let union = Union::new(
            self.shared.schema.clone(),
            self.shared.commitd.snapshot(),
        );
        let session =
            Arc::new(Session::new(id.clone(), pid, sharing, union));
        sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Looks up a session. Unknown ids and the system ids fall back to
    /// the running snapshot session.
    pub fn get(&self, id: &str) -> Arc<Session> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(id)
            .or_else(|| sessions.get(RUNNING_SESSION))
            .cloned()
            .expect("RUNNING session always exists")
    }

    /// Looks up a session strictly, without the running fallback.
    pub fn find(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Creates the session on first use, attaching to an existing shared
    /// session when the id is already registered.
    pub fn setup(
        &self,
        id: SessionId,
        pid: u32,
        sharing: Sharing,
    ) -> Result<Arc<Session>> {
        if let Some(existing) = self.find(&id) {
            if existing.is_system() {
                return Err(Error::SystemSession(id).into());
            }
            if existing.sharing() == Sharing::Unshared
                && existing.owner() != pid
            {
                return Err(Error::SessionExists(id).into());
            }
            return Ok(existing);
        }
        self.create(id, pid, sharing)
    }

    /// Destroys a session. Forbidden on the system sessions. Releases a
    /// pending confirmed commit owned by the session (absent a
    /// persist-id, which survives its creator).
    pub fn destroy(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get(id) else {
            return Err(Error::SessionNotFound(id.to_owned()).into());
        };
        if session.is_system() {
            return Err(Error::SystemSession(id.to_owned()).into());
        }

        info!(%id, "destroying session");
        sessions.remove(id);
        drop(sessions);

        self.shared.confirmed.session_closed(&id.to_owned());
        Ok(())
    }

    pub async fn lock(&self, id: &str, pid: u32) -> Result<()> {
        let Some(session) = self.find(id) else {
            return Err(Error::SessionNotFound(id.to_owned()).into());
        };
        if session.is_system() {
            return Err(Error::SystemSession(id.to_owned()).into());
        }
        session.lock(pid).await
    }

    pub async fn unlock(&self, id: &str, pid: u32) -> Result<()> {
        let Some(session) = self.find(id) else {
            return Err(Error::SessionNotFound(id.to_owned()).into());
        };
        session.unlock(pid).await
    }

    pub async fn locked(&self, id: &str) -> Result<Option<u32>> {
        let Some(session) = self.find(id) else {
            return Err(Error::SessionNotFound(id.to_owned()).into());
        };
        Ok(session.locked().await)
    }

    /// Connection-teardown cleanup: releases every lock held by the pid.
    /// Candidates stay intact for the next connection with the same
    /// session id.
    pub async fn unlock_all_pid(&self, pid: u32) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().unwrap().values().cloned().collect();
        for session in sessions {
            session.unlock_pid(pid).await;
        }
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }
}
