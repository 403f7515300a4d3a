//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use cfgd_utils::mgmt::MgmtError;

use crate::SessionId;

//
// Type aliases.
//
pub type Result<T> = std::result::Result<T, MgmtError>;

//
// Session-manager errors, converted to management errors at the command
// surface.
//
#[derive(Debug)]
pub enum Error {
    SessionExists(SessionId),
    SessionNotFound(SessionId),
    LockHeldByOther(SessionId, u32),
    SystemSession(SessionId),
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::SessionExists(id) => {
                write!(f, "Session '{id}' already exists")
            }
            Error::SessionNotFound(id) => {
                write!(f, "Session '{id}' not found")
            }
            Error::LockHeldByOther(id, pid) => {
                write!(f, "Session '{id}' is locked by process {pid}")
            }
            Error::SystemSession(id) => {
                write!(f, "Operation not supported on system session '{id}'")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for MgmtError {
    fn from(error: Error) -> MgmtError {
        match &error {
            Error::SessionExists(_)
            | Error::SessionNotFound(_)
            | Error::LockHeldByOther(..) => {
                MgmtError::operation_failed(error.to_string())
            }
            Error::SystemSession(_) => {
                MgmtError::operation_not_supported(error.to_string())
            }
        }
    }
}
