//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//
// Type aliases.
//
pub type Result<T> = std::result::Result<T, Error>;

//
// Daemon initialisation and front-end errors.
//
#[derive(Debug)]
pub enum Error {
    Schema(cfgd_yang::Error),
    BootConfig(cfgd_utils::mgmt::MgmtError),
    Io(std::io::Error),
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Schema(err) => {
                write!(f, "failed to load compiled schema: {err}")
            }
            Error::BootConfig(err) => {
                write!(f, "failed to load boot configuration: {err}")
            }
            Error::Io(err) => {
                write!(f, "I/O error: {err}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
