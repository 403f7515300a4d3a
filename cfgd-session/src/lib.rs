//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod authz;
pub mod commit;
pub mod completion;
pub mod component;
pub mod confirmed;
mod debug;
pub mod error;
pub mod manager;
pub mod rpc;
pub mod running;
pub mod session;
pub mod state;

use std::sync::Arc;

use cfgd_utils::auth::ArcAuther;
use cfgd_utils::script::Scripts;
use cfgd_yang::ModelSet;

use crate::component::ComponentRegistry;
use crate::confirmed::ConfirmedCommit;
use crate::running::CommitManager;

/// Client-chosen session identifier.
pub type SessionId = String;

/// The read-only snapshot session over the running configuration.
pub const RUNNING_SESSION: &str = "RUNNING";
/// The read-only session exposing the effective (running) configuration.
pub const EFFECTIVE_SESSION: &str = "EFFECTIVE";

/// The process-wide subsystems, initialised once at boot and shared by
/// reference everywhere. Tests construct their own instance with doubles
/// plugged in.
pub struct Shared {
    pub schema: Arc<ModelSet>,
    pub auther: ArcAuther,
    pub scripts: Arc<dyn Scripts>,
    pub commitd: Arc<CommitManager>,
    pub components: Arc<ComponentRegistry>,
    pub confirmed: Arc<ConfirmedCommit>,
}
