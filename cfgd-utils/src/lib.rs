//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod auth;
pub mod capabilities;
pub mod mgmt;
pub mod path;
pub mod script;
pub mod task;

use tokio::sync::oneshot;

/// Channel used to return a response to an asynchronous request.
pub type Responder<T> = oneshot::Sender<T>;
