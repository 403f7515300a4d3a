//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Boundary to the out-of-process components that realise the
//! configuration. The commit engine only sees this trait; the transport
//! behind it (the component bus) lives outside the daemon. Tests install
//! in-process doubles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use cfgd_utils::mgmt::MgmtError;

/// Component call failure. Transport errors are retriable and reported as
/// partial; business errors are commit errors attributed to the model.
#[derive(Clone, Debug)]
pub enum ComponentError {
    Transport(String),
    Business(String),
}

/// One registered component, owning the models (YANG modules) it
/// realises.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// YANG module names this component owns.
    fn models(&self) -> Vec<String>;

    async fn dial(&self) -> Result<(), ComponentError>;

    /// Dry-run acceptance check of a model's prospective configuration.
    async fn check_config(
        &self,
        model: &str,
        config: &Value,
    ) -> Result<(), ComponentError>;

    /// Applies a model's configuration.
    async fn set_config(
        &self,
        model: &str,
        config: &Value,
    ) -> Result<(), ComponentError>;

    /// Reads back the configuration the component currently holds.
    async fn store_config_into(
        &self,
        model: &str,
    ) -> Result<Value, ComponentError>;

    /// Reads the component's operational state for a model.
    async fn store_state_into(
        &self,
        model: &str,
    ) -> Result<Value, ComponentError>;

    /// Invokes a YANG RPC owned by this component.
    async fn call_rpc(
        &self,
        model: &str,
        rpc: &str,
        input: &Value,
    ) -> Result<Value, ComponentError>;
}

/// Registry mapping modules to their owning component.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: Vec<Arc<dyn Component>>,
    by_module: HashMap<String, Arc<dyn Component>>,
}

// ===== impl ComponentError =====

impl ComponentError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ComponentError::Transport(_))
    }

    /// Converts a component failure into a commit error for the model.
    pub fn to_mgmt(&self, model: &str) -> MgmtError {
        match self {
            ComponentError::Transport(message) => {
                MgmtError::operation_failed(format!(
                    "Component for model '{model}' unreachable: {message}"
                ))
            }
            ComponentError::Business(message) => {
                MgmtError::operation_failed(format!(
                    "Commit failed for model '{model}': {message}"
                ))
            }
        }
    }
}

impl std::fmt::Display for ComponentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentError::Transport(message) => {
                write!(f, "transport error: {message}")
            }
            ComponentError::Business(message) => {
                write!(f, "component error: {message}")
            }
        }
    }
}

impl std::error::Error for ComponentError {}

// ===== impl ComponentRegistry =====

impl ComponentRegistry {
    pub fn new() -> ComponentRegistry {
        ComponentRegistry::default()
    }

    pub fn register(&mut self, component: Arc<dyn Component>) {
        for model in component.models() {
            self.by_module.insert(model, component.clone());
        }
        self.components.push(component);
    }

    pub fn for_module(&self, module: &str) -> Option<&Arc<dyn Component>> {
        self.by_module.get(module)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Component>> {
        self.components.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
