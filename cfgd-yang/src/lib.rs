//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod ext;
pub mod node;
pub mod types;
pub mod xpath;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};

use cfgd_utils::path::Path;

pub use crate::ext::ExtensionSet;
pub use crate::node::{
    Must, NodeKind, Resolved, ResolveError, SchemaNode, Step, StepRole, View,
};
pub use crate::types::DataType;

/// Name of the compiled-schema artifact the YANG compiler leaves in the
/// schema directory.
pub const MODELSET_FILE: &str = "modelset.json";

/// A compiled YANG module or submodule.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Module {
    pub identifier: String,
    pub namespace: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deviations: Vec<String>,
}

/// A compiled RPC definition.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Rpc {
    pub name: String,
    pub module: String,
    pub namespace: String,
    pub input: SchemaNode,
    pub output: SchemaNode,
}

/// A compiled notification definition.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Notification {
    pub name: String,
    pub module: String,
    pub namespace: String,
    pub payload: SchemaNode,
}

/// The read-only compiled schema tree the daemon was started against.
///
/// Immutable after startup; every subsystem holds it by shared reference.
/// The `View` argument of the lookup operations selects between the
/// config-only and the config+state projections.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ModelSet {
    root: SchemaNode,
    modules: BTreeMap<String, Module>,
    #[serde(default)]
    submodules: BTreeMap<String, Module>,
    #[serde(default)]
    rpcs: BTreeMap<String, BTreeMap<String, Rpc>>,
    #[serde(default)]
    notifications: BTreeMap<String, BTreeMap<String, Notification>>,
    #[serde(default)]
    features: BTreeSet<String>,
}

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Parse(serde_json::Error),
    BadRoot,
}

// ===== impl ModelSet =====

impl ModelSet {
    pub fn new(root: SchemaNode) -> ModelSet {
        ModelSet {
            root,
            modules: BTreeMap::new(),
            submodules: BTreeMap::new(),
            rpcs: BTreeMap::new(),
            notifications: BTreeMap::new(),
            features: BTreeSet::new(),
        }
    }

    /// Loads the compiled-schema artifact from the schema directory.
    pub fn load(yangdir: impl AsRef<FsPath>) -> Result<ModelSet, Error> {
        let path = yangdir.as_ref().join(MODELSET_FILE);
        let data = std::fs::read_to_string(path).map_err(Error::Io)?;
        let modelset: ModelSet =
            serde_json::from_str(&data).map_err(Error::Parse)?;
        if modelset.root.kind != NodeKind::Tree {
            return Err(Error::BadRoot);
        }
        Ok(modelset)
    }

    #[must_use]
    pub fn with_module(
        mut self,
        identifier: impl Into<String>,
        namespace: impl Into<String>,
        version: impl Into<String>,
    ) -> ModelSet {
        let module = Module {
            identifier: identifier.into(),
            namespace: namespace.into(),
            version: version.into(),
            features: Vec::new(),
            deviations: Vec::new(),
        };
        self.modules.insert(module.identifier.clone(), module);
        self
    }

    #[must_use]
    pub fn with_submodule(mut self, submodule: Module) -> ModelSet {
        self.submodules
            .insert(submodule.identifier.clone(), submodule);
        self
    }

    #[must_use]
    pub fn with_rpc(mut self, rpc: Rpc) -> ModelSet {
        self.rpcs
            .entry(rpc.namespace.clone())
            .or_default()
            .insert(rpc.name.clone(), rpc);
        self
    }

    #[must_use]
    pub fn with_notification(mut self, notification: Notification) -> ModelSet {
        self.notifications
            .entry(notification.namespace.clone())
            .or_default()
            .insert(notification.name.clone(), notification);
        self
    }

    #[must_use]
    pub fn with_feature(mut self, feature: impl Into<String>) -> ModelSet {
        self.features.insert(feature.into());
        self
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn submodules(&self) -> impl Iterator<Item = &Module> {
        self.submodules.values()
    }

    pub fn module(&self, identifier: &str) -> Option<&Module> {
        self.modules.get(identifier)
    }

    pub fn module_by_namespace(&self, namespace: &str) -> Option<&Module> {
        self.modules
            .values()
            .find(|module| module.namespace == namespace)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// RPC definitions grouped by namespace.
    pub fn rpcs(&self) -> &BTreeMap<String, BTreeMap<String, Rpc>> {
        &self.rpcs
    }

    pub fn notifications(
        &self,
    ) -> &BTreeMap<String, BTreeMap<String, Notification>> {
        &self.notifications
    }

    /// RPC lookup by namespace (xml/netconf encodings).
    pub fn rpc_by_namespace(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<&Rpc> {
        self.rpcs.get(namespace)?.get(name)
    }

    /// RPC lookup by module name (json/rfc7951 encodings).
    pub fn rpc_by_module(&self, module: &str, name: &str) -> Option<&Rpc> {
        self.rpcs
            .values()
            .flat_map(|rpcs| rpcs.values())
            .find(|rpc| rpc.module == module && rpc.name == name)
    }

    pub fn resolve<'a>(
        &'a self,
        path: &'a Path,
        view: View,
    ) -> Result<Resolved<'a>, ResolveError> {
        self.root.resolve(path, view)
    }

    pub fn trace<'a>(
        &'a self,
        path: &'a Path,
        view: View,
    ) -> Result<Vec<Step<'a>>, ResolveError> {
        self.root.trace(path, view)
    }

    pub fn descendant(&self, path: &Path, view: View) -> Option<&SchemaNode> {
        self.root.descendant(path, view)
    }

    /// The schema-revision trailer recorded at the end of saved
    /// configuration files.
    pub fn config_version_string(&self) -> String {
        self.modules
            .values()
            .map(|module| format!("{}@{}", module.identifier, module.version))
            .collect::<Vec<_>>()
            .join(":")
    }
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => {
                write!(f, "failed to read compiled schema: {err}")
            }
            Error::Parse(err) => {
                write!(f, "failed to parse compiled schema: {err}")
            }
            Error::BadRoot => {
                write!(f, "compiled schema root is not a tree node")
            }
        }
    }
}

impl std::error::Error for Error {}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modelset_roundtrip() {
        let modelset = ModelSet::new(SchemaNode::tree().with_child(
            SchemaNode::container("system").with_child(SchemaNode::leaf(
                "host-name",
                DataType::string(),
            )),
        ))
        .with_module("cfgd-system", "urn:cfgd:system", "2024-06-01");

        let json = serde_json::to_string(&modelset).unwrap();
        let reloaded: ModelSet = serde_json::from_str(&json).unwrap();
        assert_eq!(modelset, reloaded);
        assert_eq!(
            reloaded.config_version_string(),
            "cfgd-system@2024-06-01"
        );
    }

    #[test]
    fn rpc_lookup() {
        let modelset = ModelSet::new(SchemaNode::tree())
            .with_module("cfgd-ping", "urn:cfgd:ping", "2024-06-01")
            .with_rpc(Rpc {
                name: "ping".to_owned(),
                module: "cfgd-ping".to_owned(),
                namespace: "urn:cfgd:ping".to_owned(),
                input: SchemaNode::rpc("input"),
                output: SchemaNode::rpc("output"),
            });

        assert!(modelset.rpc_by_namespace("urn:cfgd:ping", "ping").is_some());
        assert!(modelset.rpc_by_module("cfgd-ping", "ping").is_some());
        assert!(modelset.rpc_by_module("cfgd-ping", "traceroute").is_none());
    }
}
