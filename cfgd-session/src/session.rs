//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! A session: one client's candidate configuration and the
//! schema-validated edit verbs over it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use cfgd_config::convert::{self, EditOp, MergePlan};
use cfgd_config::encoding::{self, Encoding};
use cfgd_config::union::ShowOpts;
use cfgd_config::{Status, Union, diff, parser, render, validate};
use cfgd_utils::auth::{Permission, UserContext};
use cfgd_utils::mgmt::{MgmtError, MgmtErrorList};
use cfgd_utils::path::Path;
use cfgd_utils::script::Cmd;
use cfgd_yang::{NodeKind, Resolved, ResolveError, StepRole, View};

use crate::debug::Debug;
use crate::error::Result;
use crate::running::Revision;
use crate::{SessionId, Shared};

/// Whether a session accepts additional attachments.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Sharing {
    Shared,
    Unshared,
}

/// Source argument of the load and merge verbs.
#[derive(Clone, Debug)]
pub enum LoadSource {
    Text(String),
    File(PathBuf),
}

pub struct Session {
    id: SessionId,
    owner: u32,
    sharing: Sharing,
    /// RUNNING and EFFECTIVE; permanently locked, mutation refused.
    system: bool,
    created: DateTime<Utc>,
    state: Mutex<SessionState>,
}

pub struct SessionState {
    pub union: Union,
    pub saved: bool,
    lock: Option<u32>,
}

// ===== impl Session =====

impl Session {
    pub fn new(
        id: SessionId,
        owner: u32,
        sharing: Sharing,
        union: Union,
    ) -> Session {
        Session {
            id,
            owner,
            sharing,
            system: false,
            created: Utc::now(),
            state: Mutex::new(SessionState {
                union,
                saved: true,
                lock: None,
            }),
        }
    }

    /// Creates one of the permanently locked system pseudo-sessions.
    pub fn system(id: SessionId, union: Union) -> Session {
        let pid = std::process::id();
        Session {
            id,
            owner: pid,
            sharing: Sharing::Shared,
            system: true,
            created: Utc::now(),
            state: Mutex::new(SessionState {
                union,
                saved: true,
                lock: Some(pid),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    pub fn sharing(&self) -> Sharing {
        self.sharing
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    // --- locking ---

    pub async fn lock(&self, pid: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.lock {
            Some(holder) if holder != pid => {
                Err(crate::error::Error::LockHeldByOther(
                    self.id.clone(),
                    holder,
                )
                .into())
            }
            _ => {
                state.lock = Some(pid);
                Ok(())
            }
        }
    }

    pub async fn unlock(&self, pid: u32) -> Result<()> {
        if self.system {
            return Err(
                crate::error::Error::SystemSession(self.id.clone()).into()
            );
        }
        let mut state = self.state.lock().await;
        match state.lock {
            Some(holder) if holder != pid => {
                Err(crate::error::Error::LockHeldByOther(
                    self.id.clone(),
                    holder,
                )
                .into())
            }
            _ => {
                state.lock = None;
                Ok(())
            }
        }
    }

    pub async fn locked(&self) -> Option<u32> {
        self.state.lock().await.lock
    }

    pub async fn unlock_pid(&self, pid: u32) {
        if self.system {
            return;
        }
        let mut state = self.state.lock().await;
        if state.lock == Some(pid) {
            state.lock = None;
        }
    }

    /// Takes the session state for a write verb: refuses system
    /// sessions and foreign lock holders, and rebases the candidate onto
    /// the latest running snapshot.
    pub(crate) async fn write_state(
        &self,
        shared: &Shared,
        ctx: &UserContext,
    ) -> Result<MutexGuard<'_, SessionState>> {
        if self.system {
            return Err(
                crate::error::Error::SystemSession(self.id.clone()).into()
            );
        }
        let mut state = self.state.lock().await;
        if let Some(holder) = state.lock {
            if holder != ctx.pid {
                return Err(crate::error::Error::LockHeldByOther(
                    self.id.clone(),
                    holder,
                )
                .into());
            }
        }
        state.union.rebase(shared.commitd.snapshot());
        Ok(state)
    }

    /// Takes the session state for a read verb (system sessions
    /// allowed).
    pub async fn read_state(
        &self,
        shared: &Shared,
    ) -> MutexGuard<'_, SessionState> {
        let mut state = self.state.lock().await;
        state.union.rebase(shared.commitd.snapshot());
        state
    }

    // --- edit verbs ---

    pub async fn set(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        path: &Path,
    ) -> Result<()> {
        Debug::SessionVerb(&self.id, "set").log();
        let mut state = self.write_state(shared, ctx).await?;

        // Authorisation gates the normalize scripts: nothing
        // user-supplied runs before it succeeds.
        if !shared
            .auther
            .authorize_path(ctx, path, Permission::Create)
            .await
        {
            return Err(MgmtError::access_denied());
        }
        let path = normalize_path(shared, ctx, path).await?;

        let union = &mut state.union;
        let resolved = shared
            .schema
            .resolve(&path, View::Config)
            .map_err(|error| unknown_element(&path, &error))?;

        match resolved {
            Resolved::Value(snode, value) => {
                let typ = snode.typ.as_ref();
                if typ.map(|typ| typ.is_empty_type()).unwrap_or(false) {
                    return Err(MgmtError::operation_not_supported(
                        "Cannot set a value on an empty leaf",
                    ));
                }
                if let Some(typ) = typ {
                    if let Err(message) = typ.check(value) {
                        return Err(MgmtError::invalid_value(
                            &path, message,
                        ));
                    }
                }
                match snode.kind {
                    NodeKind::Leaf => {
                        if union.exists(&path) && !union.is_default(&path) {
                            return Err(MgmtError::data_exists(&path));
                        }
                        let leaf = path.parent();
                        union.set_leaf(&leaf, value);
                    }
                    _ => {
                        if union.exists(&path) {
                            return Err(MgmtError::data_exists(&path));
                        }
                        let leaf_list = path.parent();
                        union.add_value(&leaf_list, value);
                    }
                }
            }
            Resolved::ListEntry(..) => {
                if union.exists(&path) {
                    return Err(MgmtError::data_exists(&path));
                }
                union.add_node(&path);
            }
            Resolved::Node(snode) => match snode.kind {
                NodeKind::Leaf => {
                    let empty = snode
                        .typ
                        .as_ref()
                        .map(|typ| typ.is_empty_type())
                        .unwrap_or(false);
                    if !empty {
                        return Err(MgmtError::missing_element(
                            &path,
                            &snode.name,
                        )
                        .with_message(format!(
                            "Node '{}' requires a value",
                            snode.name
                        )));
                    }
                    if union.exists(&path) {
                        return Err(MgmtError::data_exists(&path));
                    }
                    union.add_node(&path);
                }
                NodeKind::Container if snode.is_presence() => {
                    if union.exists(&path) {
                        return Err(MgmtError::data_exists(&path));
                    }
                    union.add_node(&path);
                }
                NodeKind::Container => {
                    return Err(MgmtError::operation_not_supported(
                        "Set of a non-presence container is not supported",
                    ));
                }
                NodeKind::List => {
                    let key = snode
                        .keys
                        .first()
                        .map(String::as_str)
                        .unwrap_or("key");
                    return Err(MgmtError::missing_element(&path, key));
                }
                NodeKind::LeafList => {
                    return Err(MgmtError::missing_element(
                        &path,
                        &snode.name,
                    )
                    .with_message(format!(
                        "Node '{}' requires a value",
                        snode.name
                    )));
                }
                _ => {
                    return Err(MgmtError::operation_not_supported(
                        "Path cannot be set",
                    ));
                }
            },
        }

        state.saved = false;
        Ok(())
    }

    pub async fn delete(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        path: &Path,
    ) -> Result<()> {
        Debug::SessionVerb(&self.id, "delete").log();
        let mut state = self.write_state(shared, ctx).await?;

        // Authorisation gates the normalize scripts, as in set.
        if !shared
            .auther
            .authorize_path(ctx, path, Permission::Delete)
            .await
        {
            return Err(MgmtError::access_denied());
        }
        let path = normalize_path(shared, ctx, path).await?;

        let union = &mut state.union;
        if !union.exists(&path) {
            return Err(MgmtError::data_missing(&path));
        }

        // Deleting a leaf's value deletes the leaf.
        let target = match shared.schema.resolve(&path, View::Config) {
            Ok(Resolved::Value(snode, _))
                if snode.kind == NodeKind::Leaf =>
            {
                path.parent()
            }
            _ => path.clone(),
        };
        union.delete(&target);
        state.saved = false;
        Ok(())
    }

    pub async fn discard(
        &self,
        shared: &Shared,
        ctx: &UserContext,
    ) -> Result<()> {
        Debug::SessionVerb(&self.id, "discard").log();
        let mut state = self.write_state(shared, ctx).await?;
        state.union.discard();
        state.saved = false;
        Ok(())
    }

    pub async fn changed(&self, shared: &Shared) -> bool {
        let state = self.read_state(shared).await;
        state.union.changed()
    }

    pub async fn saved(&self, shared: &Shared) -> bool {
        self.read_state(shared).await.saved
    }

    pub async fn mark_saved(&self) {
        self.state.lock().await.saved = true;
    }

    // --- load / merge / copy-config ---

    /// Replaces the candidate with the parsed source: everything the
    /// caller may delete is deleted, then the source is merged in. Paths
    /// the caller may not change stay untouched. Returns the warnings
    /// produced while planning.
    pub async fn load(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        source: LoadSource,
    ) -> Result<MgmtErrorList> {
        Debug::SessionVerb(&self.id, "load").log();
        let text = read_source(ctx, source).await?;
        let file = parser::parse(&text).map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to parse configuration: {error}"
            ))
        })?;

        let mut state = self.write_state(shared, ctx).await?;
        let plan = convert::plan_merge(&shared.schema, &file.root);

        // Delete pass: remove every subtree the caller may delete.
        let top_level: Vec<Path> = state
            .union
            .children(&Path::root(), false)
            .into_iter()
            .map(|name| Path::new([name]))
            .collect();
        for path in top_level {
            delete_allowed(shared, ctx, &mut state.union, &path).await;
        }

        apply_plan(shared, ctx, &mut state.union, &plan, false).await?;
        state.saved = false;
        Ok(plan.warnings)
    }

    /// Merges the parsed source into the candidate without deleting
    /// anything first.
    pub async fn merge(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        source: LoadSource,
    ) -> Result<MgmtErrorList> {
        Debug::SessionVerb(&self.id, "merge").log();
        let text = read_source(ctx, source).await?;
        let file = parser::parse(&text).map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to parse configuration: {error}"
            ))
        })?;

        let mut state = self.write_state(shared, ctx).await?;
        let plan = convert::plan_merge(&shared.schema, &file.root);
        apply_plan(shared, ctx, &mut state.union, &plan, false).await?;
        state.saved = false;
        Ok(plan.warnings)
    }

    /// NETCONF copy-config onto the candidate. URL forms are not
    /// supported; the inline source must decode under the schema, and
    /// authorisation failures fail the whole operation.
    pub async fn copy_config(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        source_datastore: Option<&str>,
        source_encoding: Encoding,
        source_config: Option<&str>,
        source_url: Option<&str>,
        target_datastore: &str,
        target_url: Option<&str>,
    ) -> Result<()> {
        Debug::SessionVerb(&self.id, "copy-config").log();
        if source_url.is_some() || target_url.is_some() {
            return Err(MgmtError::operation_not_supported(
                "URL sources and targets are not supported",
            ));
        }
        if target_datastore != "candidate" {
            return Err(MgmtError::operation_not_supported(
                "Only the candidate datastore can be the target",
            ));
        }
        if let Some(source) = source_datastore {
            return Err(MgmtError::operation_not_supported(format!(
                "Datastore '{source}' cannot be a copy-config source"
            )));
        }
        let Some(config) = source_config else {
            return Err(MgmtError::missing_element(
                &Path::root(),
                "config",
            ));
        };

        let mut warnings = MgmtErrorList::new();
        let raw = match source_encoding {
            Encoding::Xml => encoding::xml_to_node(
                config,
                shared.schema.root(),
                &Path::root(),
                View::Config,
                &mut warnings,
            )?,
            Encoding::Json | Encoding::Rfc7951 => {
                let value: serde_json::Value = serde_json::from_str(config)
                    .map_err(|error| {
                        MgmtError::malformed_message(format!(
                            "Invalid JSON: {error}"
                        ))
                    })?;
                encoding::json_to_node(
                    &value,
                    shared.schema.root(),
                    &Path::root(),
                    View::Config,
                    &mut warnings,
                )
            }
        };
        // Decoding failures are hard errors for copy-config.
        if let Some(error) = warnings.into_iter().next() {
            return Err(error);
        }

        let mut state = self.write_state(shared, ctx).await?;
        let plan = convert::plan_merge(&shared.schema, &raw);
        if let Some(error) = plan.warnings.clone().into_iter().next() {
            return Err(error);
        }
        apply_plan(shared, ctx, &mut state.union, &plan, true).await?;
        state.saved = false;
        Ok(())
    }

    // --- read verbs ---

    pub async fn show(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        path: &Path,
        hide_secrets: bool,
        show_defaults: bool,
    ) -> Result<String> {
        let state = self.read_state(shared).await;
        if !shared
            .auther
            .authorize_path(ctx, path, Permission::Read)
            .await
        {
            return Err(MgmtError::access_denied());
        }
        let hide = hide_secrets || !shared.auther.allows_secrets(ctx);
        Ok(state.union.show(
            path,
            ShowOpts {
                hide_secrets: hide,
                show_defaults,
            },
        ))
    }

    pub async fn exists(&self, shared: &Shared, path: &Path) -> bool {
        self.read_state(shared).await.union.exists(path)
    }

    pub async fn status(&self, shared: &Shared, path: &Path) -> Status {
        self.read_state(shared).await.union.status(path)
    }

    /// Encoded retrieval of a configuration subtree.
    pub async fn get_config(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        path: &Path,
        enc: Encoding,
    ) -> Result<String> {
        let state = self.read_state(shared).await;
        if !shared
            .auther
            .authorize_path(ctx, path, Permission::Read)
            .await
        {
            return Err(MgmtError::access_denied());
        }
        let node = state.union.subtree(path, false);
        let snode = match path.is_root() {
            true => shared.schema.root(),
            false => shared
                .schema
                .descendant(path, View::Config)
                .ok_or_else(|| MgmtError::data_missing(path))?,
        };
        match enc {
            Encoding::Json => Ok(serde_json::to_string(
                &encoding::to_json(&node, snode, false),
            )
            .unwrap()),
            Encoding::Rfc7951 => Ok(serde_json::to_string(
                &encoding::to_json(&node, snode, true),
            )
            .unwrap()),
            Encoding::Xml => Err(MgmtError::operation_not_supported(
                "XML configuration retrieval is not supported",
            )),
        }
    }

    /// Runs the full schema validation pass over the candidate.
    pub async fn validate(
        &self,
        shared: &Shared,
    ) -> std::result::Result<String, MgmtErrorList> {
        Debug::SessionVerb(&self.id, "validate").log();
        let state = self.read_state(shared).await;
        let errors = validate::validate(&state.union);
        if errors.has_errors() {
            return Err(errors);
        }
        Ok("Validate complete\n".to_owned())
    }

    /// Diffs two configurations: archived revisions, the running tree or
    /// this session's candidate.
    pub async fn compare(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        base: Option<Revision>,
        other: Option<Revision>,
        context_diff: bool,
    ) -> Result<String> {
        let hide = !shared.auther.allows_secrets(ctx);
        let opts = render::RenderOpts { hide_secrets: hide };
        let schema = shared.schema.root();

        let old = match &base {
            Some(revision) => {
                let tree = shared.commitd.revision_tree(revision)?;
                render::render(&tree, Some(schema), opts)
            }
            None => render::render(
                &shared.commitd.snapshot(),
                Some(schema),
                opts,
            ),
        };
        let new = match &other {
            Some(revision) => {
                let tree = shared.commitd.revision_tree(revision)?;
                render::render(&tree, Some(schema), opts)
            }
            None => {
                let state = self.read_state(shared).await;
                let node = state.union.to_node(false);
                render::render(&node, Some(schema), opts)
            }
        };

        Ok(match context_diff {
            true => diff::context_diff(&old, &new, 9),
            false => diff::full_diff(&old, &new),
        })
    }

    /// Serialises the candidate to a configuration file. Sandboxed
    /// callers may only write inside the config directory.
    pub async fn save(
        &self,
        shared: &Shared,
        ctx: &UserContext,
        target: Option<PathBuf>,
    ) -> Result<String> {
        Debug::SessionVerb(&self.id, "save").log();
        let state = self.read_state(shared).await;
        let node = state.union.to_node(false);
        let text = render::render_file(
            &node,
            shared.schema.root(),
            Some(&shared.schema.config_version_string()),
            render::RenderOpts::default(),
        );
        drop(state);

        let target =
            target.unwrap_or_else(|| shared.commitd.runfile().to_owned());
        check_sandbox(ctx, &target, shared)?;
        tokio::fs::write(&target, text).await.map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to save configuration: {error}"
            ))
        })?;
        self.mark_saved().await;
        Ok(format!("Saved configuration to '{}'\n", target.display()))
    }
}

// ===== helper functions =====

/// Maps a schema lookup failure onto the depth-specific unknown-element
/// error.
pub(crate) fn unknown_element(
    path: &Path,
    error: &ResolveError,
) -> MgmtError {
    let elems: Vec<&str> = path
        .iter()
        .take(error.depth + 1)
        .collect();
    let failed = Path::new(elems);
    MgmtError::unknown_element(
        &failed,
        &error.element,
        convert::unknown_message(&failed, &error.element),
    )
}

/// Normalises every value-bearing token of a path through the schema's
/// normalize scripts. Key values run their key leaf's script.
pub(crate) async fn normalize_path(
    shared: &Shared,
    ctx: &UserContext,
    path: &Path,
) -> Result<Path> {
    let steps = shared
        .schema
        .trace(path, View::Config)
        .map_err(|error| unknown_element(path, &error))?;

    let mut normalize: Vec<Option<Cmd>> = Vec::with_capacity(steps.len());
    for step in &steps {
        let cmd = match step.role {
            StepRole::Name => None,
            StepRole::Value => step.snode.ext.normalize.clone(),
            StepRole::KeyValue => step
                .snode
                .key_leaf()
                .and_then(|key| key.ext.normalize.clone()),
        };
        normalize.push(cmd);
    }

    let mut out = Path::root();
    for (step, cmd) in steps.iter().zip(normalize) {
        let token = match cmd {
            Some(cmd) => {
                normalize_value(shared, ctx, &cmd, step.token).await?
            }
            None => step.token.to_owned(),
        };
        out.push(token);
    }
    Ok(out)
}

/// Runs a single normalize script. Empty output leaves the value
/// unchanged; the script must be idempotent.
pub(crate) async fn normalize_value(
    shared: &Shared,
    ctx: &UserContext,
    cmd: &Cmd,
    value: &str,
) -> Result<String> {
    let mut cmd = cmd.clone();
    cmd.args.push(value.to_owned());
    let output = shared
        .scripts
        .run(&cmd, ctx, &[], None)
        .await
        .map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to run normalize script: {error}"
            ))
        })?;
    if !output.success() {
        return Err(MgmtError::operation_failed(format!(
            "Normalize script failed: {}",
            output.stderr.trim()
        ))
        .with_app_tag("exec-failed"));
    }
    let normalized = output.stdout.trim();
    Ok(match normalized.is_empty() {
        true => value.to_owned(),
        false => normalized.to_owned(),
    })
}

/// Applies a merge plan to the union. With `strict`, an authorisation
/// failure aborts; otherwise unauthorised paths are silently skipped.
pub(crate) async fn apply_plan(
    shared: &Shared,
    ctx: &UserContext,
    union: &mut Union,
    plan: &MergePlan,
    strict: bool,
) -> Result<()> {
    for op in &plan.ops {
        let full = op.full_path();
        let perm = match union.exists(&full) {
            true => Permission::Update,
            false => Permission::Create,
        };
        if !shared.auther.authorize_path(ctx, &full, perm).await {
            if strict {
                return Err(MgmtError::access_denied());
            }
            continue;
        }

        match op {
            EditOp::SetLeaf { path, value } => {
                let value = match leaf_normalize(shared, path) {
                    Some(cmd) => {
                        normalize_value(shared, ctx, &cmd, value).await?
                    }
                    None => value.clone(),
                };
                union.set_leaf(path, &value);
            }
            EditOp::AddValue { path, value } => {
                let value = match leaf_normalize(shared, path) {
                    Some(cmd) => {
                        normalize_value(shared, ctx, &cmd, value).await?
                    }
                    None => value.clone(),
                };
                if !union.exists(&path.join(&value)) {
                    union.add_value(path, &value);
                }
            }
            EditOp::AddNode { path } => {
                union.add_node(path);
            }
        }
    }
    Ok(())
}

fn leaf_normalize(shared: &Shared, path: &Path) -> Option<Cmd> {
    shared
        .schema
        .descendant(path, View::Config)
        .and_then(|snode| snode.ext.normalize.clone())
}

/// Recursively deletes the parts of a subtree the caller is allowed to
/// delete, leaving the rest untouched.
async fn delete_allowed(
    shared: &Shared,
    ctx: &UserContext,
    union: &mut Union,
    path: &Path,
) {
    if shared
        .auther
        .authorize_path(ctx, path, Permission::Delete)
        .await
    {
        union.delete(path);
        return;
    }
    for name in union.children(path, false) {
        Box::pin(delete_allowed(shared, ctx, union, &path.join(&name)))
            .await;
    }
}

async fn read_source(
    ctx: &UserContext,
    source: LoadSource,
) -> Result<String> {
    match source {
        LoadSource::Text(text) => Ok(text),
        LoadSource::File(path) => {
            if ctx.sandboxed
                && !path.starts_with("/config")
            {
                return Err(MgmtError::access_denied().with_message(
                    "Sandboxed callers may only load from /config",
                ));
            }
            tokio::fs::read_to_string(&path).await.map_err(|error| {
                MgmtError::operation_failed(format!(
                    "Failed to read '{}': {error}",
                    path.display()
                ))
            })
        }
    }
}

fn check_sandbox(
    ctx: &UserContext,
    target: &std::path::Path,
    shared: &Shared,
) -> Result<()> {
    if !ctx.sandboxed {
        return Ok(());
    }
    let config_dir = shared
        .commitd
        .runfile()
        .parent()
        .unwrap_or_else(|| std::path::Path::new("/config"));
    if target.starts_with(config_dir) {
        return Ok(());
    }
    Err(MgmtError::access_denied().with_message(
        "Sandboxed callers may only save inside the config directory",
    ))
}
