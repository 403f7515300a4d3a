//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! End-to-end session and commit scenarios, driven through in-process
//! component, script and authorisation doubles.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use cfgd_config::encoding::Encoding;
use cfgd_session::commit::{self, CommitContext};
use cfgd_session::component::{
    Component, ComponentError, ComponentRegistry,
};
use cfgd_session::confirmed::ConfirmedCommit;
use cfgd_session::manager::SessionManager;
use cfgd_session::running::CommitManager;
use cfgd_session::session::{LoadSource, Session, Sharing};
use cfgd_session::{Shared, completion, state};
use cfgd_utils::auth::{
    AccountTask, ArcAuther, Auther, CommandArgs, Permission, UserContext,
};
use cfgd_utils::mgmt::{ErrTag, MgmtError};
use cfgd_utils::path::Path;
use cfgd_utils::script::{Cmd, ScriptOutput, Scripts};
use cfgd_yang::{DataType, ExtensionSet, ModelSet, SchemaNode};

// ===== test harness =====

/// Script double: canned output per program name, success by default.
/// Every invocation is recorded.
#[derive(Default)]
struct FakeScripts {
    outputs: HashMap<String, (i32, String, String)>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Scripts for FakeScripts {
    async fn run(
        &self,
        cmd: &Cmd,
        _caller: &UserContext,
        _env: &[(String, String)],
        _input: Option<&str>,
    ) -> std::io::Result<ScriptOutput> {
        self.calls.lock().unwrap().push(cmd.program.clone());
        Ok(match self.outputs.get(&cmd.program) {
            Some((status, stdout, stderr)) => ScriptOutput {
                status: *status,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            },
            None => ScriptOutput::default(),
        })
    }
}

/// Authorisation double: denies configured path prefixes, hides secrets.
#[derive(Default)]
struct TestAuther {
    deny: Vec<Path>,
    next_task: AtomicU64,
}

#[async_trait]
impl Auther for TestAuther {
    async fn authorize_command(
        &self,
        _ctx: &UserContext,
        _args: &CommandArgs,
    ) -> bool {
        true
    }

    async fn authorize_path(
        &self,
        _ctx: &UserContext,
        path: &Path,
        _perm: Permission,
    ) -> bool {
        !self.deny.iter().any(|prefix| path.starts_with(prefix))
    }

    async fn authorize_rpc(
        &self,
        _ctx: &UserContext,
        _module: &str,
        _rpc: &str,
    ) -> bool {
        true
    }

    async fn account_start(
        &self,
        _ctx: &UserContext,
        _args: &CommandArgs,
    ) -> AccountTask {
        AccountTask(self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    async fn account_stop(
        &self,
        _ctx: &UserContext,
        _task: AccountTask,
        _error: Option<&MgmtError>,
    ) {
    }

    fn allows_secrets(&self, _ctx: &UserContext) -> bool {
        false
    }
}

/// Component double recording calls, optionally failing one phase.
#[derive(Default)]
struct TestComponent {
    name: String,
    models: Vec<String>,
    fail_check: Option<String>,
    fail_set: Option<String>,
    calls: Mutex<Vec<String>>,
    state: Value,
}

#[async_trait]
impl Component for TestComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn dial(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    async fn check_config(
        &self,
        model: &str,
        _config: &Value,
    ) -> Result<(), ComponentError> {
        self.calls.lock().unwrap().push(format!("check:{model}"));
        match &self.fail_check {
            Some(message) => {
                Err(ComponentError::Business(message.clone()))
            }
            None => Ok(()),
        }
    }

    async fn set_config(
        &self,
        model: &str,
        _config: &Value,
    ) -> Result<(), ComponentError> {
        self.calls.lock().unwrap().push(format!("set:{model}"));
        match &self.fail_set {
            Some(message) => {
                Err(ComponentError::Business(message.clone()))
            }
            None => Ok(()),
        }
    }

    async fn store_config_into(
        &self,
        _model: &str,
    ) -> Result<Value, ComponentError> {
        Ok(json!({}))
    }

    async fn store_state_into(
        &self,
        _model: &str,
    ) -> Result<Value, ComponentError> {
        Ok(self.state.clone())
    }

    async fn call_rpc(
        &self,
        _model: &str,
        _rpc: &str,
        input: &Value,
    ) -> Result<Value, ComponentError> {
        Ok(input.clone())
    }
}

fn test_schema() -> ModelSet {
    ModelSet::new(
        SchemaNode::tree()
            .with_child(
                SchemaNode::leaf("x", DataType::int_range(16, 1, 1000))
                    .with_module("cfgd-test"),
            )
            .with_child(
                SchemaNode::container("c")
                    .with_module("cfgd-test")
                    .with_presence()
                    .with_must("not(contains(., 'foo'))")
                    .with_child(SchemaNode::leaf("v", DataType::string())),
            )
            .with_child(
                SchemaNode::leaf_list("a", DataType::string())
                    .with_module("cfgd-test")
                    .with_ordered_by_user(),
            )
            .with_child(
                SchemaNode::leaf("testhidden", DataType::Boolean)
                    .with_module("cfgd-test"),
            )
            .with_child(
                SchemaNode::leaf("hostid", DataType::string())
                    .with_module("cfgd-test")
                    .with_ext(ExtensionSet::default().with_normalize(
                        Cmd::parse("normalize-hostid").unwrap(),
                    )),
            )
            .with_child(
                SchemaNode::container("system")
                    .with_module("cfgd-system")
                    .with_ext(ExtensionSet::default().with_priority(300))
                    .with_child(SchemaNode::leaf(
                        "host-name",
                        DataType::string(),
                    )),
            )
            .with_child(
                SchemaNode::container("routing")
                    .with_module("cfgd-routing")
                    .with_ext(ExtensionSet::default().with_priority(400))
                    .with_child(SchemaNode::leaf(
                        "router-id",
                        DataType::string(),
                    )),
            )
            .with_child(
                SchemaNode::list("groups", "name")
                    .with_module("cfgd-test")
                    .with_child(SchemaNode::leaf("name", DataType::string())),
            )
            .with_child(
                SchemaNode::leaf(
                    "default-group",
                    DataType::leafref("/groups/name"),
                )
                .with_module("cfgd-test"),
            )
            .with_child(
                SchemaNode::container("stats-good")
                    .with_module("cfgd-test")
                    .with_ext(
                        ExtensionSet::default()
                            .with_state(Cmd::parse("state-good").unwrap()),
                    )
                    .with_child(
                        SchemaNode::leaf("count", DataType::uint(32))
                            .with_state(),
                    ),
            )
            .with_child(
                SchemaNode::container("stats-bad")
                    .with_module("cfgd-test")
                    .with_ext(
                        ExtensionSet::default()
                            .with_state(Cmd::parse("state-bad").unwrap()),
                    )
                    .with_child(
                        SchemaNode::leaf("count", DataType::uint(32))
                            .with_state(),
                    ),
            ),
    )
    .with_module("cfgd-test", "urn:cfgd:test", "2024-06-01")
    .with_module("cfgd-system", "urn:cfgd:system", "2024-06-01")
    .with_module("cfgd-routing", "urn:cfgd:routing", "2024-06-01")
}

struct Harness {
    shared: Arc<Shared>,
    manager: SessionManager,
    scripts: Arc<FakeScripts>,
    dir: PathBuf,
}

impl Harness {
    fn build(tag: &str) -> Harness {
        Harness::build_with(tag, TestAuther::default(), FakeScripts::default(), Vec::new())
    }

    fn build_with(
        tag: &str,
        auther: TestAuther,
        scripts: FakeScripts,
        components: Vec<Arc<TestComponent>>,
    ) -> Harness {
        let dir = std::env::temp_dir().join(format!(
            "cfgd-scenario-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let schema = Arc::new(test_schema());
        let commitd = Arc::new(CommitManager::new(
            schema.clone(),
            dir.join("config.boot"),
            dir.join("archive"),
            20,
        ));
        let (confirmed, _confirmed_rx) = ConfirmedCommit::new(&dir);

        let mut registry = ComponentRegistry::new();
        for component in components {
            registry.register(component);
        }

        let auther: ArcAuther = Arc::new(auther);
        let scripts = Arc::new(scripts);
        let shared = Arc::new(Shared {
            schema,
            auther,
            scripts: scripts.clone(),
            commitd,
            components: Arc::new(registry),
            confirmed: Arc::new(confirmed),
        });
        let manager = SessionManager::new(shared.clone());
        Harness {
            shared,
            manager,
            scripts,
            dir,
        }
    }

    fn session(&self, id: &str, pid: u32) -> Arc<Session> {
        self.manager
            .setup(id.to_owned(), pid, Sharing::Shared)
            .unwrap()
    }

    fn archive_len(&self) -> usize {
        self.shared.commitd.archive().log().len()
    }

    fn pending_file(&self) -> PathBuf {
        self.dir.join("confirmed_commit.job")
    }
}

fn ctx(pid: u32) -> UserContext {
    UserContext {
        uid: 1000,
        username: "operator".to_owned(),
        groups: vec!["users".to_owned()],
        pid,
        sandboxed: false,
    }
}

// ===== scenarios =====

// Scenario: set a value outside the declared integer range.
#[tokio::test]
async fn set_invalid_range() {
    let harness = Harness::build("range");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    let error = session
        .set(&harness.shared, &ctx, &Path::new(["x", "1001"]))
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::InvalidValue);
    assert_eq!(error.path.as_deref(), Some("/x/1001"));
    assert!(
        error
            .message
            .as_deref()
            .unwrap()
            .contains("Must have value between 1 and 1000")
    );

    assert!(
        session
            .set(&harness.shared, &ctx, &Path::new(["x", "1000"]))
            .await
            .is_ok()
    );
}

// Scenario: a must expression fails at commit time.
#[tokio::test]
async fn must_violation_on_commit() {
    let harness = Harness::build("must");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(&harness.shared, &ctx, &Path::new(["c", "v", "foo"]))
        .await
        .unwrap();

    let errors = commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(errors.len(), 1);
    let error = errors.iter().next().unwrap();
    assert_eq!(error.tag, ErrTag::MustViolation);
    assert_eq!(error.path.as_deref(), Some("/c"));
    assert_eq!(
        error.message.as_deref(),
        Some("'must' condition is false: 'not(contains(., 'foo'))'")
    );
}

// Scenario: an ordered-by-user leaf-list is rearranged through load.
#[tokio::test]
async fn ordered_by_user_rearrange() {
    let harness = Harness::build("obu");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    for value in ["A", "B", "C"] {
        session
            .set(&harness.shared, &ctx, &Path::new(["a", value]))
            .await
            .unwrap();
    }

    let warnings = session
        .load(
            &harness.shared,
            &ctx,
            LoadSource::Text("a C\na A\na B\n".to_owned()),
        )
        .await
        .unwrap();
    assert!(warnings.is_empty());

    let output = session
        .show(&harness.shared, &ctx, &Path::root(), false, false)
        .await
        .unwrap();
    assert_eq!(output, "a C\na A\na B\n");
}

// Scenario: confirmed commit followed by the confirming commit.
#[tokio::test]
async fn confirmed_commit_then_confirm() {
    let harness = Harness::build("confirm");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r1"]),
        )
        .await
        .unwrap();

    let archive_before = harness.archive_len();
    commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext {
            confirm_timeout: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // The pending record is on disk and carries the session id.
    let record: Value = serde_json::from_str(
        &std::fs::read_to_string(harness.pending_file()).unwrap(),
    )
    .unwrap();
    assert_eq!(record["session"], "s1");
    assert!(record.get("persist-id").is_none());

    // A plain commit from the same session confirms; no revert fires.
    commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext::default(),
    )
    .await
    .unwrap();
    assert!(!harness.pending_file().exists());
    assert!(!harness.shared.confirmed.is_pending());
    assert_eq!(harness.archive_len(), archive_before + 1);

    // The change survived.
    let running = harness.shared.commitd.snapshot();
    assert_eq!(
        running
            .get(&Path::new(["system", "host-name"]))
            .unwrap()
            .value(),
        Some("r1")
    );
}

// Scenario: a commit from another session cannot slip past a pending
// confirmed commit.
#[tokio::test]
async fn confirmed_commit_blocks_other_sessions() {
    let harness = Harness::build("confirm-block");
    let session = harness.session("s1", 100);
    let ctx1 = ctx(100);

    session
        .set(
            &harness.shared,
            &ctx1,
            &Path::new(["system", "host-name", "r1"]),
        )
        .await
        .unwrap();
    commit::commit(
        &harness.shared,
        &session,
        &ctx1,
        CommitContext {
            confirm_timeout: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let other = harness.session("s2", 200);
    let ctx2 = ctx(200);
    other
        .set(
            &harness.shared,
            &ctx2,
            &Path::new(["system", "host-name", "r2"]),
        )
        .await
        .unwrap();
    let errors = commit::commit(
        &harness.shared,
        &other,
        &ctx2,
        CommitContext::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(
        errors.iter().next().unwrap().tag,
        ErrTag::AccessDenied
    );
}

// Scenario: confirmed commit with a persist-id, then cancel-commit.
#[tokio::test]
async fn confirmed_commit_then_cancel() {
    let harness = Harness::build("cancel");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    // Establish a baseline revision.
    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r1"]),
        )
        .await
        .unwrap();
    commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext::default(),
    )
    .await
    .unwrap();
    let before = harness.shared.commitd.render_running();

    // Confirmed commit changing the host name.
    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r2"]),
        )
        .await
        .unwrap();
    commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext {
            confirm_timeout: Some(1),
            persist_id: Some("abc".to_owned()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // Cancel with the wrong persist-id is refused.
    assert!(
        commit::cancel_commit(&harness.shared, &ctx, Some("zzz"))
            .await
            .is_err()
    );

    // Cancel with the right persist-id restores the prior revision.
    commit::cancel_commit(&harness.shared, &ctx, Some("abc"))
        .await
        .unwrap();
    assert_eq!(harness.shared.commitd.render_running(), before);
    assert!(!harness.shared.confirmed.is_pending());
}

// Scenario: the revert timer fires (driven directly here).
#[tokio::test]
async fn confirmed_commit_expiry_reverts() {
    let harness = Harness::build("expiry");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r1"]),
        )
        .await
        .unwrap();
    commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext::default(),
    )
    .await
    .unwrap();
    let before = harness.shared.commitd.render_running();

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r2"]),
        )
        .await
        .unwrap();
    commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext {
            confirm_timeout: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    commit::revert_expired(&harness.shared).await.unwrap();
    assert_eq!(harness.shared.commitd.render_running(), before);

    // The revert fires exactly once.
    assert!(commit::revert_expired(&harness.shared).await.is_err());
}

// Scenario: copy-config with a denied path fails at command level.
#[tokio::test]
async fn copy_config_denied() {
    let auther = TestAuther {
        deny: vec![Path::new(["testhidden"])],
        ..Default::default()
    };
    let harness = Harness::build_with(
        "copycfg",
        auther,
        FakeScripts::default(),
        Vec::new(),
    );
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    let error = session
        .copy_config(
            &harness.shared,
            &ctx,
            None,
            Encoding::Xml,
            Some("<config><testhidden>false</testhidden></config>"),
            None,
            "candidate",
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::AccessDenied);

    // Nothing leaked into the candidate.
    assert!(
        !session
            .exists(&harness.shared, &Path::new(["testhidden"]))
            .await
    );
}

// A denied set never reaches the leaf's normalize script.
#[tokio::test]
async fn normalize_gated_by_authorisation() {
    let auther = TestAuther {
        deny: vec![Path::new(["hostid"])],
        ..Default::default()
    };
    let harness = Harness::build_with(
        "normdeny",
        auther,
        FakeScripts::default(),
        Vec::new(),
    );
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    let error = session
        .set(&harness.shared, &ctx, &Path::new(["hostid", "Router_1"]))
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::AccessDenied);
    assert!(harness.scripts.calls.lock().unwrap().is_empty());

    let error = session
        .delete(&harness.shared, &ctx, &Path::new(["hostid"]))
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::AccessDenied);
    assert!(harness.scripts.calls.lock().unwrap().is_empty());
}

// An authorised set runs the normalize script and stores its output.
#[tokio::test]
async fn normalize_applies_to_values() {
    let mut scripts = FakeScripts::default();
    scripts.outputs.insert(
        "normalize-hostid".to_owned(),
        (0, "router-1\n".to_owned(), String::new()),
    );
    let harness = Harness::build_with(
        "normalize",
        TestAuther::default(),
        scripts,
        Vec::new(),
    );
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(&harness.shared, &ctx, &Path::new(["hostid", "Router_1"]))
        .await
        .unwrap();
    assert_eq!(
        harness.scripts.calls.lock().unwrap().as_slice(),
        ["normalize-hostid"]
    );
    assert!(
        session
            .exists(&harness.shared, &Path::new(["hostid", "router-1"]))
            .await
    );
    assert!(
        !session
            .exists(&harness.shared, &Path::new(["hostid", "Router_1"]))
            .await
    );
}

// Scenario: load succeeds while collecting warnings for an unknown leaf
// and an out-of-range value.
#[tokio::test]
async fn load_with_warnings() {
    let harness = Harness::build("loadwarn");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    let warnings = session
        .load(
            &harness.shared,
            &ctx,
            LoadSource::Text(
                "bogus-top enabled\nx 5000\nsystem {\n    host-name r1\n}\n"
                    .to_owned(),
            ),
        )
        .await
        .unwrap();

    let tags: Vec<ErrTag> =
        warnings.iter().map(|warning| warning.tag).collect();
    assert_eq!(tags, [ErrTag::UnknownElement, ErrTag::InvalidValue]);
    let paths: Vec<&str> = warnings
        .iter()
        .map(|warning| warning.path.as_deref().unwrap())
        .collect();
    assert_eq!(paths, ["/bogus-top", "/x/5000"]);

    // The valid part of the file landed.
    assert!(
        session
            .exists(
                &harness.shared,
                &Path::new(["system", "host-name", "r1"])
            )
            .await
    );
}

// Scenario: state retrieval continues past one failing sibling script.
#[tokio::test]
async fn state_script_partial_failure() {
    let mut scripts = FakeScripts::default();
    scripts.outputs.insert(
        "state-good".to_owned(),
        (0, r#"{"count": 5}"#.to_owned(), String::new()),
    );
    scripts.outputs.insert(
        "state-bad".to_owned(),
        (1, String::new(), "boom".to_owned()),
    );
    let harness = Harness::build_with(
        "state",
        TestAuther::default(),
        scripts,
        Vec::new(),
    );
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    let (data, warnings) = state::get_full_tree(
        &harness.shared,
        &session,
        &ctx,
        &Path::root(),
        Encoding::Json,
    )
    .await
    .unwrap();

    let data: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(data["stats-good"]["count"], json!(5));
    assert!(data.get("stats-bad").is_none());

    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings.iter().next().unwrap().path.as_deref(),
        Some("/stats-bad")
    );
}

// Per-level dispatch: an apply failure at one priority level stops
// dispatch to higher levels entirely, but the commit still completes
// partially.
#[tokio::test]
async fn commit_dispatch_partial_failure() {
    let system = Arc::new(TestComponent {
        name: "systemd".to_owned(),
        models: vec!["cfgd-system".to_owned()],
        fail_set: Some("resource exhausted".to_owned()),
        ..Default::default()
    });
    let routing = Arc::new(TestComponent {
        name: "routingd".to_owned(),
        models: vec!["cfgd-routing".to_owned()],
        ..Default::default()
    });
    let harness = Harness::build_with(
        "partial",
        TestAuther::default(),
        FakeScripts::default(),
        vec![system.clone(), routing.clone()],
    );
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r1"]),
        )
        .await
        .unwrap();
    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["routing", "router-id", "10.0.0.1"]),
        )
        .await
        .unwrap();

    let outcome = commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext::default(),
    )
    .await
    .unwrap();

    // The failing system component (priority 300) reported an error and
    // the routing level (400) was never dispatched at all.
    assert!(!outcome.errors.is_empty());
    assert_eq!(
        system.calls.lock().unwrap().as_slice(),
        ["check:cfgd-system", "set:cfgd-system"]
    );
    assert!(routing.calls.lock().unwrap().is_empty());
}

// A failing dry-run check aborts before anything is applied.
#[tokio::test]
async fn commit_check_failure_aborts() {
    let system = Arc::new(TestComponent {
        name: "systemd".to_owned(),
        models: vec!["cfgd-system".to_owned()],
        fail_check: Some("bad config".to_owned()),
        ..Default::default()
    });
    let harness = Harness::build_with(
        "checkfail",
        TestAuther::default(),
        FakeScripts::default(),
        vec![system.clone()],
    );
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r1"]),
        )
        .await
        .unwrap();
    assert!(
        commit::commit(
            &harness.shared,
            &session,
            &ctx,
            CommitContext::default()
        )
        .await
        .is_err()
    );

    // Nothing was applied and the running tree is untouched.
    assert_eq!(
        system.calls.lock().unwrap().as_slice(),
        ["check:cfgd-system"]
    );
    assert!(
        harness
            .shared
            .commitd
            .snapshot()
            .get(&Path::new(["system"]))
            .is_none()
    );
}

// A check failure at a higher priority level does not undo the lower
// level, which was already checked and applied.
#[tokio::test]
async fn commit_check_failure_stops_higher_levels() {
    let system = Arc::new(TestComponent {
        name: "systemd".to_owned(),
        models: vec!["cfgd-system".to_owned()],
        ..Default::default()
    });
    let routing = Arc::new(TestComponent {
        name: "routingd".to_owned(),
        models: vec!["cfgd-routing".to_owned()],
        fail_check: Some("refused".to_owned()),
        ..Default::default()
    });
    let harness = Harness::build_with(
        "checklevels",
        TestAuther::default(),
        FakeScripts::default(),
        vec![system.clone(), routing.clone()],
    );
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r1"]),
        )
        .await
        .unwrap();
    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["routing", "router-id", "10.0.0.1"]),
        )
        .await
        .unwrap();

    let outcome = commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext::default(),
    )
    .await
    .unwrap();

    // The system level (300) was checked and applied before the routing
    // level (400) failed its dry-run; routing was never applied.
    assert!(!outcome.errors.is_empty());
    assert_eq!(
        system.calls.lock().unwrap().as_slice(),
        ["check:cfgd-system", "set:cfgd-system"]
    );
    assert_eq!(
        routing.calls.lock().unwrap().as_slice(),
        ["check:cfgd-routing"]
    );

    // The running tree carries the accepted candidate.
    assert_eq!(
        harness
            .shared
            .commitd
            .snapshot()
            .get(&Path::new(["system", "host-name"]))
            .unwrap()
            .value(),
        Some("r1")
    );
}

// Commit atomicity: an old snapshot stays intact across a commit.
#[tokio::test]
async fn commit_atomicity_snapshots() {
    let harness = Harness::build("atomic");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r1"]),
        )
        .await
        .unwrap();
    commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext::default(),
    )
    .await
    .unwrap();

    let old_snapshot = harness.shared.commitd.snapshot();

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["system", "host-name", "r2"]),
        )
        .await
        .unwrap();
    commit::commit(
        &harness.shared,
        &session,
        &ctx,
        CommitContext::default(),
    )
    .await
    .unwrap();

    // Reader with the old snapshot observes the wholly-old state.
    assert_eq!(
        old_snapshot
            .get(&Path::new(["system", "host-name"]))
            .unwrap()
            .value(),
        Some("r1")
    );
    assert_eq!(
        harness
            .shared
            .commitd
            .snapshot()
            .get(&Path::new(["system", "host-name"]))
            .unwrap()
            .value(),
        Some("r2")
    );
}

// Candidate purity: get-allowed on an absent leafref leaves the
// candidate byte-for-byte identical.
#[tokio::test]
async fn get_allowed_candidate_purity() {
    let harness = Harness::build("allowed");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(
            &harness.shared,
            &ctx,
            &Path::new(["groups", "admins"]),
        )
        .await
        .unwrap();

    let before = session
        .show(&harness.shared, &ctx, &Path::root(), false, false)
        .await
        .unwrap();

    let allowed = completion::get_allowed(
        &harness.shared,
        &session,
        &ctx,
        &Path::new(["default-group"]),
    )
    .await
    .unwrap();
    assert_eq!(allowed, ["admins"]);

    let after = session
        .show(&harness.shared, &ctx, &Path::root(), false, false)
        .await
        .unwrap();
    assert_eq!(before, after);
}

// Session locking: foreign pids cannot edit or steal the lock; teardown
// releases it.
#[tokio::test]
async fn lock_semantics() {
    let harness = Harness::build("locks");
    let session = harness.session("s1", 100);

    harness.manager.lock("s1", 100).await.unwrap();
    assert_eq!(harness.manager.locked("s1").await.unwrap(), Some(100));

    // A different pid cannot edit the locked session.
    let error = session
        .set(&harness.shared, &ctx(200), &Path::new(["x", "5"]))
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::OperationFailed);

    // Nor unlock it.
    assert!(harness.manager.unlock("s1", 200).await.is_err());

    // Teardown of the owning pid releases the lock.
    harness.manager.unlock_all_pid(100).await;
    assert_eq!(harness.manager.locked("s1").await.unwrap(), None);
    assert!(
        session
            .set(&harness.shared, &ctx(200), &Path::new(["x", "5"]))
            .await
            .is_ok()
    );
}

// The system sessions refuse mutation and destruction.
#[tokio::test]
async fn system_sessions() {
    let harness = Harness::build("system");
    let running = harness.manager.get("RUNNING");
    assert!(running.is_system());

    let error = running
        .set(&harness.shared, &ctx(100), &Path::new(["x", "5"]))
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::OperationNotSupported);
    assert!(harness.manager.destroy("RUNNING").is_err());
    assert!(harness.manager.destroy("EFFECTIVE").is_err());

    // Unknown ids fall back to the running snapshot.
    let fallback = harness.manager.get("no-such-session");
    assert!(fallback.is_system());
}

// Set/delete edge cases: duplicates, absent paths, empty leaves.
#[tokio::test]
async fn set_delete_edge_cases() {
    let harness = Harness::build("edges");
    let session = harness.session("s1", 100);
    let ctx = ctx(100);

    session
        .set(&harness.shared, &ctx, &Path::new(["x", "42"]))
        .await
        .unwrap();
    let error = session
        .set(&harness.shared, &ctx, &Path::new(["x", "42"]))
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::DataExists);

    let error = session
        .delete(&harness.shared, &ctx, &Path::new(["c"]))
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::DataMissing);

    let error = session
        .set(&harness.shared, &ctx, &Path::new(["nonesuch"]))
        .await
        .unwrap_err();
    assert_eq!(error.tag, ErrTag::UnknownElement);

    // Deleting the leaf by value path removes the leaf.
    session
        .delete(&harness.shared, &ctx, &Path::new(["x", "42"]))
        .await
        .unwrap();
    assert!(!session.exists(&harness.shared, &Path::new(["x"])).await);
}
