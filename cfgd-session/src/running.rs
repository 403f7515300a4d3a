//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! The commit manager: owner of the running tree and of the revision
//! archive.
//!
//! The running tree is never mutated in place. Readers take snapshots
//! that stay valid across commits; the only writer swaps in a complete
//! new tree while holding the commit lock.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tokio::sync::Mutex;
use tracing::{info, warn};

use cfgd_config::render::{self, RenderOpts};
use cfgd_config::{ConfigFile, Node, parser};
use cfgd_utils::capabilities;
use cfgd_utils::mgmt::MgmtError;
use cfgd_yang::ModelSet;

/// Revision selector for archive reads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Revision {
    /// The current boot configuration.
    Saved,
    Number(u32),
}

pub struct CommitManager {
    schema: Arc<ModelSet>,
    running: ArcSwap<Node>,
    runfile: PathBuf,
    archive: Archive,
    /// Serialises writers; held only around validation-free publication
    /// steps of a commit.
    commit_lock: Mutex<()>,
}

/// Gzip revision archive next to the boot configuration.
pub struct Archive {
    dir: PathBuf,
    limit: usize,
}

// ===== impl CommitManager =====

impl CommitManager {
    pub fn new(
        schema: Arc<ModelSet>,
        runfile: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        archive_limit: usize,
    ) -> CommitManager {
        CommitManager {
            schema,
            running: ArcSwap::from_pointee(Node::root()),
            runfile: runfile.into(),
            archive: Archive {
                dir: archive_dir.into(),
                limit: archive_limit,
            },
            commit_lock: Mutex::new(()),
        }
    }

    /// Reads the boot configuration from disk into the running tree.
    /// A missing runfile yields an empty configuration.
    pub fn load_boot(&self) -> Result<(), MgmtError> {
        let text = match std::fs::read_to_string(&self.runfile) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!(runfile = %self.runfile.display(),
                    "no boot configuration, starting empty");
                return Ok(());
            }
            Err(error) => {
                return Err(MgmtError::operation_failed(format!(
                    "Failed to read boot configuration: {error}"
                )));
            }
        };
        let file = parser::parse(&text).map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to parse boot configuration: {error}"
            ))
        })?;
        self.running.store(Arc::new(file.root));
        Ok(())
    }

    /// Current running snapshot. Valid indefinitely; commits never mutate
    /// published trees.
    pub fn snapshot(&self) -> Arc<Node> {
        self.running.load_full()
    }

    pub fn schema(&self) -> &Arc<ModelSet> {
        &self.schema
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.commit_lock.lock().await
    }

    /// Publishes a new running tree. Callers hold the commit lock.
    pub fn publish(&self, tree: Arc<Node>) {
        self.running.store(tree);
    }

    /// Serialises the running tree to the boot configuration file and
    /// rotates the archive. Returns the new archive revision.
    pub fn save_boot(&self) -> Result<u32, MgmtError> {
        let text = self.render_running();
        capabilities::raise(|| std::fs::write(&self.runfile, &text))
            .map_err(|error| {
                MgmtError::operation_failed(format!(
                    "Failed to save boot configuration: {error}"
                ))
            })?;
        self.archive.rotate(&text)
    }

    pub fn render_running(&self) -> String {
        let running = self.snapshot();
        render::render_file(
            &running,
            self.schema.root(),
            Some(&self.schema.config_version_string()),
            RenderOpts::default(),
        )
    }

    pub fn runfile(&self) -> &FsPath {
        &self.runfile
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Reads an archived revision (or the boot file) back as text.
    pub fn read_revision(
        &self,
        revision: &Revision,
    ) -> Result<String, MgmtError> {
        match revision {
            Revision::Saved => std::fs::read_to_string(&self.runfile)
                .map_err(|error| {
                    MgmtError::operation_failed(format!(
                        "Failed to read boot configuration: {error}"
                    ))
                }),
            Revision::Number(n) => self.archive.read(*n),
        }
    }

    /// Parses an archived revision into a data tree.
    pub fn revision_tree(
        &self,
        revision: &Revision,
    ) -> Result<Node, MgmtError> {
        let text = self.read_revision(revision)?;
        let file: ConfigFile = parser::parse(&text).map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to parse archived revision: {error}"
            ))
        })?;
        Ok(file.root)
    }
}

// ===== impl Archive =====

impl Archive {
    const PREFIX: &'static str = "config.boot.";
    const SUFFIX: &'static str = ".gz";

    fn revision_path(&self, revision: u32) -> PathBuf {
        self.dir
            .join(format!("{}{revision}{}", Archive::PREFIX, Archive::SUFFIX))
    }

    /// Revision numbers present on disk, with their modification times.
    /// Rebuilt on demand; nothing is cached.
    pub fn log(&self) -> BTreeMap<u32, DateTime<Utc>> {
        let mut log = BTreeMap::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return log;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(revision) = name
                .strip_prefix(Archive::PREFIX)
                .and_then(|rest| rest.strip_suffix(Archive::SUFFIX))
                .and_then(|n| n.parse().ok())
            else {
                continue;
            };
            let timestamp = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            log.insert(revision, timestamp);
        }
        log
    }

    pub fn last_revision(&self) -> Option<u32> {
        self.log().keys().next_back().copied()
    }

    /// Appends a new revision holding `text` and prunes old revisions
    /// beyond the configured bound. Returns the new revision number.
    pub fn rotate(&self, text: &str) -> Result<u32, MgmtError> {
        std::fs::create_dir_all(&self.dir).map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to create archive directory: {error}"
            ))
        })?;

        let log = self.log();
        let revision = log.keys().next_back().map(|n| n + 1).unwrap_or(1);
        let file = std::fs::File::create(self.revision_path(revision))
            .map_err(|error| {
                MgmtError::operation_failed(format!(
                    "Failed to create archive revision: {error}"
                ))
            })?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(text.as_bytes()).map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to write archive revision: {error}"
            ))
        })?;
        encoder.finish().map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to write archive revision: {error}"
            ))
        })?;

        // Prune oldest revisions beyond the bound.
        let mut revisions: Vec<u32> = log.keys().copied().collect();
        revisions.push(revision);
        while revisions.len() > self.limit {
            let oldest = revisions.remove(0);
            if let Err(error) =
                std::fs::remove_file(self.revision_path(oldest))
            {
                warn!(%oldest, %error, "failed to prune archive revision");
            }
        }

        Ok(revision)
    }

    /// Reads one archived revision, gunzipping it.
    pub fn read(&self, revision: u32) -> Result<String, MgmtError> {
        let file = std::fs::File::open(self.revision_path(revision))
            .map_err(|_| {
                MgmtError::operation_failed(format!(
                    "No such revision: {revision}"
                ))
            })?;
        let mut decoder = GzDecoder::new(file);
        let mut text = String::new();
        decoder.read_to_string(&mut text).map_err(|error| {
            MgmtError::operation_failed(format!(
                "Failed to read archive revision {revision}: {error}"
            ))
        })?;
        Ok(text)
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_rotation() {
        let dir = std::env::temp_dir()
            .join(format!("cfgd-archive-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let archive = Archive {
            dir: dir.clone(),
            limit: 3,
        };

        for i in 1..=5 {
            let revision =
                archive.rotate(&format!("config {i}\n")).unwrap();
            assert_eq!(revision, i);
        }

        let log = archive.log();
        let revisions: Vec<u32> = log.keys().copied().collect();
        assert_eq!(revisions, [3, 4, 5]);
        assert_eq!(archive.read(4).unwrap(), "config 4\n");
        assert!(archive.read(1).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
