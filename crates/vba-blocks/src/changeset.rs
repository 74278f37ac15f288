//! Changeset computation and application.
//!
//! The previous graph (exported from the target's current contents) is
//! diffed against the staged graph; the minimal plan is written into the
//! staging directory as an instruction file and applied through the bridge
//! in a strict order: backup, removes, adds, changes, references, then
//! save-and-close. Any failure during apply closes without saving and
//! restores the backup; a failed restore is fatal and never remapped.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::addin::{AddinBridge, ExportFragment};
use crate::config::Config;
use crate::error::Error;
use crate::graph::{BuildGraph, Component, ImportGraph};
use crate::manifest::{Reference, Target};
use crate::paths::{self, ScopedDir};
use crate::report::{CancelToken, Reporter};

/// Name of the instruction file the bridge reads from the staged directory.
pub const CHANGES_FILE: &str = "changes.json";

/// The add/remove/change plan applied to a target document.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub added: Vec<Component>,
    pub removed: Vec<Component>,
    pub changed: Vec<Component>,
    /// The full reference set the target should end up with.
    pub references: Vec<Reference>,
    pub references_changed: bool,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.references_changed
    }
}

/// Compare the target's current contents against the staged graph.
pub fn diff(
    previous: &[Component],
    previous_references: &[Reference],
    next: &ImportGraph,
) -> Changeset {
    let mut added = Vec::new();
    let mut changed = Vec::new();

    for component in &next.components {
        match previous.iter().find(|p| p.name == component.name) {
            None => added.push(component.clone()),
            Some(existing) => {
                if existing.code != component.code
                    || existing.kind != component.kind
                    || existing.binary != component.binary
                {
                    changed.push(component.clone());
                }
            }
        }
    }

    let removed: Vec<Component> = previous
        .iter()
        .filter(|p| !next.components.iter().any(|n| n.name == p.name))
        .cloned()
        .collect();

    let mut sorted_previous: Vec<&Reference> = previous_references.iter().collect();
    sorted_previous.sort_by(|a, b| a.guid.cmp(&b.guid));
    let mut sorted_next: Vec<&Reference> = next.references.iter().collect();
    sorted_next.sort_by(|a, b| a.guid.cmp(&b.guid));
    let references_changed = sorted_previous
        .iter()
        .map(|r| (&r.guid, r.major, r.minor))
        .ne(sorted_next.iter().map(|r| (&r.guid, r.major, r.minor)));

    Changeset {
        added,
        removed,
        changed,
        references: next.references.clone(),
        references_changed,
    }
}

#[derive(Debug, Serialize)]
struct ChangeInstructions<'a> {
    removed: Vec<&'a str>,
    added: Vec<&'a str>,
    changed: Vec<&'a str>,
    references: Vec<ReferenceInstruction<'a>>,
}

#[derive(Debug, Serialize)]
struct ReferenceInstruction<'a> {
    name: &'a str,
    guid: &'a str,
    major: u32,
    minor: u32,
}

/// Serialise the ordered plan into the staged directory for the bridge.
fn write_instructions(changeset: &Changeset, staged_dir: &Path) -> Result<()> {
    let instructions = ChangeInstructions {
        removed: changeset
            .removed
            .iter()
            .map(|c| c.name.as_str())
            .collect(),
        added: changeset
            .added
            .iter()
            .map(|c| c.filename.as_str())
            .collect(),
        changed: changeset
            .changed
            .iter()
            .map(|c| c.filename.as_str())
            .collect(),
        references: changeset
            .references
            .iter()
            .map(|r| ReferenceInstruction {
                name: &r.name,
                guid: &r.guid,
                major: r.major,
                minor: r.minor,
            })
            .collect(),
    };

    let json = serde_json::to_vec_pretty(&instructions)?;
    paths::atomic_write(&staged_dir.join(CHANGES_FILE), &json)
}

/// The target's current contents, read through the bridge.
pub struct PreviousContents {
    pub components: Vec<Component>,
    pub references: Vec<Reference>,
}

pub fn previous_contents(
    bridge: &mut dyn AddinBridge,
    handle: &crate::addin::BridgeHandle,
    config: &Config,
    target: &Target,
) -> Result<PreviousContents> {
    let export_dir = ScopedDir::create(
        config
            .staging_dir()
            .join(format!("export-{}", target.name)),
    )?;
    let fragment = bridge.export(handle, export_dir.path())?;
    let components = BuildGraph::load_dir(export_dir.path())?;
    Ok(PreviousContents {
        components,
        references: fragment_references(&fragment),
    })
}

fn fragment_references(fragment: &ExportFragment) -> Vec<Reference> {
    fragment
        .references
        .iter()
        .map(|r| Reference {
            name: r.name.clone(),
            guid: r.guid.clone(),
            major: r.major,
            minor: r.minor,
        })
        .collect()
}

/// Apply the staged graph to `target` through the bridge, with backup and
/// restore.
pub fn apply(
    bridge: &mut dyn AddinBridge,
    target: &Target,
    project_dir: &Path,
    config: &Config,
    graph: &ImportGraph,
    staged_dir: &Path,
    reporter: &mut dyn Reporter,
    cancel: &CancelToken,
) -> Result<()> {
    let target_path = target.file_path(project_dir);
    if !target_path.exists() && !target.blank {
        return Err(Error::TargetNotFound { path: target_path }.into());
    }

    cancel.check()?;
    let handle = bridge.open(&target_path)?;

    let previous = match previous_contents(bridge, &handle, config, target) {
        Ok(previous) => previous,
        Err(err) => {
            let _ = bridge.close(&handle, false);
            return Err(err);
        }
    };

    let changeset = diff(&previous.components, &previous.references, graph);
    if changeset.is_empty() {
        reporter.info(&format!("`{}` is up to date", target.filename));
        return bridge.close(&handle, false);
    }
    reporter.info(&format!(
        "applying {} added, {} changed, {} removed to `{}`",
        changeset.added.len(),
        changeset.changed.len(),
        changeset.removed.len(),
        target.filename
    ));

    let backup = match backup_target(&target_path, config) {
        Ok(backup) => backup,
        Err(err) => {
            let _ = bridge.close(&handle, false);
            return Err(err);
        }
    };

    let outcome = write_instructions(&changeset, staged_dir)
        .and_then(|()| bridge.import(&handle, staged_dir))
        .and_then(|()| bridge.close(&handle, true));

    if let Err(err) = outcome {
        let _ = bridge.close(&handle, false);
        if let Some(backup) = &backup {
            restore_backup(backup, &target_path)?;
            reporter.warn(&format!(
                "restored `{}` from backup after a failed import",
                target.filename
            ));
        }
        return Err(err);
    }

    Ok(())
}

/// Copy the target file into the backup area before touching it.
fn backup_target(target_path: &Path, config: &Config) -> Result<Option<PathBuf>> {
    if !target_path.exists() {
        return Ok(None);
    }

    let backup_dir = config.backup_dir();
    fs::create_dir_all(&backup_dir)?;

    let filename = target_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let backup_path = backup_dir.join(format!("{stamp}-{filename}"));

    fs::copy(target_path, &backup_path)?;
    Ok(Some(backup_path))
}

/// Put the pre-build bytes back. A failure here is fatal.
fn restore_backup(backup: &Path, target_path: &Path) -> Result<()> {
    fs::copy(backup, target_path).map(|_| ()).map_err(|err| {
        Error::TargetRestoreFailed {
            path: target_path.to_path_buf(),
            backup: backup.to_path_buf(),
            message: err.to_string(),
        }
        .into()
    })
}
