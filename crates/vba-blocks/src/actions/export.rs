//! `export`: pull the target's current components back into the project
//! tree, patching the manifest's `[[src]]` entries.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::actions::{self, ActionContext};
use crate::error::Error;
use crate::manifest;
use crate::patch;
use crate::paths::ScopedDir;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub target: Option<String>,
    /// Write the exported tree here instead of the project `src/`
    /// directory; the manifest is left untouched.
    pub completed: Option<PathBuf>,
    pub addin: Option<PathBuf>,
}

pub fn export(ctx: &mut ActionContext<'_>, project_dir: &Path, options: &ExportOptions) -> Result<()> {
    let project = manifest::load_manifest(project_dir)?;
    let target = actions::choose_target(&project, options.target.as_deref())?.clone();

    let target_path = target.file_path(project_dir);
    if !target_path.exists() {
        return Err(Error::TargetNotFound { path: target_path }.into());
    }

    let mut bridge = actions::make_bridge(ctx, options.addin.as_deref())?;
    let staging = ScopedDir::create(actions::action_staging_dir(
        &ctx.config,
        "export",
        &target.name,
    ))?;

    ctx.cancel.check()?;
    let handle = bridge.open(&target_path)?;
    let fragment = match bridge.export(&handle, staging.path()) {
        Ok(fragment) => {
            bridge.close(&handle, false)?;
            fragment
        }
        Err(err) => {
            let _ = bridge.close(&handle, false);
            return Err(err);
        }
    };

    let patch_manifest = options.completed.is_none();
    let dest_root = options
        .completed
        .clone()
        .unwrap_or_else(|| project_dir.join("src"));
    fs::create_dir_all(&dest_root)
        .with_context(|| format!("failed to create {}", dest_root.display()))?;

    let mut exported_names = Vec::new();
    for component in &fragment.components {
        ctx.cancel.check()?;

        let from = staging.path().join(&component.filename);
        let to = dest_root.join(&component.filename);
        fs::copy(&from, &to).map_err(|err| Error::ExportFailed {
            message: format!(
                "bridge reported `{}` but it was not exported: {err}",
                component.filename
            ),
        })?;

        let binary = component
            .binary
            .as_ref()
            .map(|binary| -> Result<String> {
                fs::copy(staging.path().join(binary), dest_root.join(binary))
                    .map_err(|err| Error::ExportFailed {
                        message: format!("failed to copy sidecar `{binary}`: {err}"),
                    })?;
                Ok(format!("src/{binary}"))
            })
            .transpose()?;

        if patch_manifest {
            patch::add_src(
                project_dir,
                &component.name,
                &format!("src/{}", component.filename),
                binary.as_deref(),
            )?;
        }
        exported_names.push(component.name.clone());
    }

    if patch_manifest {
        // Entries the target no longer contains fall out of the manifest.
        for src in &project.src {
            if !exported_names.iter().any(|name| name == &src.name) {
                patch::remove_src(project_dir, &src.name)?;
            }
        }
    }

    ctx.reporter.info(&format!(
        "exported {} components from `{}`",
        fragment.components.len(),
        target.filename
    ));
    Ok(())
}
