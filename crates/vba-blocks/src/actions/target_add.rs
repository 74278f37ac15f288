//! `target add`: register a new target in the manifest and build it once.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::actions::build::{self, BuildOptions};
use crate::actions::ActionContext;
use crate::error::Error;
use crate::manifest::{self, Target, TargetType};
use crate::patch;

#[derive(Debug, Clone, Default)]
pub struct TargetAddOptions {
    /// Target document type (`xlsm`, `xlam`, …). Required.
    pub target_type: Option<String>,
    /// Seed the target from an existing file instead of a blank container.
    pub from: Option<PathBuf>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub addin: Option<PathBuf>,
}

pub fn target_add(
    ctx: &mut ActionContext<'_>,
    project_dir: &Path,
    options: &TargetAddOptions,
) -> Result<()> {
    let type_raw = options
        .target_type
        .as_deref()
        .ok_or(Error::TargetAddNoType)?;
    let target_type = TargetType::parse(type_raw)?;

    let project = manifest::load_manifest(project_dir)?;
    if project
        .targets
        .iter()
        .any(|target| target.target_type == target_type)
    {
        return Err(Error::ManifestInvalid {
            path: project_dir.join(manifest::MANIFEST_FILE),
            message: format!("a `{target_type}` target already exists"),
        }
        .into());
    }

    let name = options.name.clone().unwrap_or_else(|| project.name.clone());
    let path = options.path.clone().unwrap_or_else(|| "build".to_string());
    let filename = format!("{name}.{target_type}");

    let seed = match &options.from {
        Some(from) => {
            if !from.exists() {
                return Err(Error::FromNotFound { path: from.clone() }.into());
            }
            Some(from.clone())
        }
        None => None,
    };

    let target = Target {
        target_type,
        name: name.clone(),
        path: PathBuf::from(&path),
        filename: filename.clone(),
        blank: seed.is_none(),
        src: None,
    };

    if let Some(from) = &seed {
        let dest_dir = project_dir.join(&target.path);
        fs::create_dir_all(&dest_dir)
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        fs::copy(from, dest_dir.join(&filename))
            .with_context(|| format!("failed to copy {}", from.display()))?;
    }

    patch::add_target(project_dir, &target)?;
    ctx.reporter
        .info(&format!("registered `{target_type}` target `{name}`"));

    build::build(
        ctx,
        project_dir,
        &BuildOptions {
            target: Some(target_type.as_str().to_string()),
            release: false,
            addin: options.addin.clone(),
        },
    )
}
