//! `build`: resolve, fetch, stage, and apply the changeset to each target.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::actions::{self, ActionContext};
use crate::changeset;
use crate::graph::BuildGraph;
use crate::manifest::{self, Target};
use crate::paths::ScopedDir;
use crate::stage;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Restrict the build to the target matching this type or name.
    pub target: Option<String>,
    /// Build the release target set.
    pub release: bool,
    /// Bridge command override.
    pub addin: Option<PathBuf>,
}

pub fn build(ctx: &mut ActionContext<'_>, project_dir: &Path, options: &BuildOptions) -> Result<()> {
    let workspace = manifest::load_workspace(project_dir)?;
    ctx.reporter
        .info(&format!("building `{}`", workspace.root.name));

    let graph = actions::resolve_and_lock(ctx, &workspace)?;
    ctx.cancel.check()?;

    let dependencies = actions::fetch_dependencies(ctx, &graph)?;
    ctx.cancel.check()?;

    let build_graph = BuildGraph::load(
        &workspace.root,
        &dependencies,
        ctx.reporter,
        &ctx.cancel,
    )?;

    let targets: Vec<Target> = match &options.target {
        Some(requested) => {
            vec![actions::choose_target(&workspace.root, Some(requested))?.clone()]
        }
        None if workspace.root.targets.len() <= 1 => {
            vec![actions::choose_target(&workspace.root, None)?.clone()]
        }
        // No explicit selection builds every declared target.
        None => workspace.root.targets.clone(),
    };

    let mut bridge = actions::make_bridge(ctx, options.addin.as_deref())?;
    let profile = if options.release { "release" } else { "build" };

    for target in &targets {
        ctx.cancel.check()?;

        let import_graph = build_graph.for_target(target);
        let staging = ScopedDir::create(actions::action_staging_dir(
            &ctx.config,
            profile,
            &target.name,
        ))?;

        stage::stage(&import_graph, staging.path(), ctx.reporter, &ctx.cancel)?;
        changeset::apply(
            bridge.as_mut(),
            target,
            project_dir,
            &ctx.config,
            &import_graph,
            staging.path(),
            ctx.reporter,
            &ctx.cancel,
        )?;

        ctx.reporter
            .info(&format!("built `{}`", target.filename));
    }

    Ok(())
}
