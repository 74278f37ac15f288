//! Orchestration actions: the pipelines behind the CLI commands.
//!
//! Every action takes an [`ActionContext`] carrying the configuration, the
//! reporter, and the cancel token; there are no hidden singletons. Shared
//! pipeline stages (resolve-and-lock, dependency fetch, target selection)
//! live here.

pub mod build;
pub mod export;
pub mod new;
pub mod run;
pub mod target_add;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::addin::{AddinBridge, ScriptBridge};
use crate::config::Config;
use crate::error::Error;
use crate::lockfile;
use crate::manifest::{Dependency, Manifest, Target, Workspace};
use crate::parallel;
use crate::report::{CancelToken, Reporter};
use crate::resolver::{self, CandidateProvider, DependencyGraph};
use crate::sources::{Registration, SourceSet};

/// Explicit context threaded through every action.
pub struct ActionContext<'a> {
    pub config: Config,
    pub reporter: &'a mut dyn Reporter,
    pub cancel: CancelToken,
}

impl<'a> ActionContext<'a> {
    pub fn new(config: Config, reporter: &'a mut dyn Reporter) -> Self {
        ActionContext {
            config,
            reporter,
            cancel: CancelToken::new(),
        }
    }
}

/// Candidate enumeration backed by the configured source set.
pub struct SourceProvider<'a> {
    config: &'a Config,
    sources: &'a SourceSet,
}

impl<'a> SourceProvider<'a> {
    pub fn new(config: &'a Config, sources: &'a SourceSet) -> Self {
        SourceProvider { config, sources }
    }
}

impl CandidateProvider for SourceProvider<'_> {
    fn candidates(&mut self, dependency: &Dependency) -> Result<Vec<Registration>> {
        let source = self.sources.for_dependency(dependency)?;
        source.resolve(self.config, dependency)
    }
}

/// Resolve the workspace, preferring a still-valid lockfile, and write the
/// lockfile back when its contents changed.
pub fn resolve_and_lock(ctx: &mut ActionContext<'_>, workspace: &Workspace) -> Result<DependencyGraph> {
    let project_dir = workspace.root.dir.clone();

    let preferences: BTreeMap<String, semver::Version> = match lockfile::read(&project_dir) {
        Some(existing) if existing.is_valid(workspace) => {
            ctx.reporter
                .trace("vba-blocks:resolve", "using lockfile preferences");
            existing.preferences()
        }
        Some(_) => {
            ctx.reporter
                .trace("vba-blocks:resolve", "lockfile is stale; re-resolving");
            BTreeMap::new()
        }
        None => BTreeMap::new(),
    };

    let sources = SourceSet::from_config(&ctx.config)?;
    let mut provider = SourceProvider::new(&ctx.config, &sources);
    let (root, members) = workspace.snapshots();

    ctx.cancel.check()?;
    let graph = resolver::resolve(&root, &members, &preferences, &mut provider)?;

    let rendered = lockfile::to_toml(workspace, &graph, &project_dir);
    let on_disk = fs::read_to_string(project_dir.join(lockfile::LOCKFILE_NAME)).ok();
    if on_disk.as_deref() != Some(rendered.as_str()) {
        lockfile::write(&project_dir, workspace, &graph)?;
        ctx.reporter.info("updated project.lock");
    }

    Ok(graph)
}

/// Fetch every resolved registration and load its manifest, fanning out
/// over the worker pool.
pub fn fetch_dependencies(
    ctx: &mut ActionContext<'_>,
    graph: &DependencyGraph,
) -> Result<Vec<Manifest>> {
    let sources = SourceSet::from_config(&ctx.config)?;
    let config = ctx.config.clone();

    parallel::map(
        "fetch",
        graph.registrations.clone(),
        |registration| {
            let source = sources.for_uri(&registration.source)?;
            let dir = source.fetch(&config, registration)?;
            crate::manifest::load_manifest(&dir)
        },
        ctx.reporter,
        &ctx.cancel,
    )
}

/// Pick the target a command should operate on: an explicit `--target`
/// type or name, the manifest's declared default, or the only target.
pub fn choose_target<'a>(manifest: &'a Manifest, requested: Option<&str>) -> Result<&'a Target> {
    if manifest.targets.is_empty() {
        return Err(Error::TargetNoMatching {
            hint: requested.unwrap_or("any").to_string(),
        }
        .into());
    }

    if let Some(requested) = requested {
        return manifest
            .targets
            .iter()
            .find(|target| {
                target.target_type.as_str() == requested || target.name == requested
            })
            .ok_or_else(|| {
                Error::TargetNoMatching {
                    hint: requested.to_string(),
                }
                .into()
            });
    }

    if let Some(default) = &manifest.default_target {
        return manifest
            .targets
            .iter()
            .find(|target| {
                target.target_type.as_str() == default.as_str() || target.name == *default
            })
            .ok_or_else(|| {
                Error::TargetNoMatching {
                    hint: default.clone(),
                }
                .into()
            });
    }

    if manifest.targets.len() == 1 {
        return Ok(&manifest.targets[0]);
    }

    Err(Error::TargetNoDefault.into())
}

/// Build the bridge from `--addin`, falling back to the environment.
pub fn make_bridge(ctx: &ActionContext<'_>, addin: Option<&Path>) -> Result<Box<dyn AddinBridge>> {
    let command = addin
        .map(Path::to_path_buf)
        .or_else(|| ctx.config.addin.clone())
        .context("no addin bridge configured; pass --addin or set VBA_BLOCKS_ADDIN")?;
    Ok(Box::new(ScriptBridge::new(command)))
}

/// A staging directory scoped to one action invocation.
pub fn action_staging_dir(config: &Config, action: &str, name: &str) -> PathBuf {
    config
        .staging_dir()
        .join(format!("{action}-{name}-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use semver::Version;

    use super::*;
    use crate::error::as_error;
    use crate::manifest::TargetType;

    fn manifest_with_targets(targets: Vec<Target>, default_target: Option<String>) -> Manifest {
        Manifest {
            name: "demo".to_string(),
            version: Version::new(1, 0, 0),
            authors: vec![],
            default_target,
            src: vec![],
            dependencies: vec![],
            targets,
            references: vec![],
            scripts: BTreeMap::new(),
            dir: PathBuf::from("/project"),
        }
    }

    fn target(target_type: TargetType, name: &str) -> Target {
        Target {
            target_type,
            name: name.to_string(),
            path: PathBuf::from("build"),
            filename: format!("{name}.{target_type}"),
            blank: false,
            src: None,
        }
    }

    #[test]
    fn explicit_type_selects_the_matching_target() {
        let manifest = manifest_with_targets(
            vec![
                target(TargetType::Xlsm, "book"),
                target(TargetType::Xlam, "addin"),
            ],
            None,
        );

        let chosen = choose_target(&manifest, Some("xlam")).expect("choose");
        assert_eq!(chosen.name, "addin");
    }

    #[test]
    fn explicit_name_also_matches() {
        let manifest = manifest_with_targets(
            vec![
                target(TargetType::Xlsm, "book"),
                target(TargetType::Xlsm, "report"),
            ],
            None,
        );

        let chosen = choose_target(&manifest, Some("report")).expect("choose");
        assert_eq!(chosen.name, "report");
    }

    #[test]
    fn single_target_is_the_implicit_default() {
        let manifest = manifest_with_targets(vec![target(TargetType::Xlsm, "book")], None);
        let chosen = choose_target(&manifest, None).expect("choose");
        assert_eq!(chosen.name, "book");
    }

    #[test]
    fn multiple_targets_without_default_need_a_flag() {
        let manifest = manifest_with_targets(
            vec![
                target(TargetType::Xlsm, "book"),
                target(TargetType::Xlam, "addin"),
            ],
            None,
        );

        let err = choose_target(&manifest, None).expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("target-no-default"));
    }

    #[test]
    fn declared_default_wins_over_ambiguity() {
        let manifest = manifest_with_targets(
            vec![
                target(TargetType::Xlsm, "book"),
                target(TargetType::Xlam, "addin"),
            ],
            Some("xlam".to_string()),
        );

        let chosen = choose_target(&manifest, None).expect("choose");
        assert_eq!(chosen.name, "addin");
    }

    #[test]
    fn unmatched_request_reports_no_matching() {
        let manifest = manifest_with_targets(vec![target(TargetType::Xlsm, "book")], None);
        let err = choose_target(&manifest, Some("pptm")).expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("target-no-matching"));
    }

    #[test]
    fn projects_without_targets_report_no_matching() {
        let manifest = manifest_with_targets(vec![], None);
        let err = choose_target(&manifest, None).expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("target-no-matching"));
    }

    #[test]
    fn staging_dirs_are_scoped_per_invocation() {
        let config = Config::with_cache_root(PathBuf::from("/cache"));
        let dir = action_staging_dir(&config, "build", "book");
        let text = dir.to_string_lossy().into_owned();
        assert!(text.starts_with("/cache/staging/build-book-"));
    }
}
