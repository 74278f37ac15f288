//! Git dependencies, materialised by shelling out to the `git` binary.
//!
//! Clones live under `cache/sources/git/<host>/<repo>@<label>/`. Resolution
//! clones at the requested refspec and pins the registration to the commit
//! found there; fetching ensures a clone checked out at exactly that commit.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::config::Config;
use crate::error::Error;
use crate::lock::FileLock;
use crate::manifest::{self, Dependency, GitRef};
use crate::sources::{Registration, SourceUri};

const CLONE_WAIT: Duration = Duration::from_secs(120);

/// Run git with `args` in `cwd` and return trimmed stdout.
pub(crate) fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Split a git URL into `(host, repo)` directory components.
fn split_url(url: &str) -> (String, String) {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");

    let (host, path) = if let Some(rest) = trimmed.split_once("://").map(|(_, rest)| rest) {
        match rest.split_once('/') {
            Some((host, path)) => (host.to_string(), path.to_string()),
            None => (rest.to_string(), String::new()),
        }
    } else if let Some((user_host, path)) = trimmed.split_once(':') {
        let host = user_host
            .split_once('@')
            .map(|(_, host)| host)
            .unwrap_or(user_host);
        (host.to_string(), path.to_string())
    } else {
        ("local".to_string(), trimmed.to_string())
    };

    let repo = path.replace(['/', '\\'], "-");
    let repo = if repo.is_empty() {
        "repo".to_string()
    } else {
        repo.trim_matches('-').to_string()
    };
    (host, repo)
}

/// Stable label identifying a refspec; stored in source URIs so lockfile
/// validity can compare ref discriminators without network access.
pub(crate) fn ref_label(refspec: &GitRef) -> String {
    match refspec {
        GitRef::Default => "HEAD".to_string(),
        GitRef::Rev(rev) => format!("rev-{rev}"),
        GitRef::Tag(tag) => format!("tag-{tag}"),
        GitRef::Branch(branch) => format!("branch-{branch}"),
    }
}

/// The pinned commit inside a `label:commit` details string.
pub(crate) fn details_commit(details: &str) -> &str {
    details.rsplit(':').next().unwrap_or(details)
}

/// The ref label inside a `label:commit` details string.
pub(crate) fn details_label(details: &str) -> &str {
    details.split_once(':').map(|(label, _)| label).unwrap_or("")
}

fn clone_dir(config: &Config, url: &str, label: &str) -> PathBuf {
    let (host, repo) = split_url(url);
    config
        .git_sources_dir()
        .join(host)
        .join(format!("{repo}@{label}"))
}

fn clone_at_ref(url: &str, refspec: &GitRef, dir: &Path) -> Result<()> {
    let parent = dir.parent().context("clone dir has no parent")?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

    let dir_str = dir.to_string_lossy().into_owned();
    match refspec {
        GitRef::Default => {
            run_git(parent, &["clone", "--depth", "1", url, dir_str.as_str()])?;
        }
        GitRef::Branch(name) | GitRef::Tag(name) => {
            run_git(
                parent,
                &[
                    "clone",
                    "--depth",
                    "1",
                    "--branch",
                    name.as_str(),
                    url,
                    dir_str.as_str(),
                ],
            )?;
        }
        GitRef::Rev(rev) => {
            // Arbitrary revisions cannot be cloned shallowly.
            run_git(parent, &["clone", url, dir_str.as_str()])?;
            run_git(dir, &["checkout", "--detach", rev.as_str()])?;
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct GitSource;

impl GitSource {
    /// Clone at the dependency's refspec and mint one registration pinned to
    /// the commit found there.
    pub fn resolve(&self, config: &Config, dependency: &Dependency) -> Result<Vec<Registration>> {
        let Dependency::Git {
            name,
            git: url,
            refspec,
            ..
        } = dependency
        else {
            return Ok(vec![]);
        };

        let dir = clone_dir(config, url, &ref_label(refspec));
        let _lock = FileLock::acquire(&dir.with_extension("lock"), CLONE_WAIT)?;

        if !dir.join(".git").exists() {
            clone_at_ref(url, refspec, &dir)?;
        }

        let commit = run_git(&dir, &["rev-parse", "HEAD"])?;
        let nested = manifest::load_manifest(&dir)?;
        if nested.name != *name {
            return Err(Error::DependencyNotFound {
                name: name.clone(),
            }
            .into());
        }

        let details = format!("{}:{}", ref_label(refspec), commit);
        Ok(vec![Registration {
            name: nested.name.clone(),
            version: nested.version.clone(),
            source: SourceUri::git(url, &details),
            dependencies: nested.dependencies.clone(),
            checksum: None,
        }])
    }

    /// Ensure a clone checked out at the registration's pinned commit.
    pub fn fetch(&self, config: &Config, registration: &Registration) -> Result<PathBuf> {
        let url = registration.source.value.as_str();
        let commit = registration
            .source
            .details
            .as_deref()
            .map(details_commit)
            .ok_or_else(|| Error::DependencyUnknownSource {
                name: registration.name.clone(),
                source_kind: registration.source.to_string(),
            })?;

        let label: String = commit.chars().take(12).collect();
        let dir = clone_dir(config, url, &label);
        let _lock = FileLock::acquire(&dir.with_extension("lock"), CLONE_WAIT)?;

        if dir.join(".git").exists() {
            let head = run_git(&dir, &["rev-parse", "HEAD"])?;
            if head == commit {
                return Ok(dir);
            }
            run_git(&dir, &["fetch", "origin"])?;
            run_git(&dir, &["checkout", "--detach", commit])?;
            return Ok(dir);
        }

        let parent = dir.parent().context("clone dir has no parent")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let dir_str = dir.to_string_lossy();
        run_git(parent, &["clone", url, dir_str.as_ref()])?;
        run_git(&dir, &["checkout", "--detach", commit])?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_urls_split_into_host_and_repo() {
        let (host, repo) = split_url("https://github.com/vba-blocks/dictionary.git");
        assert_eq!(host, "github.com");
        assert_eq!(repo, "vba-blocks-dictionary");
    }

    #[test]
    fn scp_style_urls_split_on_colon() {
        let (host, repo) = split_url("git@github.com:vba-blocks/dictionary.git");
        assert_eq!(host, "github.com");
        assert_eq!(repo, "vba-blocks-dictionary");
    }

    #[test]
    fn details_split_into_label_and_commit() {
        assert_eq!(details_commit("branch-main:abc123"), "abc123");
        assert_eq!(details_label("branch-main:abc123"), "branch-main");
        assert_eq!(details_commit("abc123"), "abc123");
    }

    #[test]
    fn ref_labels_are_disambiguated_by_kind() {
        assert_eq!(ref_label(&GitRef::Default), "HEAD");
        assert_eq!(ref_label(&GitRef::Rev("abc".to_string())), "rev-abc");
        assert_eq!(ref_label(&GitRef::Tag("v1".to_string())), "tag-v1");
        assert_eq!(
            ref_label(&GitRef::Branch("main".to_string())),
            "branch-main"
        );
    }

    #[test]
    fn clone_dirs_nest_under_host() {
        let config = crate::config::Config::with_cache_root(PathBuf::from("/cache"));
        let dir = clone_dir(
            &config,
            "https://github.com/vba-blocks/dictionary.git",
            "tag-v1.0.0",
        );
        assert_eq!(
            dir,
            PathBuf::from("/cache/sources/git/github.com/vba-blocks-dictionary@tag-v1.0.0")
        );
    }
}
