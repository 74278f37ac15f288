//! `new`: scaffold a fresh project directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::actions::ActionContext;
use crate::error::Error;
use crate::manifest::{self, MANIFEST_FILE};

pub fn new_project(
    ctx: &mut ActionContext<'_>,
    parent_dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    if manifest::validate_name(name).is_err() {
        return Err(Error::NewInvalidName {
            name: name.to_string(),
        }
        .into());
    }

    let project_dir = parent_dir.join(name);
    if project_dir.exists() {
        return Err(Error::NewDirExists { path: project_dir }.into());
    }

    fs::create_dir_all(project_dir.join("src"))
        .with_context(|| format!("failed to create {}", project_dir.display()))?;

    let manifest_text = format!(
        r#"[package]
name = "{name}"
version = "0.1.0"
authors = []

[[target]]
type = "xlsm"
path = "build"
blank = true
"#
    );
    fs::write(project_dir.join(MANIFEST_FILE), manifest_text)
        .with_context(|| format!("failed to write {MANIFEST_FILE}"))?;
    fs::write(project_dir.join(".gitignore"), "/build\n")
        .context("failed to write .gitignore")?;

    ctx.reporter
        .info(&format!("created project `{name}` at {}", project_dir.display()));
    Ok(project_dir)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::config::Config;
    use crate::error::as_error;
    use crate::report::NullReporter;

    fn context(reporter: &mut NullReporter) -> ActionContext<'_> {
        ActionContext::new(Config::with_cache_root(PathBuf::from("/cache")), reporter)
    }

    #[test]
    fn scaffolds_a_loadable_project() {
        let td = tempdir().expect("tempdir");
        let mut reporter = NullReporter;
        let mut ctx = context(&mut reporter);

        let dir = new_project(&mut ctx, td.path(), "my-project").expect("new");

        assert!(dir.join("src").is_dir());
        assert!(dir.join(".gitignore").exists());
        let loaded = manifest::load_manifest(&dir).expect("load scaffolded manifest");
        assert_eq!(loaded.name, "my-project");
        assert_eq!(loaded.targets.len(), 1);
        assert!(loaded.targets[0].blank);
    }

    #[test]
    fn rejects_invalid_names() {
        let td = tempdir().expect("tempdir");
        let mut reporter = NullReporter;
        let mut ctx = context(&mut reporter);

        let err = new_project(&mut ctx, td.path(), "My Project").expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("new-invalid-name"));
    }

    #[test]
    fn rejects_existing_directories() {
        let td = tempdir().expect("tempdir");
        fs::create_dir_all(td.path().join("taken")).expect("mkdir");
        let mut reporter = NullReporter;
        let mut ctx = context(&mut reporter);

        let err = new_project(&mut ctx, td.path(), "taken").expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("new-dir-exists"));
    }
}
