//! Local clone of a registry index.
//!
//! A registry is a git repository containing `index/<first-two>/<name>.toml`
//! files, one per package, each listing every published version. The clone
//! lives under `cache/sources/index/<registry>/` and is refreshed with a
//! coarse lock so concurrent updates serialise.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use semver::Version;
use toml::Value;

use crate::config::Config;
use crate::error::Error;
use crate::lock::FileLock;
use crate::manifest::{self, Dependency};
use crate::sources::git::run_git;

const UPDATE_WAIT: Duration = Duration::from_secs(60);

/// One `[[versions]]` entry from an index file.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub version: Version,
    /// Tarball URL, taken from the entry's `registry+<url>` source.
    pub url: String,
    pub dependencies: Vec<Dependency>,
    /// Hex SHA-256 of the tarball.
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct RegistryIndex {
    name: String,
    url: String,
}

impl RegistryIndex {
    pub fn new(name: &str, url: &str) -> Self {
        RegistryIndex {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn dir(&self, config: &Config) -> PathBuf {
        config.registry_index_dir(&self.name)
    }

    /// Clone the index if it is missing; do not refresh an existing clone.
    pub fn ensure(&self, config: &Config) -> Result<()> {
        let dir = self.dir(config);
        if dir.join(".git").exists() {
            return Ok(());
        }
        self.update(config)
    }

    /// Refresh (or create) the local clone. Serialised by a coarse lock.
    pub fn update(&self, config: &Config) -> Result<()> {
        let dir = self.dir(config);
        let lock_path = dir.with_extension("lock");
        let _lock = FileLock::acquire(&lock_path, UPDATE_WAIT)?;

        if dir.join(".git").exists() {
            run_git(&dir, &["fetch", "origin"])?;
            run_git(&dir, &["reset", "--hard", "FETCH_HEAD"])?;
        } else {
            let parent = dir.parent().context("index dir has no parent")?;
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
            let dir_str = dir.to_string_lossy();
            run_git(parent, &["clone", self.url.as_str(), dir_str.as_ref()])?;
        }
        Ok(())
    }

    /// Path of the index file for `package` inside the clone.
    pub fn entry_path(dir: &Path, package: &str) -> PathBuf {
        let prefix: String = package.chars().take(2).collect();
        dir.join("index").join(prefix).join(format!("{package}.toml"))
    }

    /// Load all published versions of `package`.
    pub fn load(&self, config: &Config, package: &str) -> Result<Vec<IndexEntry>> {
        self.ensure(config)?;
        let dir = self.dir(config);
        let path = Self::entry_path(&dir, package);

        let text = fs::read_to_string(&path).map_err(|_| Error::DependencyNotFound {
            name: package.to_string(),
        })?;
        parse_entries(&text, &dir).map_err(|message| {
            Error::ManifestInvalid {
                path: path.clone(),
                message,
            }
            .into()
        })
    }
}

fn parse_entries(text: &str, dir: &Path) -> Result<Vec<IndexEntry>, String> {
    let tree: toml::Table = toml::from_str(text).map_err(|err| err.to_string())?;

    let versions = tree
        .get("versions")
        .and_then(Value::as_array)
        .ok_or("index entry missing [[versions]]")?;

    let mut entries = Vec::new();
    for item in versions {
        let table = item
            .as_table()
            .ok_or("[[versions]] entries must be tables")?;

        let version_raw = table
            .get("version")
            .and_then(Value::as_str)
            .ok_or("version entry missing version")?;
        let version = Version::parse(version_raw)
            .map_err(|err| format!("invalid version `{version_raw}`: {err}"))?;

        let source = table
            .get("source")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("version {version_raw} missing source"))?;
        let url = source
            .strip_prefix("registry+")
            .ok_or_else(|| format!("version {version_raw} has a non-registry source"))?
            .to_string();

        let checksum = table
            .get("checksum")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("version {version_raw} missing checksum"))?
            .to_lowercase();

        let mut dependencies = Vec::new();
        if let Some(deps) = table.get("dependencies").and_then(Value::as_array) {
            for dep in deps {
                let dep_table = dep
                    .as_table()
                    .ok_or("dependencies entries must be tables")?;
                let name = dep_table
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("dependency entry missing name")?;
                let mut spec = dep_table.clone();
                spec.remove("name");
                dependencies.push(manifest::parse_dependency(
                    name,
                    &Value::Table(spec),
                    dir,
                )?);
            }
        }

        entries.push(IndexEntry {
            version,
            url,
            dependencies,
            checksum,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_path_shards_on_first_two_characters() {
        let dir = Path::new("/index");
        assert_eq!(
            RegistryIndex::entry_path(dir, "dictionary"),
            Path::new("/index/index/di/dictionary.toml")
        );
        assert_eq!(
            RegistryIndex::entry_path(dir, "a"),
            Path::new("/index/index/a/a.toml")
        );
    }

    #[test]
    fn entries_parse_versions_and_checksums() {
        let text = r#"
[[versions]]
version = "1.0.0"
source = "registry+https://example.com/dictionary-1.0.0.block"
dependencies = []
checksum = "AABB"

[[versions]]
version = "1.1.0"
source = "registry+https://example.com/dictionary-1.1.0.block"
dependencies = [{ name = "utils", version = "^2.0.0" }]
checksum = "ccdd"
"#;

        let entries = parse_entries(text, Path::new("/index")).expect("parse");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version, Version::new(1, 0, 0));
        assert_eq!(entries[0].checksum, "aabb");
        assert_eq!(
            entries[1].url,
            "https://example.com/dictionary-1.1.0.block"
        );
        assert_eq!(entries[1].dependencies.len(), 1);
        assert_eq!(entries[1].dependencies[0].name(), "utils");
    }

    #[test]
    fn non_registry_sources_are_rejected() {
        let text = r#"
[[versions]]
version = "1.0.0"
source = "git+https://example.com/repo.git"
checksum = "aabb"
"#;

        let err = parse_entries(text, Path::new("/index")).expect_err("must fail");
        assert!(err.contains("non-registry source"));
    }
}
