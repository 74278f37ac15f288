//! Manifest (`project.toml`) loading, validation, and typed construction.
//!
//! Loading is a three-step pipeline: TOML parse, shape validation, typed
//! construction. Dependencies are discriminated on field presence with the
//! priority `path` > `git` > `version`; a bare string dependency is shorthand
//! for a registry dependency on the default registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use semver::{Version, VersionReq};
use toml::Value;

use crate::error::Error;
use crate::paths;

pub const MANIFEST_FILE: &str = "project.toml";

/// Default registry name used by bare and unqualified dependencies.
pub const DEFAULT_REGISTRY: &str = "default";

/// A parsed and validated `project.toml`.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub name: String,
    pub version: Version,
    pub authors: Vec<String>,
    pub default_target: Option<String>,
    pub src: Vec<Src>,
    pub dependencies: Vec<Dependency>,
    pub targets: Vec<Target>,
    pub references: Vec<Reference>,
    pub scripts: BTreeMap<String, String>,
    /// Directory containing the manifest; path dependencies and src entries
    /// are resolved against it.
    pub dir: PathBuf,
}

/// A source component entry (`[[src]]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Src {
    pub name: String,
    pub path: PathBuf,
    pub binary: Option<PathBuf>,
}

/// A typed dependency. Exactly one discriminator is present per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    Registry {
        name: String,
        version: VersionReq,
        registry: String,
        features: BTreeSet<String>,
    },
    Path {
        name: String,
        path: PathBuf,
        version: Option<Version>,
    },
    Git {
        name: String,
        git: String,
        refspec: GitRef,
        version: Option<Version>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    /// Remote default branch.
    Default,
    Rev(String),
    Tag(String),
    Branch(String),
}

impl Dependency {
    pub fn name(&self) -> &str {
        match self {
            Dependency::Registry { name, .. }
            | Dependency::Path { name, .. }
            | Dependency::Git { name, .. } => name,
        }
    }
}

/// A COM reference declared in the manifest (`[[references]]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub guid: String,
    pub major: u32,
    pub minor: u32,
}

/// Container document types the bridge knows how to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Xlsm,
    Xlam,
    Docm,
    Dotm,
    Pptm,
    Potm,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Xlsm => "xlsm",
            TargetType::Xlam => "xlam",
            TargetType::Docm => "docm",
            TargetType::Dotm => "dotm",
            TargetType::Pptm => "pptm",
            TargetType::Potm => "potm",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        match raw {
            "xlsm" => Ok(TargetType::Xlsm),
            "xlam" => Ok(TargetType::Xlam),
            "docm" => Ok(TargetType::Docm),
            "dotm" => Ok(TargetType::Dotm),
            "pptm" => Ok(TargetType::Pptm),
            "potm" => Ok(TargetType::Potm),
            other => Err(Error::AddinUnsupportedType {
                target_type: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A build target (`[[target]]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub target_type: TargetType,
    pub name: String,
    pub path: PathBuf,
    pub filename: String,
    /// Start from a blank container of this type rather than an existing
    /// file at `path/filename`.
    pub blank: bool,
    /// Restrict the import to these component names; `None` imports the
    /// whole build graph.
    pub src: Option<Vec<String>>,
}

impl Target {
    pub fn file_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.path).join(&self.filename)
    }
}

/// Lockfile-oriented reduction of a manifest, used to detect drift without
/// re-resolving.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub version: Version,
    pub dependencies: Vec<Dependency>,
}

impl Snapshot {
    pub fn of(manifest: &Manifest) -> Self {
        Snapshot {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            dependencies: manifest.dependencies.clone(),
        }
    }
}

/// A workspace root plus zero or more members.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: Manifest,
    pub members: Vec<Manifest>,
}

impl Workspace {
    pub fn snapshots(&self) -> (Snapshot, Vec<Snapshot>) {
        (
            Snapshot::of(&self.root),
            self.members.iter().map(Snapshot::of).collect(),
        )
    }
}

/// Load and validate the manifest in `dir`.
pub fn load_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path).map_err(|_| Error::ManifestNotFound {
        path: dir.to_path_buf(),
    })?;
    parse_manifest(&text, dir).map_err(|message| {
        Error::ManifestInvalid {
            path: path.clone(),
            message,
        }
        .into()
    })
}

/// Load the workspace rooted in `dir`: the root manifest plus any
/// `[workspace] members` it declares.
pub fn load_workspace(dir: &Path) -> Result<Workspace> {
    let path = dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path).map_err(|_| Error::ManifestNotFound {
        path: dir.to_path_buf(),
    })?;

    let tree: toml::Table = toml::from_str(&text).map_err(|err| Error::ManifestInvalid {
        path: path.clone(),
        message: err.to_string(),
    })?;

    let root = load_manifest(dir)?;

    let mut members = Vec::new();
    let mut seen = BTreeSet::new();
    seen.insert(root.name.clone());

    if let Some(workspace) = tree.get("workspace") {
        let member_paths = workspace
            .get("members")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for entry in member_paths {
            let relative = entry.as_str().ok_or_else(|| Error::ManifestInvalid {
                path: path.clone(),
                message: "workspace members must be strings".to_string(),
            })?;
            let member_dir = paths::normalize(&dir.join(relative));
            let member = load_manifest(&member_dir)?;
            if !seen.insert(member.name.clone()) {
                return Err(Error::ManifestInvalid {
                    path,
                    message: format!("duplicate member name `{}`", member.name),
                }
                .into());
            }
            members.push(member);
        }
    }

    Ok(Workspace { root, members })
}

fn parse_manifest(text: &str, dir: &Path) -> Result<Manifest, String> {
    let tree: toml::Table = toml::from_str(text).map_err(|err| err.to_string())?;

    let package = tree
        .get("package")
        .and_then(Value::as_table)
        .ok_or("missing [package] section")?;

    let name = package
        .get("name")
        .and_then(Value::as_str)
        .ok_or("missing package.name")?
        .to_string();
    validate_name(&name)?;

    let version_raw = package
        .get("version")
        .and_then(Value::as_str)
        .ok_or("missing package.version")?;
    let version = Version::parse(version_raw)
        .map_err(|err| format!("invalid package.version `{version_raw}`: {err}"))?;

    let authors = package
        .get("authors")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let default_target = package
        .get("target")
        .and_then(Value::as_str)
        .map(str::to_string);

    let src = parse_src(&tree, dir)?;
    let dependencies = parse_dependencies(&tree, dir)?;
    let targets = parse_targets(&tree, &name)?;
    let references = parse_references(&tree)?;
    let scripts = parse_scripts(&tree)?;

    Ok(Manifest {
        name,
        version,
        authors,
        default_target,
        src,
        dependencies,
        targets,
        references,
        scripts,
        dir: dir.to_path_buf(),
    })
}

pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(format!(
            "package name `{name}` must be non-empty lowercase kebab-case"
        ))
    }
}

fn parse_src(tree: &toml::Table, dir: &Path) -> Result<Vec<Src>, String> {
    let mut entries = Vec::new();
    let mut seen = BTreeSet::new();

    let Some(raw) = tree.get("src") else {
        return Ok(entries);
    };
    let raw = raw.as_array().ok_or("[[src]] must be an array of tables")?;

    for item in raw {
        let table = item.as_table().ok_or("[[src]] entries must be tables")?;
        let name = table
            .get("name")
            .and_then(Value::as_str)
            .ok_or("src entry missing name")?
            .to_string();
        if !seen.insert(name.clone()) {
            return Err(format!("duplicate src name `{name}`"));
        }
        let path = table
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("src `{name}` missing path"))?;
        let binary = table
            .get("binary")
            .and_then(Value::as_str)
            .map(|b| paths::normalize(&dir.join(b)));
        entries.push(Src {
            name,
            path: paths::normalize(&dir.join(path)),
            binary,
        });
    }

    Ok(entries)
}

fn parse_dependencies(tree: &toml::Table, dir: &Path) -> Result<Vec<Dependency>, String> {
    let mut dependencies = Vec::new();

    let Some(raw) = tree.get("dependencies") else {
        return Ok(dependencies);
    };
    let raw = raw
        .as_table()
        .ok_or("[dependencies] must be a table of name = spec entries")?;

    for (name, spec) in raw {
        dependencies.push(parse_dependency(name, spec, dir)?);
    }

    Ok(dependencies)
}

pub(crate) fn parse_dependency(name: &str, spec: &Value, dir: &Path) -> Result<Dependency, String> {
    match spec {
        Value::String(range) => {
            let version = VersionReq::parse(range)
                .map_err(|err| format!("dependency `{name}`: invalid range `{range}`: {err}"))?;
            Ok(Dependency::Registry {
                name: name.to_string(),
                version,
                registry: DEFAULT_REGISTRY.to_string(),
                features: BTreeSet::new(),
            })
        }
        Value::Table(table) => {
            let version = table
                .get("version")
                .map(|raw| {
                    let raw = raw
                        .as_str()
                        .ok_or_else(|| format!("dependency `{name}`: version must be a string"))?;
                    Version::parse(raw)
                        .map_err(|err| format!("dependency `{name}`: invalid version: {err}"))
                })
                .transpose();

            if let Some(path) = table.get("path") {
                let path = path
                    .as_str()
                    .ok_or_else(|| format!("dependency `{name}`: path must be a string"))?;
                return Ok(Dependency::Path {
                    name: name.to_string(),
                    path: paths::normalize(&dir.join(path)),
                    version: version?,
                });
            }

            if let Some(git) = table.get("git") {
                let git = git
                    .as_str()
                    .ok_or_else(|| format!("dependency `{name}`: git must be a string"))?
                    .to_string();
                let refspec = parse_git_ref(name, table)?;
                return Ok(Dependency::Git {
                    name: name.to_string(),
                    git,
                    refspec,
                    version: version?,
                });
            }

            let range = table
                .get("version")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("dependency `{name}` has no path, git, or version"))?;
            let version = VersionReq::parse(range)
                .map_err(|err| format!("dependency `{name}`: invalid range `{range}`: {err}"))?;
            let registry = table
                .get("registry")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_REGISTRY)
                .to_string();
            let features = table
                .get("features")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Ok(Dependency::Registry {
                name: name.to_string(),
                version,
                registry,
                features,
            })
        }
        _ => Err(format!("dependency `{name}` must be a string or a table")),
    }
}

fn parse_git_ref(name: &str, table: &toml::Table) -> Result<GitRef, String> {
    let rev = table.get("rev").and_then(Value::as_str);
    let tag = table.get("tag").and_then(Value::as_str);
    let branch = table.get("branch").and_then(Value::as_str);

    match (rev, tag, branch) {
        (Some(rev), None, None) => Ok(GitRef::Rev(rev.to_string())),
        (None, Some(tag), None) => Ok(GitRef::Tag(tag.to_string())),
        (None, None, Some(branch)) => Ok(GitRef::Branch(branch.to_string())),
        (None, None, None) => Ok(GitRef::Default),
        _ => Err(format!(
            "dependency `{name}` declares more than one of rev, tag, branch"
        )),
    }
}

fn parse_targets(tree: &toml::Table, package_name: &str) -> Result<Vec<Target>, String> {
    let mut targets = Vec::new();

    let Some(raw) = tree.get("target") else {
        return Ok(targets);
    };
    let raw = raw
        .as_array()
        .ok_or("[[target]] must be an array of tables")?;

    for item in raw {
        let table = item.as_table().ok_or("[[target]] entries must be tables")?;
        let type_raw = table
            .get("type")
            .and_then(Value::as_str)
            .ok_or("target entry missing type")?;
        let target_type = TargetType::parse(type_raw).map_err(|err| err.to_string())?;
        let name = table
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(package_name)
            .to_string();
        let path = table
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or("build")
            .to_string();
        let filename = table
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{name}.{target_type}"));
        let blank = table
            .get("blank")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let src = table.get("src").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        });
        targets.push(Target {
            target_type,
            name,
            path: PathBuf::from(path),
            filename,
            blank,
            src,
        });
    }

    Ok(targets)
}

fn parse_references(tree: &toml::Table) -> Result<Vec<Reference>, String> {
    let mut references = Vec::new();

    let Some(raw) = tree.get("references") else {
        return Ok(references);
    };
    let raw = raw
        .as_array()
        .ok_or("[[references]] must be an array of tables")?;

    for item in raw {
        let table = item
            .as_table()
            .ok_or("[[references]] entries must be tables")?;
        let name = table
            .get("name")
            .and_then(Value::as_str)
            .ok_or("reference missing name")?
            .to_string();
        let guid = table
            .get("guid")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("reference `{name}` missing guid"))?
            .to_string();
        let major = table.get("major").and_then(Value::as_integer).unwrap_or(0) as u32;
        let minor = table.get("minor").and_then(Value::as_integer).unwrap_or(0) as u32;
        references.push(Reference {
            name,
            guid,
            major,
            minor,
        });
    }

    Ok(references)
}

fn parse_scripts(tree: &toml::Table) -> Result<BTreeMap<String, String>, String> {
    let mut scripts = BTreeMap::new();

    let Some(raw) = tree.get("scripts") else {
        return Ok(scripts);
    };
    let raw = raw
        .as_table()
        .ok_or("[scripts] must be a table of name = command entries")?;

    for (name, command) in raw {
        let command = command
            .as_str()
            .ok_or_else(|| format!("script `{name}` must be a string"))?;
        scripts.insert(name.clone(), command.to_string());
    }

    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::error::as_error;

    fn write_manifest(dir: &Path, text: &str) {
        fs::write(dir.join(MANIFEST_FILE), text).expect("write manifest");
    }

    const BASIC: &str = r#"
[package]
name = "standard"
version = "0.1.0"
authors = ["Tim Hall <tim@example.com>"]

[dependencies]
dictionary = "^1.4.1"

[[src]]
name = "Module1"
path = "src/Module1.bas"

[[target]]
type = "xlsm"
path = "build"
"#;

    #[test]
    fn basic_manifest_parses() {
        let td = tempdir().expect("tempdir");
        write_manifest(td.path(), BASIC);

        let manifest = load_manifest(td.path()).expect("load");

        assert_eq!(manifest.name, "standard");
        assert_eq!(manifest.version, Version::new(0, 1, 0));
        assert_eq!(manifest.src.len(), 1);
        assert_eq!(manifest.src[0].name, "Module1");
        assert!(manifest.src[0].path.ends_with("src/Module1.bas"));
        assert_eq!(manifest.targets.len(), 1);
        assert_eq!(manifest.targets[0].target_type, TargetType::Xlsm);
        assert_eq!(manifest.targets[0].filename, "standard.xlsm");
        assert!(!manifest.targets[0].blank);
    }

    #[test]
    fn bare_string_dependency_expands_to_registry() {
        let td = tempdir().expect("tempdir");
        write_manifest(td.path(), BASIC);

        let manifest = load_manifest(td.path()).expect("load");

        match &manifest.dependencies[0] {
            Dependency::Registry {
                name,
                version,
                registry,
                features,
            } => {
                assert_eq!(name, "dictionary");
                assert!(version.matches(&Version::new(1, 4, 2)));
                assert!(!version.matches(&Version::new(2, 0, 0)));
                assert_eq!(registry, DEFAULT_REGISTRY);
                assert!(features.is_empty());
            }
            other => panic!("expected registry dependency, got {other:?}"),
        }
    }

    #[test]
    fn path_takes_priority_over_version() {
        let td = tempdir().expect("tempdir");
        write_manifest(
            td.path(),
            r#"
[package]
name = "demo"
version = "1.0.0"

[dependencies]
local = { path = "../local", version = "1.2.3" }
"#,
        );

        let manifest = load_manifest(td.path()).expect("load");

        match &manifest.dependencies[0] {
            Dependency::Path { name, path, version } => {
                assert_eq!(name, "local");
                assert!(path.is_absolute() || path.starts_with(".."));
                assert_eq!(version.as_ref(), Some(&Version::new(1, 2, 3)));
            }
            other => panic!("expected path dependency, got {other:?}"),
        }
    }

    #[test]
    fn git_dependency_parses_refspec() {
        let td = tempdir().expect("tempdir");
        write_manifest(
            td.path(),
            r#"
[package]
name = "demo"
version = "1.0.0"

[dependencies]
remote = { git = "https://example.com/remote.git", tag = "v1.0.0" }
"#,
        );

        let manifest = load_manifest(td.path()).expect("load");

        match &manifest.dependencies[0] {
            Dependency::Git { git, refspec, .. } => {
                assert_eq!(git, "https://example.com/remote.git");
                assert_eq!(refspec, &GitRef::Tag("v1.0.0".to_string()));
            }
            other => panic!("expected git dependency, got {other:?}"),
        }
    }

    #[test]
    fn conflicting_git_refs_are_rejected() {
        let td = tempdir().expect("tempdir");
        write_manifest(
            td.path(),
            r#"
[package]
name = "demo"
version = "1.0.0"

[dependencies]
remote = { git = "https://example.com/remote.git", tag = "v1", branch = "main" }
"#,
        );

        let err = load_manifest(td.path()).expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("manifest-invalid"));
    }

    #[test]
    fn missing_manifest_yields_not_found() {
        let td = tempdir().expect("tempdir");
        let err = load_manifest(td.path()).expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("manifest-not-found"));
    }

    #[test]
    fn uppercase_names_are_rejected() {
        let td = tempdir().expect("tempdir");
        write_manifest(
            td.path(),
            r#"
[package]
name = "Standard"
version = "1.0.0"
"#,
        );

        let err = load_manifest(td.path()).expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("manifest-invalid"));
    }

    #[test]
    fn duplicate_src_names_are_rejected() {
        let td = tempdir().expect("tempdir");
        write_manifest(
            td.path(),
            r#"
[package]
name = "demo"
version = "1.0.0"

[[src]]
name = "Module1"
path = "src/Module1.bas"

[[src]]
name = "Module1"
path = "src/Other.bas"
"#,
        );

        let err = load_manifest(td.path()).expect_err("must fail");
        let message = format!("{err:#}");
        assert!(message.contains("duplicate src name"));
    }

    #[test]
    fn workspace_members_are_loaded_and_deduplicated() {
        let td = tempdir().expect("tempdir");
        fs::create_dir_all(td.path().join("addin")).expect("mkdir");
        write_manifest(
            td.path(),
            r#"
[package]
name = "root"
version = "1.0.0"

[workspace]
members = ["addin"]
"#,
        );
        write_manifest(
            &td.path().join("addin"),
            r#"
[package]
name = "addin"
version = "0.2.0"
"#,
        );

        let workspace = load_workspace(td.path()).expect("load workspace");
        assert_eq!(workspace.root.name, "root");
        assert_eq!(workspace.members.len(), 1);
        assert_eq!(workspace.members[0].name, "addin");

        let (root, members) = workspace.snapshots();
        assert_eq!(root.name, "root");
        assert_eq!(members[0].version, Version::new(0, 2, 0));
    }

    #[test]
    fn scripts_and_references_parse() {
        let td = tempdir().expect("tempdir");
        write_manifest(
            td.path(),
            r#"
[package]
name = "demo"
version = "1.0.0"

[scripts]
smoke = "cscript tests/smoke.vbs"

[[references]]
name = "Scripting"
guid = "{420B2830-E718-11CF-893D-00A0C9054228}"
major = 1
minor = 0
"#,
        );

        let manifest = load_manifest(td.path()).expect("load");
        assert_eq!(
            manifest.scripts.get("smoke").map(String::as_str),
            Some("cscript tests/smoke.vbs")
        );
        assert_eq!(manifest.references.len(), 1);
        assert_eq!(manifest.references[0].major, 1);
    }

    #[test]
    fn unknown_target_type_is_rejected() {
        let td = tempdir().expect("tempdir");
        write_manifest(
            td.path(),
            r#"
[package]
name = "demo"
version = "1.0.0"

[[target]]
type = "pdf"
"#,
        );

        let err = load_manifest(td.path()).expect_err("must fail");
        assert_eq!(as_error(&err).map(|e| e.kind()), Some("manifest-invalid"));
    }
}
