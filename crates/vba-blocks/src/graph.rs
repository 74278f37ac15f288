//! Build graph loading: the component set contributed by the project and
//! every resolved dependency, validated for conflicts.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};

use crate::error::Error;
use crate::manifest::{Manifest, Reference, Src, Target};
use crate::parallel;
use crate::report::{CancelToken, Reporter};

/// Component kinds, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Standard,
    Class,
    Form,
    Document,
}

impl ComponentKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "bas" => Some(ComponentKind::Standard),
            "cls" => Some(ComponentKind::Class),
            "frm" => Some(ComponentKind::Form),
            "doccls" => Some(ComponentKind::Document),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ComponentKind::Standard => "bas",
            ComponentKind::Class => "cls",
            ComponentKind::Form => "frm",
            ComponentKind::Document => "doccls",
        }
    }
}

/// A binary sidecar (`.frx`) kept next to its component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub filename: String,
    pub data: Vec<u8>,
}

/// A fully populated component; no field is filled in later by side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// The `Attribute VB_Name` declared in the header.
    pub name: String,
    /// `{name}.{extension}` as staged for import.
    pub filename: String,
    pub kind: ComponentKind,
    pub code: String,
    pub binary: Option<Binary>,
}

impl Component {
    /// Load a component from a manifest `[[src]]` entry.
    pub fn load(src: &Src) -> Result<Self> {
        let filename = src
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let extension = src
            .path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let kind = ComponentKind::from_extension(&extension).ok_or_else(|| {
            Error::ComponentUnrecognized {
                filename: filename.clone(),
            }
        })?;

        let code = fs::read_to_string(&src.path)
            .with_context(|| format!("failed to read component {}", src.path.display()))?;

        let name = declared_name(&code).ok_or_else(|| Error::ComponentInvalidNoName {
            filename: filename.clone(),
        })?;

        let binary = src
            .binary
            .as_ref()
            .map(|path| -> Result<Binary> {
                let data = fs::read(path)
                    .with_context(|| format!("failed to read sidecar {}", path.display()))?;
                Ok(Binary {
                    filename: path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    data,
                })
            })
            .transpose()?;

        Ok(Component {
            filename: format!("{}.{}", name, kind.extension()),
            name,
            kind,
            code,
            binary,
        })
    }
}

/// Extract the non-empty `Attribute VB_Name = "…"` declaration.
fn declared_name(code: &str) -> Option<String> {
    for line in code.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Attribute VB_Name") {
            let value = rest.trim_start().strip_prefix('=')?.trim();
            let name = value.trim_matches('"').trim();
            if name.is_empty() {
                return None;
            }
            return Some(name.to_string());
        }
    }
    None
}

/// The union of all components and references contributed by the project
/// and its dependencies.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    pub components: Vec<Component>,
    pub references: Vec<Reference>,
}

/// The per-target projection of a [`BuildGraph`].
#[derive(Debug, Clone, Default)]
pub struct ImportGraph {
    pub components: Vec<Component>,
    pub references: Vec<Reference>,
}

impl BuildGraph {
    /// Load components from the project and every dependency manifest,
    /// reading files on the fan-out pool, then validate the union.
    pub fn load(
        project: &Manifest,
        dependencies: &[Manifest],
        reporter: &mut dyn Reporter,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let mut entries: Vec<&Src> = project.src.iter().collect();
        for dependency in dependencies {
            entries.extend(dependency.src.iter());
        }

        let components = parallel::map(
            "components",
            entries,
            |src| Component::load(src),
            reporter,
            cancel,
        )?;

        let mut seen: BTreeMap<&str, &Component> = BTreeMap::new();
        for component in &components {
            if seen.insert(component.name.as_str(), component).is_some() {
                return Err(Error::BuildInvalid {
                    message: format!("duplicate component name `{}`", component.name),
                }
                .into());
            }
        }

        let mut references: Vec<Reference> = Vec::new();
        let manifests = std::iter::once(project).chain(dependencies.iter());
        for manifest in manifests {
            for reference in &manifest.references {
                merge_reference(&mut references, reference)?;
            }
        }
        references.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(BuildGraph {
            components,
            references,
        })
    }

    /// Load the components found in an exported directory, pairing `.frx`
    /// sidecars with the component of the same stem. Unrecognised files are
    /// skipped; an export may contain host artifacts.
    pub fn load_dir(dir: &std::path::Path) -> Result<Vec<Component>> {
        let mut components = Vec::new();

        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read export dir {}", dir.display()))?
            .collect::<std::io::Result<Vec<_>>>()?;

        for entry in &entries {
            let path = entry.path();
            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if ComponentKind::from_extension(&extension).is_none() {
                continue;
            }

            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let sidecar = dir.join(format!("{stem}.frx"));
            let src = Src {
                name: stem,
                path: path.clone(),
                binary: sidecar.exists().then_some(sidecar),
            };
            components.push(Component::load(&src)?);
        }

        components.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(components)
    }

    /// Project this graph onto a target, filtered by its declared `src`.
    pub fn for_target(&self, target: &Target) -> ImportGraph {
        let components = match &target.src {
            Some(names) => self
                .components
                .iter()
                .filter(|component| names.contains(&component.name))
                .cloned()
                .collect(),
            None => self.components.clone(),
        };
        ImportGraph {
            components,
            references: self.references.clone(),
        }
    }
}

/// Merge one reference; the same GUID at a different version is a conflict.
fn merge_reference(references: &mut Vec<Reference>, reference: &Reference) -> Result<()> {
    if let Some(existing) = references.iter().find(|r| r.guid == reference.guid) {
        if existing.major != reference.major || existing.minor != reference.minor {
            return Err(Error::BuildInvalid {
                message: format!(
                    "reference `{}` requested at both {}.{} and {}.{}",
                    reference.name,
                    existing.major,
                    existing.minor,
                    reference.major,
                    reference.minor
                ),
            }
            .into());
        }
        return Ok(());
    }
    references.push(reference.clone());
    Ok(())
}
