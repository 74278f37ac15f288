//! Source backends: registry, path, and git.
//!
//! Backends form a closed variant set with a uniform contract: `matches`
//! (can this backend serve a hint), `resolve` (enumerate candidate
//! registrations for a dependency), `fetch` (materialise a registration
//! locally), and `update` (refresh backend state; registry only). New kinds
//! are added by extending the variant, not by runtime registration.

pub mod git;
pub mod index;
pub mod path;
pub mod registry;

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use semver::Version;

use crate::config::Config;
use crate::error::Error;
use crate::manifest::Dependency;

/// The kind discriminator of a [`SourceUri`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceKind {
    Registry,
    Path,
    Git,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Registry => "registry",
            SourceKind::Path => "path",
            SourceKind::Git => "git",
        }
    }
}

/// A flat source identifier: `{type}+{value}[#{details}]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceUri {
    pub kind: SourceKind,
    pub value: String,
    pub details: Option<String>,
}

impl SourceUri {
    pub fn registry(name: &str) -> Self {
        SourceUri {
            kind: SourceKind::Registry,
            value: name.to_string(),
            details: None,
        }
    }

    pub fn path(path: &std::path::Path) -> Self {
        SourceUri {
            kind: SourceKind::Path,
            value: path.to_string_lossy().replace('\\', "/"),
            details: None,
        }
    }

    pub fn git(url: &str, commit: &str) -> Self {
        SourceUri {
            kind: SourceKind::Git,
            value: url.to_string(),
            details: Some(commit.to_string()),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (kind_raw, rest) = raw.split_once('+').ok_or_else(|| {
            Error::SourceUnrecognizedType {
                uri: raw.to_string(),
            }
        })?;
        let kind = match kind_raw {
            "registry" => SourceKind::Registry,
            "path" => SourceKind::Path,
            "git" => SourceKind::Git,
            _ => {
                return Err(Error::SourceUnrecognizedType {
                    uri: raw.to_string(),
                });
            }
        };
        let (value, details) = match rest.split_once('#') {
            Some((value, details)) => (value.to_string(), Some(details.to_string())),
            None => (rest.to_string(), None),
        };
        Ok(SourceUri {
            kind,
            value,
            details,
        })
    }
}

impl fmt::Display for SourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.kind.as_str(), self.value)?;
        if let Some(details) = &self.details {
            write!(f, "#{details}")?;
        }
        Ok(())
    }
}

/// A resolved, uniquely identified package version at a specific source.
/// Immutable once minted.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub name: String,
    pub version: Version,
    pub source: SourceUri,
    pub dependencies: Vec<Dependency>,
    /// Hex SHA-256 of the registry tarball, when the source carries one.
    pub checksum: Option<String>,
}

impl Registration {
    /// Globally unique id: `{name} {version} {source}`.
    pub fn id(&self) -> String {
        format!("{} {} {}", self.name, self.version, self.source)
    }
}

/// A hint for backend matching: a source type string or a dependency.
#[derive(Debug, Clone, Copy)]
pub enum SourceHint<'a> {
    Kind(&'a str),
    Dependency(&'a Dependency),
}

/// The closed set of backends.
#[derive(Debug)]
pub enum Source {
    Registry(registry::RegistrySource),
    Path(path::PathSource),
    Git(git::GitSource),
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Registry(_) => SourceKind::Registry,
            Source::Path(_) => SourceKind::Path,
            Source::Git(_) => SourceKind::Git,
        }
    }

    pub fn matches(&self, hint: SourceHint<'_>) -> bool {
        let kind = match hint {
            SourceHint::Kind(raw) => return raw == self.kind().as_str(),
            SourceHint::Dependency(Dependency::Registry { .. }) => SourceKind::Registry,
            SourceHint::Dependency(Dependency::Path { .. }) => SourceKind::Path,
            SourceHint::Dependency(Dependency::Git { .. }) => SourceKind::Git,
        };
        kind == self.kind()
    }

    /// Enumerate candidate registrations satisfying `dependency`.
    pub fn resolve(&self, config: &Config, dependency: &Dependency) -> Result<Vec<Registration>> {
        match self {
            Source::Registry(backend) => backend.resolve(config, dependency),
            Source::Path(backend) => backend.resolve(dependency),
            Source::Git(backend) => backend.resolve(config, dependency),
        }
    }

    /// Materialise the registration locally and return its directory.
    /// Idempotent across runs.
    pub fn fetch(&self, config: &Config, registration: &Registration) -> Result<PathBuf> {
        match self {
            Source::Registry(backend) => backend.fetch(config, registration),
            Source::Path(backend) => backend.fetch(registration),
            Source::Git(backend) => backend.fetch(config, registration),
        }
    }

    /// Refresh backend state. Only the registry backend has state to refresh.
    pub fn update(&self, config: &Config) -> Result<()> {
        match self {
            Source::Registry(backend) => backend.update(config),
            Source::Path(_) | Source::Git(_) => Ok(()),
        }
    }
}

/// All configured backends, with dispatch by dependency and by URI.
#[derive(Debug)]
pub struct SourceSet {
    sources: Vec<Source>,
}

impl SourceSet {
    /// Backends for every registry in `config`, plus path and git.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut sources = Vec::new();
        for (name, url) in &config.registries {
            sources.push(Source::Registry(registry::RegistrySource::new(name, url)));
        }
        sources.push(Source::Path(path::PathSource));
        sources.push(Source::Git(git::GitSource));
        Ok(SourceSet { sources })
    }

    /// The backend serving `dependency`.
    pub fn for_dependency(&self, dependency: &Dependency) -> Result<&Source, Error> {
        if let Dependency::Registry { registry, .. } = dependency {
            return self
                .sources
                .iter()
                .find(|source| match source {
                    Source::Registry(backend) => backend.name() == registry,
                    _ => false,
                })
                .ok_or_else(|| Error::SourceMisconfiguredRegistry {
                    name: registry.clone(),
                });
        }

        self.sources
            .iter()
            .find(|source| source.matches(SourceHint::Dependency(dependency)))
            .ok_or_else(|| Error::SourceNoMatching {
                name: dependency.name().to_string(),
            })
    }

    /// The backend serving a registration minted earlier, keyed by URI.
    pub fn for_uri(&self, uri: &SourceUri) -> Result<&Source, Error> {
        match uri.kind {
            SourceKind::Registry => self
                .sources
                .iter()
                .find(|source| match source {
                    Source::Registry(backend) => backend.name() == uri.value,
                    _ => false,
                })
                .ok_or_else(|| Error::SourceMisconfiguredRegistry {
                    name: uri.value.clone(),
                }),
            kind => self
                .sources
                .iter()
                .find(|source| source.kind() == kind)
                .ok_or_else(|| Error::SourceUnrecognizedType {
                    uri: uri.to_string(),
                }),
        }
    }
}
