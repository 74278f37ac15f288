//! Path dependencies: resolved from the nested manifest, fetched verbatim.

use std::path::PathBuf;

use anyhow::Result;

use crate::error::Error;
use crate::manifest::{self, Dependency, MANIFEST_FILE};
use crate::sources::{Registration, SourceUri};

#[derive(Debug)]
pub struct PathSource;

impl PathSource {
    /// Read the nested manifest to obtain the single available version.
    pub fn resolve(&self, dependency: &Dependency) -> Result<Vec<Registration>> {
        let Dependency::Path { name, path, .. } = dependency else {
            return Ok(vec![]);
        };

        if !path.join(MANIFEST_FILE).exists() {
            return Err(Error::DependencyPathNotFound {
                name: name.clone(),
                path: path.clone(),
            }
            .into());
        }

        let nested = manifest::load_manifest(path)?;
        if nested.name != *name {
            return Err(Error::DependencyPathNotFound {
                name: name.clone(),
                path: path.clone(),
            }
            .into());
        }

        Ok(vec![Registration {
            name: nested.name.clone(),
            version: nested.version.clone(),
            source: SourceUri::path(path),
            dependencies: nested.dependencies.clone(),
            checksum: None,
        }])
    }

    /// The source already lives at its final location; no copy is made.
    pub fn fetch(&self, registration: &Registration) -> Result<PathBuf> {
        let path = PathBuf::from(&registration.source.value);
        if !path.join(MANIFEST_FILE).exists() {
            return Err(Error::DependencyPathNotFound {
                name: registration.name.clone(),
                path,
            }
            .into());
        }
        Ok(path)
    }
}
