//! Registry dependencies: index-backed resolution and checksum-verified
//! tarball downloads.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::Error;
use crate::lock::FileLock;
use crate::manifest::Dependency;
use crate::paths;
use crate::sources::index::RegistryIndex;
use crate::sources::{Registration, SourceUri};

const FETCH_WAIT: Duration = Duration::from_secs(120);

#[derive(Debug)]
pub struct RegistrySource {
    index: RegistryIndex,
}

impl RegistrySource {
    pub fn new(name: &str, url: &str) -> Self {
        RegistrySource {
            index: RegistryIndex::new(name, url),
        }
    }

    pub fn name(&self) -> &str {
        self.index.name()
    }

    /// All published versions of the dependency, newest last as listed.
    pub fn resolve(&self, config: &Config, dependency: &Dependency) -> Result<Vec<Registration>> {
        let Dependency::Registry { name, .. } = dependency else {
            return Ok(vec![]);
        };

        let entries = self.index.load(config, name)?;
        Ok(entries
            .into_iter()
            .map(|entry| Registration {
                name: name.clone(),
                version: entry.version,
                source: SourceUri::registry(self.name()),
                dependencies: entry.dependencies,
                checksum: Some(entry.checksum),
            })
            .collect())
    }

    /// Download, verify, and unpack the registration's tarball into the
    /// cache. Nothing is moved into place until the checksum matches.
    pub fn fetch(&self, config: &Config, registration: &Registration) -> Result<PathBuf> {
        let dest = config.registry_package_dir(&registration.name, &registration.version);
        if dest.join(crate::manifest::MANIFEST_FILE).exists() {
            return Ok(dest);
        }

        let _lock = FileLock::acquire(&dest.with_extension("lock"), FETCH_WAIT)?;
        if dest.join(crate::manifest::MANIFEST_FILE).exists() {
            return Ok(dest);
        }

        let entries = self.index.load(config, &registration.name)?;
        let entry = entries
            .iter()
            .find(|entry| entry.version == registration.version)
            .ok_or_else(|| Error::DependencyNotFound {
                name: registration.name.clone(),
            })?;

        let expected = registration
            .checksum
            .as_deref()
            .unwrap_or(&entry.checksum)
            .to_lowercase();

        let bytes = download(&entry.url)?;
        verify_checksum(&registration.name, &expected, &bytes)?;

        unpack(&bytes, &dest)?;
        Ok(dest)
    }

    pub fn update(&self, config: &Config) -> Result<()> {
        self.index.update(config)
    }
}

/// Compare the tarball digest against the index checksum; runs before the
/// tarball is unpacked, so a mismatch leaves the cache untouched.
fn verify_checksum(name: &str, expected: &str, bytes: &[u8]) -> Result<()> {
    let actual = hex::encode(Sha256::digest(bytes));
    if actual != expected {
        return Err(Error::DependencyInvalidChecksum {
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        }
        .into());
    }
    Ok(())
}

/// HTTPS GET with redirect following; 4xx/5xx fail before any bytes are used.
fn download(url: &str) -> Result<Vec<u8>> {
    let client = Client::builder()
        .user_agent(format!("vba-blocks/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let send_failed = |message: String| Error::SourceDownloadFailed {
        url: url.to_string(),
        message,
    };

    let response = client
        .get(url)
        .send()
        .map_err(|err| send_failed(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(send_failed(format!("server returned {status}")).into());
    }

    let bytes = response
        .bytes()
        .map_err(|err| send_failed(err.to_string()))?;
    Ok(bytes.to_vec())
}

/// Unpack a gzipped tarball into `dest` through a temp directory and an
/// atomic rename, so readers never observe a partial entry.
fn unpack(bytes: &[u8], dest: &Path) -> Result<()> {
    let parent = dest.parent().context("cache dir has no parent")?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

    let part = dest.with_extension("part");
    paths::ensure_empty_dir(&part)?;

    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(&part)
        .with_context(|| format!("failed to unpack tarball into {}", part.display()))?;

    // Tolerate archives that wrap everything in a single top-level folder.
    let root = if part.join(crate::manifest::MANIFEST_FILE).exists() {
        part.clone()
    } else {
        let mut entries = fs::read_dir(&part)
            .with_context(|| format!("failed to read {}", part.display()))?
            .collect::<std::io::Result<Vec<_>>>()?;
        if entries.len() == 1 && entries[0].path().is_dir() {
            entries.remove(0).path()
        } else {
            part.clone()
        }
    };

    paths::remove_dir_if_exists(dest)?;
    fs::rename(&root, dest).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            root.display(),
            dest.display()
        )
    })?;
    paths::remove_dir_if_exists(&part)?;
    paths::fsync_parent_dir(dest);
    Ok(())
}
