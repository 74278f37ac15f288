//! Path and filesystem utilities: atomic writes, directory trees, and scoped
//! temporary directories.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Best-effort fsync of the parent directory after a rename, ensuring the
/// directory entry update is durable on crash. Errors are silently ignored
/// because not all platforms support opening a directory for sync.
pub(crate) fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

/// Write `data` to `path` through a temp file and rename, so readers never
/// observe a partially written file.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");

    {
        let mut f = File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        f.write_all(data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp.display(),
            path.display()
        )
    })?;

    fsync_parent_dir(path);

    Ok(())
}

/// Create `dir` (and parents) if needed, then remove any existing entries so
/// the caller starts from an empty directory.
pub fn ensure_empty_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("failed to clear directory {}", dir.display()))?;
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    Ok(())
}

/// Remove a directory tree if it exists. Missing directories are not errors.
pub fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("failed to remove directory {}", dir.display()))?;
    }
    Ok(())
}

/// Lexically normalise a path, resolving `.` and `..` components without
/// touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render `path` relative to `base` using forward slashes and a trailing
/// slash, the form stored for path sources in the lockfile.
pub fn to_posix_relative(path: &Path, base: &Path) -> String {
    let path = normalize(path);
    let base = normalize(base);

    let mut path_parts: Vec<_> = path.components().collect();
    let mut base_parts: Vec<_> = base.components().collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    path_parts.drain(..common);
    base_parts.drain(..common);

    let mut parts: Vec<String> = base_parts.iter().map(|_| "..".to_string()).collect();
    parts.extend(
        path_parts
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );

    if parts.is_empty() {
        "./".to_string()
    } else {
        format!("{}/", parts.join("/"))
    }
}

/// Resolve a POSIX-relative string (as stored in the lockfile) back to an
/// absolute path under `base`.
pub fn from_posix_relative(relative: &str, base: &Path) -> PathBuf {
    let trimmed = relative.trim_end_matches('/');
    let mut out = base.to_path_buf();
    for part in trimmed.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    normalize(&out)
}

/// A directory whose lifetime is bound to an action: created on entry,
/// removed on every exit path, including panics and cancellation.
#[derive(Debug)]
pub struct ScopedDir {
    path: PathBuf,
    disarmed: bool,
}

impl ScopedDir {
    /// Create (or empty) the directory at `path` and take ownership of it.
    pub fn create(path: PathBuf) -> Result<Self> {
        ensure_empty_dir(&path)?;
        Ok(Self {
            path,
            disarmed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory on disk instead of removing it on drop.
    pub fn keep(mut self) -> PathBuf {
        self.disarmed = true;
        self.path.clone()
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        if !self.disarmed {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}
