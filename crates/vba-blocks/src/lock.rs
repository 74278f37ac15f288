//! File locks guarding shared cache entries.
//!
//! Writers to `cache/sources/…` take a `<entry>.lock` file; the registry
//! clone takes a coarse lock to serialise updates. Contenders wait,
//! removing locks whose holder information is older than the stale timeout.
//! The lock file contains JSON metadata about the holder for diagnostics.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Locks older than this are considered abandoned and taken over.
pub const STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Information stored in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting up to `wait` for the current
    /// holder. Stale locks are removed and retried.
    pub fn acquire(path: &Path, wait: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock dir {}", parent.display()))?;
        }

        let deadline = Instant::now() + wait;
        loop {
            match Self::try_acquire(path)? {
                Some(lock) => return Ok(lock),
                None => {
                    if let Ok(info) = Self::read_info(path)
                        && Utc::now()
                            .signed_duration_since(info.acquired_at)
                            .to_std()
                            .map(|age| age > STALE_AFTER)
                            .unwrap_or(false)
                    {
                        let _ = fs::remove_file(path);
                        continue;
                    }

                    if Instant::now() >= deadline {
                        let holder = Self::read_info(path)
                            .map(|info| format!("pid {} on {}", info.pid, info.hostname))
                            .unwrap_or_else(|_| "unknown holder".to_string());
                        bail!(
                            "timed out waiting for lock {} held by {holder}",
                            path.display()
                        );
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create lock file {}", path.display()));
            }
        };

        let info = LockInfo {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            acquired_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&info).context("failed to serialize lock info")?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("failed to write lock file {}", path.display()))?;
        file.sync_all().ok();

        Ok(Some(Self {
            path: path.to_path_buf(),
        }))
    }

    fn read_info(path: &Path) -> Result<LockInfo> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read lock file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse lock file {}", path.display()))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn acquire_writes_holder_info_and_releases_on_drop() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("entry.lock");

        {
            let _lock = FileLock::acquire(&path, Duration::from_secs(1)).expect("acquire");
            assert!(path.exists());

            let info = FileLock::read_info(&path).expect("read info");
            assert_eq!(info.pid, std::process::id());
        }

        assert!(!path.exists());
    }

    #[test]
    fn contender_times_out_while_lock_is_held() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("entry.lock");

        let _held = FileLock::acquire(&path, Duration::from_secs(1)).expect("acquire");
        let err = FileLock::acquire(&path, Duration::from_millis(250)).expect_err("must time out");
        assert!(format!("{err:#}").contains("timed out waiting for lock"));
    }

    #[test]
    fn stale_locks_are_taken_over() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("entry.lock");

        let stale = LockInfo {
            pid: 1,
            hostname: "gone".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(1),
        };
        fs::write(&path, serde_json::to_string(&stale).expect("json")).expect("seed");

        let _lock = FileLock::acquire(&path, Duration::from_secs(1)).expect("takeover");
        let info = FileLock::read_info(&path).expect("read info");
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn lock_with_unreadable_info_blocks_until_timeout() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("entry.lock");
        fs::write(&path, "{not-json").expect("seed");

        let err = FileLock::acquire(&path, Duration::from_millis(250)).expect_err("must time out");
        assert!(format!("{err:#}").contains("unknown holder"));
    }
}
