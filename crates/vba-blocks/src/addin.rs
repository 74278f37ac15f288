//! The addin bridge: the external service that opens, imports into,
//! exports from, and closes target documents.
//!
//! The core consumes the bridge as an opaque four-call service. The default
//! implementation shells out to a configured bridge command (`--addin PATH`
//! or `VBA_BLOCKS_ADDIN`) which drives the host application; each call
//! exchanges a single line of JSON on stdout.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use serde::Deserialize;

use crate::error::Error;

/// Opaque handle to an open target document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeHandle(pub String);

/// The manifest fragment returned by `export`: what the target currently
/// contains.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportFragment {
    #[serde(default)]
    pub components: Vec<ExportedComponent>,
    #[serde(default)]
    pub references: Vec<ExportedReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportedComponent {
    pub name: String,
    pub filename: String,
    #[serde(default)]
    pub binary: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportedReference {
    pub name: String,
    pub guid: String,
    pub major: u32,
    pub minor: u32,
}

pub trait AddinBridge {
    /// Open the document at `path`, creating a blank container when the
    /// file does not exist yet.
    fn open(&mut self, path: &Path) -> Result<BridgeHandle>;

    /// Apply the staged directory (components plus the changeset
    /// instruction file) to the open document.
    fn import(&mut self, handle: &BridgeHandle, dir: &Path) -> Result<()>;

    /// Export the document's current components into `dir` and describe
    /// them.
    fn export(&mut self, handle: &BridgeHandle, dir: &Path) -> Result<ExportFragment>;

    /// Close the document, saving when asked.
    fn close(&mut self, handle: &BridgeHandle, save: bool) -> Result<()>;
}

/// Bridge implementation that invokes an external command.
#[derive(Debug)]
pub struct ScriptBridge {
    command: PathBuf,
}

#[derive(Debug, Deserialize)]
struct OpenResponse {
    handle: String,
}

impl ScriptBridge {
    pub fn new(command: PathBuf) -> Self {
        ScriptBridge { command }
    }

    fn run(&self, args: &[&str]) -> Result<String, String> {
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .map_err(|err| format!("failed to run bridge {}: {err}", self.command.display()))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl AddinBridge for ScriptBridge {
    fn open(&mut self, path: &Path) -> Result<BridgeHandle> {
        let path_arg = path.to_string_lossy();
        match self.run(&["open", path_arg.as_ref()]) {
            Ok(stdout) => {
                let response: OpenResponse = serde_json::from_str(&stdout).map_err(|err| {
                    Error::TargetCreateFailed {
                        path: path.to_path_buf(),
                        message: format!("unparsable bridge response: {err}"),
                    }
                })?;
                Ok(BridgeHandle(response.handle))
            }
            Err(message) if message.contains("target-is-open") => Err(Error::TargetIsOpen {
                path: path.to_path_buf(),
            }
            .into()),
            Err(message) => Err(Error::TargetCreateFailed {
                path: path.to_path_buf(),
                message,
            }
            .into()),
        }
    }

    fn import(&mut self, handle: &BridgeHandle, dir: &Path) -> Result<()> {
        let dir_arg = dir.to_string_lossy();
        self.run(&["import", handle.0.as_str(), dir_arg.as_ref()])
            .map(|_| ())
            .map_err(|message| {
                Error::TargetImportFailed {
                    path: dir.to_path_buf(),
                    message,
                }
                .into()
            })
    }

    fn export(&mut self, handle: &BridgeHandle, dir: &Path) -> Result<ExportFragment> {
        let dir_arg = dir.to_string_lossy();
        let stdout = self
            .run(&["export", handle.0.as_str(), dir_arg.as_ref()])
            .map_err(|message| Error::ExportFailed { message })?;
        let fragment = serde_json::from_str(&stdout).map_err(|err| Error::ExportFailed {
            message: format!("unparsable bridge response: {err}"),
        })?;
        Ok(fragment)
    }

    fn close(&mut self, handle: &BridgeHandle, save: bool) -> Result<()> {
        let save_arg = if save { "--save" } else { "--no-save" };
        self.run(&["close", handle.0.as_str(), save_arg])
            .map(|_| ())
            .map_err(|message| {
                Error::TargetImportFailed {
                    path: PathBuf::from(&handle.0),
                    message,
                }
                .into()
            })
    }
}
