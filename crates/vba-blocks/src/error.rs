//! Typed error values with stable kind identifiers.
//!
//! Fallible internals use `anyhow::Result` with context, but every failure a
//! user can act on is minted as an [`Error`] at the fault site and carried
//! inside the `anyhow` chain. The CLI downcasts the chain to recover the
//! stable kind string and the process exit code; anything that is not an
//! [`Error`] is reported as an I/O failure (exit code 3).

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for user errors (validation, not-found).
pub const EXIT_USER: i32 = 1;
/// Exit code for resolution failures.
pub const EXIT_RESOLVE: i32 = 2;
/// Exit code for I/O and bridge failures.
pub const EXIT_IO: i32 = 3;
/// Exit code for a failed backup restore. Never remapped.
pub const EXIT_RESTORE: i32 = 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown command `{command}`")]
    UnknownCommand { command: String },

    #[error("could not find `project.toml` in `{}`", path.display())]
    ManifestNotFound { path: PathBuf },

    #[error("invalid manifest `{}`: {message}", path.display())]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("source type `{hint}` is not supported")]
    SourceUnsupported { hint: String },

    #[error("no registry named `{name}` is configured")]
    SourceMisconfiguredRegistry { name: String },

    #[error("no source matches dependency `{name}`")]
    SourceNoMatching { name: String },

    #[error("failed to download `{url}`: {message}")]
    SourceDownloadFailed { url: String, message: String },

    #[error("unrecognized source type in `{uri}`")]
    SourceUnrecognizedType { uri: String },

    #[error("dependency `{name}` not found")]
    DependencyNotFound { name: String },

    #[error("checksum mismatch for `{name}`: expected {expected}, got {actual}")]
    DependencyInvalidChecksum {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("path dependency `{name}` has no manifest at `{}`", path.display())]
    DependencyPathNotFound { name: String, path: PathBuf },

    #[error("dependency `{name}` has an unknown source `{source_kind}`")]
    DependencyUnknownSource { name: String, source_kind: String },

    #[error("invalid build graph: {message}")]
    BuildInvalid { message: String },

    #[error("failed to write lockfile `{}`: {message}", path.display())]
    LockfileWriteFailed { path: PathBuf, message: String },

    #[error("could not resolve dependencies: {message}")]
    ResolveFailed { message: String },

    #[error("no target matches `{hint}`")]
    TargetNoMatching { hint: String },

    #[error("no default target is declared and no --target was given")]
    TargetNoDefault,

    #[error("target file `{}` does not exist", path.display())]
    TargetNotFound { path: PathBuf },

    #[error("target `{}` is open in the host application; close it and retry", path.display())]
    TargetIsOpen { path: PathBuf },

    #[error("failed to create target `{}`: {message}", path.display())]
    TargetCreateFailed { path: PathBuf, message: String },

    #[error("failed to import into target `{}`: {message}", path.display())]
    TargetImportFailed { path: PathBuf, message: String },

    #[error(
        "failed to restore `{}` from backup `{}`: {message}",
        path.display(),
        backup.display()
    )]
    TargetRestoreFailed {
        path: PathBuf,
        backup: PathBuf,
        message: String,
    },

    #[error("`target add` requires a target type")]
    TargetAddNoType,

    #[error("unrecognized component extension for `{filename}`")]
    ComponentUnrecognized { filename: String },

    #[error("component `{filename}` declares no VB_Name attribute")]
    ComponentInvalidNoName { filename: String },

    #[error("script `{name}` is not defined in the manifest")]
    RunScriptNotFound { name: String },

    #[error("directory `{}` already exists", path.display())]
    NewDirExists { path: PathBuf },

    #[error("`{name}` is not a valid project name (lowercase kebab-case required)")]
    NewInvalidName { name: String },

    #[error("--from file `{}` does not exist", path.display())]
    FromNotFound { path: PathBuf },

    #[error("failed to export from target: {message}")]
    ExportFailed { message: String },

    #[error("no addin bridge supports target type `{target_type}`")]
    AddinUnsupportedType { target_type: String },
}

impl Error {
    /// Stable kind identifier, independent of the Rust type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownCommand { .. } => "unknown-command",
            Error::ManifestNotFound { .. } => "manifest-not-found",
            Error::ManifestInvalid { .. } => "manifest-invalid",
            Error::SourceUnsupported { .. } => "source-unsupported",
            Error::SourceMisconfiguredRegistry { .. } => "source-misconfigured-registry",
            Error::SourceNoMatching { .. } => "source-no-matching",
            Error::SourceDownloadFailed { .. } => "source-download-failed",
            Error::SourceUnrecognizedType { .. } => "source-unrecognized-type",
            Error::DependencyNotFound { .. } => "dependency-not-found",
            Error::DependencyInvalidChecksum { .. } => "dependency-invalid-checksum",
            Error::DependencyPathNotFound { .. } => "dependency-path-not-found",
            Error::DependencyUnknownSource { .. } => "dependency-unknown-source",
            Error::BuildInvalid { .. } => "build-invalid",
            Error::LockfileWriteFailed { .. } => "lockfile-write-failed",
            Error::ResolveFailed { .. } => "resolve-failed",
            Error::TargetNoMatching { .. } => "target-no-matching",
            Error::TargetNoDefault => "target-no-default",
            Error::TargetNotFound { .. } => "target-not-found",
            Error::TargetIsOpen { .. } => "target-is-open",
            Error::TargetCreateFailed { .. } => "target-create-failed",
            Error::TargetImportFailed { .. } => "target-import-failed",
            Error::TargetRestoreFailed { .. } => "target-restore-failed",
            Error::TargetAddNoType => "target-add-no-type",
            Error::ComponentUnrecognized { .. } => "component-unrecognized",
            Error::ComponentInvalidNoName { .. } => "component-invalid-no-name",
            Error::RunScriptNotFound { .. } => "run-script-not-found",
            Error::NewDirExists { .. } => "new-dir-exists",
            Error::NewInvalidName { .. } => "new-invalid-name",
            Error::FromNotFound { .. } => "from-not-found",
            Error::ExportFailed { .. } => "export-failed",
            Error::AddinUnsupportedType { .. } => "addin-unsupported-type",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ResolveFailed { .. } => EXIT_RESOLVE,
            Error::TargetRestoreFailed { .. } => EXIT_RESTORE,
            Error::SourceDownloadFailed { .. }
            | Error::DependencyInvalidChecksum { .. }
            | Error::LockfileWriteFailed { .. }
            | Error::TargetIsOpen { .. }
            | Error::TargetCreateFailed { .. }
            | Error::TargetImportFailed { .. }
            | Error::ExportFailed { .. } => EXIT_IO,
            _ => EXIT_USER,
        }
    }
}

/// Recover the typed error from an `anyhow` chain, if one is present.
pub fn as_error(err: &anyhow::Error) -> Option<&Error> {
    err.chain().find_map(|cause| cause.downcast_ref::<Error>())
}

/// Exit code for an arbitrary action failure.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    as_error(err).map(Error::exit_code).unwrap_or(EXIT_IO)
}
