//! # vba-blocks
//!
//! A package manager and build tool for VBA. Projects declare their
//! components and dependencies in a `project.toml`; `build` resolves the
//! dependency graph, fetches sources, stages the merged component set, and
//! applies a minimal changeset to each target document through the addin
//! bridge, writing a reproducible `project.lock` alongside the manifest.
//!
//! ## Pipeline
//!
//! The core flow for a build is
//! **load → resolve → lock → fetch → graph → stage → apply**:
//!
//! 1. [`manifest::load_workspace`] parses and validates the manifest plus
//!    any workspace members.
//! 2. [`resolver::resolve`] computes a consistent dependency graph,
//!    preferring versions from a still-valid lockfile.
//! 3. [`lockfile`] writes the graph back deterministically for VCS.
//! 4. [`sources`] fetches each resolved registration (registry tarballs are
//!    checksum-verified before touching the cache).
//! 5. [`graph::BuildGraph`] merges components from the project and every
//!    dependency, rejecting name and reference conflicts.
//! 6. [`stage`] materialises the per-target import graph into a scoped
//!    staging directory.
//! 7. [`changeset`] diffs the staged graph against the target's current
//!    contents and applies the difference with backup and restore.
//!
//! ## Modules
//!
//! - [`manifest`] — `project.toml` model: packages, dependencies, targets
//! - [`resolver`] — backtracking version resolution
//! - [`lockfile`] — `project.lock` codec and staleness checks
//! - [`sources`] — registry, path, and git backends
//! - [`graph`] — build-graph loading and validation
//! - [`stage`] — staging directories for the bridge
//! - [`changeset`] — diff/apply with backup and restore
//! - [`actions`] — the pipelines behind the CLI commands
//! - [`addin`] — the bridge to the host application
//! - [`config`] — cache root, registries, environment overrides
//! - [`report`] — reporter and cancellation threading
//! - [`error`] — typed errors with stable kind identifiers

pub mod actions;
pub mod addin;
pub mod changeset;
pub mod config;
pub mod emit;
pub mod error;
pub mod graph;
pub mod lock;
pub mod lockfile;
pub mod manifest;
pub mod parallel;
pub mod paths;
pub mod patch;
pub mod report;
pub mod resolver;
pub mod sources;
pub mod stage;
