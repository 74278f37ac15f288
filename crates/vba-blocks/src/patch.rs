//! Manifest patching: targeted edits to `project.toml` that preserve
//! comments, ordering, and line endings, keeping byte-level diffs minimal.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml_edit::{ArrayOfTables, DocumentMut, Item, Table, value};

use crate::error::Error;
use crate::manifest::{MANIFEST_FILE, Target};
use crate::paths;

fn load_document(project_dir: &Path) -> Result<(DocumentMut, std::path::PathBuf)> {
    let path = project_dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path).map_err(|_| Error::ManifestNotFound {
        path: project_dir.to_path_buf(),
    })?;
    let document = text
        .parse::<DocumentMut>()
        .map_err(|err| Error::ManifestInvalid {
            path: path.clone(),
            message: err.to_string(),
        })?;
    Ok((document, path))
}

fn save_document(document: &DocumentMut, path: &Path) -> Result<()> {
    paths::atomic_write(path, document.to_string().as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}

fn array_of_tables<'a>(document: &'a mut DocumentMut, key: &str) -> Result<&'a mut ArrayOfTables> {
    document
        .entry(key)
        .or_insert(Item::ArrayOfTables(ArrayOfTables::new()))
        .as_array_of_tables_mut()
        .with_context(|| format!("`{key}` is not an array of tables"))
}

/// Register a new `[[src]]` entry. Re-registering the same name updates its
/// path in place.
pub fn add_src(project_dir: &Path, name: &str, path: &str, binary: Option<&str>) -> Result<()> {
    let (mut document, manifest_path) = load_document(project_dir)?;

    let entries = array_of_tables(&mut document, "src")?;
    let existing = entries
        .iter()
        .position(|table| table.get("name").and_then(Item::as_str) == Some(name));

    match existing {
        Some(index) => {
            let table = entries.get_mut(index).context("src entry vanished")?;
            table["path"] = value(path);
            match binary {
                Some(binary) => table["binary"] = value(binary),
                None => {
                    table.remove("binary");
                }
            }
        }
        None => {
            let mut table = Table::new();
            table["name"] = value(name);
            table["path"] = value(path);
            if let Some(binary) = binary {
                table["binary"] = value(binary);
            }
            entries.push(table);
        }
    }

    save_document(&document, &manifest_path)
}

/// Drop the `[[src]]` entry with the given name, if present.
pub fn remove_src(project_dir: &Path, name: &str) -> Result<()> {
    let (mut document, manifest_path) = load_document(project_dir)?;

    if let Some(entries) = document.get_mut("src").and_then(Item::as_array_of_tables_mut) {
        let index = entries
            .iter()
            .position(|table| table.get("name").and_then(Item::as_str) == Some(name));
        if let Some(index) = index {
            entries.remove(index);
        }
        if entries.is_empty() {
            document.remove("src");
        }
    }

    save_document(&document, &manifest_path)
}

/// Register a new `[[target]]` entry.
pub fn add_target(project_dir: &Path, target: &Target) -> Result<()> {
    let (mut document, manifest_path) = load_document(project_dir)?;

    let entries = array_of_tables(&mut document, "target")?;
    let mut table = Table::new();
    table["type"] = value(target.target_type.as_str());
    table["name"] = value(target.name.as_str());
    table["path"] = value(target.path.to_string_lossy().replace('\\', "/"));
    if target.blank {
        table["blank"] = value(true);
    }
    entries.push(table);

    save_document(&document, &manifest_path)
}
