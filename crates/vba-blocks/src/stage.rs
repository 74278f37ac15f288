//! Staging: materialise an import graph into a directory for the bridge.

use std::path::Path;

use anyhow::Result;

use crate::graph::ImportGraph;
use crate::parallel;
use crate::paths;
use crate::report::{CancelToken, Reporter};

/// Write every component (and sidecar) of `graph` into `dir` in canonical
/// order. The directory is emptied first.
pub fn stage(
    graph: &ImportGraph,
    dir: &Path,
    reporter: &mut dyn Reporter,
    cancel: &CancelToken,
) -> Result<()> {
    paths::ensure_empty_dir(dir)?;

    let mut components: Vec<_> = graph.components.iter().collect();
    components.sort_by(|a, b| a.name.cmp(&b.name));

    parallel::map(
        "stage",
        components,
        |component| {
            let path = dir.join(&component.filename);
            paths::atomic_write(&path, component.code.as_bytes())?;
            if let Some(binary) = &component.binary {
                paths::atomic_write(&dir.join(&binary.filename), &binary.data)?;
            }
            Ok(())
        },
        reporter,
        cancel,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::graph::{Binary, Component, ComponentKind};
    use crate::report::NullReporter;

    fn component(name: &str, kind: ComponentKind) -> Component {
        Component {
            name: name.to_string(),
            filename: format!("{}.{}", name, kind.extension()),
            kind,
            code: format!("Attribute VB_Name = \"{name}\"\n"),
            binary: None,
        }
    }

    #[test]
    fn staging_writes_components_and_sidecars() {
        let td = tempdir().expect("tempdir");
        let dir = td.path().join("staged");

        let mut form = component("Form1", ComponentKind::Form);
        form.binary = Some(Binary {
            filename: "Form1.frx".to_string(),
            data: vec![0xAB],
        });
        let graph = ImportGraph {
            components: vec![component("Module1", ComponentKind::Standard), form],
            references: vec![],
        };

        stage(&graph, &dir, &mut NullReporter, &CancelToken::new()).expect("stage");

        assert!(dir.join("Module1.bas").exists());
        assert!(dir.join("Form1.frm").exists());
        assert_eq!(fs::read(dir.join("Form1.frx")).expect("frx"), vec![0xAB]);
    }

    #[test]
    fn staging_clears_previous_contents() {
        let td = tempdir().expect("tempdir");
        let dir = td.path().join("staged");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("Stale.bas"), "old").expect("seed");

        let graph = ImportGraph {
            components: vec![component("Module1", ComponentKind::Standard)],
            references: vec![],
        };
        stage(&graph, &dir, &mut NullReporter, &CancelToken::new()).expect("stage");

        assert!(!dir.join("Stale.bas").exists());
        assert!(dir.join("Module1.bas").exists());
    }
}
