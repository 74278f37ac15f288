//! End-to-end tests driving the compiled `vba-blocks` binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn vba_blocks() -> Command {
    Command::cargo_bin("vba-blocks").expect("binary builds")
}

fn write_manifest(dir: &Path, text: &str) {
    fs::write(dir.join("project.toml"), text).expect("write manifest");
}

#[test]
fn help_describes_the_tool() {
    vba_blocks()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("package manager"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("export"));
}

#[test]
fn unknown_commands_exit_with_user_error() {
    vba_blocks()
        .arg("frobnicate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown command"));
}

#[test]
fn build_without_a_manifest_exits_with_user_error() {
    let td = tempdir().expect("tempdir");
    vba_blocks()
        .arg("build")
        .current_dir(td.path())
        .env("VBA_BLOCKS_HOME", td.path().join("cache"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("project.toml"));
}

#[test]
fn new_scaffolds_a_project() {
    let td = tempdir().expect("tempdir");
    vba_blocks()
        .args(["new", "my-project"])
        .current_dir(td.path())
        .assert()
        .success();

    assert!(td.path().join("my-project/project.toml").exists());
    assert!(td.path().join("my-project/src").is_dir());

    vba_blocks()
        .args(["new", "my-project"])
        .current_dir(td.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn new_rejects_bad_names() {
    let td = tempdir().expect("tempdir");
    vba_blocks()
        .args(["new", "Bad Name"])
        .current_dir(td.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("kebab-case"));
}

#[test]
fn run_reports_missing_scripts() {
    let td = tempdir().expect("tempdir");
    write_manifest(
        td.path(),
        "[package]\nname = \"demo\"\nversion = \"1.0.0\"\n",
    );

    vba_blocks()
        .args(["run", "missing"])
        .current_dir(td.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn target_add_requires_a_known_type() {
    let td = tempdir().expect("tempdir");
    write_manifest(
        td.path(),
        "[package]\nname = \"demo\"\nversion = \"1.0.0\"\n",
    );

    vba_blocks()
        .args(["target", "add", "pdf"])
        .current_dir(td.path())
        .env("VBA_BLOCKS_HOME", td.path().join("cache"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("pdf"));
}

#[cfg(unix)]
mod with_bridge {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    /// A bridge stub that accepts every call and exports nothing.
    fn write_bridge(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("bridge.sh");
        fs::write(
            &path,
            "#!/bin/sh\ncase \"$1\" in\n  open) echo '{\"handle\": \"h1\"}' ;;\n  export) echo '{}' ;;\n  import) : ;;\n  close) : ;;\nesac\n",
        )
        .expect("write bridge");
        let mut permissions = fs::metadata(&path).expect("metadata").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).expect("chmod");
        path
    }

    #[test]
    fn fresh_build_writes_a_lockfile_and_cleans_staging() {
        let td = tempdir().expect("tempdir");
        let project = td.path().join("standard");
        fs::create_dir_all(project.join("src")).expect("mkdir src");
        write_manifest(
            &project,
            r#"[package]
name = "standard"
version = "0.1.0"

[[src]]
name = "Module1"
path = "src/Module1.bas"

[[target]]
type = "xlsm"
name = "workbook"
path = "build"
blank = true
"#,
        );
        fs::write(
            project.join("src/Module1.bas"),
            "Attribute VB_Name = \"Module1\"\n\nPublic Sub Hello()\nEnd Sub\n",
        )
        .expect("write component");

        let bridge = write_bridge(td.path());
        let cache = td.path().join("cache");

        vba_blocks()
            .arg("build")
            .current_dir(&project)
            .env("VBA_BLOCKS_HOME", &cache)
            .env("VBA_BLOCKS_ADDIN", &bridge)
            .assert()
            .success();

        let lock = fs::read_to_string(project.join("project.lock")).expect("lockfile");
        assert!(lock.starts_with("# Auto-generated by vba-blocks"));
        assert!(lock.contains("[metadata]\nversion = \"1\""));
        assert!(lock.contains("name = \"standard\""));
        assert!(!lock.contains("[[package]]"));
        assert!(!lock.contains("[[members]]"));

        // Scoped staging directories are cleaned up on success.
        let staging = cache.join("staging");
        if staging.exists() {
            let leftovers: Vec<_> = fs::read_dir(&staging)
                .expect("read staging")
                .filter_map(Result::ok)
                .filter(|entry| entry.file_name() != "backup")
                .collect();
            assert!(leftovers.is_empty(), "staging left behind: {leftovers:?}");
        }

        // A second build is a no-op but still succeeds with the same lock.
        vba_blocks()
            .arg("build")
            .current_dir(&project)
            .env("VBA_BLOCKS_HOME", &cache)
            .env("VBA_BLOCKS_ADDIN", &bridge)
            .assert()
            .success();
        let again = fs::read_to_string(project.join("project.lock")).expect("lockfile");
        assert_eq!(lock, again);
    }

    #[test]
    fn failing_bridge_surfaces_an_io_exit_code() {
        let td = tempdir().expect("tempdir");
        let project = td.path().join("broken");
        fs::create_dir_all(project.join("src")).expect("mkdir src");
        write_manifest(
            &project,
            r#"[package]
name = "broken"
version = "0.1.0"

[[src]]
name = "Module1"
path = "src/Module1.bas"

[[target]]
type = "xlsm"
blank = true
"#,
        );
        fs::write(
            project.join("src/Module1.bas"),
            "Attribute VB_Name = \"Module1\"\n",
        )
        .expect("write component");

        let bridge = td.path().join("bridge.sh");
        fs::write(
            &bridge,
            "#!/bin/sh\ncase \"$1\" in\n  open) echo '{\"handle\": \"h1\"}' ;;\n  export) echo '{}' ;;\n  *) echo 'host refused' >&2; exit 1 ;;\nesac\n",
        )
        .expect("write bridge");
        let mut permissions = fs::metadata(&bridge).expect("metadata").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&bridge, permissions).expect("chmod");

        vba_blocks()
            .arg("build")
            .current_dir(&project)
            .env("VBA_BLOCKS_HOME", td.path().join("cache"))
            .env("VBA_BLOCKS_ADDIN", &bridge)
            .assert()
            .code(3)
            .stderr(predicate::str::contains("host refused"));
    }
}
