//! `run`: execute a script declared in the manifest's `[scripts]` table.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

use crate::actions::ActionContext;
use crate::error::Error;
use crate::manifest;

pub fn run_script(ctx: &mut ActionContext<'_>, project_dir: &Path, name: &str) -> Result<()> {
    let project = manifest::load_manifest(project_dir)?;

    let command_line = project
        .scripts
        .get(name)
        .ok_or_else(|| Error::RunScriptNotFound {
            name: name.to_string(),
        })?;

    ctx.reporter.info(&format!("running `{command_line}`"));
    ctx.cancel.check()?;

    let status = shell_command(command_line)
        .current_dir(project_dir)
        .status()
        .with_context(|| format!("failed to run script `{name}`"))?;

    if !status.success() {
        bail!(
            "script `{name}` exited with status {}",
            status.code().unwrap_or(-1)
        );
    }
    Ok(())
}

fn shell_command(command_line: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(command_line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}
