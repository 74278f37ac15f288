use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use vba_blocks::actions::build::{self, BuildOptions};
use vba_blocks::actions::export::{self, ExportOptions};
use vba_blocks::actions::target_add::{self, TargetAddOptions};
use vba_blocks::actions::{ActionContext, new, run};
use vba_blocks::config::Config;
use vba_blocks::error::{self, EXIT_USER, Error};

mod progress;

use progress::CliReporter;

#[derive(Parser, Debug)]
#[command(name = "vba-blocks", version)]
#[command(about = "A package manager and build tool for VBA")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve dependencies and build the project's targets.
    Build {
        /// Build only the target matching this type or name.
        #[arg(long)]
        target: Option<String>,
        /// Build the release target set.
        #[arg(long)]
        release: bool,
        /// Open the built target in the host application.
        #[arg(long)]
        open: bool,
        /// Addin bridge command (defaults to VBA_BLOCKS_ADDIN).
        #[arg(long)]
        addin: Option<PathBuf>,
    },
    /// Export the target's components back into the project tree.
    Export {
        #[arg(long)]
        target: Option<String>,
        /// Export into this directory instead of src/, leaving the manifest
        /// untouched.
        #[arg(long)]
        completed: Option<PathBuf>,
        #[arg(long)]
        addin: Option<PathBuf>,
    },
    /// Manage build targets.
    Target {
        #[command(subcommand)]
        cmd: TargetCommands,
    },
    /// Run a script declared in the manifest's [scripts] table.
    Run { script: String },
    /// Create a new project.
    New { name: String },
}

#[derive(Subcommand, Debug)]
enum TargetCommands {
    /// Register a new target and build it once.
    Add {
        /// Target document type (xlsm, xlam, ...).
        r#type: String,
        /// Seed the target from an existing file.
        #[arg(long)]
        from: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        addin: Option<PathBuf>,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    print!("{err}");
                    std::process::exit(0);
                }
                ErrorKind::InvalidSubcommand => {
                    let command = err
                        .get(clap::error::ContextKind::InvalidSubcommand)
                        .map(|value| value.to_string())
                        .unwrap_or_default();
                    let unknown = Error::UnknownCommand { command };
                    eprintln!("error: {unknown}");
                    eprintln!("{}", Cli::command().render_usage());
                    std::process::exit(EXIT_USER);
                }
                _ => {
                    eprint!("{err}");
                    std::process::exit(EXIT_USER);
                }
            }
        }
    };

    let mut reporter = CliReporter::new();
    let result = dispatch(cli, &mut reporter);

    if let Err(err) = result {
        use vba_blocks::report::Reporter;
        reporter.error(&format!("{err:#}"));
        if let Some(typed) = error::as_error(&err) {
            reporter.trace("vba-blocks:cli", &format!("error kind {}", typed.kind()));
        }
        std::process::exit(error::exit_code(&err));
    }
}

fn dispatch(cli: Cli, reporter: &mut CliReporter) -> Result<()> {
    let config = Config::from_env()?;
    let project_dir = std::env::current_dir()?;
    let mut ctx = ActionContext::new(config, reporter);

    match cli.cmd {
        Commands::Build {
            target,
            release,
            open,
            addin,
        } => {
            let options = BuildOptions {
                target: target.clone(),
                release,
                addin,
            };
            build::build(&mut ctx, &project_dir, &options)?;
            if open {
                let manifest = vba_blocks::manifest::load_manifest(&project_dir)?;
                let chosen =
                    vba_blocks::actions::choose_target(&manifest, target.as_deref())?;
                open_in_host(&chosen.file_path(&project_dir))?;
            }
            Ok(())
        }
        Commands::Export {
            target,
            completed,
            addin,
        } => export::export(
            &mut ctx,
            &project_dir,
            &ExportOptions {
                target,
                completed,
                addin,
            },
        ),
        Commands::Target {
            cmd:
                TargetCommands::Add {
                    r#type,
                    from,
                    name,
                    path,
                    addin,
                },
        } => target_add::target_add(
            &mut ctx,
            &project_dir,
            &TargetAddOptions {
                target_type: Some(r#type),
                from,
                name,
                path,
                addin,
            },
        ),
        Commands::Run { script } => run::run_script(&mut ctx, &project_dir, &script),
        Commands::New { name } => new::new_project(&mut ctx, &project_dir, &name).map(|_| ()),
    }
}

/// Hand the built document to the platform opener.
fn open_in_host(path: &std::path::Path) -> Result<()> {
    let status = if cfg!(target_os = "windows") {
        Command::new("cmd")
            .args(["/C", "start", ""])
            .arg(path)
            .status()
    } else if cfg!(target_os = "macos") {
        Command::new("open").arg(path).status()
    } else {
        Command::new("xdg-open").arg(path).status()
    }?;

    if !status.success() {
        anyhow::bail!("failed to open {}", path.display());
    }
    Ok(())
}
