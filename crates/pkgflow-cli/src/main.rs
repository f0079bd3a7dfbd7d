use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};

mod dispatch;
mod logging;
mod render;

use logging::{level_for_verbosity, Logging};

#[derive(Parser, Debug)]
#[command(name = "pkgflow")]
#[command(about = "Transactional application package installer", long_about = None)]
struct Cli {
    /// Config file. Defaults to `pkgflow.toml` under the user prefix.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Device prefix. Overrides the `prefix` config key.
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[arg(short, long, global = true)]
    quiet: bool,
    #[arg(long, global = true)]
    no_progress: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct ModeArgs {
    /// Install to external storage.
    #[arg(long)]
    external: bool,
    /// Preloaded image install. Signatures are trusted.
    #[arg(long, conflicts_with = "fota")]
    preload: bool,
    /// Firmware-over-the-air install. Signatures are trusted.
    #[arg(long)]
    fota: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or update a package from a directory or archive.
    Install {
        source: PathBuf,
        /// Fail unless the package carries this id.
        #[arg(long)]
        id: Option<String>,
        #[command(flatten)]
        mode: ModeArgs,
    },
    /// Apply a delta package to an installed package.
    UpdateDelta {
        source: PathBuf,
        #[arg(long)]
        id: String,
        #[command(flatten)]
        mode: ModeArgs,
    },
    Uninstall {
        id: String,
    },
    /// Reconcile updates interrupted by a crash. Without an id every pending
    /// package is recovered.
    Recover {
        id: Option<String>,
    },
    InstallPlugin {
        source: PathBuf,
    },
    List {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = Logging::try_init(level_for_verbosity(cli.verbose, cli.quiet)) {
        eprintln!("warning: {err}");
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let installer = dispatch::open_installer(cli.config.as_deref(), cli.prefix)?;
    let style = render::OutputStyle::detect(cli.no_progress);
    dispatch::dispatch(&installer, cli.command, style)
}
