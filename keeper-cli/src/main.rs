//! Keeper: update supervisor for a Rust dedicated server with Oxide.
//!
//! # Usage
//!
//! ```text
//! keeper [--install-dir <dir>] supervise
//! keeper [--install-dir <dir>] status [--json]
//! keeper [--install-dir <dir>] check
//! keeper [--install-dir <dir>] stop
//! keeper [--install-dir <dir>] ledger [--json]
//! keeper [--install-dir <dir>] history [--limit <n>]
//! keeper scheme check <file>
//! ```

mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    history::HistoryArgs, ledger::LedgerArgs, scheme::SchemeCommand, status::StatusArgs,
};
use keeper_core::KeeperConfig;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "keeper",
    version,
    about = "Keep a Rust dedicated server and its Oxide runtime up to date",
    long_about = None,
)]
struct Cli {
    /// Server installation directory.
    #[arg(long, global = true, default_value = ".")]
    install_dir: PathBuf,

    /// Explicit config file instead of `<install-dir>/keeper/config.yaml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the supervisor in the foreground until it hands off or is stopped.
    Supervise,

    /// Query the running supervisor.
    Status(StatusArgs),

    /// Ask the running supervisor for a detection cycle now.
    Check,

    /// Stop the running supervisor.
    Stop,

    /// Print the confirmed / pending build ids and the failure counter.
    Ledger(LedgerArgs),

    /// List archived update results.
    History(HistoryArgs),

    /// Work with scheme files.
    Scheme {
        #[command(subcommand)]
        command: SchemeCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = || load_config(&cli.install_dir, cli.config.as_deref());
    match cli.command {
        Commands::Supervise => commands::supervise::run(config()?),
        Commands::Status(ref args) => args.run(&config()?),
        Commands::Check => commands::status::check(&config()?),
        Commands::Stop => commands::status::stop(&config()?),
        Commands::Ledger(ref args) => args.run(&config()?),
        Commands::History(ref args) => args.run(&config()?),
        Commands::Scheme { ref command } => commands::scheme::run(command),
    }
}

/// Config for `install_dir`; an explicit file still targets `install_dir`.
fn load_config(install_dir: &Path, explicit: Option<&Path>) -> Result<KeeperConfig> {
    let install_dir = absolute(install_dir)?;
    match explicit {
        Some(path) => {
            let mut config = KeeperConfig::load_at(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            config.install_dir = install_dir;
            Ok(config)
        }
        None => KeeperConfig::discover(&install_dir).context("failed to load config"),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    Ok(cwd.join(path))
}
