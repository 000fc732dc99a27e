//! keeper-updater: one transactional rollout per invocation.
//!
//! ```text
//! keeper-updater <init|testrun|NNNNNNNN>
//!     --update server|oxide|both  --plugins yes|no
//!     --install-dir <dir>         --steamcmd <path>
//!     --start-script <path> [--process-name <name>] | --systemd-unit <unit>
//!     [--expected-build <id>]     [--expected-runtime <tag>]
//!     [--app-id <id>]
//! ```
//!
//! An unrecognized mode exits 0 without touching anything.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use clap::Parser;

use keeper_core::{
    BuildId, InstallLayout, KeeperConfig, ServiceSpec, UpdateTarget, UpdaterInvocation,
    UpdaterMode,
};
use keeper_rollout::log_rotation::rotate_updater_log;
use keeper_rollout::{Collaborators, RolloutEngine, RolloutSettings};

#[derive(Parser, Debug)]
#[command(
    name = "keeper-updater",
    version,
    about = "Apply a scheduled server / Oxide update with backup and rollback",
    long_about = None,
)]
struct UpdaterArgs {
    /// `init`, `testrun`, or an 8-digit update id.
    mode: String,

    /// What to update.
    #[arg(long = "update")]
    target: Option<UpdateTarget>,

    /// Update uMod plugins after a successful apply (yes|no).
    #[arg(long, default_value = "yes")]
    plugins: String,

    #[arg(long, default_value = ".")]
    install_dir: PathBuf,

    /// steamcmd executable; defaults to the configured one.
    #[arg(long)]
    steamcmd: Option<PathBuf>,

    #[arg(long)]
    app_id: Option<u32>,

    /// Start script, relative to the install dir unless absolute.
    #[arg(long, conflicts_with = "systemd_unit")]
    start_script: Option<PathBuf>,

    #[arg(long, default_value = "RustDedicated")]
    process_name: String,

    #[arg(long)]
    systemd_unit: Option<String>,

    /// Build id the server must report after the update.
    #[arg(long)]
    expected_build: Option<String>,

    /// Oxide release tag the runtime must report after the update.
    #[arg(long)]
    expected_runtime: Option<String>,
}

fn main() -> Result<()> {
    let args = UpdaterArgs::parse();
    let Some(mode) = UpdaterMode::parse(&args.mode) else {
        eprintln!("keeper-updater: unknown mode '{}'; nothing to do", args.mode);
        return Ok(());
    };

    let install_dir = if args.install_dir.is_absolute() {
        args.install_dir.clone()
    } else {
        std::env::current_dir()
            .context("could not determine current directory")?
            .join(&args.install_dir)
    };
    let layout = InstallLayout::new(&install_dir);
    init_tracing(&layout);

    let config = KeeperConfig::discover(&install_dir).context("failed to load config")?;
    let invocation = build_invocation(&args, mode, &config)?;

    let engine = RolloutEngine::new(
        invocation.clone(),
        Collaborators::system(&invocation, &config),
        RolloutSettings::from_config(&config),
    );
    let report = engine.run().context("rollout aborted")?;

    match &report.marker {
        Some(marker) if marker.is_success() => {
            tracing::info!(update_id = %marker.update_id, relaunched = report.relaunched, "rollout finished");
        }
        Some(marker) => {
            tracing::warn!(
                update_id = %marker.update_id,
                reason = marker.fail_reason.as_deref().unwrap_or(""),
                relaunched = report.relaunched,
                "rollout failed"
            );
        }
        None => tracing::info!("init finished"),
    }
    Ok(())
}

fn build_invocation(
    args: &UpdaterArgs,
    mode: UpdaterMode,
    config: &KeeperConfig,
) -> Result<UpdaterInvocation> {
    let target = match (&mode, args.target) {
        (_, Some(target)) => target,
        (UpdaterMode::Scheduled(id), None) => bail!("update {id} needs --update"),
        (_, None) => UpdateTarget::Server,
    };
    let update_plugins = match args.plugins.to_ascii_lowercase().as_str() {
        "yes" | "true" => true,
        "no" | "false" => false,
        other => bail!("invalid --plugins value '{other}'; expected yes or no"),
    };
    let service = match (&args.start_script, &args.systemd_unit) {
        (Some(script), _) => ServiceSpec::Script {
            start_script: script.clone(),
            process_name: args.process_name.clone(),
        },
        (None, Some(unit)) => ServiceSpec::Systemd { unit: unit.clone() },
        (None, None) => config.service.clone(),
    };

    Ok(UpdaterInvocation {
        mode,
        target,
        update_plugins,
        install_dir: config.install_dir.clone(),
        steamcmd: args
            .steamcmd
            .clone()
            .unwrap_or_else(|| config.steamcmd.clone()),
        service,
        app_id: args.app_id.unwrap_or(config.app_id),
        expected_build: args.expected_build.as_deref().map(BuildId::from),
        expected_runtime: args.expected_runtime.clone(),
    })
}

/// Log to `keeper/updater.log` (rotated first) and stderr.
fn init_tracing(layout: &InstallLayout) {
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let log_path = rotate_updater_log(layout);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init();
        }
        Err(err) => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            tracing::warn!(path = %log_path.display(), error = %err, "updater log unavailable; stderr only");
        }
    }
}
