//! `keeper status|check|stop`: thin clients of the supervisor socket.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use keeper_core::KeeperConfig;
use keeper_core::BuildId;
use keeper_supervisor::{CheckReply, Phase, StatusSnapshot, SupervisorClient, SupervisorError};

/// Arguments for `keeper status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl StatusArgs {
    pub fn run(&self, config: &KeeperConfig) -> Result<()> {
        let client = SupervisorClient::new(config.layout().socket_path());
        let status = match client.status() {
            Ok(status) => status,
            Err(SupervisorError::NotRunning { .. }) => {
                if self.json {
                    let payload = serde_json::json!({
                        "running": false,
                        "socket": client.socket().display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render status JSON")?
                    );
                } else {
                    println!("{}", "supervisor is not running".yellow());
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query supervisor status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_table(&status);
        Ok(())
    }
}

pub fn check(config: &KeeperConfig) -> Result<()> {
    let client = SupervisorClient::new(config.layout().socket_path());
    let reply = client
        .check()
        .context("failed to request a detection cycle")?;
    match reply {
        CheckReply::Started => println!("detection cycle started"),
        CheckReply::AlreadyRunning => println!("a detection cycle is already running"),
        CheckReply::Busy => println!("an update is already counting down"),
        CheckReply::Disabled => {
            println!("{}", "detection is disabled after repeated failures".red())
        }
    }
    Ok(())
}

pub fn stop(config: &KeeperConfig) -> Result<()> {
    match SupervisorClient::new(config.layout().socket_path()).stop() {
        Ok(()) => println!("supervisor stop requested"),
        Err(SupervisorError::NotRunning { .. }) => println!("supervisor is not running"),
        Err(err) => return Err(err).context("failed to stop supervisor"),
    }
    Ok(())
}

fn print_table(status: &StatusSnapshot) {
    let phase = match status.phase {
        Phase::Idle => "idle".green().bold(),
        Phase::Detecting => "detecting".yellow().bold(),
        Phase::CountingDown => "counting down".yellow().bold(),
        Phase::HandedOff => "handed off".magenta().bold(),
    };
    println!("Keeper v{} | {}", env!("CARGO_PKG_VERSION"), phase);

    let rows = vec![
        row(
            "detection",
            if status.detection_enabled { "enabled" } else { "disabled" },
        ),
        row("pending server", yes_no(status.pending.update_server)),
        row("pending oxide", yes_no(status.pending.update_runtime)),
        row("minutes left", or_dash(status.minutes_left)),
        row("confirmed build", build(&status.confirmed_build)),
        row("pending build", build(&status.pending_build)),
        row("try number", status.try_number.to_string()),
        row(
            "last check",
            or_dash(status.last_check.map(|at| at.format("%Y-%m-%d %H:%M:%S UTC"))),
        ),
        row("last error", or_dash(status.last_error.as_deref())),
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn row(field: &'static str, value: impl Into<String>) -> StatusRow {
    StatusRow {
        field,
        value: value.into(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn build(id: &Option<BuildId>) -> String {
    or_dash(id.as_ref().map(|b| b.0.as_str()))
}

fn or_dash(value: Option<impl ToString>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
