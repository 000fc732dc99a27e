//! `keeper history`: archived result markers, newest first.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use keeper_core::handoff;
use keeper_core::{KeeperConfig, ResultMarker, ServerRestored};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Show at most this many entries.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "update")]
    update_id: String,
    #[tabled(rename = "when")]
    timestamp: String,
    #[tabled(rename = "result")]
    result: String,
    #[tabled(rename = "restored")]
    restored: String,
    #[tabled(rename = "plugins")]
    plugins: String,
    #[tabled(rename = "reason")]
    reason: String,
}

impl HistoryArgs {
    pub fn run(&self, config: &KeeperConfig) -> Result<()> {
        let markers = handoff::list_archived_markers(&config.layout())
            .context("failed to read archived markers")?;
        if markers.is_empty() {
            println!("No update history.");
            return Ok(());
        }

        let rows: Vec<HistoryRow> = markers
            .into_iter()
            .take(self.limit)
            .map(|(_, marker)| row(marker))
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(marker: ResultMarker) -> HistoryRow {
    let result = if marker.is_success() {
        "success".green().to_string()
    } else {
        "failed".red().to_string()
    };
    let result = if marker.backup_cycle {
        format!("{result} (test run)")
    } else {
        result
    };
    HistoryRow {
        update_id: marker.update_id,
        timestamp: marker.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        result,
        restored: match marker.server_restored {
            ServerRestored::Yes => "yes",
            ServerRestored::No => "no",
            ServerRestored::NotAttempted => "-",
        }
        .to_string(),
        plugins: marker
            .updated_plugins
            .map(|plugins| plugins.join(", "))
            .unwrap_or_default(),
        reason: marker.fail_reason.unwrap_or_default(),
    }
}
