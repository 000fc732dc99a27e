//! `keeper ledger`

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use keeper_core::{BuildId, KeeperConfig, Ledger};

#[derive(Args, Debug)]
pub struct LedgerArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct LedgerView {
    confirmed_build: Option<BuildId>,
    pending_build: Option<BuildId>,
    try_number: u32,
}

impl LedgerArgs {
    pub fn run(&self, config: &KeeperConfig) -> Result<()> {
        let path = config.layout().ledger_path();
        let ledger = Ledger::open_at(&path)
            .with_context(|| format!("failed to open ledger {}", path.display()))?;
        let view = LedgerView {
            confirmed_build: ledger.confirmed_build(),
            pending_build: ledger.pending_build(),
            try_number: ledger.try_number(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&view).context("failed to render ledger JSON")?
            );
            return Ok(());
        }

        println!("confirmed build: {}", display(&view.confirmed_build));
        println!("pending build:   {}", display(&view.pending_build));
        println!("try number:      {}", view.try_number);
        if view.try_number > config.max_tries {
            println!("detection is disabled (max_tries = {})", config.max_tries);
        }
        Ok(())
    }
}

fn display(build: &Option<BuildId>) -> String {
    build
        .as_ref()
        .map(|b| b.0.clone())
        .unwrap_or_else(|| "-".to_string())
}
