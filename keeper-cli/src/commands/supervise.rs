//! `keeper supervise`: foreground supervisor.

use anyhow::{Context, Result};

use keeper_core::KeeperConfig;
use keeper_supervisor::{start_blocking, RunOutcome};

pub fn run(config: KeeperConfig) -> Result<()> {
    match start_blocking(config).context("supervisor exited with error")? {
        RunOutcome::HandedOff(invocation) => {
            println!(
                "handed off {} update {} to keeper-updater",
                invocation.target, invocation.mode
            );
        }
        RunOutcome::Stopped => println!("supervisor stopped"),
    }
    Ok(())
}
