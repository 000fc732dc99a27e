//! Narrow host capabilities the coordinator is constructed with.
//!
//! The game host (chat, webhooks, process spawning) stays outside the core;
//! the defaults here log through `tracing` and spawn the updater binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use keeper_core::{UpdateTarget, UpdaterInvocation};

use crate::error::SupervisorError;

/// Player-facing announcements (countdown, hand-off).
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, message: &str);
}

/// Operator-facing events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    CountdownStarted { target: UpdateTarget, minutes: u32 },
    HandedOff { update_id: String, target: UpdateTarget },
    UpdateSucceeded { update_id: String },
    UpdateFailed { update_id: String, reason: String },
    DetectionDisabled { tries: u32 },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::CountdownStarted { target, minutes } => {
                write!(f, "{target} update scheduled in {minutes} minute(s)")
            }
            Notice::HandedOff { update_id, target } => {
                write!(f, "{target} update {update_id} handed to the updater")
            }
            Notice::UpdateSucceeded { update_id } => write!(f, "update {update_id} succeeded"),
            Notice::UpdateFailed { update_id, reason } => {
                write!(f, "update {update_id} failed: {reason}")
            }
            Notice::DetectionDisabled { tries } => write!(
                f,
                "update detection disabled after {tries} consecutive failed attempts"
            ),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Starts the updater process for a frozen plan.
pub trait UpdaterLauncher: Send + Sync {
    fn launch(&self, invocation: &UpdaterInvocation) -> Result<(), SupervisorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, message: &str) {
        tracing::info!(target: "keeper::broadcast", "{message}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        match notice {
            Notice::UpdateFailed { .. } | Notice::DetectionDisabled { .. } => {
                tracing::warn!(target: "keeper::notify", "{notice}")
            }
            _ => tracing::info!(target: "keeper::notify", "{notice}"),
        }
    }
}

/// Spawns `keeper-updater` detached from the supervisor.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    binary: PathBuf,
}

impl ProcessLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `configured`, or `keeper-updater` next to the running executable.
    pub fn resolve(configured: Option<&Path>) -> Self {
        let binary = configured.map(Path::to_path_buf).unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join("keeper-updater")))
                .unwrap_or_else(|| PathBuf::from("keeper-updater"))
        });
        Self::new(binary)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl UpdaterLauncher for ProcessLauncher {
    fn launch(&self, invocation: &UpdaterInvocation) -> Result<(), SupervisorError> {
        invocation
            .validate()
            .map_err(|e| SupervisorError::Launch(e.to_string()))?;
        let mut command = Command::new(&self.binary);
        command
            .args(invocation.to_args())
            .current_dir(&invocation.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: stopping the server must not take the updater down.
            command.process_group(0);
        }
        let child = command
            .spawn()
            .map_err(|e| SupervisorError::Launch(format!("{}: {e}", self.binary.display())))?;
        tracing::info!(
            pid = child.id(),
            binary = %self.binary.display(),
            mode = %invocation.mode,
            "updater launched"
        );
        Ok(())
    }
}
