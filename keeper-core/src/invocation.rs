//! Updater invocation contract.
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
//! The supervisor renders an [`UpdaterInvocation`] with [`UpdaterInvocation::to_args`];
//! the updater binary parses the same flags back.

use std::fmt;
use std::path::PathBuf;

use crate::error::CoreError;
use crate::service::ServiceSpec;
use crate::types::{BuildId, UpdateId, UpdateTarget};

/// First positional argument of the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdaterMode {
    Init,
    TestRun,
    Scheduled(UpdateId),
}

impl UpdaterMode {
    /// Unrecognized modes yield `None`; the updater then exits cleanly.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "init" => Some(Self::Init),
            "testrun" => Some(Self::TestRun),
            other => UpdateId::parse(other).map(Self::Scheduled),
        }
    }

    /// Id recorded in the result marker.
    pub fn marker_id(&self) -> String {
        match self {
            UpdaterMode::Init => "init".to_string(),
            UpdaterMode::TestRun => "testrun".to_string(),
            UpdaterMode::Scheduled(id) => id.0.clone(),
        }
    }
}

impl fmt::Display for UpdaterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.marker_id())
    }
}

/// Everything the updater needs, frozen at hand-off time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterInvocation {
    pub mode: UpdaterMode,
    pub target: UpdateTarget,
    pub update_plugins: bool,
    pub install_dir: PathBuf,
    pub steamcmd: PathBuf,
    pub service: ServiceSpec,
    pub app_id: u32,
    pub expected_build: Option<BuildId>,
    pub expected_runtime: Option<String>,
}

impl UpdaterInvocation {
    /// Render the command-line arguments (program name excluded).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.mode.to_string(),
            "--update".to_string(),
            self.target.to_string(),
            "--plugins".to_string(),
            if self.update_plugins { "yes" } else { "no" }.to_string(),
            "--install-dir".to_string(),
            self.install_dir.display().to_string(),
            "--steamcmd".to_string(),
            self.steamcmd.display().to_string(),
            "--app-id".to_string(),
            self.app_id.to_string(),
        ];
        match &self.service {
            ServiceSpec::Script {
                start_script,
                process_name,
            } => {
                args.push("--start-script".to_string());
                args.push(start_script.display().to_string());
                args.push("--process-name".to_string());
                args.push(process_name.clone());
            }
            ServiceSpec::Systemd { unit } => {
                args.push("--systemd-unit".to_string());
                args.push(unit.clone());
            }
        }
        if let Some(build) = &self.expected_build {
            args.push("--expected-build".to_string());
            args.push(build.0.clone());
        }
        if let Some(tag) = &self.expected_runtime {
            args.push("--expected-runtime".to_string());
            args.push(tag.clone());
        }
        args
    }

    /// Reject shell metacharacters in every free-form argument.
    pub fn validate(&self) -> Result<(), CoreError> {
        check_safe("install-dir", &self.install_dir.display().to_string())?;
        check_safe("steamcmd", &self.steamcmd.display().to_string())?;
        match &self.service {
            ServiceSpec::Script {
                start_script,
                process_name,
            } => {
                check_safe("start-script", &start_script.display().to_string())?;
                check_safe("process-name", process_name)?;
            }
            ServiceSpec::Systemd { unit } => check_safe("systemd-unit", unit)?,
        }
        if let Some(build) = &self.expected_build {
            if build.0.is_empty() || !build.0.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CoreError::InvalidArgument {
                    name: "expected-build",
                    reason: format!("'{}' is not a numeric build id", build.0),
                });
            }
        }
        if let Some(tag) = &self.expected_runtime {
            check_safe("expected-runtime", tag)?;
        }
        Ok(())
    }
}

const UNSAFE_CHARS: &[char] = &[';', '&', '|', '$', '`', '<', '>', '"', '\'', '\n', '\r', '\0'];

/// Fail when `value` is empty or carries a shell metacharacter.
pub fn check_safe(name: &'static str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidArgument {
            name,
            reason: "value is empty".to_string(),
        });
    }
    if let Some(bad) = value.chars().find(|c| UNSAFE_CHARS.contains(c)) {
        return Err(CoreError::InvalidArgument {
            name,
            reason: format!("contains unsafe character {bad:?}"),
        });
    }
    Ok(())
}
