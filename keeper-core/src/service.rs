//! Managed-service control: is it running, stop it, start it.
//!
//! Two service modes are supported: a start script plus a process name
//! (checked with `pgrep`, stopped with `pkill -TERM`), or a systemd unit
//! driven through `systemctl`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

/// How the managed game server is started and observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ServiceSpec {
    Script {
        start_script: PathBuf,
        #[serde(default = "default_process_name")]
        process_name: String,
    },
    Systemd {
        unit: String,
    },
}

impl Default for ServiceSpec {
    fn default() -> Self {
        ServiceSpec::Script {
            start_script: PathBuf::from("start.sh"),
            process_name: default_process_name(),
        }
    }
}

fn default_process_name() -> String {
    "RustDedicated".to_string()
}

/// Capability interface over the managed service.
pub trait ServiceController: Send + Sync {
    fn is_running(&self) -> Result<bool, CoreError>;

    /// Ask the service to stop. Returns once the request is issued; callers
    /// poll [`ServiceController::is_running`] for completion.
    fn request_stop(&self) -> Result<(), CoreError>;

    /// Launch the service detached from the caller.
    fn start(&self) -> Result<(), CoreError>;
}

/// [`ServiceController`] backed by real OS commands.
#[derive(Debug, Clone)]
pub struct SystemService {
    spec: ServiceSpec,
    working_dir: PathBuf,
}

impl SystemService {
    pub fn new(spec: ServiceSpec, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            working_dir: working_dir.into(),
        }
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    /// Resolve a relative start script against the working directory.
    pub fn start_script_path(&self) -> Option<PathBuf> {
        match &self.spec {
            ServiceSpec::Script { start_script, .. } if start_script.is_absolute() => {
                Some(start_script.clone())
            }
            ServiceSpec::Script { start_script, .. } => Some(self.working_dir.join(start_script)),
            ServiceSpec::Systemd { .. } => None,
        }
    }
}

impl ServiceController for SystemService {
    fn is_running(&self) -> Result<bool, CoreError> {
        match &self.spec {
            ServiceSpec::Script { process_name, .. } => {
                let status = Command::new("pgrep")
                    .args(["-x", process_name])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .map_err(|e| io_err("pgrep", e))?;
                Ok(status.success())
            }
            ServiceSpec::Systemd { unit } => {
                let status = Command::new("systemctl")
                    .args(["is-active", "--quiet", unit])
                    .status()
                    .map_err(|e| io_err("systemctl", e))?;
                Ok(status.success())
            }
        }
    }

    fn request_stop(&self) -> Result<(), CoreError> {
        match &self.spec {
            ServiceSpec::Script { process_name, .. } => {
                // pkill exits 1 when nothing matched; already stopped is fine.
                run_command("pkill", &["-TERM", "-x", process_name], true)
            }
            ServiceSpec::Systemd { unit } => run_command("systemctl", &["stop", unit], false),
        }
    }

    fn start(&self) -> Result<(), CoreError> {
        match &self.spec {
            ServiceSpec::Script { .. } => {
                let script = self
                    .start_script_path()
                    .ok_or_else(|| CoreError::Service("no start script configured".to_string()))?;
                spawn_detached(&script, &self.working_dir)
            }
            ServiceSpec::Systemd { unit } => run_command("systemctl", &["start", unit], false),
        }
    }
}

fn spawn_detached(script: &Path, working_dir: &Path) -> Result<(), CoreError> {
    if !script.exists() {
        return Err(CoreError::Service(format!(
            "start script not found: {}",
            script.display()
        )));
    }
    Command::new(script)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| io_err(script, e))?;
    tracing::info!(script = %script.display(), "managed service launched");
    Ok(())
}

fn run_command(program: &str, args: &[&str], ignore_failure: bool) -> Result<(), CoreError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| io_err(program, e))?;

    if output.status.success() || ignore_failure {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Err(CoreError::Service(format!(
        "{program} failed (status {}): {} {}",
        output.status, stdout, stderr
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_spec_yaml_shapes() {
        let script: ServiceSpec =
            serde_yaml::from_str("kind: script\nstart_script: ./start.sh\n").unwrap();
        assert_eq!(
            script,
            ServiceSpec::Script {
                start_script: PathBuf::from("./start.sh"),
                process_name: "RustDedicated".to_string(),
            }
        );

        let systemd: ServiceSpec =
            serde_yaml::from_str("kind: systemd\nunit: rustserver.service\n").unwrap();
        assert_eq!(
            systemd,
            ServiceSpec::Systemd {
                unit: "rustserver.service".to_string()
            }
        );
    }

    #[test]
    fn relative_start_script_resolves_against_working_dir() {
        let service = SystemService::new(ServiceSpec::default(), "/srv/rust");
        assert_eq!(
            service.start_script_path(),
            Some(PathBuf::from("/srv/rust/start.sh"))
        );
    }

    #[test]
    fn missing_start_script_is_a_service_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let service = SystemService::new(
            ServiceSpec::Script {
                start_script: PathBuf::from("nope.sh"),
                process_name: "RustDedicated".to_string(),
            },
            tmp.path(),
        );
        let err = service.start().unwrap_err();
        assert!(matches!(err, CoreError::Service(_)), "got: {err}");
    }
}
