//! Keeper configuration (`config.yaml`).
//!
//! # Lookup order
//!
//! ```text
//! <install_dir>/keeper/config.yaml
//! <config_dir>/keeper/config.yaml     (dirs::config_dir(), e.g. ~/.config)
//! built-in defaults
//! ```
//!
//! Loading checks shape only. Every field has a default, so an empty file and
//! a missing file both yield [`KeeperConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::paths::{InstallLayout, CONFIG_FILE, WORK_DIR};
use crate::service::ServiceSpec;

pub const DEFAULT_APP_ID: u32 = 258550;
pub const DEFAULT_RUNTIME_REPO: &str = "OxideMod/Oxide.Rust";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub install_dir: PathBuf,
    pub app_id: u32,
    pub branch: String,
    pub steamcmd: PathBuf,
    pub service: ServiceSpec,
    /// Path of the `keeper-updater` binary; `None` means "next to `keeper`".
    pub updater_binary: Option<PathBuf>,

    pub check_interval_secs: u64,
    pub countdown_minutes: u32,
    pub max_tries: u32,
    pub only_server_protocol_update: bool,
    pub update_plugins: bool,
    pub scheme_file: Option<PathBuf>,

    /// Protocol version of the running server, when the host reports one.
    pub local_protocol: Option<String>,
    /// File holding the protocol version; read when `local_protocol` is unset.
    pub protocol_file: Option<PathBuf>,

    pub runtime_repo: String,
    pub http_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub install_attempts: u32,
    pub install_backoff_secs: u64,
    pub plugin_requests_per_minute: u32,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("."),
            app_id: DEFAULT_APP_ID,
            branch: "public".to_string(),
            steamcmd: PathBuf::from("steamcmd"),
            service: ServiceSpec::default(),
            updater_binary: None,
            check_interval_secs: 600,
            countdown_minutes: 5,
            max_tries: 3,
            only_server_protocol_update: false,
            update_plugins: true,
            scheme_file: None,
            local_protocol: None,
            protocol_file: None,
            runtime_repo: DEFAULT_RUNTIME_REPO.to_string(),
            http_timeout_secs: 30,
            tool_timeout_secs: 900,
            install_attempts: 3,
            install_backoff_secs: 10,
            plugin_requests_per_minute: 20,
        }
    }
}

impl KeeperConfig {
    /// Load from an explicit file. A missing file yields defaults.
    pub fn load_at(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the config for `install_dir` following the lookup order above.
    ///
    /// `install_dir` always wins over whatever the file says, so a config
    /// shared through `<config_dir>` still targets the right installation.
    pub fn discover(install_dir: &Path) -> Result<Self, CoreError> {
        let local = InstallLayout::new(install_dir).config_path();
        let mut config = if local.exists() {
            Self::load_at(&local)?
        } else if let Some(global) = global_config_path().filter(|p| p.exists()) {
            Self::load_at(&global)?
        } else {
            Self::default()
        };
        config.install_dir = install_dir.to_path_buf();
        Ok(config)
    }

    pub fn layout(&self) -> InstallLayout {
        InstallLayout::new(&self.install_dir)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn install_backoff(&self) -> Duration {
        Duration::from_secs(self.install_backoff_secs)
    }

    /// Resolve a config-relative path against the installation directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.install_dir.join(path)
        }
    }

    /// Whether either protocol source is set. Without one every runtime
    /// change compares as unknown and `only_server_protocol_update` never
    /// applies.
    pub fn protocol_configured(&self) -> bool {
        self.local_protocol
            .as_deref()
            .is_some_and(|inline| !inline.trim().is_empty())
            || self.protocol_file.is_some()
    }

    /// The local protocol version: the inline value, else the trimmed first
    /// line of `protocol_file`. Unreadable or empty yields `None`.
    pub fn local_protocol(&self) -> Option<String> {
        if let Some(inline) = self.local_protocol.as_deref().map(str::trim) {
            if !inline.is_empty() {
                return Some(inline.to_string());
            }
        }
        let file = self.resolve(self.protocol_file.as_deref()?);
        match std::fs::read_to_string(&file) {
            Ok(contents) => contents
                .lines()
                .next()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
            Err(err) => {
                tracing::warn!(path = %file.display(), error = %err, "protocol file unreadable");
                None
            }
        }
    }
}

/// `<config_dir>/keeper/config.yaml`, when the platform has a config dir.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(WORK_DIR).join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_and_empty_files_yield_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        assert_eq!(KeeperConfig::load_at(&path).unwrap(), KeeperConfig::default());
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(KeeperConfig::load_at(&path).unwrap(), KeeperConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "countdown_minutes: 2\nservice:\n  kind: systemd\n  unit: rust.service\n",
        )
        .unwrap();
        let config = KeeperConfig::load_at(&path).unwrap();
        assert_eq!(config.countdown_minutes, 2);
        assert_eq!(config.max_tries, 3);
        assert_eq!(config.app_id, DEFAULT_APP_ID);
        assert!(matches!(config.service, ServiceSpec::Systemd { .. }));
    }

    #[test]
    fn malformed_yaml_names_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "max_tries: [unclosed\n").unwrap();
        let err = KeeperConfig::load_at(&path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn discover_pins_install_dir() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        std::fs::create_dir_all(layout.work_dir()).unwrap();
        std::fs::write(layout.config_path(), "install_dir: /elsewhere\nmax_tries: 7\n").unwrap();
        let config = KeeperConfig::discover(tmp.path()).unwrap();
        assert_eq!(config.install_dir, tmp.path());
        assert_eq!(config.max_tries, 7);
    }

    #[test]
    fn protocol_unconfigured_by_default() {
        assert!(!KeeperConfig::default().protocol_configured());
        let blank = KeeperConfig {
            local_protocol: Some("  ".to_string()),
            ..KeeperConfig::default()
        };
        assert!(!blank.protocol_configured());
        let file = KeeperConfig {
            protocol_file: Some(PathBuf::from("protocol.txt")),
            ..KeeperConfig::default()
        };
        assert!(file.protocol_configured());
    }

    #[test]
    fn protocol_from_file_when_not_inline() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("protocol.txt"), "2512.245\n").unwrap();
        let config = KeeperConfig {
            install_dir: tmp.path().to_path_buf(),
            protocol_file: Some(PathBuf::from("protocol.txt")),
            ..KeeperConfig::default()
        };
        assert_eq!(config.local_protocol().as_deref(), Some("2512.245"));

        let inline = KeeperConfig {
            local_protocol: Some("2511.1".to_string()),
            ..config
        };
        assert_eq!(inline.local_protocol().as_deref(), Some("2511.1"));
    }
}
