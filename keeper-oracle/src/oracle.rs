//! [`VersionOracle`]: one place to ask "what is installed" and "what is out".

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keeper_core::{BuildId, InstallLayout, KeeperConfig};

use crate::build::{self, BuildExtraction};
use crate::error::OracleError;
use crate::local;
use crate::protocol::{self, ProtocolCheck, ProtocolOutcome};
use crate::release::{Release, ReleaseApi};
use crate::tool::ToolRunner;
use crate::version::normalize_version;

/// Settings the oracle needs, extracted from [`KeeperConfig`].
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub install_dir: PathBuf,
    pub steamcmd: PathBuf,
    pub app_id: u32,
    pub branch: String,
    pub runtime_repo: String,
    pub tool_timeout: Duration,
}

impl From<&KeeperConfig> for OracleSettings {
    fn from(config: &KeeperConfig) -> Self {
        Self {
            install_dir: config.install_dir.clone(),
            steamcmd: config.steamcmd.clone(),
            app_id: config.app_id,
            branch: config.branch.clone(),
            runtime_repo: config.runtime_repo.clone(),
            tool_timeout: config.tool_timeout(),
        }
    }
}

/// Latest runtime release relative to what is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRuntime {
    pub tag: String,
    /// Tag normalized to `MAJOR.MINOR.PATCH`; the raw tag when it has none.
    pub version: String,
    /// `None` when the release matches the installed runtime.
    pub protocol: Option<ProtocolOutcome>,
    pub note: String,
}

impl RemoteRuntime {
    pub fn changed(&self) -> bool {
        self.protocol.is_some()
    }
}

type ProtocolCache = HashMap<(String, Option<String>), ProtocolCheck>;

/// Resolves local and remote identifiers for the server and the runtime.
///
/// Cheap to clone; clones share the protocol cache.
#[derive(Clone)]
pub struct VersionOracle {
    settings: OracleSettings,
    runner: Arc<dyn ToolRunner>,
    releases: Arc<dyn ReleaseApi>,
    protocol_cache: Arc<Mutex<ProtocolCache>>,
}

impl std::fmt::Debug for VersionOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionOracle")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl VersionOracle {
    pub fn new(
        settings: OracleSettings,
        runner: Arc<dyn ToolRunner>,
        releases: Arc<dyn ReleaseApi>,
    ) -> Self {
        Self {
            settings,
            runner,
            releases,
            protocol_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &OracleSettings {
        &self.settings
    }

    pub fn releases(&self) -> &Arc<dyn ReleaseApi> {
        &self.releases
    }

    fn layout(&self) -> InstallLayout {
        InstallLayout::new(&self.settings.install_dir)
    }

    /// Remote production-channel build, or `None` when it cannot be decided.
    pub fn resolve_remote_server_build(&self) -> Option<BuildExtraction> {
        build::resolve_remote_server_build(
            self.runner.as_ref(),
            &self.settings.steamcmd,
            self.settings.app_id,
            &self.settings.branch,
            self.settings.tool_timeout,
        )
    }

    /// Latest runtime release and, when it differs from `local_version`, its
    /// protocol compatibility with `local_protocol`.
    ///
    /// Failing to read the latest release is an error; protocol lookup
    /// failures fold into [`ProtocolOutcome::Error`].
    pub fn resolve_remote_runtime_release(
        &self,
        local_version: &str,
        local_protocol: Option<&str>,
    ) -> Result<RemoteRuntime, OracleError> {
        let release = self.latest_runtime_release()?;
        let version = normalize_version(&release.tag_name).unwrap_or_else(|| release.tag_name.clone());

        if version == local_version {
            return Ok(RemoteRuntime {
                tag: release.tag_name,
                version,
                protocol: None,
                note: "runtime up to date".to_string(),
            });
        }

        let check = self.protocol_for(&release.tag_name, local_protocol);
        tracing::info!(
            tag = %release.tag_name,
            local = local_version,
            protocol = %check.outcome,
            "{}",
            check.note
        );
        Ok(RemoteRuntime {
            tag: release.tag_name,
            version,
            protocol: Some(check.outcome),
            note: check.note,
        })
    }

    pub fn latest_runtime_release(&self) -> Result<Release, OracleError> {
        self.releases.latest_release(&self.settings.runtime_repo)
    }

    /// Cached per (tag, local protocol). Errors are not cached so the next
    /// cycle retries.
    fn protocol_for(&self, tag: &str, local_protocol: Option<&str>) -> ProtocolCheck {
        let key = (tag.to_string(), local_protocol.map(str::to_string));
        if let Ok(cache) = self.protocol_cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }

        let check = protocol::check_protocol(
            self.releases.as_ref(),
            &self.settings.runtime_repo,
            tag,
            local_protocol,
        );
        if check.outcome != ProtocolOutcome::Error {
            if let Ok(mut cache) = self.protocol_cache.lock() {
                cache.insert(key, check.clone());
            }
        }
        check
    }

    /// Installed runtime as `MAJOR.MINOR.PATCH`, or `"unknown"`.
    pub fn detect_local_runtime_version(&self) -> String {
        local::detect_local_runtime_version(&self.layout())
    }

    /// Installed server build from the app manifest.
    pub fn installed_server_build(&self) -> Option<BuildId> {
        local::installed_build(&self.layout(), self.settings.app_id)
    }
}
