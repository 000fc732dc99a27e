//! The updater's state machine.
//!
//! ```text
//! AcquireLock -> Validate -> WaitForStop -> Backup -> Apply -> Verify
//!     -> Finalize(success)
//!     -> Restore -> Finalize(failure)
//! ```
//!
//! Every path that gets past the lock ends in [`RolloutEngine::finalize`]:
//! a marker is written, the snapshot and the lock are removed, and the
//! managed service is started again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use keeper_core::handoff::{self, LockAttempt};
use keeper_core::{
    InstallLayout, KeeperConfig, ResultMarker, ServerRestored, ServiceController, ServiceSpec,
    SystemService, UpdateTarget, UpdaterInvocation, UpdaterMode,
};
use keeper_oracle::{local, normalize_version, GitHubReleases, SystemToolRunner};

use crate::backup::BackupStore;
use crate::error::RolloutError;
use crate::plugins::{PluginDirectory, PluginUpdater, UmodDirectory};
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::runtime::{ReleaseRuntimeInstaller, RuntimeInstaller};
use crate::steam::{Distribution, SteamDistribution};

#[derive(Debug, Clone)]
pub struct RolloutSettings {
    /// Interval between "is the service still running" checks.
    pub poll_interval: Duration,
    /// Excluded from snapshots when it lives inside the installation.
    pub updater_binary: Option<PathBuf>,
    pub plugin_requests_per_minute: usize,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            updater_binary: std::env::current_exe().ok(),
            plugin_requests_per_minute: 20,
        }
    }
}

impl RolloutSettings {
    pub fn from_config(config: &KeeperConfig) -> Self {
        Self {
            updater_binary: config
                .updater_binary
                .as_deref()
                .map(|p| config.resolve(p))
                .or_else(|| std::env::current_exe().ok()),
            plugin_requests_per_minute: config.plugin_requests_per_minute as usize,
            ..Self::default()
        }
    }
}

/// External capabilities the engine drives.
pub struct Collaborators {
    pub service: Arc<dyn ServiceController>,
    pub distribution: Arc<dyn Distribution>,
    pub runtime: Arc<dyn RuntimeInstaller>,
    pub plugins: Arc<dyn PluginDirectory>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Collaborators {
    /// Real OS, steamcmd, GitHub and uMod backed collaborators.
    pub fn system(invocation: &UpdaterInvocation, config: &KeeperConfig) -> Self {
        let sleeper: Arc<dyn Sleeper> = Arc::new(ThreadSleeper);
        let layout = InstallLayout::new(&invocation.install_dir);
        let distribution = SteamDistribution::new(
            Arc::new(SystemToolRunner::in_dir(&invocation.install_dir)),
            sleeper.clone(),
            &invocation.steamcmd,
            layout,
            invocation.app_id,
            &config.branch,
            config.tool_timeout(),
            RetryPolicy::new(config.install_attempts, config.install_backoff()),
        );
        Self {
            service: Arc::new(SystemService::new(
                invocation.service.clone(),
                &invocation.install_dir,
            )),
            distribution: Arc::new(distribution),
            runtime: Arc::new(ReleaseRuntimeInstaller::new(
                Arc::new(GitHubReleases::new(config.http_timeout())),
                &config.runtime_repo,
            )),
            plugins: Arc::new(UmodDirectory::new(config.http_timeout())),
            sleeper,
        }
    }
}

/// What one updater run left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutReport {
    /// `None` for flows that write no marker (`init`).
    pub marker: Option<ResultMarker>,
    pub relaunched: bool,
}

/// Terminal state of the locked part of a cycle.
struct Outcome {
    marker: ResultMarker,
    keep_snapshot: bool,
}

impl Outcome {
    fn done(marker: ResultMarker) -> Self {
        Self {
            marker,
            keep_snapshot: false,
        }
    }
}

pub struct RolloutEngine {
    invocation: UpdaterInvocation,
    layout: InstallLayout,
    backup: BackupStore,
    settings: RolloutSettings,
    service: Arc<dyn ServiceController>,
    distribution: Arc<dyn Distribution>,
    runtime: Arc<dyn RuntimeInstaller>,
    plugins: PluginUpdater,
    sleeper: Arc<dyn Sleeper>,
}

impl RolloutEngine {
    pub fn new(
        invocation: UpdaterInvocation,
        collaborators: Collaborators,
        settings: RolloutSettings,
    ) -> Self {
        let layout = InstallLayout::new(&invocation.install_dir);
        let backup = BackupStore::new(
            layout.root(),
            layout.backup_dir(),
            layout.protected_paths(settings.updater_binary.as_deref()),
        );
        let plugins = PluginUpdater::new(
            collaborators.plugins,
            collaborators.sleeper.clone(),
            settings.plugin_requests_per_minute,
        );
        Self {
            invocation,
            layout,
            backup,
            settings,
            service: collaborators.service,
            distribution: collaborators.distribution,
            runtime: collaborators.runtime,
            plugins,
            sleeper: collaborators.sleeper,
        }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn run(mut self) -> Result<RolloutReport, RolloutError> {
        tracing::info!(
            mode = %self.invocation.mode,
            target = %self.invocation.target,
            install_dir = %self.layout.root().display(),
            "updater started"
        );
        match self.invocation.mode.clone() {
            UpdaterMode::Init => self.run_init(),
            UpdaterMode::TestRun => self.run_locked(false),
            UpdaterMode::Scheduled(_) => self.run_locked(true),
        }
    }

    /// Record the build the installation is on for the supervisor's first start.
    fn run_init(&self) -> Result<RolloutReport, RolloutError> {
        let build = self
            .distribution
            .installed_build()
            .or_else(|| self.distribution.remote_build());
        match build {
            Some(build) => {
                handoff::write_pending_build(&self.layout, &build)?;
                tracing::info!(build = %build, "initial build recorded");
            }
            None => tracing::warn!("no installed or remote build available; nothing recorded"),
        }
        Ok(RolloutReport {
            marker: None,
            relaunched: false,
        })
    }

    fn run_locked(&mut self, apply: bool) -> Result<RolloutReport, RolloutError> {
        let id = self.invocation.mode.marker_id();
        if handoff::acquire_lock(&self.layout)? == LockAttempt::AlreadyHeld {
            tracing::error!(lock = %self.layout.lock_path().display(), "another rollout holds the lock");
            let marker = ResultMarker::failed(&id, "blocked by lock");
            handoff::write_marker(&self.layout, &marker)?;
            return Ok(RolloutReport {
                marker: Some(marker),
                relaunched: false,
            });
        }

        let mut outcome = self.locked_cycle(&id, apply);
        outcome.marker.backup_cycle = !apply;
        self.finalize(outcome)
    }

    fn locked_cycle(&mut self, id: &str, apply: bool) -> Outcome {
        if let Err(err) = self.validate(apply) {
            tracing::error!(error = %err, "invocation rejected");
            return Outcome::done(ResultMarker::failed(id, err.to_string()));
        }

        if let Err(err) = self.wait_for_stop(!apply) {
            tracing::error!(error = %err, "could not confirm the service stopped");
            return Outcome::done(ResultMarker::failed(id, format!("failed to stop server: {err}")));
        }

        if let Err(err) = self.backup.snapshot() {
            tracing::error!(error = %err, "snapshot failed");
            return Outcome::done(ResultMarker::failed(id, "failed backup creation"));
        }

        if !apply {
            return Outcome::done(ResultMarker::success(id));
        }

        if let Err((step, err)) = self.apply() {
            tracing::error!(step = %step, error = %err, "apply failed; restoring snapshot");
            return match self.backup.restore() {
                Ok(_) => {
                    let mut marker =
                        ResultMarker::failed(id, format!("failed {step} update: {err}"));
                    marker.server_restored = ServerRestored::Yes;
                    Outcome::done(marker)
                }
                Err(restore_err) => {
                    tracing::error!(
                        error = %restore_err,
                        snapshot = %self.backup.snapshot_dir().display(),
                        "restore failed; snapshot kept for manual recovery"
                    );
                    let mut marker = ResultMarker::failed(
                        id,
                        format!("failed restore after failed {step} update"),
                    );
                    marker.server_restored = ServerRestored::No;
                    Outcome {
                        marker,
                        keep_snapshot: true,
                    }
                }
            };
        }

        let mut marker = ResultMarker::success(id);
        if self.invocation.update_plugins {
            marker.updated_plugins = Some(self.update_plugins());
        }
        Outcome::done(marker)
    }

    fn validate(&self, apply: bool) -> Result<(), RolloutError> {
        self.invocation
            .validate()
            .map_err(|e| RolloutError::Validation(e.to_string()))?;
        if !self.layout.root().is_dir() {
            return Err(RolloutError::Validation(format!(
                "install directory {} does not exist",
                self.layout.root().display()
            )));
        }
        if apply
            && self.invocation.target.includes_server()
            && !program_available(&self.invocation.steamcmd)
        {
            return Err(RolloutError::Validation(format!(
                "steamcmd not found at {}",
                self.invocation.steamcmd.display()
            )));
        }
        if let ServiceSpec::Script { start_script, .. } = &self.invocation.service {
            let script = if start_script.is_absolute() {
                start_script.clone()
            } else {
                self.layout.root().join(start_script)
            };
            if !script.is_file() {
                return Err(RolloutError::Validation(format!(
                    "start script {} does not exist",
                    script.display()
                )));
            }
        }
        Ok(())
    }

    /// Poll until the service reports stopped. No deadline: the supervisor
    /// has already asked it to stop. A test run asks on its own.
    fn wait_for_stop(&self, request: bool) -> Result<(), RolloutError> {
        if request && self.service.is_running()? {
            self.service.request_stop()?;
        }
        let mut polls: u64 = 0;
        while self.service.is_running()? {
            if polls % 30 == 0 {
                tracing::info!("waiting for the managed service to stop");
            }
            polls += 1;
            self.sleeper.sleep(self.settings.poll_interval);
        }
        tracing::info!("managed service stopped");
        Ok(())
    }

    /// Server first, then runtime. Each step is verified before the next runs.
    fn apply(&self) -> Result<(), (UpdateTarget, RolloutError)> {
        let target = self.invocation.target;
        if target.includes_server() {
            self.distribution
                .install()
                .and_then(|()| self.verify_server())
                .map_err(|e| (UpdateTarget::Server, e))?;
        }
        if target.includes_runtime() {
            self.runtime
                .install(&self.layout)
                .and_then(|tag| self.verify_runtime(&tag))
                .map_err(|e| (UpdateTarget::Runtime, e))?;
        }
        Ok(())
    }

    fn verify_server(&self) -> Result<(), RolloutError> {
        let Some(expected) = &self.invocation.expected_build else {
            return Ok(());
        };
        let found = self.distribution.installed_build();
        if found.as_ref() != Some(expected) {
            return Err(RolloutError::Verify {
                what: "server build",
                expected: expected.to_string(),
                found: found.map(|b| b.0).unwrap_or_else(|| "none".to_string()),
            });
        }
        tracing::info!(build = %expected, "server build verified");
        Ok(())
    }

    fn verify_runtime(&self, installed_tag: &str) -> Result<(), RolloutError> {
        let Some(expected) = &self.invocation.expected_runtime else {
            tracing::info!(tag = installed_tag, "runtime installed");
            return Ok(());
        };
        let want = normalize_version(expected).unwrap_or_else(|| expected.clone());
        let found = local::detect_local_runtime_version(&self.layout);
        if found != want {
            return Err(RolloutError::Verify {
                what: "runtime version",
                expected: want,
                found,
            });
        }
        tracing::info!(version = %found, tag = installed_tag, "runtime verified");
        Ok(())
    }

    fn update_plugins(&mut self) -> Vec<String> {
        match self.plugins.update_all(&self.layout.plugins_dir()) {
            Ok(updated) => {
                tracing::info!(count = updated.len(), "plugin pass finished");
                updated
            }
            Err(err) => {
                tracing::warn!(error = %err, "plugin pass skipped");
                vec![]
            }
        }
    }

    /// Cleanup, then the marker as the last durable write, then relaunch.
    fn finalize(&self, outcome: Outcome) -> Result<RolloutReport, RolloutError> {
        if !outcome.keep_snapshot {
            if let Err(err) = self.backup.discard() {
                tracing::warn!(error = %err, "could not delete snapshot");
            }
        }
        if let Err(err) = handoff::release_lock(&self.layout) {
            tracing::warn!(error = %err, "could not remove lock");
        }
        let written = handoff::write_marker(&self.layout, &outcome.marker);
        let relaunched = match self.service.start() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "relaunch failed");
                false
            }
        };
        written?;
        tracing::info!(
            result = ?outcome.marker.result,
            reason = outcome.marker.fail_reason.as_deref().unwrap_or(""),
            relaunched,
            "updater finished"
        );
        Ok(RolloutReport {
            marker: Some(outcome.marker),
            relaunched,
        })
    }
}

/// `true` when `program` is an existing path, or a bare name found on `PATH`.
fn program_available(program: &Path) -> bool {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_lookup_by_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let tool = tmp.path().join("steamcmd.sh");
        assert!(!program_available(&tool));
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        assert!(program_available(&tool));
        assert!(!program_available(Path::new("definitely-not-a-real-tool-name")));
    }
}
