//! Server install through the distribution CLI (steamcmd).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use keeper_core::{BuildId, InstallLayout};
use keeper_oracle::{build, local, ToolRunner};

use crate::error::{io_err, RolloutError};
use crate::retry::{InstallOutcome, NextStep, RetryPolicy, Sleeper};

/// Capability over the server's distribution channel.
pub trait Distribution: Send + Sync {
    /// Install or validate the server build into the installation.
    fn install(&self) -> Result<(), RolloutError>;

    /// Build recorded in the installed app manifest.
    fn installed_build(&self) -> Option<BuildId>;

    /// Build currently published on the configured branch.
    fn remote_build(&self) -> Option<BuildId>;
}

/// `+force_install_dir <dir> +login anonymous +app_update <id> validate +quit`
pub fn install_args(install_dir: &std::path::Path, app_id: u32) -> Vec<String> {
    vec![
        "+force_install_dir".to_string(),
        install_dir.display().to_string(),
        "+login".to_string(),
        "anonymous".to_string(),
        "+app_update".to_string(),
        app_id.to_string(),
        "validate".to_string(),
        "+quit".to_string(),
    ]
}

/// Classify steamcmd output for `app_id`.
///
/// The success line wins over everything; a locked manifest (state `0x602`
/// on the app's own state line) is retried with a remedy; an error line naming the app fails. Output that
/// names no failure for the app is success.
pub fn classify_output(output: &str, app_id: u32) -> InstallOutcome {
    if output.contains(&format!("Success! App '{app_id}' fully installed")) {
        return InstallOutcome::Success;
    }
    let lower = output.to_ascii_lowercase();
    let app = format!("app '{app_id}'");
    if lower
        .lines()
        .any(|line| line.contains(&app) && line.contains("0x602"))
    {
        return InstallOutcome::Busy;
    }
    if lower.contains(&format!("error! {app}"))
        || lower.contains(&format!("failed to install app '{app_id}'"))
    {
        return InstallOutcome::Failed;
    }
    InstallOutcome::Success
}

/// [`Distribution`] driven by steamcmd with bounded retries.
pub struct SteamDistribution {
    runner: Arc<dyn ToolRunner>,
    sleeper: Arc<dyn Sleeper>,
    steamcmd: PathBuf,
    layout: InstallLayout,
    app_id: u32,
    branch: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SteamDistribution {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        sleeper: Arc<dyn Sleeper>,
        steamcmd: impl Into<PathBuf>,
        layout: InstallLayout,
        app_id: u32,
        branch: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            sleeper,
            steamcmd: steamcmd.into(),
            layout,
            app_id,
            branch: branch.into(),
            timeout,
            retry,
        }
    }

    /// Move the app manifest aside so steamcmd rebuilds it.
    fn rename_stale_manifest(&self) -> Result<(), RolloutError> {
        let manifest = self.layout.app_manifest(self.app_id);
        if !manifest.exists() {
            return Ok(());
        }
        let aside = manifest.with_extension("acf.stale");
        std::fs::rename(&manifest, &aside).map_err(|e| io_err(&manifest, e))?;
        tracing::warn!(manifest = %manifest.display(), "renamed locked app manifest");
        Ok(())
    }
}

impl Distribution for SteamDistribution {
    fn install(&self) -> Result<(), RolloutError> {
        let args = install_args(self.layout.root(), self.app_id);
        let mut remedy_used = false;
        let mut attempt = 1;
        loop {
            let (outcome, detail) = match self.runner.run(&self.steamcmd, &args, self.timeout) {
                Ok(out) => {
                    let outcome = classify_output(&out.output, self.app_id);
                    let tail = out.output.lines().last().unwrap_or_default().to_string();
                    (outcome, tail)
                }
                Err(err) => (InstallOutcome::Failed, err.to_string()),
            };
            tracing::info!(attempt, ?outcome, app_id = self.app_id, "steamcmd install attempt");

            match self.retry.plan(attempt, outcome, remedy_used) {
                NextStep::Done => return Ok(()),
                NextStep::GiveUp => {
                    return Err(RolloutError::InstallExhausted {
                        attempts: attempt,
                        last: detail,
                    })
                }
                NextStep::Retry { delay, remedy } => {
                    if remedy {
                        self.rename_stale_manifest()?;
                        remedy_used = true;
                    }
                    tracing::warn!(attempt, delay_secs = delay.as_secs(), detail = %detail, "retrying server install");
                    self.sleeper.sleep(delay);
                }
            }
            attempt += 1;
        }
    }

    fn installed_build(&self) -> Option<BuildId> {
        local::installed_build(&self.layout, self.app_id)
    }

    fn remote_build(&self) -> Option<BuildId> {
        build::resolve_remote_server_build(
            self.runner.as_ref(),
            &self.steamcmd,
            self.app_id,
            &self.branch,
            self.timeout,
        )
        .map(|extraction| extraction.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use keeper_oracle::{OracleError, ToolOutput};
    use rstest::rstest;

    #[rstest]
    #[case::success_line("Success! App '258550' fully installed.", InstallOutcome::Success)]
    #[case::busy("Error! App '258550' state is 0x602 after update job.", InstallOutcome::Busy)]
    #[case::failed("Error! App '258550' state is 0x202 after update job.", InstallOutcome::Failed)]
    #[case::install_failed("ERROR! Failed to install app '258550' (No subscription)", InstallOutcome::Failed)]
    #[case::other_app("Error! App '1007' state is 0x202", InstallOutcome::Success)]
    #[case::other_app_busy("Error! App '1007' state is 0x602 after update job.", InstallOutcome::Success)]
    #[case::silent("Loading Steam API...OK", InstallOutcome::Success)]
    fn classifies_tool_output(#[case] output: &str, #[case] expected: InstallOutcome) {
        assert_eq!(classify_output(output, 258550), expected);
    }

    struct Scripted(Mutex<Vec<&'static str>>);

    impl ToolRunner for Scripted {
        fn run(&self, _: &Path, _: &[String], _: Duration) -> Result<ToolOutput, OracleError> {
            let mut outputs = self.0.lock().unwrap();
            let next = if outputs.len() > 1 { outputs.remove(0) } else { outputs[0] };
            Ok(ToolOutput {
                code: Some(0),
                output: next.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Duration>>);

    impl Sleeper for Recorder {
        fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn distribution(
        root: &Path,
        outputs: Vec<&'static str>,
        sleeper: Arc<Recorder>,
    ) -> SteamDistribution {
        SteamDistribution::new(
            Arc::new(Scripted(Mutex::new(outputs))),
            sleeper,
            "steamcmd",
            InstallLayout::new(root),
            258550,
            "public",
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::from_secs(10)),
        )
    }

    #[test]
    fn busy_manifest_is_renamed_once_then_retried() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        let manifest = layout.app_manifest(258550);
        std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        std::fs::write(&manifest, "\"buildid\" \"1\"").unwrap();

        let sleeper = Arc::new(Recorder::default());
        let steam = distribution(
            tmp.path(),
            vec![
                "Error! App '258550' state is 0x602 after update job.",
                "Success! App '258550' fully installed.",
            ],
            sleeper.clone(),
        );
        steam.install().unwrap();

        assert!(!manifest.exists());
        assert!(manifest.with_extension("acf.stale").exists());
        assert_eq!(*sleeper.0.lock().unwrap(), vec![Duration::from_secs(10)]);
    }

    #[test]
    fn persistent_failure_exhausts_with_linear_backoff() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sleeper = Arc::new(Recorder::default());
        let steam = distribution(
            tmp.path(),
            vec!["ERROR! Failed to install app '258550' (Disk write failure)"],
            sleeper.clone(),
        );

        let err = steam.install().unwrap_err();
        assert!(matches!(err, RolloutError::InstallExhausted { attempts: 3, .. }), "got: {err}");
        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
    }
}
