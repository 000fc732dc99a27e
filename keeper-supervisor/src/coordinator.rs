//! The supervisor's state machine.
//!
//! ```text
//! Idle -> Detecting -> (decision) -> CountingDown -> HandedOff
//!   ^         |
//!   +---------+  nothing to do, or the cycle failed
//! ```
//!
//! One task owns a [`Coordinator`] and drives it from a `select!` loop:
//! interval ticks request detection cycles, detection results come back over
//! an `mpsc` channel from the blocking pool, countdown ticks arrive once a
//! minute, and operator commands arrive with a `oneshot` for the reply. All
//! state is mutated on that one task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use keeper_core::{
    BuildId, KeeperConfig, Ledger, ServiceController, ServiceSpec, UpdateDecision, UpdateId,
    UpdateTarget, UpdaterInvocation, UpdaterMode,
};
use keeper_policy::{Detector, Evaluation};

use crate::capabilities::{Broadcaster, Notice, Notifier, UpdaterLauncher};
use crate::error::SupervisorError;

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Detecting,
    CountingDown,
    HandedOff,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub check_interval: Duration,
    pub countdown_minutes: u32,
    pub max_tries: u32,
    pub update_plugins: bool,
    pub local_protocol: Option<String>,
    pub install_dir: PathBuf,
    pub steamcmd: PathBuf,
    pub service: ServiceSpec,
    pub app_id: u32,
}

impl From<&KeeperConfig> for CoordinatorSettings {
    fn from(config: &KeeperConfig) -> Self {
        Self {
            check_interval: config.check_interval(),
            countdown_minutes: config.countdown_minutes,
            max_tries: config.max_tries,
            update_plugins: config.update_plugins,
            local_protocol: config.local_protocol(),
            install_dir: config.install_dir.clone(),
            steamcmd: config.steamcmd.clone(),
            service: config.service.clone(),
            app_id: config.app_id,
        }
    }
}

pub struct Capabilities {
    pub detector: Arc<dyn Detector>,
    pub service: Arc<dyn ServiceController>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub notifier: Arc<dyn Notifier>,
    pub launcher: Arc<dyn UpdaterLauncher>,
}

/// Decision and remote identifiers captured when the countdown starts.
/// Hand-off uses these as-is, without asking upstream again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenPlan {
    pub target: UpdateTarget,
    pub remote_build: BuildId,
    pub remote_runtime_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub detection_enabled: bool,
    pub detecting: bool,
    pub pending: UpdateDecision,
    pub plan: Option<FrozenPlan>,
    pub minutes_left: Option<u32>,
    pub last_error: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub confirmed_build: Option<BuildId>,
    pub pending_build: Option<BuildId>,
    pub try_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckReply {
    Started,
    AlreadyRunning,
    /// A countdown or hand-off is in progress.
    Busy,
    Disabled,
}

/// Operator requests, answered on the coordinator task.
#[derive(Debug)]
pub enum Command {
    Status(oneshot::Sender<StatusSnapshot>),
    Check(oneshot::Sender<CheckReply>),
    Stop(oneshot::Sender<()>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    HandedOff(UpdaterInvocation),
    Stopped,
}

type DetectionResult = Result<Evaluation, String>;

enum DetectionStep {
    Idle,
    Countdown,
    HandOffNow,
}

enum MinuteStep {
    Continue,
    HandedOff(UpdaterInvocation),
    Abandoned,
}

pub struct Coordinator {
    settings: CoordinatorSettings,
    caps: Capabilities,
    ledger: Ledger,
    phase: Phase,
    detecting: bool,
    detection_enabled: bool,
    pending: UpdateDecision,
    plan: Option<FrozenPlan>,
    minutes_left: u32,
    last_error: Option<String>,
    last_check: Option<DateTime<Utc>>,
}

impl Coordinator {
    /// Build a coordinator over an already reconciled ledger. Detection stays
    /// off when the failure counter is past `max_tries`.
    pub fn new(settings: CoordinatorSettings, caps: Capabilities, ledger: Ledger) -> Self {
        let tries = ledger.try_number();
        let detection_enabled = tries <= settings.max_tries;
        let mut coordinator = Self {
            settings,
            caps,
            ledger,
            phase: Phase::Idle,
            detecting: false,
            detection_enabled,
            pending: UpdateDecision::NOTHING,
            plan: None,
            minutes_left: 0,
            last_error: None,
            last_check: None,
        };
        if !detection_enabled {
            let notice = Notice::DetectionDisabled { tries };
            coordinator.last_error = Some(notice.to_string());
            coordinator.caps.notifier.notify(&notice);
        }
        coordinator
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase,
            detection_enabled: self.detection_enabled,
            detecting: self.detecting,
            pending: self.pending,
            plan: self.plan.clone(),
            minutes_left: (self.phase == Phase::CountingDown).then_some(self.minutes_left),
            last_error: self.last_error.clone(),
            last_check: self.last_check,
            confirmed_build: self.ledger.confirmed_build(),
            pending_build: self.ledger.pending_build(),
            try_number: self.ledger.try_number(),
        }
    }

    /// Drive the state machine until hand-off, a stop command, or every
    /// command sender is gone.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<Command>,
    ) -> Result<RunOutcome, SupervisorError> {
        let (results_tx, mut results_rx) = mpsc::channel::<DetectionResult>(4);
        let mut checks = tokio::time::interval(self.settings.check_interval);
        checks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut countdown: Option<Interval> = None;

        tracing::info!(
            interval_secs = self.settings.check_interval.as_secs(),
            detection_enabled = self.detection_enabled,
            "coordinator started"
        );

        loop {
            tokio::select! {
                _ = checks.tick() => {
                    self.request_cycle(&results_tx);
                }
                Some(result) = results_rx.recv() => {
                    match self.on_detection(result) {
                        DetectionStep::Idle => {}
                        DetectionStep::Countdown => {
                            countdown = Some(tokio::time::interval_at(Instant::now() + MINUTE, MINUTE));
                        }
                        DetectionStep::HandOffNow => {
                            if let Some(invocation) = self.hand_off() {
                                return Ok(RunOutcome::HandedOff(invocation));
                            }
                        }
                    }
                }
                _ = next_tick(&mut countdown) => {
                    match self.on_minute() {
                        MinuteStep::Continue => {}
                        MinuteStep::HandedOff(invocation) => return Ok(RunOutcome::HandedOff(invocation)),
                        MinuteStep::Abandoned => countdown = None,
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(Command::Check(reply)) => {
                        let _ = reply.send(self.request_cycle(&results_tx));
                    }
                    Some(Command::Stop(reply)) => {
                        tracing::info!(phase = ?self.phase, "stop requested");
                        let _ = reply.send(());
                        return Ok(RunOutcome::Stopped);
                    }
                    None => return Ok(RunOutcome::Stopped),
                },
            }
        }
    }

    /// Start a detection cycle on the blocking pool unless one is in flight.
    fn request_cycle(&mut self, results: &mpsc::Sender<DetectionResult>) -> CheckReply {
        if !self.detection_enabled {
            return CheckReply::Disabled;
        }
        if self.detecting {
            tracing::debug!("detection already in flight; skipping cycle");
            return CheckReply::AlreadyRunning;
        }
        if self.phase != Phase::Idle {
            return CheckReply::Busy;
        }

        self.detecting = true;
        self.phase = Phase::Detecting;
        let detector = self.caps.detector.clone();
        let confirmed = self.ledger.confirmed_build();
        let protocol = self.settings.local_protocol.clone();
        let results = results.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                detector
                    .detect(confirmed.as_ref(), protocol.as_deref())
                    .map_err(|e| e.to_string())
            })
            .await
            .unwrap_or_else(|err| Err(format!("detection task failed: {err}")));
            let _ = results.send(result).await;
        });
        CheckReply::Started
    }

    fn on_detection(&mut self, result: DetectionResult) -> DetectionStep {
        self.detecting = false;
        self.phase = Phase::Idle;
        self.last_check = Some(Utc::now());

        let evaluation = match result {
            Ok(evaluation) => evaluation,
            Err(err) => {
                tracing::warn!(error = %err, "detection cycle abandoned");
                self.last_error = Some(err);
                return DetectionStep::Idle;
            }
        };

        self.last_error = evaluation
            .decision
            .error
            .then(|| format!("protocol check failed: {}", evaluation.note));

        let Some(target) = evaluation.decision.target() else {
            self.pending = evaluation.decision;
            tracing::debug!(remote_build = %evaluation.remote_build, "no update needed");
            return DetectionStep::Idle;
        };

        if let Err(err) = self.ledger.set_pending_build(&evaluation.remote_build) {
            tracing::error!(error = %err, "could not persist pending build; not scheduling update");
            self.last_error = Some(err.to_string());
            return DetectionStep::Idle;
        }

        self.pending = evaluation.decision;
        self.plan = Some(FrozenPlan {
            target,
            remote_build: evaluation.remote_build.clone(),
            remote_runtime_tag: evaluation.remote_runtime_tag.clone(),
        });
        self.minutes_left = self.settings.countdown_minutes;
        self.phase = Phase::CountingDown;
        tracing::info!(
            target = %target,
            remote_build = %evaluation.remote_build,
            remote_runtime = %evaluation.remote_runtime_tag,
            minutes = self.minutes_left,
            "update scheduled"
        );
        self.caps.notifier.notify(&Notice::CountdownStarted {
            target,
            minutes: self.minutes_left,
        });

        if self.minutes_left == 0 {
            return DetectionStep::HandOffNow;
        }
        self.caps
            .broadcaster
            .broadcast(&countdown_message(target, self.minutes_left));
        DetectionStep::Countdown
    }

    fn on_minute(&mut self) -> MinuteStep {
        if self.phase != Phase::CountingDown {
            return MinuteStep::Abandoned;
        }
        self.minutes_left = self.minutes_left.saturating_sub(1);
        if self.minutes_left > 0 {
            if let Some(plan) = &self.plan {
                self.caps
                    .broadcaster
                    .broadcast(&countdown_message(plan.target, self.minutes_left));
            }
            return MinuteStep::Continue;
        }
        match self.hand_off() {
            Some(invocation) => MinuteStep::HandedOff(invocation),
            None => MinuteStep::Abandoned,
        }
    }

    /// Launch the updater with the frozen plan, then ask the service to stop.
    fn hand_off(&mut self) -> Option<UpdaterInvocation> {
        let plan = self.plan.clone()?;
        let invocation = UpdaterInvocation {
            mode: UpdaterMode::Scheduled(UpdateId::from_timestamp(Utc::now())),
            target: plan.target,
            update_plugins: self.settings.update_plugins,
            install_dir: self.settings.install_dir.clone(),
            steamcmd: self.settings.steamcmd.clone(),
            service: self.settings.service.clone(),
            app_id: self.settings.app_id,
            expected_build: plan.target.includes_server().then(|| plan.remote_build.clone()),
            expected_runtime: plan
                .target
                .includes_runtime()
                .then(|| plan.remote_runtime_tag.clone()),
        };

        self.caps
            .broadcaster
            .broadcast(&format!("Restarting now for the {} update.", describe(plan.target)));
        if let Err(err) = self.caps.launcher.launch(&invocation) {
            tracing::error!(error = %err, "hand-off failed; server left running");
            self.last_error = Some(err.to_string());
            if let Err(err) = self.ledger.clear_pending() {
                tracing::error!(error = %err, "could not clear pending build");
            }
            self.phase = Phase::Idle;
            self.pending = UpdateDecision::NOTHING;
            self.plan = None;
            return None;
        }
        if let Err(err) = self.caps.service.request_stop() {
            tracing::error!(error = %err, "stop request failed; updater will keep waiting");
        }

        self.phase = Phase::HandedOff;
        self.caps.notifier.notify(&Notice::HandedOff {
            update_id: invocation.mode.marker_id(),
            target: plan.target,
        });
        tracing::info!(update_id = %invocation.mode, target = %plan.target, "handed off to updater");
        Some(invocation)
    }
}

async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn describe(target: UpdateTarget) -> &'static str {
    match target {
        UpdateTarget::Server => "server",
        UpdateTarget::Runtime => "Oxide",
        UpdateTarget::Both => "server and Oxide",
    }
}

pub fn countdown_message(target: UpdateTarget, minutes: u32) -> String {
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    format!(
        "The server will restart for a {} update in {minutes} {unit}.",
        describe(target)
    )
}
