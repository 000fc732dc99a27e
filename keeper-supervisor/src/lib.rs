//! Long-running supervisor: reconciliation, detection loop, countdown and
//! hand-off to `keeper-updater`, plus the status socket.

pub mod capabilities;
pub mod coordinator;
mod error;
pub mod protocol;
pub mod reconcile;
mod runtime;

pub use capabilities::{
    Broadcaster, LogBroadcaster, LogNotifier, Notice, Notifier, ProcessLauncher, UpdaterLauncher,
};
pub use coordinator::{
    Capabilities, CheckReply, Command, Coordinator, CoordinatorSettings, FrozenPlan, Phase,
    RunOutcome, StatusSnapshot,
};
pub use error::SupervisorError;
pub use protocol::{SupervisorClient, SupervisorRequest, SupervisorResponse};
pub use reconcile::{reconcile, Reconciliation};
pub use runtime::{run, start_blocking};
