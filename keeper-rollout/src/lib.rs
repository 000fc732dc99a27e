//! # keeper-rollout
//!
//! The updater side of `keeper`: one transactional rollout per invocation.
//!
//! Run a [`RolloutEngine`] built from an [`keeper_core::UpdaterInvocation`].
//! The engine takes the lock, waits for the service to stop, snapshots the
//! installation with [`BackupStore`], applies the server and runtime updates,
//! verifies them, restores on failure, and always writes a marker and
//! relaunches the service.

pub mod backup;
pub mod engine;
pub mod error;
pub mod log_rotation;
pub mod plugins;
pub mod rate_limit;
pub mod retry;
pub mod runtime;
pub mod steam;

pub use backup::{BackupStore, RestoreReport, SnapshotReport};
pub use engine::{Collaborators, RolloutEngine, RolloutReport, RolloutSettings};
pub use error::RolloutError;
pub use plugins::{PluginDirectory, PluginListing, PluginUpdater, UmodDirectory};
pub use rate_limit::RateLimiter;
pub use retry::{InstallOutcome, NextStep, RetryPolicy, Sleeper, ThreadSleeper};
pub use runtime::{ReleaseRuntimeInstaller, RuntimeInstaller};
pub use steam::{Distribution, SteamDistribution};
