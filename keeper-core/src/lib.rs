//! Keeper core library: domain types, ledger, filesystem handoff, config.
//!
//! Public API surface:
//! - [`types`]: newtypes, decisions and the result marker
//! - [`ledger`]: confirmed / pending build ids and the failure counter
//! - [`handoff`]: lock, marker and pending-build files shared with the updater
//! - [`invocation`]: the updater command-line contract
//! - [`service`]: [`ServiceController`] and its OS-backed implementation
//! - [`config`]: [`KeeperConfig`]
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod handoff;
pub mod invocation;
pub mod ledger;
pub mod paths;
pub mod service;
pub mod types;

pub use config::KeeperConfig;
pub use error::CoreError;
pub use invocation::{UpdaterInvocation, UpdaterMode};
pub use ledger::{KeyValueStore, Ledger};
pub use paths::InstallLayout;
pub use service::{ServiceController, ServiceSpec, SystemService};
pub use types::{
    BuildId, BuildIdentifiers, MarkerResult, ResultMarker, ServerRestored, UpdateDecision,
    UpdateId, UpdateTarget,
};
