//! Version resolution for `keeper`.
//!
//! [`VersionOracle`] answers four questions, each backed by its own module:
//!
//! - remote server build: [`build`] (distribution tool output, three tiers)
//! - remote runtime release and protocol compatibility: [`release`], [`protocol`]
//! - installed runtime version and server build: [`local`]
//! - how two loose version strings order: [`version`]
//!
//! External processes go through [`tool::ToolRunner`] and HTTP through
//! [`release::ReleaseApi`], so every lookup can be faked in tests.

pub mod build;
pub mod error;
pub mod local;
pub mod oracle;
pub mod protocol;
pub mod release;
pub mod tool;
pub mod version;

pub use build::{BuildExtraction, Confidence};
pub use error::OracleError;
pub use oracle::{OracleSettings, RemoteRuntime, VersionOracle};
pub use protocol::ProtocolOutcome;
pub use release::{GitHubReleases, Release, ReleaseApi, ReleaseAsset};
pub use tool::{SystemToolRunner, ToolOutput, ToolRunner};
pub use version::{compare_versions, is_newer, normalize_version};
