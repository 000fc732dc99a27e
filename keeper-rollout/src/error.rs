//! Error types for keeper-rollout.

use std::path::PathBuf;

use thiserror::Error;

use keeper_core::CoreError;
use keeper_oracle::OracleError;

/// All errors that can arise while backing up, applying or restoring.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Runtime archive could not be read.
    #[error("archive error in {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Preconditions failed before anything was touched. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The distribution tool gave up after every retry.
    #[error("server install failed after {attempts} attempt(s): {last}")]
    InstallExhausted { attempts: u32, last: String },

    /// The runtime release does not contain the expected layout.
    #[error("runtime package invalid: {0}")]
    RuntimePackage(String),

    /// The installed identifier differs from the one the rollout was for.
    #[error("{what} verification failed: expected {expected}, found {found}")]
    Verify {
        what: &'static str,
        expected: String,
        found: String,
    },

    /// Plugin directory responded with something unusable.
    #[error("plugin lookup failed: {0}")]
    Plugin(String),

    /// JSON error from a plugin directory response.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`RolloutError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RolloutError {
    RolloutError::Io {
        path: path.into(),
        source,
    }
}
