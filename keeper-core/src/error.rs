//! Error types for keeper-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from ledger, handoff-file and config operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON error on a ledger or marker document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Marker file exists but does not parse; includes the file path.
    #[error("failed to parse result marker at {path}: {source}")]
    MarkerParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// YAML parse error on config load; includes file path and line context.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A service-manager or start-script command failed.
    #[error("service control error: {0}")]
    Service(String),

    /// Invocation argument rejected before any process was spawned.
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
