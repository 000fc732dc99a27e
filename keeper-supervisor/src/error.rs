use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the coordinator, reconciliation and the status socket.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] keeper_core::CoreError),

    #[error(transparent)]
    Policy(#[from] keeper_policy::PolicyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("supervisor protocol error: {0}")]
    Protocol(String),

    #[error("supervisor is not running (socket missing: {socket})")]
    NotRunning { socket: PathBuf },

    #[error("failed to launch updater: {0}")]
    Launch(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SupervisorError {
    SupervisorError::Io {
        path: path.into(),
        source,
    }
}
