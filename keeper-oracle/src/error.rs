//! Error types for keeper-oracle.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external tool could not be started at all.
    #[error("tool not found: {program}")]
    ToolMissing { program: String },

    /// The external tool exceeded its wall-clock ceiling and was killed.
    #[error("{program} timed out after {secs}s")]
    ToolTimeout { program: String, secs: u64 },

    /// Network-level failure (DNS, connect, timeout, TLS).
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("request to {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl OracleError {
    /// `true` for a 404, which lookups treat as "absent" rather than failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OracleError::HttpStatus { status: 404, .. })
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> OracleError {
    OracleError::Io {
        path: path.into(),
        source,
    }
}
