//! Error types for keeper-policy.

use std::fmt;
use std::path::PathBuf;

use keeper_oracle::OracleError;
use thiserror::Error;

/// Why one scheme line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineErrorKind {
    #[error("missing '=' separator")]
    MissingSeparator,
    #[error("no events before '='")]
    EmptyEvents,
    #[error("no action after '='")]
    EmptyAction,
    #[error("unknown action '{0}' (expected server, runtime or both)")]
    UnknownAction(String),
    #[error("unknown event '{0}' (expected server or runtime(...))")]
    UnknownEvent(String),
    #[error("unknown protocol flag '{0}' (expected e, s, c or u)")]
    UnknownFlag(char),
    #[error("event '{0}' listed twice")]
    DuplicateEvent(&'static str),
    #[error("{0}")]
    Malformed(String),
}

/// A rejected scheme line, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub line: usize,
    pub text: String,
    pub kind: LineErrorKind,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} in `{}`", self.line, self.kind, self.text)
    }
}

#[derive(Debug, Error)]
pub enum SchemeError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// At least one line is invalid; the whole scheme is rejected.
    #[error("scheme rejected, {}", summarize(.0))]
    Invalid(Vec<LineError>),
}

fn summarize(errors: &[LineError]) -> String {
    match errors {
        [] => "no errors recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    /// A remote lookup failed; the cycle is abandoned.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Not enough information to decide this cycle.
    #[error("cannot decide: {0}")]
    Undecidable(String),

    #[error(transparent)]
    Scheme(#[from] SchemeError),
}
