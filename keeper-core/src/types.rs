//! Domain types shared by the supervisor and the updater.
//!
//! Everything that crosses the process boundary (invocation flags, result
//! marker) serializes with serde; wire spellings follow the marker schema.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Numeric build identifier published by the distribution platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(pub String);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BuildId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BuildId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Eight-digit identifier of one scheduled rollout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateId(pub String);

impl UpdateId {
    /// Derive an id from a timestamp: the low eight decimal digits of its
    /// unix-seconds value, zero padded.
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        let secs = at.timestamp().rem_euclid(100_000_000);
        Self(format!("{secs:08}"))
    }

    /// Accepts exactly eight ASCII digits.
    pub fn parse(raw: &str) -> Option<Self> {
        (raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit())).then(|| Self(raw.to_owned()))
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// What a rollout mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateTarget {
    Server,
    #[serde(rename = "oxide")]
    Runtime,
    Both,
}

impl UpdateTarget {
    pub fn includes_server(self) -> bool {
        matches!(self, UpdateTarget::Server | UpdateTarget::Both)
    }

    pub fn includes_runtime(self) -> bool {
        matches!(self, UpdateTarget::Runtime | UpdateTarget::Both)
    }
}

impl fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateTarget::Server => write!(f, "server"),
            UpdateTarget::Runtime => write!(f, "oxide"),
            UpdateTarget::Both => write!(f, "both"),
        }
    }
}

impl FromStr for UpdateTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "oxide" | "runtime" => Ok(Self::Runtime),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown update target '{other}'; expected: server, oxide, both"
            )),
        }
    }
}

/// Outcome of one detection cycle. Both flags are acted on together or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateDecision {
    pub update_server: bool,
    pub update_runtime: bool,
    /// Protocol compatibility could not be resolved this cycle.
    pub error: bool,
}

impl UpdateDecision {
    pub const NOTHING: Self = Self {
        update_server: false,
        update_runtime: false,
        error: false,
    };

    pub fn server() -> Self {
        Self {
            update_server: true,
            ..Self::NOTHING
        }
    }

    pub fn runtime() -> Self {
        Self {
            update_runtime: true,
            ..Self::NOTHING
        }
    }

    pub fn both() -> Self {
        Self {
            update_server: true,
            update_runtime: true,
            error: false,
        }
    }

    pub fn with_error(mut self) -> Self {
        self.error = true;
        self
    }

    /// `None` when nothing needs updating.
    pub fn target(&self) -> Option<UpdateTarget> {
        match (self.update_server, self.update_runtime) {
            (true, true) => Some(UpdateTarget::Both),
            (true, false) => Some(UpdateTarget::Server),
            (false, true) => Some(UpdateTarget::Runtime),
            (false, false) => None,
        }
    }

    pub fn wants_update(&self) -> bool {
        self.target().is_some()
    }
}

/// Locally known identifiers, as a read-only view over the ledger and the
/// installation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BuildIdentifiers {
    pub local_server_build: Option<BuildId>,
    pub local_runtime_version: String,
    pub local_protocol: Option<String>,
    pub pending_remote_server_build: Option<BuildId>,
}

// ---------------------------------------------------------------------------
// Result marker
// ---------------------------------------------------------------------------

/// Terminal result of one rollout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerResult {
    Success,
    Failed,
}

/// Whether the snapshot was restored after a failed apply.
///
/// Serialized as `"yes"`, `"no"`, or `false` when no restore was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerRestored {
    Yes,
    No,
    #[default]
    NotAttempted,
}

impl Serialize for ServerRestored {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServerRestored::Yes => serializer.serialize_str("yes"),
            ServerRestored::No => serializer.serialize_str("no"),
            ServerRestored::NotAttempted => serializer.serialize_bool(false),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServerRestoredRepr {
    Text(String),
    Flag(bool),
}

impl<'de> Deserialize<'de> for ServerRestored {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ServerRestoredRepr::deserialize(deserializer)? {
            ServerRestoredRepr::Text(text) => match text.as_str() {
                "yes" => Ok(ServerRestored::Yes),
                "no" => Ok(ServerRestored::No),
                other => Err(serde::de::Error::custom(format!(
                    "invalid server_restored value '{other}'"
                ))),
            },
            ServerRestoredRepr::Flag(false) => Ok(ServerRestored::NotAttempted),
            ServerRestoredRepr::Flag(true) => Ok(ServerRestored::Yes),
        }
    }
}

/// `updateresult.json`: written once by the updater, read once by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMarker {
    pub result: MarkerResult,
    pub fail_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_plugins: Option<Vec<String>>,
    #[serde(default)]
    pub backup_cycle: bool,
    #[serde(default)]
    pub server_restored: ServerRestored,
    pub timestamp: DateTime<Utc>,
    pub update_id: String,
}

impl ResultMarker {
    pub fn success(update_id: impl Into<String>) -> Self {
        Self {
            result: MarkerResult::Success,
            fail_reason: None,
            updated_plugins: None,
            backup_cycle: false,
            server_restored: ServerRestored::NotAttempted,
            timestamp: Utc::now(),
            update_id: update_id.into(),
        }
    }

    pub fn failed(update_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            result: MarkerResult::Failed,
            fail_reason: Some(reason.into()),
            ..Self::success(update_id)
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == MarkerResult::Success
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
