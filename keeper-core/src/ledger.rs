//! Durable ledger of confirmed and pending build ids plus the failure counter.
//!
//! # Storage
//!
//! The ledger is an opaque string key/value store behind [`KeyValueStore`].
//! [`JsonFileStore`] persists it at `<install>/keeper/ledger.json`; every
//! `set` is flushed with the `.tmp` + rename pattern so a crash never leaves a
//! torn file behind.
//!
//! # Keys
//!
//! | Key                  | Meaning                                   |
//! |----------------------|-------------------------------------------|
//! | `LocalSteamBuildID`  | last build confirmed by a success marker  |
//! | `RemoteSteamBuildID` | build handed to the updater, not yet confirmed |
//! | `TryNumber`          | consecutive-failure counter, 1 after success |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{io_err, CoreError};
use crate::types::{BuildId, BuildIdentifiers};

pub const KEY_LOCAL_BUILD: &str = "LocalSteamBuildID";
pub const KEY_REMOTE_BUILD: &str = "RemoteSteamBuildID";
pub const KEY_TRY_NUMBER: &str = "TryNumber";

/// Minimal persistent string store.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;

    /// `None` removes the key. Implementations persist before returning.
    fn set(&mut self, key: &str, value: Option<String>) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// JSON-file backed store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Load the store at `path`; a missing file yields an empty store.
    pub fn load_at(path: &Path) -> Result<Self, CoreError> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
            let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&contents)?;
            raw.into_iter()
                .filter_map(|(key, value)| match value {
                    serde_json::Value::String(s) => Some((key, s)),
                    serde_json::Value::Number(n) => Some((key, n.to_string())),
                    _ => None,
                })
                .collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    fn save(&self) -> Result<(), CoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Option<String>) -> Result<(), CoreError> {
        match value {
            Some(value) => self.entries.insert(key.to_string(), value),
            None => self.entries.remove(key),
        };
        self.save()
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    pub entries: BTreeMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Option<String>) -> Result<(), CoreError> {
        match value {
            Some(value) => self.entries.insert(key.to_string(), value),
            None => self.entries.remove(key),
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Typed view over a [`KeyValueStore`].
pub struct Ledger {
    store: Box<dyn KeyValueStore>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("confirmed", &self.confirmed_build())
            .field("pending", &self.pending_build())
            .field("try_number", &self.try_number())
            .finish()
    }
}

impl Ledger {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Open the JSON ledger at `path`.
    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        Ok(Self::new(JsonFileStore::load_at(path)?))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::default())
    }

    pub fn confirmed_build(&self) -> Option<BuildId> {
        non_empty(self.store.get(KEY_LOCAL_BUILD)).map(BuildId)
    }

    pub fn pending_build(&self) -> Option<BuildId> {
        non_empty(self.store.get(KEY_REMOTE_BUILD)).map(BuildId)
    }

    /// Consecutive-failure counter; 1 when never failed.
    pub fn try_number(&self) -> u32 {
        self.store
            .get(KEY_TRY_NUMBER)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(1)
    }

    pub fn set_confirmed_build(&mut self, build: &BuildId) -> Result<(), CoreError> {
        self.store.set(KEY_LOCAL_BUILD, Some(build.0.clone()))
    }

    /// Record the remote build a hand-off is about to act on. A previous
    /// pending id is replaced, never accumulated.
    pub fn set_pending_build(&mut self, build: &BuildId) -> Result<(), CoreError> {
        self.store.set(KEY_REMOTE_BUILD, Some(build.0.clone()))
    }

    /// Drop the pending id without touching the confirmed build or counter.
    pub fn clear_pending(&mut self) -> Result<(), CoreError> {
        self.store.set(KEY_REMOTE_BUILD, None)
    }

    /// Success path: pending becomes confirmed, the pending slot clears and
    /// the counter resets to 1. Returns the newly confirmed id, if any.
    pub fn promote_pending(&mut self) -> Result<Option<BuildId>, CoreError> {
        let pending = self.pending_build();
        if let Some(build) = &pending {
            self.set_confirmed_build(build)?;
        }
        self.store.set(KEY_REMOTE_BUILD, None)?;
        self.store.set(KEY_TRY_NUMBER, Some("1".to_string()))?;
        Ok(pending)
    }

    /// Failure path: confirmed id untouched, pending discarded, counter bumped.
    /// Returns the new counter value.
    pub fn record_failure(&mut self) -> Result<u32, CoreError> {
        let next = self.try_number().saturating_add(1);
        self.store.set(KEY_REMOTE_BUILD, None)?;
        self.store.set(KEY_TRY_NUMBER, Some(next.to_string()))?;
        Ok(next)
    }

    pub fn identifiers(&self, runtime_version: &str, protocol: Option<&str>) -> BuildIdentifiers {
        BuildIdentifiers {
            local_server_build: self.confirmed_build(),
            local_runtime_version: runtime_version.to_string(),
            local_protocol: protocol.map(str::to_string),
            pending_remote_server_build: self.pending_build(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_empty_store() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::load_at(&tmp.path().join("ledger.json")).unwrap();
        assert!(store.entries().is_empty());
    }

    #[test]
    fn numeric_try_number_is_read_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");
        std::fs::write(&path, r#"{"TryNumber": 3, "LocalSteamBuildID": "20240501"}"#).unwrap();
        let ledger = Ledger::open_at(&path).unwrap();
        assert_eq!(ledger.try_number(), 3);
        assert_eq!(ledger.confirmed_build(), Some(BuildId::from("20240501")));
    }

    #[test]
    fn set_persists_and_cleans_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("ledger.json");
        let mut ledger = Ledger::open_at(&path).unwrap();
        ledger.set_pending_build(&BuildId::from("20240601")).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let reopened = Ledger::open_at(&path).unwrap();
        assert_eq!(reopened.pending_build(), Some(BuildId::from("20240601")));
    }

    #[test]
    fn empty_values_read_as_absent() {
        let mut store = MemoryStore::default();
        store.set(KEY_LOCAL_BUILD, Some("  ".to_string())).unwrap();
        let ledger = Ledger::new(store);
        assert_eq!(ledger.confirmed_build(), None);
        assert_eq!(ledger.try_number(), 1);
    }
}
