//! Filesystem IPC between the supervisor and the updater.
//!
//! Each artifact has exactly one writer and one reader:
//!
//! | Artifact            | Writer              | Reader / consumer                   |
//! |---------------------|---------------------|-------------------------------------|
//! | `updating.lock`     | updater             | updater (exclusivity), supervisor (stale check) |
//! | `updateresult.json` | updater, last write | supervisor, then archived to `markers/` |
//! | `steambid.temp`     | updater `init` flow | supervisor, then deleted            |
//!
//! The lock is created with `create_new`, which is atomic on local
//! filesystems. On network filesystems without exclusive-create semantics two
//! updaters can still both observe "absent"; that residual window is accepted.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, CoreError};
use crate::paths::InstallLayout;
use crate::types::{BuildId, ResultMarker};

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

/// Outcome of a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    AlreadyHeld,
}

/// Create the zero-byte lock file if absent.
pub fn acquire_lock(layout: &InstallLayout) -> Result<LockAttempt, CoreError> {
    let path = layout.lock_path();
    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(_) => Ok(LockAttempt::Acquired),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(LockAttempt::AlreadyHeld),
        Err(err) => Err(io_err(path, err)),
    }
}

pub fn lock_exists(layout: &InstallLayout) -> bool {
    layout.lock_path().exists()
}

/// Remove the lock; a missing lock is not an error.
pub fn release_lock(layout: &InstallLayout) -> Result<(), CoreError> {
    remove_if_present(&layout.lock_path())
}

// ---------------------------------------------------------------------------
// Result marker
// ---------------------------------------------------------------------------

/// Atomically write the marker (`.tmp` + rename).
pub fn write_marker(layout: &InstallLayout, marker: &ResultMarker) -> Result<(), CoreError> {
    let path = layout.marker_path();
    let json = serde_json::to_string_pretty(marker)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Read the marker if one is waiting to be consumed.
pub fn read_marker(layout: &InstallLayout) -> Result<Option<ResultMarker>, CoreError> {
    let path = layout.marker_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| CoreError::MarkerParse { path, source })
}

/// Archive file name: `marker_<update_id>_<compact timestamp>.json`.
pub fn archive_name(marker: &ResultMarker) -> String {
    let id = if marker.update_id.is_empty() {
        "unknown"
    } else {
        marker.update_id.as_str()
    };
    format!(
        "marker_{id}_{}.json",
        marker.timestamp.format("%Y%m%dT%H%M%SZ")
    )
}

/// Move the consumed marker into `keeper/markers/`. Never deletes it.
///
/// A name collision gets a numeric suffix so an older archive is never
/// overwritten.
pub fn archive_marker(layout: &InstallLayout, marker: &ResultMarker) -> Result<PathBuf, CoreError> {
    let dir = layout.markers_dir();
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let base = archive_name(marker);
    let mut target = dir.join(&base);
    let mut n = 1;
    while target.exists() {
        target = dir.join(format!("{}.{n}", base));
        n += 1;
    }

    let source = layout.marker_path();
    std::fs::rename(&source, &target).map_err(|e| io_err(&source, e))?;
    Ok(target)
}

/// Move a marker that failed to parse aside so it is not re-read forever.
pub fn quarantine_marker(layout: &InstallLayout) -> Result<PathBuf, CoreError> {
    let dir = layout.markers_dir();
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let target = dir.join(format!(
        "unreadable_{}.json",
        chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
    ));
    let source = layout.marker_path();
    std::fs::rename(&source, &target).map_err(|e| io_err(&source, e))?;
    Ok(target)
}

/// Archived markers, newest first by file name.
pub fn list_archived_markers(
    layout: &InstallLayout,
) -> Result<Vec<(PathBuf, ResultMarker)>, CoreError> {
    let dir = layout.markers_dir();
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("marker_"))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();
    entries.reverse();

    let mut markers = Vec::new();
    for path in entries {
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        match serde_json::from_str::<ResultMarker>(&contents) {
            Ok(marker) => markers.push((path, marker)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable archived marker")
            }
        }
    }
    Ok(markers)
}

// ---------------------------------------------------------------------------
// Pending build handoff
// ---------------------------------------------------------------------------

pub fn write_pending_build(layout: &InstallLayout, build: &BuildId) -> Result<(), CoreError> {
    let path = layout.pending_build_path();
    std::fs::write(&path, format!("{}\n", build.0)).map_err(|e| io_err(path, e))
}

/// Read and delete `steambid.temp`. Empty contents count as absent.
pub fn take_pending_build(layout: &InstallLayout) -> Result<Option<BuildId>, CoreError> {
    let path = layout.pending_build_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    remove_if_present(&path)?;
    let trimmed = contents.trim();
    Ok((!trimmed.is_empty()).then(|| BuildId::from(trimmed)))
}

fn remove_if_present(path: &Path) -> Result<(), CoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_lock_attempt_is_refused() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        assert_eq!(acquire_lock(&layout).unwrap(), LockAttempt::Acquired);
        assert_eq!(acquire_lock(&layout).unwrap(), LockAttempt::AlreadyHeld);
        release_lock(&layout).unwrap();
        assert!(!lock_exists(&layout));
        release_lock(&layout).unwrap();
    }

    #[test]
    fn lock_file_is_zero_bytes() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        acquire_lock(&layout).unwrap();
        assert_eq!(std::fs::metadata(layout.lock_path()).unwrap().len(), 0);
    }

    #[test]
    fn missing_marker_reads_none() {
        let tmp = TempDir::new().unwrap();
        assert!(read_marker(&InstallLayout::new(tmp.path())).unwrap().is_none());
    }

    #[test]
    fn corrupt_marker_reports_path() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        std::fs::write(layout.marker_path(), "{not json").unwrap();
        let err = read_marker(&layout).unwrap_err();
        assert!(err.to_string().contains("updateresult.json"), "got: {err}");
    }

    #[test]
    fn pending_build_is_consumed_once() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        write_pending_build(&layout, &BuildId::from("20240601")).unwrap();
        assert_eq!(
            take_pending_build(&layout).unwrap(),
            Some(BuildId::from("20240601"))
        );
        assert!(!layout.pending_build_path().exists());
        assert_eq!(take_pending_build(&layout).unwrap(), None);
    }
}
