//! Size-based rotation of `keeper/updater.log`.
//!
//! Runs once at updater start: above 10 MiB the log shifts to
//! `updater.log.1`, older copies move up one, and `updater.log.5` falls off.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use keeper_core::InstallLayout;

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` when it is at least `max_bytes` long.
///
/// Returns `Ok(false)` when the log is small or absent.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    Ok(true)
}

/// Rotate the updater log of `layout`, creating the work area if needed.
/// Failures are logged, never fatal.
pub fn rotate_updater_log(layout: &InstallLayout) -> PathBuf {
    let path = layout.updater_log_path();
    if let Err(err) = fs::create_dir_all(layout.work_dir()) {
        tracing::warn!(path = %layout.work_dir().display(), error = %err, "cannot create work area");
        return path;
    }
    match rotate_if_needed(&path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %path.display(), "updater log rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "updater log rotation failed"),
    }
    path
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("updater.log");
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn small_or_missing_log_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("updater.log");
        assert!(!rotate_if_needed(&log, 16, 5).unwrap());
        fs::write(&log, "short").unwrap();
        assert!(!rotate_if_needed(&log, 16, 5).unwrap());
        assert!(log.exists());
    }

    #[test]
    fn copies_shift_and_oldest_is_dropped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("updater.log");
        for n in 1..=3 {
            fs::write(numbered_path(&log, n), format!("copy-{n}")).unwrap();
        }
        fs::write(&log, "x".repeat(32)).unwrap();

        assert!(rotate_if_needed(&log, 16, 3).unwrap());
        assert!(!log.exists());
        assert_eq!(fs::read_to_string(numbered_path(&log, 1)).unwrap(), "x".repeat(32));
        assert_eq!(fs::read_to_string(numbered_path(&log, 2)).unwrap(), "copy-1");
        assert_eq!(fs::read_to_string(numbered_path(&log, 3)).unwrap(), "copy-2");
        assert!(!numbered_path(&log, 4).exists());
    }

    #[test]
    fn updater_log_lives_in_work_area() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path());
        let path = rotate_updater_log(&layout);
        assert_eq!(path, dir.path().join("keeper/updater.log"));
        assert!(layout.work_dir().is_dir());
    }
}
