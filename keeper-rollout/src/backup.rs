//! BackupStore: full-tree snapshot and restore of an installation.
//!
//! ## Snapshot
//!
//! Every file and directory under the installation root is copied into the
//! snapshot area, except the protected paths (the keeper work area, which
//! holds the snapshot itself and the updater log, the handoff files, and the
//! updater binary). Modification times are carried over.
//!
//! ## Restore
//!
//! 1. Delete every unprotected destination file that is not in the snapshot,
//!    then any directory the snapshot does not have.
//! 2. Recreate snapshot directories.
//! 3. For each snapshot file, compare SHA-256 with the destination; identical
//!    files are left alone, others are written to `<file>.keeper.tmp` and
//!    renamed into place.
//! 4. Restore the snapshot's modification time on every file.
//!
//! Restoring into a tree that already matches the snapshot changes nothing.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use sha2::{Digest, Sha256};

use crate::error::{io_err, RolloutError};

/// Files and directories found by [`walk`], relative to its root.
#[derive(Debug, Default)]
struct Tree {
    dirs: BTreeSet<PathBuf>,
    files: BTreeSet<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotReport {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreReport {
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    snapshot_dir: PathBuf,
    /// Relative to `root`.
    protected: Vec<PathBuf>,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>, protected: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshot_dir: snapshot_dir.into(),
            protected,
        }
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot_dir.is_dir()
    }

    fn is_protected(&self, relative: &Path) -> bool {
        self.protected.iter().any(|p| relative.starts_with(p))
            || self.root.join(relative).starts_with(&self.snapshot_dir)
    }

    /// Replace any previous snapshot with a fresh copy of the tree.
    pub fn snapshot(&self) -> Result<SnapshotReport, RolloutError> {
        self.discard()?;
        fs::create_dir_all(&self.snapshot_dir).map_err(|e| io_err(&self.snapshot_dir, e))?;

        let tree = walk(&self.root, &|rel| self.is_protected(rel))?;
        for dir in &tree.dirs {
            let target = self.snapshot_dir.join(dir);
            fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
        }

        let mut report = SnapshotReport::default();
        for file in &tree.files {
            let source = self.root.join(file);
            let target = self.snapshot_dir.join(file);
            report.bytes += fs::copy(&source, &target).map_err(|e| io_err(&source, e))?;
            copy_mtime(&source, &target)?;
            report.files += 1;
        }

        tracing::info!(files = report.files, bytes = report.bytes, "snapshot created");
        Ok(report)
    }

    /// Make the tree equal to the snapshot.
    pub fn restore(&self) -> Result<RestoreReport, RolloutError> {
        if !self.has_snapshot() {
            return Err(io_err(
                &self.snapshot_dir,
                std::io::Error::new(ErrorKind::NotFound, "no snapshot to restore"),
            ));
        }
        let snapshot = walk(&self.snapshot_dir, &|_| false)?;
        let current = walk(&self.root, &|rel| self.is_protected(rel))?;
        let mut report = RestoreReport::default();

        for file in current.files.difference(&snapshot.files) {
            let path = self.root.join(file);
            fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            report.removed += 1;
        }
        // Deepest first so children go before parents.
        for dir in current.dirs.difference(&snapshot.dirs).collect::<Vec<_>>().into_iter().rev() {
            let path = self.root.join(dir);
            match fs::remove_dir(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(&path, err)),
            }
        }

        for dir in &snapshot.dirs {
            let path = self.root.join(dir);
            if path.is_file() {
                fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            }
            fs::create_dir_all(&path).map_err(|e| io_err(&path, e))?;
        }

        for file in &snapshot.files {
            let source = self.snapshot_dir.join(file);
            let target = self.root.join(file);
            if target.is_dir() {
                fs::remove_dir_all(&target).map_err(|e| io_err(&target, e))?;
            }
            if target.is_file() && hash_file(&source)? == hash_file(&target)? {
                report.unchanged += 1;
            } else {
                replace_file(&source, &target)?;
                report.written += 1;
            }
            copy_mtime(&source, &target)?;
        }

        tracing::info!(
            written = report.written,
            unchanged = report.unchanged,
            removed = report.removed,
            "snapshot restored"
        );
        Ok(report)
    }

    /// Delete the snapshot area; absent is fine.
    pub fn discard(&self) -> Result<(), RolloutError> {
        match fs::remove_dir_all(&self.snapshot_dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&self.snapshot_dir, err)),
        }
    }
}

/// Breadth-first walk of `root`, skipping `skip(relative)` subtrees.
///
/// Symlinks are followed for files and not descended into for directories.
fn walk(root: &Path, skip: &dyn Fn(&Path) -> bool) -> Result<Tree, RolloutError> {
    let mut tree = Tree::default();
    let mut queue = vec![PathBuf::new()];
    let mut cursor = 0;
    while cursor < queue.len() {
        let relative = queue[cursor].clone();
        cursor += 1;
        let current = root.join(&relative);
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let rel = relative.join(entry.file_name());
            if skip(&rel) {
                continue;
            }
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                tree.dirs.insert(rel.clone());
                queue.push(rel);
            } else if ty.is_file() || (ty.is_symlink() && entry.path().is_file()) {
                tree.files.insert(rel);
            } else {
                tracing::debug!(path = %entry.path().display(), "skipping special file");
            }
        }
    }
    Ok(tree)
}

/// SHA-256 of a file's bytes, hex encoded.
pub fn hash_file(path: &Path) -> Result<String, RolloutError> {
    let mut file = fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| io_err(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Copy `source` over `target` through a sibling temp file and rename.
fn replace_file(source: &Path, target: &Path) -> Result<(), RolloutError> {
    let tmp = PathBuf::from(format!("{}.keeper.tmp", target.display()));
    fs::copy(source, &tmp).map_err(|e| io_err(&tmp, e))?;
    if let Err(err) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(target, err));
    }
    Ok(())
}

fn copy_mtime(source: &Path, target: &Path) -> Result<(), RolloutError> {
    let meta = fs::metadata(source).map_err(|e| io_err(source, e))?;
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(target, mtime).map_err(|e| io_err(target, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(root: &Path) -> BackupStore {
        BackupStore::new(
            root,
            root.join("keeper").join("backup"),
            vec![PathBuf::from("keeper"), PathBuf::from("updating.lock")],
        )
    }

    #[test]
    fn snapshot_skips_protected_paths() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("keeper")).unwrap();
        fs::write(root.join("keeper/updater.log"), "log").unwrap();
        fs::write(root.join("updating.lock"), "").unwrap();
        fs::write(root.join("server.cfg"), "hostname x").unwrap();

        let report = store(root).snapshot().unwrap();
        assert_eq!(report.files, 1);
        assert!(root.join("keeper/backup/server.cfg").exists());
        assert!(!root.join("keeper/backup/updating.lock").exists());
        assert!(!root.join("keeper/backup/keeper").exists());
    }

    #[test]
    fn restore_without_snapshot_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(store(tmp.path()).restore().is_err());
    }

    #[test]
    fn discard_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(tmp.path());
        store.discard().unwrap();
        store.snapshot().unwrap();
        assert!(store.has_snapshot());
        store.discard().unwrap();
        store.discard().unwrap();
        assert!(!store.has_snapshot());
    }

    #[test]
    fn hash_matches_known_digest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
