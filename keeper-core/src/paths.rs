//! Installation layout: where every handoff artifact and game directory lives.

use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "updating.lock";
pub const MARKER_FILE: &str = "updateresult.json";
pub const PENDING_BUILD_FILE: &str = "steambid.temp";

pub const WORK_DIR: &str = "keeper";
pub const BACKUP_DIR: &str = "backup";
pub const MARKERS_DIR: &str = "markers";
pub const RUN_DIR: &str = "run";
pub const LEDGER_FILE: &str = "ledger.json";
pub const CONFIG_FILE: &str = "config.yaml";
pub const UPDATER_LOG: &str = "updater.log";
pub const SUPERVISOR_SOCKET: &str = "supervisor.sock";

pub const MANAGED_DIR: &str = "RustDedicated_Data/Managed";
pub const MOD_DIR: &str = "oxide";
pub const PLUGINS_DIR: &str = "oxide/plugins";
pub const RUNTIME_LIBRARY: &str = "RustDedicated_Data/Managed/Oxide.Rust.dll";
pub const STEAMAPPS_DIR: &str = "steamapps";

/// Paths derived from one installation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    pub fn pending_build_path(&self) -> PathBuf {
        self.root.join(PENDING_BUILD_FILE)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join(WORK_DIR)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.work_dir().join(BACKUP_DIR)
    }

    pub fn markers_dir(&self) -> PathBuf {
        self.work_dir().join(MARKERS_DIR)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.work_dir().join(RUN_DIR)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.run_dir().join(SUPERVISOR_SOCKET)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.work_dir().join(LEDGER_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.work_dir().join(CONFIG_FILE)
    }

    pub fn updater_log_path(&self) -> PathBuf {
        self.work_dir().join(UPDATER_LOG)
    }

    pub fn managed_dir(&self) -> PathBuf {
        self.root.join(MANAGED_DIR)
    }

    pub fn mod_dir(&self) -> PathBuf {
        self.root.join(MOD_DIR)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join(PLUGINS_DIR)
    }

    pub fn runtime_library(&self) -> PathBuf {
        self.root.join(RUNTIME_LIBRARY)
    }

    pub fn app_manifest(&self, app_id: u32) -> PathBuf {
        self.root
            .join(STEAMAPPS_DIR)
            .join(format!("appmanifest_{app_id}.acf"))
    }

    /// Relative paths that snapshots skip and restores never delete.
    ///
    /// `updater_binary` is included only when it lives inside the installation.
    pub fn protected_paths(&self, updater_binary: Option<&Path>) -> Vec<PathBuf> {
        let mut protected = vec![
            PathBuf::from(WORK_DIR),
            PathBuf::from(LOCK_FILE),
            PathBuf::from(MARKER_FILE),
            PathBuf::from(PENDING_BUILD_FILE),
        ];
        if let Some(relative) = updater_binary.and_then(|binary| self.relative_to_root(binary)) {
            protected.push(relative);
        }
        protected
    }

    /// `path` relative to the root, comparing resolved paths so a symlinked
    /// install dir still matches a resolved `current_exe`.
    fn relative_to_root(&self, path: &Path) -> Option<PathBuf> {
        if let Ok(relative) = path.strip_prefix(&self.root) {
            return Some(relative.to_path_buf());
        }
        let root = self.root.canonicalize().ok()?;
        let path = path.canonicalize().ok()?;
        path.strip_prefix(&root).ok().map(Path::to_path_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn updater_binary_protected_through_symlinked_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir_all(real.join("bin")).unwrap();
        std::fs::write(real.join("bin/keeper-updater"), "binary").unwrap();
        let linked = tmp.path().join("linked");
        std::os::unix::fs::symlink(&real, &linked).unwrap();

        let layout = InstallLayout::new(&linked);
        let resolved = real.join("bin/keeper-updater").canonicalize().unwrap();
        let protected = layout.protected_paths(Some(&resolved));
        assert!(protected.contains(&PathBuf::from("bin/keeper-updater")));

        let outside = tmp.path().join("elsewhere");
        std::fs::write(&outside, "binary").unwrap();
        assert_eq!(layout.protected_paths(Some(&outside)).len(), 4);
    }

    #[test]
    fn handoff_files_live_in_install_root() {
        let layout = InstallLayout::new("/srv/rust");
        assert_eq!(layout.lock_path(), PathBuf::from("/srv/rust/updating.lock"));
        assert_eq!(layout.marker_path(), PathBuf::from("/srv/rust/updateresult.json"));
        assert_eq!(layout.pending_build_path(), PathBuf::from("/srv/rust/steambid.temp"));
        assert!(layout.backup_dir().starts_with(layout.work_dir()));
    }

    #[test]
    fn app_manifest_path_uses_app_id() {
        let layout = InstallLayout::new("/srv/rust");
        assert!(layout
            .app_manifest(258550)
            .ends_with("steamapps/appmanifest_258550.acf"));
    }

    #[test]
    fn protected_paths_include_binary_only_inside_root() {
        let layout = InstallLayout::new("/srv/rust");
        let inside = layout.protected_paths(Some(Path::new("/srv/rust/keeper-updater")));
        assert!(inside.contains(&PathBuf::from("keeper-updater")));

        let outside = layout.protected_paths(Some(Path::new("/usr/local/bin/keeper-updater")));
        assert_eq!(outside.len(), 4);
    }
}
