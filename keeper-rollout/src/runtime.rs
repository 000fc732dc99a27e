//! Runtime (Oxide) install from the latest published release.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keeper_core::paths::{MANAGED_DIR, MOD_DIR};
use keeper_core::InstallLayout;
use keeper_oracle::release::select_asset;
use keeper_oracle::ReleaseApi;

use crate::error::{io_err, RolloutError};

/// Capability over the runtime's release channel.
pub trait RuntimeInstaller: Send + Sync {
    /// Install the latest release; returns its tag.
    fn install(&self, layout: &InstallLayout) -> Result<String, RolloutError>;
}

pub struct ReleaseRuntimeInstaller {
    releases: Arc<dyn ReleaseApi>,
    repo: String,
    os: &'static str,
    arch: &'static str,
}

impl ReleaseRuntimeInstaller {
    pub fn new(releases: Arc<dyn ReleaseApi>, repo: impl Into<String>) -> Self {
        Self {
            releases,
            repo: repo.into(),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }
}

impl RuntimeInstaller for ReleaseRuntimeInstaller {
    fn install(&self, layout: &InstallLayout) -> Result<String, RolloutError> {
        let release = self.releases.latest_release(&self.repo)?;
        let asset = select_asset(&release, self.os, self.arch).ok_or_else(|| {
            RolloutError::RuntimePackage(format!("release {} has no archive asset", release.tag_name))
        })?;
        tracing::info!(tag = %release.tag_name, asset = %asset.name, "downloading runtime");

        let archive = tempfile::NamedTempFile::new().map_err(|e| io_err(std::env::temp_dir(), e))?;
        let bytes = self
            .releases
            .download(&asset.browser_download_url, archive.path())?;
        if bytes == 0 {
            return Err(RolloutError::RuntimePackage(format!(
                "downloaded asset {} is empty",
                asset.name
            )));
        }

        let extracted = tempfile::TempDir::new().map_err(|e| io_err(std::env::temp_dir(), e))?;
        extract_zip(archive.path(), extracted.path())?;
        install_extracted(extracted.path(), layout)?;
        Ok(release.tag_name)
    }
}

/// Unpack `archive` into `dest`, skipping entries that would escape it.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, RolloutError> {
    let file = fs::File::open(archive).map_err(|e| io_err(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| RolloutError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut count = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|source| RolloutError::Archive {
            path: archive.to_path_buf(),
            source,
        })?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(name = entry.name(), "skipping archive entry outside extraction root");
            continue;
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut out = fs::File::create(&target).map_err(|e| io_err(&target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| io_err(&target, e))?;
        count += 1;
    }
    Ok(count)
}

/// Directory inside `extracted` that holds the runtime tree.
///
/// Either `extracted` itself (flat) or its only subdirectory (nested).
pub fn locate_package_root(extracted: &Path) -> Result<PathBuf, RolloutError> {
    if extracted.join(MANAGED_DIR).is_dir() {
        return Ok(extracted.to_path_buf());
    }
    let subdirs: Vec<PathBuf> = fs::read_dir(extracted)
        .map_err(|e| io_err(extracted, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    match subdirs.as_slice() {
        [only] if only.join(MANAGED_DIR).is_dir() => Ok(only.clone()),
        _ => Err(RolloutError::RuntimePackage(format!(
            "no {MANAGED_DIR} directory in release archive"
        ))),
    }
}

/// Copy the managed assemblies and, when shipped, the mod directory over the
/// installation.
pub fn install_extracted(extracted: &Path, layout: &InstallLayout) -> Result<usize, RolloutError> {
    let root = locate_package_root(extracted)?;
    let mut copied = copy_tree(&root.join(MANAGED_DIR), &layout.managed_dir())?;
    let mod_dir = root.join(MOD_DIR);
    if mod_dir.is_dir() {
        copied += copy_tree(&mod_dir, &layout.mod_dir())?;
    }
    tracing::info!(files = copied, "runtime files installed");
    Ok(copied)
}

/// Recursive copy that overwrites existing files.
fn copy_tree(source: &Path, dest: &Path) -> Result<usize, RolloutError> {
    fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;
    let mut copied = 0;
    let mut stack = vec![(source.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        let entries = match fs::read_dir(&from) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&from, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&from, e))?;
            let target = to.join(entry.file_name());
            if entry.path().is_dir() {
                fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
                stack.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).map_err(|e| io_err(&target, e))?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn flat_layout_installs_managed_and_mod_dirs() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("Oxide.Rust-linux.zip");
        write_zip(
            &archive,
            &[
                ("RustDedicated_Data/Managed/Oxide.Rust.dll", "2.0.6199"),
                ("oxide/config/core.json", "{}"),
            ],
        );
        let extracted = TempDir::new().unwrap();
        assert_eq!(extract_zip(&archive, extracted.path()).unwrap(), 2);

        let install = TempDir::new().unwrap();
        let layout = InstallLayout::new(install.path());
        install_extracted(extracted.path(), &layout).unwrap();
        assert!(layout.runtime_library().exists());
        assert!(layout.mod_dir().join("config/core.json").exists());
    }

    #[test]
    fn nested_single_folder_is_located() {
        let extracted = TempDir::new().unwrap();
        let managed = extracted.path().join("Oxide.Rust/RustDedicated_Data/Managed");
        fs::create_dir_all(&managed).unwrap();
        assert_eq!(
            locate_package_root(extracted.path()).unwrap(),
            extracted.path().join("Oxide.Rust")
        );
    }

    #[test]
    fn archive_without_managed_dir_is_rejected() {
        let extracted = TempDir::new().unwrap();
        fs::create_dir_all(extracted.path().join("a")).unwrap();
        fs::create_dir_all(extracted.path().join("b/RustDedicated_Data/Managed")).unwrap();
        let err = locate_package_root(extracted.path()).unwrap_err();
        assert!(matches!(err, RolloutError::RuntimePackage(_)));
    }

    #[test]
    fn escaping_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(&archive, &[("../outside.txt", "x"), ("inside.txt", "y")]);
        let extracted = tmp.path().join("out");
        fs::create_dir_all(&extracted).unwrap();
        assert_eq!(extract_zip(&archive, &extracted).unwrap(), 1);
        assert!(!tmp.path().join("outside.txt").exists());
    }
}
