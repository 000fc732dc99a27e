//! What is installed right now: runtime library version and server build.

use std::path::Path;
use std::sync::OnceLock;

use keeper_core::{BuildId, InstallLayout};
use regex::Regex;

use crate::version::normalize_version;

/// Reported when the runtime library is missing or carries no version.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Version-resource keys, most specific first.
const VERSION_KEYS: [&str; 2] = ["ProductVersion", "FileVersion"];

fn manifest_buildid() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""buildid"\s+"(\d+)""#).expect("valid regex"))
}

fn ascii_triple() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+\.\d+").expect("valid regex"))
}

/// Installed runtime version as bare `MAJOR.MINOR.PATCH`, or `"unknown"`.
pub fn detect_local_runtime_version(layout: &InstallLayout) -> String {
    let path = layout.runtime_library();
    match std::fs::read(&path) {
        Ok(bytes) => runtime_version_from_bytes(&bytes).unwrap_or_else(|| {
            tracing::warn!(path = %path.display(), "runtime library carries no version");
            UNKNOWN_VERSION.to_string()
        }),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "runtime library not readable");
            UNKNOWN_VERSION.to_string()
        }
    }
}

/// Read the version out of a managed assembly.
///
/// The version resource stores `ProductVersion` / `FileVersion` as UTF-16LE
/// key/value pairs; failing those, the first ASCII `N.N.N` is used.
pub fn runtime_version_from_bytes(bytes: &[u8]) -> Option<String> {
    for key in VERSION_KEYS {
        if let Some(value) = utf16_resource_value(bytes, key) {
            if let Some(version) = normalize_version(&value) {
                return Some(version);
            }
        }
    }
    let ascii = String::from_utf8_lossy(bytes);
    ascii_triple().find(&ascii).map(|m| m.as_str().to_string())
}

fn utf16_resource_value(bytes: &[u8], key: &str) -> Option<String> {
    let needle: Vec<u8> = key.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let start = bytes
        .windows(needle.len())
        .position(|window| window == needle.as_slice())?;

    // Key terminator and alignment padding are NUL units; the value follows.
    let units = bytes[start + needle.len()..]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    let value: Vec<u16> = units
        .skip_while(|&unit| unit == 0)
        .take_while(|&unit| unit != 0)
        .take(64)
        .collect();
    let decoded = String::from_utf16(&value).ok()?;
    (!decoded.trim().is_empty()).then_some(decoded)
}

/// Installed server build from `steamapps/appmanifest_<app_id>.acf`.
pub fn installed_build(layout: &InstallLayout, app_id: u32) -> Option<BuildId> {
    installed_build_at(&layout.app_manifest(app_id))
}

pub fn installed_build_at(manifest: &Path) -> Option<BuildId> {
    let contents = std::fs::read_to_string(manifest).ok()?;
    manifest_buildid()
        .captures(&contents)
        .map(|caps| BuildId::from(&caps[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf16(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn fake_assembly(key: &str, value: &str) -> Vec<u8> {
        let mut bytes = b"MZ\x90\x00garbage 9.9.9 before".to_vec();
        bytes.extend(utf16(key));
        bytes.extend([0, 0, 0, 0]);
        bytes.extend(utf16(value));
        bytes.extend([0, 0]);
        bytes
    }

    #[test]
    fn product_version_wins_over_ascii_noise() {
        let bytes = fake_assembly("ProductVersion", "2.0.6198+a1b2c3");
        assert_eq!(runtime_version_from_bytes(&bytes).as_deref(), Some("2.0.6198"));
    }

    #[test]
    fn file_version_is_second_choice() {
        let bytes = fake_assembly("FileVersion", "2.0.6197.0");
        assert_eq!(runtime_version_from_bytes(&bytes).as_deref(), Some("2.0.6197"));
    }

    #[test]
    fn ascii_triple_is_last_resort() {
        assert_eq!(
            runtime_version_from_bytes(b"no resources, only 1.2.3 inline").as_deref(),
            Some("1.2.3")
        );
        assert_eq!(runtime_version_from_bytes(b"nothing here"), None);
    }

    #[test]
    fn missing_library_is_unknown() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(
            detect_local_runtime_version(&InstallLayout::new(tmp.path())),
            UNKNOWN_VERSION
        );
    }

    #[test]
    fn installed_build_reads_app_manifest() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        let manifest = layout.app_manifest(258550);
        std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        std::fs::write(
            &manifest,
            "\"AppState\"\n{\n\t\"appid\"\t\t\"258550\"\n\t\"buildid\"\t\t\"14950129\"\n}\n",
        )
        .unwrap();
        assert_eq!(installed_build(&layout, 258550), Some(BuildId::from("14950129")));
        assert_eq!(installed_build(&layout, 1), None);
    }
}
