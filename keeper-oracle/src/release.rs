//! Runtime release channel (GitHub releases API).

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, OracleError};

const API_BASE: &str = "https://api.github.com";

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    /// Branch or commit the tag was cut from.
    #[serde(default)]
    pub target_commitish: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    commit: CommitBody,
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    message: String,
}

/// Capability interface over the release channel.
///
/// Lookups that find nothing (HTTP 404) return `Ok(None)`; transport and
/// other status failures are errors.
pub trait ReleaseApi: Send + Sync {
    fn latest_release(&self, repo: &str) -> Result<Release, OracleError>;

    fn release_by_tag(&self, repo: &str, tag: &str) -> Result<Option<Release>, OracleError>;

    /// Commit message for a tag, branch or sha.
    fn commit_message(&self, repo: &str, reference: &str) -> Result<Option<String>, OracleError>;

    /// Stream `url` into `dest`; returns the byte count.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, OracleError>;
}

/// [`ReleaseApi`] over `api.github.com` with a per-request timeout.
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    agent: ureq::Agent,
    api_base: String,
    user_agent: String,
}

impl GitHubReleases {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base(API_BASE, timeout)
    }

    pub fn with_base(api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: http_agent(timeout),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            user_agent: format!("keeper/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>, OracleError> {
        let response = match self
            .agent
            .get(url)
            .set("User-Agent", &self.user_agent)
            .set("Accept", "application/vnd.github+json")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(err) => return Err(http_error(url, err)),
        };
        response.into_json().map(Some).map_err(|e| OracleError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

impl ReleaseApi for GitHubReleases {
    fn latest_release(&self, repo: &str) -> Result<Release, OracleError> {
        let url = format!("{}/repos/{repo}/releases/latest", self.api_base);
        self.get_json(&url)?
            .ok_or(OracleError::HttpStatus { url, status: 404 })
    }

    fn release_by_tag(&self, repo: &str, tag: &str) -> Result<Option<Release>, OracleError> {
        let url = format!("{}/repos/{repo}/releases/tags/{tag}", self.api_base);
        self.get_json(&url)
    }

    fn commit_message(&self, repo: &str, reference: &str) -> Result<Option<String>, OracleError> {
        let url = format!("{}/repos/{repo}/commits/{reference}", self.api_base);
        Ok(self
            .get_json::<CommitResponse>(&url)?
            .map(|c| c.commit.message))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64, OracleError> {
        download_to(&self.agent, &self.user_agent, url, dest)
    }
}

/// Agent whose every request is bounded by `timeout`.
pub fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// GET `url` and stream the body into `dest`.
pub fn download_to(
    agent: &ureq::Agent,
    user_agent: &str,
    url: &str,
    dest: &Path,
) -> Result<u64, OracleError> {
    let response = agent
        .get(url)
        .set("User-Agent", user_agent)
        .call()
        .map_err(|e| http_error(url, e))?;
    let mut file = std::fs::File::create(dest).map_err(|e| io_err(dest, e))?;
    let written = std::io::copy(&mut response.into_reader(), &mut file).map_err(|e| {
        OracleError::Http {
            url: url.to_string(),
            message: e.to_string(),
        }
    })?;
    file.flush().map_err(|e| io_err(dest, e))?;
    Ok(written)
}

pub(crate) fn http_error(url: &str, err: ureq::Error) -> OracleError {
    match err {
        ureq::Error::Status(status, _) => OracleError::HttpStatus {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => OracleError::Http {
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

/// Pick the asset for this platform.
///
/// Exact names like `Oxide.Rust-linux.zip` / `Oxide.Rust-linux-x86_64.zip`
/// win; otherwise any `.zip` that is not for another OS, then any `.zip`.
pub fn select_asset<'a>(release: &'a Release, os: &str, arch: &str) -> Option<&'a ReleaseAsset> {
    let os = os_token(os);
    let zips: Vec<&ReleaseAsset> = release
        .assets
        .iter()
        .filter(|a| a.name.to_ascii_lowercase().ends_with(".zip"))
        .collect();

    zips.iter()
        .find(|a| {
            let s = asset_stem(a);
            s.ends_with(&format!("-{os}-{arch}")) || s.ends_with(&format!("-{os}_{arch}"))
        })
        .or_else(|| zips.iter().find(|a| asset_stem(a).ends_with(&format!("-{os}"))))
        .or_else(|| {
            zips.iter().find(|a| {
                let s = asset_stem(a);
                !["linux", "windows", "macos", "osx"]
                    .iter()
                    .any(|other| *other != os && s.contains(other))
            })
        })
        .or_else(|| zips.first())
        .copied()
}

fn asset_stem(asset: &ReleaseAsset) -> String {
    asset
        .name
        .to_ascii_lowercase()
        .trim_end_matches(".zip")
        .to_string()
}

fn os_token(os: &str) -> &str {
    match os {
        "macos" => "osx",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            browser_download_url: format!("https://example.invalid/{name}"),
            size: 1,
        }
    }

    fn release(names: &[&str]) -> Release {
        Release {
            tag_name: "2.0.6198".to_string(),
            target_commitish: "develop".to_string(),
            assets: names.iter().map(|n| asset(n)).collect(),
        }
    }

    #[test]
    fn exact_os_match_preferred() {
        let r = release(&["Oxide.Rust.zip", "Oxide.Rust-linux.zip", "Oxide.Rust-windows.zip"]);
        assert_eq!(select_asset(&r, "linux", "x86_64").unwrap().name, "Oxide.Rust-linux.zip");
        assert_eq!(
            select_asset(&r, "windows", "x86_64").unwrap().name,
            "Oxide.Rust-windows.zip"
        );
    }

    #[test]
    fn os_and_arch_beats_os_only() {
        let r = release(&["Oxide.Rust-linux.zip", "Oxide.Rust-linux-x86_64.zip"]);
        assert_eq!(
            select_asset(&r, "linux", "x86_64").unwrap().name,
            "Oxide.Rust-linux-x86_64.zip"
        );
    }

    #[test]
    fn falls_back_to_generic_archive() {
        let r = release(&["Oxide.Rust-windows.zip", "Oxide.Rust.zip", "notes.txt"]);
        assert_eq!(select_asset(&r, "linux", "x86_64").unwrap().name, "Oxide.Rust.zip");
        assert!(select_asset(&release(&["notes.txt"]), "linux", "x86_64").is_none());
    }

    #[test]
    fn release_json_tolerates_missing_fields() {
        let r: Release = serde_json::from_str(r#"{"tag_name":"2.0.1"}"#).unwrap();
        assert!(r.assets.is_empty());
        assert!(r.target_commitish.is_empty());
    }
}
