//! Best-effort plugin refresh against the uMod directory.
//!
//! For every `*.cs` in the plugin directory:
//!
//! 1. read `[Info("Title", "Author", "Version")]`; unparseable files are skipped
//! 2. search the directory by title
//! 3. keep results whose file name or class name equals the local file stem;
//!    with several left, keep those not older than the local version and
//!    require exactly one
//! 4. download a strictly newer version next to the target, check it is not
//!    empty, then rename it over the target
//!
//! Lookups share one [`RateLimiter`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use keeper_oracle::release::{download_to, http_agent};
use keeper_oracle::{compare_versions, is_newer};
use regex::Regex;
use serde::Deserialize;

use crate::error::{io_err, RolloutError};
use crate::rate_limit::RateLimiter;
use crate::retry::Sleeper;

pub const UMOD_SEARCH_URL: &str = "https://umod.org/plugins/search.json";

/// Declared plugin metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub title: String,
    pub author: String,
    pub version: String,
}

fn info_attribute() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[Info\s*\(\s*"([^"]+)"\s*,\s*"([^"]*)"\s*,\s*"?([0-9][0-9A-Za-z.\-]*)"?"#)
            .expect("valid regex")
    })
}

pub fn parse_plugin_info(source: &str) -> Option<PluginInfo> {
    let caps = info_attribute().captures(source)?;
    Some(PluginInfo {
        title: caps[1].trim().to_string(),
        author: caps[2].trim().to_string(),
        version: caps[3].to_string(),
    })
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginListing {
    /// Class name as published.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub download_url: String,
    #[serde(default, rename = "latest_release_version")]
    pub version: String,
}

impl PluginListing {
    fn file_stem(&self) -> Option<&str> {
        let segment = self.download_url.rsplit('/').next()?;
        let segment = segment.split('?').next()?;
        segment.strip_suffix(".cs")
    }

    fn names(&self, stem: &str) -> bool {
        self.file_stem() == Some(stem) || self.name == stem
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<PluginListing>,
}

/// Capability over the plugin directory.
pub trait PluginDirectory: Send + Sync {
    fn search(&self, title: &str) -> Result<Vec<PluginListing>, RolloutError>;
    fn download(&self, url: &str, dest: &Path) -> Result<u64, RolloutError>;
}

pub struct UmodDirectory {
    agent: ureq::Agent,
    search_url: String,
    user_agent: String,
}

impl UmodDirectory {
    pub fn new(timeout: Duration) -> Self {
        Self::with_search_url(UMOD_SEARCH_URL, timeout)
    }

    pub fn with_search_url(search_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: http_agent(timeout),
            search_url: search_url.into(),
            user_agent: format!("keeper/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl PluginDirectory for UmodDirectory {
    fn search(&self, title: &str) -> Result<Vec<PluginListing>, RolloutError> {
        let response = self
            .agent
            .get(&self.search_url)
            .set("User-Agent", &self.user_agent)
            .query("query", title)
            .query("page", "1")
            .call()
            .map_err(|e| RolloutError::Plugin(format!("search '{title}': {e}")))?;
        let body = response
            .into_string()
            .map_err(|e| RolloutError::Plugin(format!("search '{title}': {e}")))?;
        let parsed: SearchResponse = serde_json::from_str(&body)?;
        Ok(parsed.data)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64, RolloutError> {
        download_to(&self.agent, &self.user_agent, url, dest).map_err(RolloutError::from)
    }
}

/// Why a plugin was left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    NoMetadata,
    NotListed,
    Ambiguous(usize),
    UpToDate,
}

/// Pick the listing for `stem` at `local_version`, or say why not.
pub fn choose_listing<'a>(
    listings: &'a [PluginListing],
    stem: &str,
    local_version: &str,
) -> Result<&'a PluginListing, Skip> {
    let named: Vec<&PluginListing> = listings.iter().filter(|l| l.names(stem)).collect();
    let chosen = match named.as_slice() {
        [] => return Err(Skip::NotListed),
        [only] => *only,
        many => {
            let current: Vec<&PluginListing> = many
                .iter()
                .copied()
                .filter(|l| compare_versions(&l.version, local_version).is_ge())
                .collect();
            match current.as_slice() {
                [only] => *only,
                other => return Err(Skip::Ambiguous(other.len())),
            }
        }
    };
    if is_newer(&chosen.version, local_version) {
        Ok(chosen)
    } else {
        Err(Skip::UpToDate)
    }
}

pub struct PluginUpdater {
    directory: Arc<dyn PluginDirectory>,
    sleeper: Arc<dyn Sleeper>,
    limiter: RateLimiter,
}

impl PluginUpdater {
    pub fn new(
        directory: Arc<dyn PluginDirectory>,
        sleeper: Arc<dyn Sleeper>,
        requests_per_minute: usize,
    ) -> Self {
        Self {
            directory,
            sleeper,
            limiter: RateLimiter::per_minute(requests_per_minute),
        }
    }

    /// Refresh every plugin in `dir`; returns the file names that changed.
    ///
    /// Per-plugin failures are logged and skipped.
    pub fn update_all(&mut self, dir: &Path) -> Result<Vec<String>, RolloutError> {
        let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "cs"))
                .collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(dir, err)),
        };
        files.sort();

        let mut updated = Vec::new();
        for file in files {
            match self.update_one(&file) {
                Ok(Some(name)) => updated.push(name),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(plugin = %file.display(), error = %err, "plugin update failed")
                }
            }
        }
        Ok(updated)
    }

    fn update_one(&mut self, file: &Path) -> Result<Option<String>, RolloutError> {
        let source = std::fs::read_to_string(file).map_err(|e| io_err(file, e))?;
        let Some(info) = parse_plugin_info(&source) else {
            tracing::debug!(plugin = %file.display(), reason = ?Skip::NoMetadata, "plugin skipped");
            return Ok(None);
        };
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.limiter.acquire(self.sleeper.as_ref());
        let listings = self.directory.search(&info.title)?;
        let listing = match choose_listing(&listings, &stem, &info.version) {
            Ok(listing) => listing,
            Err(reason) => {
                tracing::debug!(plugin = %stem, ?reason, "plugin skipped");
                return Ok(None);
            }
        };

        let dir = file.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{stem}."))
            .suffix(".download")
            .tempfile_in(dir)
            .map_err(|e| io_err(dir, e))?;
        self.limiter.acquire(self.sleeper.as_ref());
        let bytes = self.directory.download(&listing.download_url, tmp.path())?;
        if bytes == 0 {
            return Err(RolloutError::Plugin(format!("empty download for {stem}")));
        }
        tmp.persist(file).map_err(|e| io_err(file, e.error))?;

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(stem);
        tracing::info!(plugin = %name, from = %info.version, to = %listing.version, "plugin updated");
        Ok(Some(name))
    }
}
