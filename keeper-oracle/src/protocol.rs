//! Protocol compatibility between a remote runtime release and the server.
//!
//! The runtime publishes the server protocol it targets in the commit
//! message behind each release tag (e.g. `"Update for Rust protocol 2512.245"`).

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::release::ReleaseApi;

/// Result of comparing the remote runtime's protocol with the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolOutcome {
    /// Same protocol: the runtime can be swapped without a server update.
    Match,
    /// Different protocol: the runtime needs a matching server build.
    Mismatch,
    /// Lookups succeeded but no protocol number was found, or the local
    /// protocol is not known.
    Unknown,
    /// Every lookup path failed.
    Error,
}

impl fmt::Display for ProtocolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolOutcome::Match => "match",
            ProtocolOutcome::Mismatch => "mismatch",
            ProtocolOutcome::Unknown => "unknown",
            ProtocolOutcome::Error => "error",
        };
        f.write_str(s)
    }
}

fn protocol_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)protocol\D{0,16}(\d+(?:\.\d+)*)").expect("valid regex"))
}

/// First protocol number mentioned in `message`.
pub fn extract_protocol(message: &str) -> Option<String> {
    protocol_number()
        .captures(message)
        .map(|caps| caps[1].to_string())
}

/// Protocol outcome plus a one-line human note for logs and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolCheck {
    pub outcome: ProtocolOutcome,
    pub remote_protocol: Option<String>,
    pub note: String,
}

/// Resolve the protocol targeted by `tag` and compare it with `local`.
///
/// Lookup order: commit for the raw tag, commit for the `v`-toggled tag, then
/// the release's `target_commitish`. The first message carrying a protocol
/// number decides.
pub fn check_protocol(
    api: &dyn ReleaseApi,
    repo: &str,
    tag: &str,
    local: Option<&str>,
) -> ProtocolCheck {
    let alternate = match tag.strip_prefix('v') {
        Some(bare) => bare.to_string(),
        None => format!("v{tag}"),
    };

    let mut any_ok = false;
    let mut last_error = None;
    let mut remote = None;

    for reference in [tag, alternate.as_str()] {
        match api.commit_message(repo, reference) {
            Ok(message) => {
                any_ok = true;
                if let Some(found) = message.as_deref().and_then(extract_protocol) {
                    remote = Some(found);
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(reference, error = %err, "commit lookup failed");
                last_error = Some(err.to_string());
            }
        }
    }

    if remote.is_none() {
        match api.release_by_tag(repo, tag) {
            Ok(Some(release)) if !release.target_commitish.is_empty() => {
                any_ok = true;
                match api.commit_message(repo, &release.target_commitish) {
                    Ok(message) => remote = message.as_deref().and_then(extract_protocol),
                    Err(err) => last_error = Some(err.to_string()),
                }
            }
            Ok(_) => any_ok = true,
            Err(err) => last_error = Some(err.to_string()),
        }
    }

    let (outcome, note) = match (&remote, local) {
        (None, _) if !any_ok => (
            ProtocolOutcome::Error,
            format!(
                "protocol lookup failed: {}",
                last_error.unwrap_or_else(|| "no response".to_string())
            ),
        ),
        (None, _) => (
            ProtocolOutcome::Unknown,
            format!("no protocol number published for {tag}"),
        ),
        (Some(remote), None) => (
            ProtocolOutcome::Unknown,
            format!("remote protocol {remote}, local protocol unknown"),
        ),
        (Some(remote), Some(local)) if remote == local.trim() => (
            ProtocolOutcome::Match,
            format!("protocol {remote} unchanged"),
        ),
        (Some(remote), Some(local)) => (
            ProtocolOutcome::Mismatch,
            format!("protocol {local} -> {remote}"),
        ),
    };

    ProtocolCheck {
        outcome,
        remote_protocol: remote,
        note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_protocol_number() {
        assert_eq!(
            extract_protocol("Update for Rust protocol 2512.245").as_deref(),
            Some("2512.245")
        );
        assert_eq!(
            extract_protocol("Protocol: 2511\nother 1.2.3").as_deref(),
            Some("2511")
        );
        assert_eq!(extract_protocol("Fix plugin loading"), None);
    }
}
