//! Remote server build extraction from `steamcmd +app_info_print` output.
//!
//! Three tiers, tried in order:
//!
//! 1. [`Confidence::High`]: the `"buildid"` field inside the channel block
//!    (`"branches" { "<channel>" { ... } }`).
//! 2. [`Confidence::Medium`]: any `"buildid"` field with `"branches"` shortly
//!    before it.
//! 3. [`Confidence::Low`]: the first bare 6-10 digit number near one of the
//!    keywords `buildid`, `build`, `branches`, `public`. Every distinct number
//!    that qualified is counted in [`BuildExtraction::candidates`]; more than
//!    one means the pick is ambiguous.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use keeper_core::BuildId;
use regex::Regex;

use crate::tool::ToolRunner;

/// How far before a tier-2 `"buildid"` the word `"branches"` may appear.
const BRANCHES_WINDOW: usize = 400;
/// How far from a keyword a tier-3 number may start.
const KEYWORD_WINDOW: usize = 80;

/// Which extraction tier produced the build id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    /// Heuristic number near a keyword.
    Low,
    /// Build field found near the channel container, channel block not located.
    Medium,
    /// Build field inside the channel block.
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildExtraction {
    pub build: BuildId,
    pub confidence: Confidence,
    /// Distinct tier-3 candidates; 1 for tiers 1 and 2.
    pub candidates: usize,
}

fn buildid_field() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""buildid"\s*"(\d+)""#).expect("valid regex"))
}

fn bare_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{6,10}\b").expect("valid regex"))
}

fn keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)buildid|build|branches|public").expect("valid regex"))
}

/// Run all tiers over `output` for `channel` (normally `public`).
pub fn extract_remote_build(output: &str, channel: &str) -> Option<BuildExtraction> {
    if let Some(build) = channel_block_build(output, channel) {
        return Some(BuildExtraction {
            build,
            confidence: Confidence::High,
            candidates: 1,
        });
    }
    if let Some(build) = build_near_branches(output) {
        return Some(BuildExtraction {
            build,
            confidence: Confidence::Medium,
            candidates: 1,
        });
    }
    keyword_number(output)
}

/// Tier 1.
fn channel_block_build(output: &str, channel: &str) -> Option<BuildId> {
    let branches = output.find("\"branches\"")?;
    let after_branches = &output[branches..];
    let open = block_open(after_branches, 0)?;
    let branches_block = block_body(after_branches, open)?;

    let key = format!("\"{channel}\"");
    let key_at = branches_block.find(&key)?;
    let channel_open = block_open(branches_block, key_at + key.len())?;
    let channel_block = block_body(branches_block, channel_open)?;

    buildid_field()
        .captures(channel_block)
        .map(|c| BuildId::from(&c[1]))
}

/// Tier 2.
fn build_near_branches(output: &str) -> Option<BuildId> {
    buildid_field().captures_iter(output).find_map(|caps| {
        let at = caps.get(0)?.start();
        let from = floor_char_boundary(output, at.saturating_sub(BRANCHES_WINDOW));
        output[from..at]
            .contains("\"branches\"")
            .then(|| BuildId::from(&caps[1]))
    })
}

/// Tier 3.
fn keyword_number(output: &str) -> Option<BuildExtraction> {
    let keywords: Vec<usize> = keyword().find_iter(output).map(|m| m.start()).collect();
    if keywords.is_empty() {
        return None;
    }

    let mut first: Option<String> = None;
    let mut distinct: Vec<String> = Vec::new();
    for number in bare_number().find_iter(output) {
        let near = keywords
            .iter()
            .any(|&k| number.start().abs_diff(k) <= KEYWORD_WINDOW);
        if !near {
            continue;
        }
        let value = number.as_str().to_string();
        if first.is_none() {
            first = Some(value.clone());
        }
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }

    let build = first?;
    if distinct.len() > 1 {
        tracing::warn!(
            picked = %build,
            candidates = distinct.len(),
            "ambiguous build id extraction; using first candidate"
        );
    }
    Some(BuildExtraction {
        build: BuildId(build),
        confidence: Confidence::Low,
        candidates: distinct.len(),
    })
}

/// Index of the `{` that opens the block after `from`, skipping whitespace
/// and at most one quoted key.
fn block_open(text: &str, from: usize) -> Option<usize> {
    let rest = text.get(from..)?;
    let mut skipped_key = false;
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '{' => return Some(from + i),
            c if c.is_whitespace() => {}
            '"' if !skipped_key => {
                skipped_key = true;
                for (_, inner) in chars.by_ref() {
                    if inner == '"' {
                        break;
                    }
                }
            }
            _ => return None,
        }
    }
    None
}

/// Contents between the `{` at `open` and its matching `}`.
fn block_body(text: &str, open: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    for (i, c) in text[open..].char_indices() {
        match c {
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return text.get(open + 1..open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Arguments for an info-only query of `app_id`.
pub fn app_info_args(app_id: u32) -> Vec<String> {
    vec![
        "+login".to_string(),
        "anonymous".to_string(),
        "+app_info_update".to_string(),
        "1".to_string(),
        "+app_info_print".to_string(),
        app_id.to_string(),
        "+quit".to_string(),
    ]
}

/// Query the distribution tool and extract the channel's build id.
///
/// Never fails: a missing tool, a timeout, or no match all yield `None`,
/// which callers treat as "cannot decide this cycle".
pub fn resolve_remote_server_build(
    runner: &dyn ToolRunner,
    steamcmd: &Path,
    app_id: u32,
    channel: &str,
    timeout: Duration,
) -> Option<BuildExtraction> {
    let output = match runner.run(steamcmd, &app_info_args(app_id), timeout) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(error = %err, "remote build lookup failed");
            return None;
        }
    };
    let extraction = extract_remote_build(&output.output, channel);
    match &extraction {
        Some(found) => tracing::debug!(
            build = %found.build,
            confidence = ?found.confidence,
            candidates = found.candidates,
            "remote build resolved"
        ),
        None => tracing::warn!(app_id, "no build id in distribution tool output"),
    }
    extraction
}
