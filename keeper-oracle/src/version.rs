//! Lenient version handling shared by runtime and plugin checks.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

fn triple() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+\.\d+").expect("valid regex"))
}

/// Numeric components of the leading `N(.N)*` run, after an optional `v`.
fn numeric_prefix(raw: &str) -> Option<Vec<u64>> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    let end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let head = trimmed[..end].trim_end_matches('.');
    if head.is_empty() {
        return None;
    }
    head.split('.').map(|part| part.parse().ok()).collect()
}

/// Compare two loosely formatted versions.
///
/// When both carry a numeric prefix the components are compared as a tuple,
/// missing trailing components counting as zero (`1.2 == 1.2.0`). Otherwise
/// the raw strings are compared.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (numeric_prefix(a), numeric_prefix(b)) {
        (Some(mut left), Some(mut right)) => {
            let len = left.len().max(right.len());
            left.resize(len, 0);
            right.resize(len, 0);
            left.cmp(&right)
        }
        _ => a.trim().cmp(b.trim()),
    }
}

/// `true` only when `remote` is strictly newer than `local`.
pub fn is_newer(remote: &str, local: &str) -> bool {
    compare_versions(remote, local) == Ordering::Greater
}

/// Reduce a version string to bare `MAJOR.MINOR.PATCH`.
///
/// Build metadata after `+` or `-` is dropped; otherwise the first `N.N.N`
/// anywhere in the string is taken.
pub fn normalize_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('\0');
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let core = trimmed
        .split(|c| c == '+' || c == '-')
        .next()
        .unwrap_or(trimmed);
    triple()
        .find(core)
        .or_else(|| triple().find(trimmed))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2.0.6198", "2.0.6197", Ordering::Greater)]
    #[case("1.10.0", "1.9.9", Ordering::Greater)]
    #[case("v1.2.3", "1.2.3", Ordering::Equal)]
    #[case("1.2", "1.2.0", Ordering::Equal)]
    #[case("1.2.3", "1.2.4", Ordering::Less)]
    #[case("beta", "alpha", Ordering::Greater)]
    fn compares_leniently(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare_versions(a, b), expected);
        assert_eq!(compare_versions(b, a), expected.reverse());
    }

    #[test]
    fn comparison_is_reflexive() {
        for v in ["0.0.1", "2.0.6198", "v3", "weird-tag", ""] {
            assert_eq!(compare_versions(v, v), Ordering::Equal, "{v}");
        }
    }

    #[test]
    fn newer_is_strict() {
        assert!(is_newer("1.0.1", "1.0.0"));
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("0.9.9", "1.0.0"));
    }

    #[rstest]
    #[case("2.0.6198", Some("2.0.6198"))]
    #[case("2.0.6198+a1b2c3", Some("2.0.6198"))]
    #[case("v2.0.6198-beta", Some("2.0.6198"))]
    #[case("2.0.6198.0", Some("2.0.6198"))]
    #[case("Oxide 2.0.6198 (build)", Some("2.0.6198"))]
    #[case("unknown", None)]
    fn normalizes_to_triple(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(normalize_version(raw).as_deref(), expected);
    }
}
