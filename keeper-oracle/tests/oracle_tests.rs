//! VersionOracle tests against fake tool and release channels.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keeper_core::BuildId;
use keeper_oracle::{
    Confidence, OracleError, OracleSettings, ProtocolOutcome, Release, ReleaseApi, ToolOutput,
    ToolRunner, VersionOracle,
};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct CannedRunner(Result<String, ()>);

impl ToolRunner for CannedRunner {
    fn run(&self, program: &Path, _: &[String], _: Duration) -> Result<ToolOutput, OracleError> {
        match &self.0 {
            Ok(output) => Ok(ToolOutput {
                code: Some(0),
                output: output.clone(),
            }),
            Err(()) => Err(OracleError::ToolMissing {
                program: program.display().to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct FakeReleases {
    latest: Option<Release>,
    /// reference -> commit message; a missing key is a 404.
    commits: HashMap<String, String>,
    tags: HashMap<String, Release>,
    offline: bool,
    commit_calls: AtomicUsize,
}

fn offline_err() -> OracleError {
    OracleError::Http {
        url: "https://api.github.com".to_string(),
        message: "connection refused".to_string(),
    }
}

impl ReleaseApi for FakeReleases {
    fn latest_release(&self, _: &str) -> Result<Release, OracleError> {
        self.latest.clone().ok_or_else(offline_err)
    }

    fn release_by_tag(&self, _: &str, tag: &str) -> Result<Option<Release>, OracleError> {
        if self.offline {
            return Err(offline_err());
        }
        Ok(self.tags.get(tag).cloned())
    }

    fn commit_message(&self, _: &str, reference: &str) -> Result<Option<String>, OracleError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(offline_err());
        }
        Ok(self.commits.get(reference).cloned())
    }

    fn download(&self, _: &str, _: &Path) -> Result<u64, OracleError> {
        Err(offline_err())
    }
}

fn release(tag: &str, commitish: &str) -> Release {
    Release {
        tag_name: tag.to_string(),
        target_commitish: commitish.to_string(),
        assets: vec![],
    }
}

fn settings() -> OracleSettings {
    OracleSettings {
        install_dir: std::env::temp_dir(),
        steamcmd: "steamcmd".into(),
        app_id: 258550,
        branch: "public".to_string(),
        runtime_repo: "OxideMod/Oxide.Rust".to_string(),
        tool_timeout: Duration::from_secs(5),
    }
}

fn oracle(runner: CannedRunner, releases: Arc<FakeReleases>) -> VersionOracle {
    VersionOracle::new(settings(), Arc::new(runner), releases)
}

fn no_tool() -> CannedRunner {
    CannedRunner(Err(()))
}

// ---------------------------------------------------------------------------
// 1. Remote server build
// ---------------------------------------------------------------------------

#[test]
fn remote_build_from_tool_output() {
    let output = r#""branches" { "public" { "buildid" "20240601" } }"#;
    let oracle = oracle(
        CannedRunner(Ok(output.to_string())),
        Arc::new(FakeReleases::default()),
    );
    let found = oracle.resolve_remote_server_build().expect("build");
    assert_eq!(found.build, BuildId::from("20240601"));
    assert_eq!(found.confidence, Confidence::High);
}

#[test]
fn missing_tool_yields_none_not_error() {
    let oracle = oracle(no_tool(), Arc::new(FakeReleases::default()));
    assert!(oracle.resolve_remote_server_build().is_none());
}

// ---------------------------------------------------------------------------
// 2. Runtime release + protocol
// ---------------------------------------------------------------------------

#[test]
fn unchanged_runtime_skips_protocol_lookup() {
    let releases = Arc::new(FakeReleases {
        latest: Some(release("2.0.6198", "develop")),
        ..FakeReleases::default()
    });
    let oracle = oracle(no_tool(), releases.clone());
    let remote = oracle
        .resolve_remote_runtime_release("2.0.6198", Some("2512.245"))
        .unwrap();
    assert!(!remote.changed());
    assert_eq!(releases.commit_calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[case::same(Some("2512.245"), ProtocolOutcome::Match)]
#[case::changed(Some("2511.100"), ProtocolOutcome::Mismatch)]
#[case::local_unknown(None, ProtocolOutcome::Unknown)]
fn protocol_compared_against_local(
    #[case] local: Option<&str>,
    #[case] expected: ProtocolOutcome,
) {
    let releases = Arc::new(FakeReleases {
        latest: Some(release("2.0.6199", "develop")),
        commits: HashMap::from([(
            "2.0.6199".to_string(),
            "Update for Rust protocol 2512.245".to_string(),
        )]),
        ..FakeReleases::default()
    });
    let remote = oracle(no_tool(), releases)
        .resolve_remote_runtime_release("2.0.6198", local)
        .unwrap();
    assert_eq!(remote.protocol, Some(expected));
}

#[test]
fn v_prefixed_tag_is_tried_second() {
    let releases = Arc::new(FakeReleases {
        latest: Some(release("2.0.6199", "")),
        commits: HashMap::from([("v2.0.6199".to_string(), "protocol 2512.245".to_string())]),
        ..FakeReleases::default()
    });
    let remote = oracle(no_tool(), releases)
        .resolve_remote_runtime_release("2.0.6198", Some("2512.245"))
        .unwrap();
    assert_eq!(remote.protocol, Some(ProtocolOutcome::Match));
}

#[test]
fn release_commitish_is_last_resort() {
    let releases = Arc::new(FakeReleases {
        latest: Some(release("2.0.6199", "abc123")),
        commits: HashMap::from([("abc123".to_string(), "Protocol: 2513.1".to_string())]),
        tags: HashMap::from([("2.0.6199".to_string(), release("2.0.6199", "abc123"))]),
        ..FakeReleases::default()
    });
    let remote = oracle(no_tool(), releases)
        .resolve_remote_runtime_release("2.0.6198", Some("2512.245"))
        .unwrap();
    assert_eq!(remote.protocol, Some(ProtocolOutcome::Mismatch));
}

#[test]
fn no_protocol_anywhere_is_unknown() {
    let releases = Arc::new(FakeReleases {
        latest: Some(release("2.0.6199", "")),
        commits: HashMap::from([("2.0.6199".to_string(), "Fix hooks".to_string())]),
        ..FakeReleases::default()
    });
    let remote = oracle(no_tool(), releases)
        .resolve_remote_runtime_release("2.0.6198", Some("2512.245"))
        .unwrap();
    assert_eq!(remote.protocol, Some(ProtocolOutcome::Unknown));
}

#[test]
fn failing_lookups_are_error_and_not_cached() {
    let releases = Arc::new(FakeReleases {
        latest: Some(release("2.0.6199", "")),
        offline: true,
        ..FakeReleases::default()
    });
    let oracle = oracle(no_tool(), releases.clone());
    for _ in 0..2 {
        let remote = oracle
            .resolve_remote_runtime_release("2.0.6198", Some("2512.245"))
            .unwrap();
        assert_eq!(remote.protocol, Some(ProtocolOutcome::Error));
    }
    // Two commit attempts (raw + v-variant) per cycle, no cache hit.
    assert_eq!(releases.commit_calls.load(Ordering::SeqCst), 4);
}

#[test]
fn protocol_result_is_cached_per_tag() {
    let releases = Arc::new(FakeReleases {
        latest: Some(release("2.0.6199", "")),
        commits: HashMap::from([("2.0.6199".to_string(), "protocol 2512.245".to_string())]),
        ..FakeReleases::default()
    });
    let oracle = oracle(no_tool(), releases.clone());
    oracle
        .resolve_remote_runtime_release("2.0.6198", Some("2512.245"))
        .unwrap();
    oracle
        .resolve_remote_runtime_release("2.0.6198", Some("2512.245"))
        .unwrap();
    assert_eq!(releases.commit_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn latest_release_failure_propagates() {
    let oracle = oracle(no_tool(), Arc::new(FakeReleases::default()));
    assert!(oracle
        .resolve_remote_runtime_release("2.0.6198", None)
        .is_err());
}
