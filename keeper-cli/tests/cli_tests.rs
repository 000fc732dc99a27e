use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use keeper_core::handoff;
use keeper_core::{BuildId, InstallLayout, Ledger, ResultMarker, ServerRestored};

fn keeper_cmd(install_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("keeper"));
    cmd.arg("--install-dir")
        .arg(install_dir)
        .env("HOME", install_dir)
        .env("XDG_CONFIG_HOME", install_dir.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

fn updater_cmd(install_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("keeper-updater"));
    cmd.env("HOME", install_dir)
        .env("XDG_CONFIG_HOME", install_dir.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn scheme_check_lists_rules() {
    let tmp = TempDir::new().expect("tmp");
    let scheme = tmp.path().join("scheme.txt");
    fs::write(&scheme, "// server first\nserver = server\nruntime(s) = runtime\n").expect("scheme");

    Command::new(assert_cmd::cargo::cargo_bin!("keeper"))
        .args(["scheme", "check"])
        .arg(&scheme)
        .assert()
        .success()
        .stdout(contains("2 rule(s)"));
}

#[test]
fn scheme_check_reports_every_invalid_line() {
    let tmp = TempDir::new().expect("tmp");
    let scheme = tmp.path().join("scheme.txt");
    fs::write(&scheme, "server = server\nserver reboot\nruntime(x) = both\n").expect("scheme");

    Command::new(assert_cmd::cargo::cargo_bin!("keeper"))
        .args(["scheme", "check"])
        .arg(&scheme)
        .assert()
        .failure()
        .stderr(contains("2 invalid line(s)"))
        .stderr(contains("line 2"))
        .stderr(contains("line 3"));
}

#[test]
fn ledger_prints_persisted_builds() {
    let tmp = TempDir::new().expect("tmp");
    let layout = InstallLayout::new(tmp.path());
    fs::create_dir_all(layout.work_dir()).expect("work dir");
    let mut ledger = Ledger::open_at(&layout.ledger_path()).expect("ledger");
    ledger
        .set_confirmed_build(&BuildId::from("20240501"))
        .expect("confirmed");
    ledger
        .set_pending_build(&BuildId::from("20240601"))
        .expect("pending");

    keeper_cmd(tmp.path())
        .arg("ledger")
        .assert()
        .success()
        .stdout(contains("confirmed build: 20240501"))
        .stdout(contains("pending build:   20240601"))
        .stdout(contains("try number:      1"));

    keeper_cmd(tmp.path())
        .args(["ledger", "--json"])
        .assert()
        .success()
        .stdout(contains(r#""confirmed_build": "20240501""#));
}

#[test]
fn history_lists_archived_markers() {
    let tmp = TempDir::new().expect("tmp");
    let layout = InstallLayout::new(tmp.path());

    let mut failed = ResultMarker::failed("12345678", "failed server update: exhausted");
    failed.server_restored = ServerRestored::Yes;
    handoff::write_marker(&layout, &failed).expect("write failed marker");
    handoff::archive_marker(&layout, &failed).expect("archive failed marker");
    let mut ok = ResultMarker::success("23456789");
    ok.updated_plugins = Some(vec!["Kits.cs".to_string()]);
    handoff::write_marker(&layout, &ok).expect("write success marker");
    handoff::archive_marker(&layout, &ok).expect("archive success marker");

    keeper_cmd(tmp.path())
        .arg("history")
        .assert()
        .success()
        .stdout(contains("12345678"))
        .stdout(contains("23456789"))
        .stdout(contains("failed server update: exhausted"))
        .stdout(contains("Kits.cs"));
}

#[test]
fn history_without_markers() {
    let tmp = TempDir::new().expect("tmp");
    keeper_cmd(tmp.path())
        .arg("history")
        .assert()
        .success()
        .stdout(contains("No update history."));
}

#[test]
fn status_without_supervisor_reports_not_running() {
    let tmp = TempDir::new().expect("tmp");
    keeper_cmd(tmp.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(contains(r#""running": false"#));

    keeper_cmd(tmp.path())
        .arg("stop")
        .assert()
        .success()
        .stdout(contains("supervisor is not running"));
}

#[test]
fn updater_ignores_unknown_mode() {
    let tmp = TempDir::new().expect("tmp");
    updater_cmd(tmp.path())
        .arg("reboot")
        .arg("--install-dir")
        .arg(tmp.path())
        .assert()
        .success()
        .stderr(contains("unknown mode 'reboot'"));

    assert!(!tmp.path().join("keeper").exists());
    assert!(!tmp.path().join("updateresult.json").exists());
}

#[test]
fn updater_init_records_installed_build_and_logs() {
    let tmp = TempDir::new().expect("tmp");
    let layout = InstallLayout::new(tmp.path());
    fs::create_dir_all(tmp.path().join("steamapps")).expect("steamapps");
    fs::write(layout.app_manifest(258550), "\"AppState\" { \"buildid\" \"20240501\" }")
        .expect("manifest");

    updater_cmd(tmp.path())
        .arg("init")
        .arg("--install-dir")
        .arg(tmp.path())
        .arg("--steamcmd")
        .arg(tmp.path().join("missing-steamcmd"))
        .assert()
        .success();

    let recorded = fs::read_to_string(layout.pending_build_path()).expect("steambid.temp");
    assert_eq!(recorded.trim(), "20240501");
    assert!(!layout.marker_path().exists());
    assert!(layout.updater_log_path().exists());
}

#[test]
fn updater_rejects_invalid_invocation_with_failed_marker() {
    let tmp = TempDir::new().expect("tmp");
    let layout = InstallLayout::new(tmp.path());

    updater_cmd(tmp.path())
        .args(["12345678", "--update", "oxide", "--plugins", "no"])
        .arg("--install-dir")
        .arg(tmp.path())
        .args(["--start-script", "missing.sh"])
        .assert()
        .success();

    let marker = handoff::read_marker(&layout)
        .expect("marker readable")
        .expect("marker written");
    assert!(!marker.is_success());
    assert_eq!(marker.update_id, "12345678");
    assert!(marker
        .fail_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("start script")));
    assert!(!handoff::lock_exists(&layout));
}

#[test]
fn updater_scheduled_mode_requires_target() {
    let tmp = TempDir::new().expect("tmp");
    updater_cmd(tmp.path())
        .arg("12345678")
        .arg("--install-dir")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(contains("needs --update"));

    assert!(predicate::path::missing().eval(&tmp.path().join("updateresult.json")));
}
