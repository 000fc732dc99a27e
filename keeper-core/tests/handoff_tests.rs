//! Handoff-file and ledger integration tests: the supervisor/updater exchange
//! exercised end to end through the filesystem.

use assert_fs::prelude::*;
use keeper_core::{
    handoff::{self, LockAttempt},
    BuildId, InstallLayout, Ledger, ResultMarker, ServerRestored,
};
use predicates::prelude::predicate;
use rstest::rstest;

fn layout(dir: &assert_fs::TempDir) -> InstallLayout {
    InstallLayout::new(dir.path())
}

// ---------------------------------------------------------------------------
// 1. Marker write / read / archive
// ---------------------------------------------------------------------------

#[test]
fn marker_round_trips_and_archives_once() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let layout = layout(&dir);

    let mut marker = ResultMarker::failed("20240601", "failed server update");
    marker.server_restored = ServerRestored::Yes;
    handoff::write_marker(&layout, &marker).expect("write marker");

    dir.child("updateresult.json")
        .assert(predicate::str::contains("\"server_restored\": \"yes\""));
    dir.child("updateresult.json.tmp").assert(predicate::path::missing());

    let read = handoff::read_marker(&layout).expect("read").expect("present");
    assert_eq!(read, marker);

    let archived = handoff::archive_marker(&layout, &read).expect("archive");
    assert!(archived.starts_with(layout.markers_dir()));
    assert!(archived
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("marker_20240601_")));
    dir.child("updateresult.json").assert(predicate::path::missing());
    assert!(handoff::read_marker(&layout).expect("read again").is_none());
}

#[test]
fn archive_never_overwrites_an_older_archive() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let layout = layout(&dir);
    let marker = ResultMarker::success("11112222");

    handoff::write_marker(&layout, &marker).unwrap();
    let first = handoff::archive_marker(&layout, &marker).unwrap();
    handoff::write_marker(&layout, &marker).unwrap();
    let second = handoff::archive_marker(&layout, &marker).unwrap();

    assert_ne!(first, second);
    assert!(first.exists() && second.exists());
    assert_eq!(handoff::list_archived_markers(&layout).unwrap().len(), 2);
}

#[test]
fn unreadable_marker_is_quarantined() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let layout = layout(&dir);
    dir.child("updateresult.json").write_str("{ truncated").unwrap();

    assert!(handoff::read_marker(&layout).is_err());
    let moved = handoff::quarantine_marker(&layout).expect("quarantine");
    assert!(moved.starts_with(layout.markers_dir()));
    dir.child("updateresult.json").assert(predicate::path::missing());
}

// ---------------------------------------------------------------------------
// 2. Lock
// ---------------------------------------------------------------------------

#[test]
fn lock_is_exclusive_until_released() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let layout = layout(&dir);

    assert_eq!(handoff::acquire_lock(&layout).unwrap(), LockAttempt::Acquired);
    dir.child("updating.lock").assert(predicate::path::exists());
    assert_eq!(handoff::acquire_lock(&layout).unwrap(), LockAttempt::AlreadyHeld);

    handoff::release_lock(&layout).unwrap();
    assert_eq!(handoff::acquire_lock(&layout).unwrap(), LockAttempt::Acquired);
}

// ---------------------------------------------------------------------------
// 3. Ledger transitions
// ---------------------------------------------------------------------------

#[rstest]
#[case::success(true, Some("20240601"), 1)]
#[case::failure(false, Some("20240501"), 3)]
fn ledger_reconciles_marker_outcome(
    #[case] success: bool,
    #[case] expected_confirmed: Option<&str>,
    #[case] expected_try: u32,
) {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let layout = layout(&dir);
    let mut ledger = Ledger::open_at(&layout.ledger_path()).unwrap();
    ledger.set_confirmed_build(&BuildId::from("20240501")).unwrap();
    ledger.set_pending_build(&BuildId::from("20240601")).unwrap();
    // One earlier failure already on record.
    ledger.record_failure().unwrap();
    ledger.set_pending_build(&BuildId::from("20240601")).unwrap();

    if success {
        ledger.promote_pending().unwrap();
    } else {
        ledger.record_failure().unwrap();
    }

    let reopened = Ledger::open_at(&layout.ledger_path()).unwrap();
    assert_eq!(reopened.confirmed_build(), expected_confirmed.map(BuildId::from));
    assert_eq!(reopened.pending_build(), None);
    assert_eq!(reopened.try_number(), expected_try);
}

#[test]
fn pending_build_handoff_file_is_plain_text() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let layout = layout(&dir);
    handoff::write_pending_build(&layout, &BuildId::from("14950129")).unwrap();
    dir.child("steambid.temp").assert("14950129\n");
    assert_eq!(
        handoff::take_pending_build(&layout).unwrap(),
        Some(BuildId::from("14950129"))
    );
    dir.child("steambid.temp").assert(predicate::path::missing());
}
