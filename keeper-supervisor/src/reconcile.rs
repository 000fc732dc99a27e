//! Startup reconciliation: consume whatever the last updater run left behind.
//!
//! Runs once, before the coordinator goes idle:
//!
//! 1. a leftover `updating.lock` means a rollout was interrupted; warn and remove it
//! 2. `steambid.temp` (from `keeper-updater init`) becomes the confirmed build
//! 3. `updateresult.json` promotes the pending build on success, or bumps the
//!    failure counter on failure, and is then archived; an unreadable marker is
//!    quarantined instead. A test-run marker installed nothing, so it is
//!    archived without touching the ledger

use keeper_core::handoff;
use keeper_core::{BuildId, InstallLayout, Ledger, ResultMarker};

use crate::capabilities::{Notice, Notifier};
use crate::error::SupervisorError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub removed_stale_lock: bool,
    pub initial_build: Option<BuildId>,
    pub marker: Option<ResultMarker>,
    /// Build confirmed by a success marker.
    pub promoted: Option<BuildId>,
    pub try_number: u32,
}

pub fn reconcile(
    layout: &InstallLayout,
    ledger: &mut Ledger,
    notifier: &dyn Notifier,
) -> Result<Reconciliation, SupervisorError> {
    let mut report = Reconciliation::default();

    if handoff::lock_exists(layout) {
        tracing::warn!(
            lock = %layout.lock_path().display(),
            "found lock from an interrupted rollout; removing it"
        );
        handoff::release_lock(layout)?;
        report.removed_stale_lock = true;
    }

    if let Some(build) = handoff::take_pending_build(layout)? {
        tracing::info!(build = %build, "initial build recorded by updater init");
        ledger.set_confirmed_build(&build)?;
        report.initial_build = Some(build);
    }

    match handoff::read_marker(layout) {
        Ok(Some(marker)) => {
            if marker.backup_cycle {
                tracing::info!(
                    update_id = %marker.update_id,
                    result = ?marker.result,
                    "test run finished; ledger left as is"
                );
            } else if marker.is_success() {
                report.promoted = ledger.promote_pending()?;
                tracing::info!(
                    update_id = %marker.update_id,
                    build = ?report.promoted.as_ref().map(|b| b.0.as_str()),
                    backup_cycle = marker.backup_cycle,
                    "last update succeeded"
                );
                notifier.notify(&Notice::UpdateSucceeded {
                    update_id: marker.update_id.clone(),
                });
            } else {
                let tries = ledger.record_failure()?;
                let reason = marker.fail_reason.clone().unwrap_or_default();
                tracing::warn!(
                    update_id = %marker.update_id,
                    reason = %reason,
                    server_restored = ?marker.server_restored,
                    try_number = tries,
                    "last update failed"
                );
                notifier.notify(&Notice::UpdateFailed {
                    update_id: marker.update_id.clone(),
                    reason,
                });
            }
            let archived = handoff::archive_marker(layout, &marker)?;
            tracing::debug!(path = %archived.display(), "marker archived");
            report.marker = Some(marker);
        }
        Ok(None) => {}
        Err(err) => {
            tracing::error!(error = %err, "result marker unreadable; quarantining it");
            handoff::quarantine_marker(layout)?;
        }
    }

    report.try_number = ledger.try_number();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::LogNotifier;
    use keeper_core::ResultMarker;
    use tempfile::TempDir;

    #[test]
    fn nothing_to_reconcile() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        let mut ledger = Ledger::in_memory();
        let report = reconcile(&layout, &mut ledger, &LogNotifier).unwrap();
        assert_eq!(
            report,
            Reconciliation {
                try_number: 1,
                ..Reconciliation::default()
            }
        );
    }

    #[test]
    fn stale_lock_and_init_build_are_consumed() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        handoff::acquire_lock(&layout).unwrap();
        handoff::write_pending_build(&layout, &BuildId::from("20240501")).unwrap();

        let mut ledger = Ledger::in_memory();
        let report = reconcile(&layout, &mut ledger, &LogNotifier).unwrap();

        assert!(report.removed_stale_lock);
        assert!(!handoff::lock_exists(&layout));
        assert_eq!(ledger.confirmed_build(), Some(BuildId::from("20240501")));
        assert!(!layout.pending_build_path().exists());
    }

    #[test]
    fn failed_marker_bumps_counter_and_is_archived() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        let mut ledger = Ledger::in_memory();
        ledger.set_confirmed_build(&BuildId::from("20240501")).unwrap();
        ledger.set_pending_build(&BuildId::from("20240601")).unwrap();
        handoff::write_marker(&layout, &ResultMarker::failed("11111111", "failed server update")).unwrap();

        let report = reconcile(&layout, &mut ledger, &LogNotifier).unwrap();

        assert_eq!(report.try_number, 2);
        assert_eq!(ledger.confirmed_build(), Some(BuildId::from("20240501")));
        assert_eq!(ledger.pending_build(), None);
        assert!(!layout.marker_path().exists());
        assert_eq!(handoff::list_archived_markers(&layout).unwrap().len(), 1);
    }

    #[test]
    fn test_run_marker_leaves_ledger_alone() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        let mut ledger = Ledger::in_memory();
        ledger.set_confirmed_build(&BuildId::from("20240501")).unwrap();
        ledger.set_pending_build(&BuildId::from("20240601")).unwrap();
        let mut marker = ResultMarker::success("testrun");
        marker.backup_cycle = true;
        handoff::write_marker(&layout, &marker).unwrap();

        let report = reconcile(&layout, &mut ledger, &LogNotifier).unwrap();

        assert_eq!(report.promoted, None);
        assert_eq!(report.try_number, 1);
        assert_eq!(ledger.confirmed_build(), Some(BuildId::from("20240501")));
        assert_eq!(ledger.pending_build(), Some(BuildId::from("20240601")));
        assert!(!layout.marker_path().exists());
        assert_eq!(handoff::list_archived_markers(&layout).unwrap().len(), 1);
    }

    #[test]
    fn garbage_marker_is_quarantined() {
        let tmp = TempDir::new().unwrap();
        let layout = InstallLayout::new(tmp.path());
        std::fs::write(layout.marker_path(), "{not json").unwrap();

        let mut ledger = Ledger::in_memory();
        let report = reconcile(&layout, &mut ledger, &LogNotifier).unwrap();

        assert_eq!(report.marker, None);
        assert!(!layout.marker_path().exists());
        assert_eq!(std::fs::read_dir(layout.markers_dir()).unwrap().count(), 1);
    }
}
