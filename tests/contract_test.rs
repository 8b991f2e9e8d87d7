//! Contract tests: drive the main code paths and prove that every runtime
//! invariant guarding them was actually evaluated.

use tempfile::TempDir;
use tethersync::alignment::AlignmentEngine;
use tethersync::invariants;
use tethersync::session::DeviceSessionController;
use tethersync::testing::{clap_track, delayed, fast_session_config, FakeCamera};

#[test]
fn test_take_lifecycle_checks_its_invariants() {
    invariants::reset();
    let dir = TempDir::new().unwrap();
    let camera = FakeCamera::new();
    let controller = DeviceSessionController::new(camera, fast_session_config()).unwrap();

    controller.open().unwrap();
    controller.start_recording().unwrap();
    controller.stop_recording().unwrap();
    controller.download_pending(dir.path()).unwrap();

    let missing = invariants::unchecked(&[
        "session transitions follow the state graph",
        "downloaded takes have stopped",
    ]);
    assert!(missing.is_empty(), "never checked: {:?}", missing);
}

#[test]
fn test_alignment_checks_its_invariants() {
    invariants::reset();
    let camera = clap_track(8000, 1.0, 0.2, 0.01, 31);
    let reference = delayed(&camera, 0.3);
    AlignmentEngine::default()
        .align(&reference, &camera, 60.0)
        .unwrap();

    let missing = invariants::unchecked(&["correlation transform covers both windows"]);
    assert!(missing.is_empty(), "never checked: {:?}", missing);
}
