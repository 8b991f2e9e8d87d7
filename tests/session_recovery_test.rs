//! Stale-claim recovery, heartbeat supervision and resuming a take after the
//! camera went quiet.

use std::time::{Duration, Instant};
use tempfile::TempDir;
use tethersync::errors::{DeviceError, SyncError};
use tethersync::session::{
    DeviceSessionController, ExecutionContext, HeartbeatOutcome, SessionEvent, SessionState,
};
use tethersync::testing::{fast_session_config, FakeCamera};

fn controller() -> (FakeCamera, DeviceSessionController<FakeCamera>) {
    let camera = FakeCamera::new();
    let controller = DeviceSessionController::new(camera.clone(), fast_session_config()).unwrap();
    (camera, controller)
}

fn drain(controller: &DeviceSessionController<FakeCamera>) -> Vec<SessionEvent> {
    std::iter::from_fn(|| controller.poll_event()).collect()
}

/// Open, start, then let the camera stop answering.
fn recording_with_dead_heartbeat() -> (FakeCamera, DeviceSessionController<FakeCamera>) {
    let (camera, controller) = controller();
    controller.open().unwrap();
    controller.start_recording().unwrap();
    camera.set_heartbeat_dead(true);
    (camera, controller)
}

// ═══════════════════════════════════════════════════════════════════════════
// FORCE-UNLOCK
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_stale_claim_cleared_by_reset() {
    let (camera, controller) = controller();
    camera.set_stale_claim(true);

    assert_eq!(controller.open().unwrap(), SessionState::Ready);
    let calls = camera.calls();
    assert_eq!(calls.reset_device, 1);
    assert_eq!(calls.open_session, 2);

    let events = drain(&controller);
    assert!(events.contains(&SessionEvent::ForceUnlockIssued));
    assert!(events.contains(&SessionEvent::StateChanged {
        from: SessionState::Connecting,
        to: SessionState::Locked,
    }));
    assert!(events.contains(&SessionEvent::StateChanged {
        from: SessionState::Locked,
        to: SessionState::Ready,
    }));
}

#[test]
fn test_stale_claim_survives_reset() {
    let (camera, controller) = controller();
    camera.set_stale_claim(true);
    camera.set_reset_clears_claim(false);

    let err = controller.open().unwrap_err();
    assert!(matches!(err, SyncError::DeviceLocked(_)));

    // Exactly one reset and one further acquisition attempt
    let calls = camera.calls();
    assert_eq!(calls.reset_device, 1);
    assert_eq!(calls.open_session, 2);
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(!controller.snapshot().has_handle);
}

#[test]
fn test_rejected_reset_reports_locked() {
    let (camera, controller) = controller();
    camera.set_stale_claim(true);
    camera.set_reset_rejected(true);

    assert!(matches!(controller.open(), Err(SyncError::DeviceLocked(_))));
    assert_eq!(camera.calls().reset_device, 1);
    assert_eq!(camera.calls().open_session, 2);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn test_device_gone_after_reset_is_unavailable() {
    let (camera, controller) = controller();
    camera.push_open_failures([DeviceError::Claimed, DeviceError::NotFound]);

    assert!(matches!(
        controller.open(),
        Err(SyncError::DeviceUnavailable(_))
    ));
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn test_transient_open_errors_are_retried_without_reset() {
    let (camera, controller) = controller();
    camera.push_open_failures([
        DeviceError::Transient("enumerating".into()),
        DeviceError::Transient("enumerating".into()),
    ]);

    assert_eq!(controller.open().unwrap(), SessionState::Ready);
    assert_eq!(camera.calls().open_session, 3);
    assert_eq!(camera.calls().reset_device, 0);
}

#[test]
fn test_open_retry_budget_is_bounded() {
    let (camera, controller) = controller();
    camera.push_open_failures(std::iter::repeat(DeviceError::Transient("no device".into())).take(5));

    assert!(matches!(
        controller.open(),
        Err(SyncError::DeviceUnavailable(_))
    ));
    assert_eq!(camera.calls().open_session, 3);
}

// ═══════════════════════════════════════════════════════════════════════════
// HEARTBEAT
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_heartbeat_only_runs_while_recording() {
    let (camera, controller) = controller();
    assert_eq!(controller.supervise(), HeartbeatOutcome::Skipped);

    controller.open().unwrap();
    assert_eq!(controller.supervise(), HeartbeatOutcome::Skipped);
    let before = camera.calls().heartbeat;

    controller.start_recording().unwrap();
    assert_eq!(controller.supervise(), HeartbeatOutcome::Alive);
    assert!(camera.calls().heartbeat > before);
    assert!(controller.snapshot().last_heartbeat.is_some());
}

#[test]
fn test_single_miss_then_recovery_resets_count() {
    let (camera, controller) = controller();
    controller.open().unwrap();
    controller.start_recording().unwrap();

    // One tick exhausts its three retries
    camera.push_heartbeat_failures(std::iter::repeat(DeviceError::Transient("stall".into())).take(3));
    assert_eq!(
        controller.supervise(),
        HeartbeatOutcome::Missed { consecutive: 1 }
    );
    assert_eq!(controller.snapshot().missed_heartbeats, 1);

    assert_eq!(controller.supervise(), HeartbeatOutcome::Alive);
    assert_eq!(controller.snapshot().missed_heartbeats, 0);
    assert_eq!(controller.state(), SessionState::Recording);
}

#[test]
fn test_retried_heartbeat_is_not_a_miss() {
    let (camera, controller) = controller();
    controller.open().unwrap();
    controller.start_recording().unwrap();

    camera.push_heartbeat_failures([DeviceError::Transient("stall".into())]);
    assert_eq!(controller.supervise(), HeartbeatOutcome::Alive);
    assert_eq!(controller.snapshot().missed_heartbeats, 0);
}

#[test]
fn test_three_misses_lock_the_session() {
    let (camera, controller) = recording_with_dead_heartbeat();
    let job = controller.snapshot().job.unwrap();

    assert_eq!(
        controller.supervise(),
        HeartbeatOutcome::Missed { consecutive: 1 }
    );
    assert_eq!(
        controller.supervise(),
        HeartbeatOutcome::Missed { consecutive: 2 }
    );
    assert_eq!(controller.supervise(), HeartbeatOutcome::Locked);
    assert_eq!(controller.state(), SessionState::Locked);

    // Job metadata survives for recovery
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.job.as_ref(), Some(&job));
    assert!(snapshot.job.unwrap().is_in_progress());

    let events = drain(&controller);
    assert!(events.contains(&SessionEvent::HeartbeatMissed { consecutive: 2 }));
    assert!(events.contains(&SessionEvent::CameraUnresponsive {
        missed: 3,
        job: Some(job),
    }));
    // The camera itself never learned anything happened
    assert!(camera.is_recording());
}

#[test]
fn test_locked_session_issues_no_hardware_commands() {
    let (camera, controller) = recording_with_dead_heartbeat();
    for _ in 0..3 {
        controller.supervise();
    }
    assert_eq!(controller.state(), SessionState::Locked);

    let dir = TempDir::new().unwrap();
    let before = camera.calls();
    assert_eq!(controller.supervise(), HeartbeatOutcome::Skipped);
    assert!(matches!(
        controller.start_recording(),
        Err(SyncError::InvalidState { .. })
    ));
    assert!(matches!(
        controller.stop_recording(),
        Err(SyncError::InvalidState { .. })
    ));
    assert!(matches!(
        controller.download_pending(dir.path()),
        Err(SyncError::InvalidState { .. })
    ));
    assert!(matches!(
        controller.discard_pending(),
        Err(SyncError::InvalidState { .. })
    ));
    assert_eq!(camera.calls(), before);
}

#[test]
fn test_recover_resumes_take_in_progress() {
    let (camera, controller) = recording_with_dead_heartbeat();
    for _ in 0..3 {
        controller.supervise();
    }
    assert_eq!(controller.state(), SessionState::Locked);

    // The camera comes back still holding the old (now dead) session
    camera.set_heartbeat_dead(false);
    assert_eq!(controller.open().unwrap(), SessionState::Recording);
    assert_eq!(camera.calls().reset_device, 1);
    assert!(camera.is_recording());
    assert_eq!(controller.supervise(), HeartbeatOutcome::Alive);

    let dir = TempDir::new().unwrap();
    let file = controller.stop_recording().unwrap();
    let path = controller.download_pending(dir.path()).unwrap();
    assert_eq!(std::fs::metadata(path).unwrap().len(), file.size);
}

#[test]
fn test_close_while_locked_skips_close_command() {
    let (camera, controller) = recording_with_dead_heartbeat();
    for _ in 0..3 {
        controller.supervise();
    }

    controller.close();
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(camera.calls().close_session, 0);
    assert_eq!(drain(&controller).last(), Some(&SessionEvent::Closed));
}

#[test]
fn test_camera_stopping_on_its_own() {
    let (camera, controller) = controller();
    controller.open().unwrap();
    controller.start_recording().unwrap();
    camera.stop_externally();

    assert_eq!(controller.supervise(), HeartbeatOutcome::Alive);
    assert_eq!(controller.supervise(), HeartbeatOutcome::Alive);
    let interruptions = drain(&controller)
        .into_iter()
        .filter(|e| *e == SessionEvent::RecordingInterrupted)
        .count();
    assert_eq!(interruptions, 1);

    // Stop still collects the file the camera wrote
    let file = controller.stop_recording().unwrap();
    assert_eq!(file.name, "MVI_0001.MOV");
    assert_eq!(controller.state(), SessionState::Downloading);
}

// ═══════════════════════════════════════════════════════════════════════════
// DEDICATED HEARTBEAT THREAD
// ═══════════════════════════════════════════════════════════════════════════

fn wait_for_state(
    controller: &DeviceSessionController<FakeCamera>,
    state: SessionState,
    timeout: Duration,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if controller.state() == state {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_heartbeat_thread_locks_dead_camera() {
    let camera = FakeCamera::new();
    let config = fast_session_config().with_execution(ExecutionContext::DedicatedThread);
    let controller = DeviceSessionController::new(camera.clone(), config).unwrap();

    controller.open().unwrap();
    controller.start_recording().unwrap();
    camera.set_heartbeat_dead(true);

    assert!(wait_for_state(
        &controller,
        SessionState::Locked,
        Duration::from_secs(5)
    ));
    assert!(drain(&controller)
        .iter()
        .any(|e| matches!(e, SessionEvent::CameraUnresponsive { missed: 3, .. })));

    let start = Instant::now();
    controller.close();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn test_heartbeat_thread_keeps_healthy_take_recording() {
    let camera = FakeCamera::new();
    let config = fast_session_config().with_execution(ExecutionContext::DedicatedThread);
    let controller = DeviceSessionController::new(camera.clone(), config).unwrap();

    controller.open().unwrap();
    controller.start_recording().unwrap();
    let before = camera.calls().heartbeat;
    std::thread::sleep(Duration::from_millis(150));

    assert!(camera.calls().heartbeat > before);
    assert_eq!(controller.state(), SessionState::Recording);
    assert!(controller.stop_recording().is_ok());
}
