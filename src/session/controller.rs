use crate::check_invariant;
use crate::device::{DeviceCapabilities, RemoteFile, TransferProgress};
use crate::errors::{DeviceError, SyncError};
use crate::session::registry::DeviceClaim;
use crate::session::types::SessionStatus;
use crate::session::{
    ExecutionContext, HeartbeatOutcome, RecordingJob, SessionConfig, SessionEvent,
    SessionSnapshot, SessionState,
};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Try to take `mutex` for at most `timeout`.
fn lock_within<T>(mutex: &Mutex<T>, timeout: Duration) -> Option<MutexGuard<'_, T>> {
    let start = Instant::now();
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                if start.elapsed() >= timeout {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

/// Cancels an in-flight `download_pending()` from any thread.
#[derive(Debug, Clone)]
pub struct DownloadCancel {
    flag: Arc<AtomicBool>,
}

impl DownloadCancel {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct Hardware<D: DeviceCapabilities> {
    device: D,
    handle: Option<D::Handle>,
}

struct Inner<D: DeviceCapabilities> {
    session_id: Uuid,
    device_id: String,
    config: SessionConfig,
    /// The single mutual-exclusion boundary for hardware commands.
    /// Lock order: `hardware` before `status`.
    hardware: Mutex<Hardware<D>>,
    status: Mutex<SessionStatus>,
    events: mpsc::UnboundedSender<SessionEvent>,
    event_receiver: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    cancel: DownloadCancel,
    closed: AtomicBool,
    _claim: DeviceClaim,
}

struct Supervisor {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

/// Owns one camera connection and drives it through the recording lifecycle.
///
/// All methods take `&self`; share the controller behind an `Arc` to call it
/// from several threads. Hardware commands are serialized internally, so the
/// background heartbeat never races a foreground command on the handle.
pub struct DeviceSessionController<D: DeviceCapabilities> {
    inner: Arc<Inner<D>>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl<D: DeviceCapabilities> DeviceSessionController<D> {
    /// Wrap `device` in a new session. Fails with `DeviceUnavailable` when
    /// another controller in this process already owns the same device.
    pub fn new(device: D, config: SessionConfig) -> Result<Self, SyncError> {
        let device_id = device.device_id();
        let claim = DeviceClaim::acquire(&device_id)?;
        let (events, receiver) = mpsc::unbounded_channel();

        log::debug!("Created session controller for {}", device_id);

        Ok(Self {
            inner: Arc::new(Inner {
                session_id: Uuid::new_v4(),
                device_id,
                config,
                hardware: Mutex::new(Hardware {
                    device,
                    handle: None,
                }),
                status: Mutex::new(SessionStatus::new()),
                events,
                event_receiver: Mutex::new(Some(receiver)),
                cancel: DownloadCancel {
                    flag: Arc::new(AtomicBool::new(false)),
                },
                closed: AtomicBool::new(false),
                _claim: claim,
            }),
            supervisor: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current state. Never waits on hardware.
    pub fn state(&self) -> SessionState {
        self.inner.status().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.inner.status();
        SessionSnapshot {
            session_id: self.inner.session_id,
            device_id: self.inner.device_id.clone(),
            state: status.state,
            has_handle: status.handle_held,
            last_heartbeat: status.last_heartbeat,
            missed_heartbeats: status.missed_heartbeats,
            pending_file: status.pending.clone(),
            job: status.job.clone(),
        }
    }

    /// Next queued event, if any.
    pub fn poll_event(&self) -> Option<SessionEvent> {
        lock(&self.inner.event_receiver)
            .as_mut()
            .and_then(|rx| rx.try_recv().ok())
    }

    /// Hand the event stream to an async consumer. After this, `poll_event`
    /// always returns `None`.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        lock(&self.inner.event_receiver).take()
    }

    pub fn cancel_handle(&self) -> DownloadCancel {
        self.inner.cancel.clone()
    }

    pub fn cancel_download(&self) {
        self.inner.cancel.cancel();
    }

    /// Acquire the device handle.
    ///
    /// Valid from `Idle`, `Locked` and `Failed`. A device that reports a stale
    /// claim gets exactly one hardware reset and one further acquisition
    /// attempt. On failure the session returns to the state it was in before
    /// the call. A recovery from `Locked` while a take was running resumes in
    /// `Recording`; otherwise the session ends in `Ready`.
    pub fn open(&self) -> Result<SessionState, SyncError> {
        let mut hw = self.inner.hardware();
        let prior = self.inner.status().state;
        if !matches!(
            prior,
            SessionState::Idle | SessionState::Locked | SessionState::Failed
        ) {
            return Err(SyncError::invalid_state("open", prior));
        }
        self.inner.closed.store(false, Ordering::SeqCst);

        let Hardware { device, handle } = &mut *hw;

        match (prior, handle.take()) {
            (SessionState::Idle, Some(held)) => {
                match self.inner.config.retry.run("heartbeat", || device.heartbeat(&held)) {
                    Ok(_) => {
                        *handle = Some(held);
                        let mut status = self.inner.status();
                        self.inner.transition(&mut status, SessionState::Connecting);
                        status.missed_heartbeats = 0;
                        status.last_heartbeat = Some(Utc::now());
                        self.inner.transition(&mut status, SessionState::Ready);
                        return Ok(SessionState::Ready);
                    }
                    Err(e) => {
                        log::warn!(
                            "Held handle for {} no longer answers ({}); reacquiring",
                            self.inner.device_id,
                            e
                        );
                        if let Err(e) = device.close_session(held) {
                            log::warn!("Ignoring close error on {}: {}", self.inner.device_id, e);
                        }
                    }
                }
            }
            (SessionState::Locked, Some(stale)) => {
                log::warn!(
                    "Dropping handle of unresponsive device {} without a close command",
                    self.inner.device_id
                );
                drop(stale);
            }
            (_, Some(stale)) => {
                if let Err(e) = device.close_session(stale) {
                    log::warn!("Ignoring close error on {}: {}", self.inner.device_id, e);
                }
            }
            (_, None) => {}
        }
        self.inner.status().handle_held = false;

        self.inner.set_state(SessionState::Connecting);
        log::info!("Opening session on {}", self.inner.device_id);

        let acquired = match self
            .inner
            .config
            .retry
            .run("open session", || device.open_session())
        {
            Ok(h) => Ok(h),
            Err(DeviceError::Claimed) => self.inner.force_unlock(device),
            Err(e) => Err(SyncError::DeviceUnavailable(format!(
                "{}: {}",
                self.inner.device_id, e
            ))),
        };

        let acquired = match acquired {
            Ok(h) => h,
            Err(e) => {
                log::warn!("Open failed on {}: {}", self.inner.device_id, e);
                self.inner.set_state(prior);
                return Err(e);
            }
        };
        *handle = Some(acquired);

        let target = {
            let mut status = self.inner.status();
            status.handle_held = true;
            status.missed_heartbeats = 0;
            status.last_heartbeat = Some(Utc::now());
            let resuming = prior == SessionState::Locked
                && status.job.as_ref().is_some_and(RecordingJob::is_in_progress);
            let target = if resuming {
                SessionState::Recording
            } else {
                SessionState::Ready
            };
            self.inner.transition(&mut status, target);
            target
        };
        drop(hw);

        if target == SessionState::Recording {
            log::info!(
                "Recovered {} with a take still in progress",
                self.inner.device_id
            );
            self.ensure_supervisor()?;
        }
        Ok(target)
    }

    /// Trigger the camera. Valid only from `Ready`.
    pub fn start_recording(&self) -> Result<RecordingJob, SyncError> {
        let mut hw = self.inner.hardware();
        let state = self.inner.status().state;
        if state != SessionState::Ready {
            return Err(SyncError::invalid_state("start recording", state));
        }
        self.ensure_supervisor()?;

        let Hardware { device, handle } = &mut *hw;
        let handle = handle
            .as_ref()
            .ok_or_else(|| SyncError::DeviceUnavailable("session is not open".to_string()))?;

        let baseline: HashSet<String> = self
            .inner
            .config
            .retry
            .run("list remote files", || device.list_remote_files(handle))
            .map_err(|e| self.inner.command_error("list remote files", e))?
            .into_iter()
            .map(|f| f.id)
            .collect();

        device
            .begin_recording(handle)
            .map_err(|e| self.inner.command_error("start recording", e))?;

        if !self.inner.wait_until_recording(device, handle) {
            if let Err(e) = device.end_recording(handle) {
                log::debug!("Cleanup record-end after failed trigger: {}", e);
            }
            return Err(SyncError::HardwareRejected(format!(
                "camera did not report recording within {:?}",
                self.inner.config.trigger_timeout
            )));
        }

        let job = RecordingJob::begin();
        let mut status = self.inner.status();
        status.baseline_files = baseline;
        status.job = Some(job.clone());
        if let Some(dropped) = status.pending.take() {
            log::warn!(
                "Take {} on {} was never downloaded; no longer tracking it",
                dropped.path,
                self.inner.device_id
            );
            self.inner.emit(SessionEvent::PendingTakeDropped(dropped));
        }
        status.missed_heartbeats = 0;
        status.last_heartbeat = Some(Utc::now());
        status.interrupted = false;
        self.inner.transition(&mut status, SessionState::Recording);

        log::info!("Recording job {} started on {}", job.id, self.inner.device_id);
        Ok(job)
    }

    /// End the take and locate its file on the device. Valid only from `Recording`.
    ///
    /// Leaves the session in `Downloading` with the newest file created since
    /// `start_recording` pending. If no new file appears within the file-appear
    /// timeout the session returns to `Ready`.
    pub fn stop_recording(&self) -> Result<RemoteFile, SyncError> {
        let mut hw = self.inner.hardware();
        let state = self.inner.status().state;
        if state != SessionState::Recording {
            return Err(SyncError::invalid_state("stop recording", state));
        }
        self.inner.set_state(SessionState::Stopping);

        let Hardware { device, handle } = &mut *hw;
        let Some(handle) = handle.as_ref() else {
            self.inner.set_state(SessionState::Recording);
            return Err(SyncError::DeviceUnavailable(
                "session is not open".to_string(),
            ));
        };

        if let Err(e) = device.end_recording(handle) {
            let still_recording = device
                .heartbeat(handle)
                .map(|s| s.recording)
                .unwrap_or(true);
            if e.is_rejection() && !still_recording {
                log::info!(
                    "Camera {} had already stopped ({}); collecting the file",
                    self.inner.device_id,
                    e
                );
            } else {
                self.inner.set_state(SessionState::Recording);
                return Err(self.inner.command_error("stop recording", e));
            }
        }

        let baseline = {
            let mut status = self.inner.status();
            if let Some(job) = status.job.as_mut() {
                job.stopped_at = Some(Utc::now());
            }
            std::mem::take(&mut status.baseline_files)
        };

        match self.inner.wait_for_new_file(device, handle, &baseline) {
            Some(file) => {
                let mut status = self.inner.status();
                if let Some(job) = status.job.as_mut() {
                    job.remote_file_id = Some(file.id.clone());
                }
                status.pending = Some(file.clone());
                self.inner.transition(&mut status, SessionState::Downloading);
                log::info!("Take stored on device as {} ({} bytes)", file.path, file.size);
                Ok(file)
            }
            None => {
                let timeout = self.inner.config.file_appear_timeout;
                log::warn!(
                    "No new file appeared on {} within {:?}",
                    self.inner.device_id,
                    timeout
                );
                self.inner.set_state(SessionState::Ready);
                Err(SyncError::RecordingNotFound(timeout))
            }
        }
    }

    /// Copy the pending take into `destination` and verify its size.
    ///
    /// Transient transfer failures and short copies are retried up to the
    /// configured attempt bound. Exhaustion, cancellation and hard failures all
    /// leave the session in `Idle` with the pending file kept, so the call can
    /// be repeated.
    pub fn download_pending(&self, destination: &Path) -> Result<PathBuf, SyncError> {
        let mut hw = self.inner.hardware();
        let (state, file) = {
            let status = self.inner.status();
            (status.state, status.pending.clone())
        };
        let file = match (state, file) {
            (
                SessionState::Downloading | SessionState::Idle | SessionState::Ready,
                Some(file),
            ) => file,
            (state, _) => return Err(SyncError::invalid_state("download", state)),
        };

        let Hardware { device, handle } = &mut *hw;
        let handle = handle
            .as_ref()
            .ok_or_else(|| SyncError::DeviceUnavailable("session is not open".to_string()))?;

        // Never let the device's name reach outside the destination
        let file_name = Path::new(&file.name).file_name().ok_or_else(|| {
            SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("device reported unusable file name {:?}", file.name),
            ))
        })?;
        std::fs::create_dir_all(destination)?;
        let target = destination.join(file_name);

        self.inner.set_state(SessionState::Downloading);
        self.inner.cancel.reset();

        let attempts = self.inner.config.download_attempts;
        let mut received = 0u64;

        for attempt in 1..=attempts {
            if self.inner.cancel.is_cancelled() {
                return Err(self.inner.download_cancelled(&target));
            }

            let mut transferred = 0u64;
            let result = {
                let events = &self.inner.events;
                let cancel = &self.inner.cancel;
                let mut on_progress = |progress: TransferProgress| {
                    transferred = progress.transferred;
                    let _ = events.send(SessionEvent::DownloadProgress(progress));
                    if cancel.is_cancelled() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                };
                device.download_file(handle, &file, &target, &mut on_progress)
            };

            let reason = match result {
                Ok(reported) => {
                    let on_disk = std::fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
                    if reported == file.size && on_disk == file.size {
                        return Ok(self.inner.download_complete(target));
                    }
                    received = on_disk;
                    format!(
                        "size mismatch: device reported {} bytes, copied {} of {}",
                        reported, on_disk, file.size
                    )
                }
                Err(DeviceError::Cancelled) => {
                    return Err(self.inner.download_cancelled(&target));
                }
                Err(e) if e.is_transient() => {
                    received = transferred;
                    e.to_string()
                }
                Err(e) => {
                    remove_partial(&target);
                    self.inner.set_state(SessionState::Idle);
                    return Err(self.inner.command_error("download", e));
                }
            };

            remove_partial(&target);
            log::warn!(
                "Download of {} failed (attempt {}/{}): {}",
                file.name,
                attempt,
                attempts,
                reason
            );

            if attempt < attempts {
                self.inner.emit(SessionEvent::DownloadRetry { attempt, reason });
                std::thread::sleep(self.inner.config.retry.backoff_for_attempt(attempt));
            }
        }

        self.inner.set_state(SessionState::Idle);
        Err(SyncError::DownloadIncomplete {
            attempts,
            expected: file.size,
            received,
        })
    }

    /// Forget the pending take without transferring it. The file stays on the card.
    pub fn discard_pending(&self) -> Result<RemoteFile, SyncError> {
        let _hw = self.inner.hardware();
        let mut status = self.inner.status();
        let state = status.state;
        if !matches!(
            state,
            SessionState::Downloading | SessionState::Idle | SessionState::Ready
        ) {
            return Err(SyncError::invalid_state("discard", state));
        }
        let file = status
            .pending
            .take()
            .ok_or(SyncError::invalid_state("discard", state))?;
        status.job = None;
        self.inner.transition(&mut status, SessionState::Idle);

        log::info!("Discarded pending take {}", file.path);
        Ok(file)
    }

    /// Run one heartbeat tick.
    ///
    /// With [`ExecutionContext::DedicatedThread`] the controller calls this on
    /// its own schedule. With [`ExecutionContext::Manual`] the caller does.
    pub fn supervise(&self) -> HeartbeatOutcome {
        self.inner.supervise()
    }

    /// Release the device. Never fails and never waits longer than the close
    /// timeout for an in-flight command. The pending take, if any, is kept.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        self.stop_supervisor();

        let Some(mut hw) = lock_within(&self.inner.hardware, self.inner.config.close_timeout)
        else {
            log::warn!(
                "Device {} busy for more than {:?}; leaving handle release to the in-flight command",
                self.inner.device_id,
                self.inner.config.close_timeout
            );
            return;
        };

        let state = self.inner.status().state;
        let Hardware { device, handle } = &mut *hw;
        if let Some(handle) = handle.take() {
            if state == SessionState::Locked {
                log::warn!(
                    "Releasing handle of unresponsive device {} without a close command",
                    self.inner.device_id
                );
            } else if let Err(e) = device.close_session(handle) {
                log::warn!("Ignoring close error on {}: {}", self.inner.device_id, e);
            }
        }

        {
            let mut status = self.inner.status();
            status.handle_held = false;
            self.inner.transition(&mut status, SessionState::Idle);
        }
        self.inner.emit(SessionEvent::Closed);
        log::info!("Session on {} closed", self.inner.device_id);
    }

    fn ensure_supervisor(&self) -> Result<(), SyncError> {
        if self.inner.config.execution == ExecutionContext::Manual {
            return Ok(());
        }

        let mut slot = lock(&self.supervisor);
        if slot.as_ref().is_some_and(|s| !s.thread.is_finished()) {
            return Ok(());
        }

        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let thread = std::thread::Builder::new()
            .name("tethersync-heartbeat".to_string())
            .spawn(move || heartbeat_loop(inner, shutdown_rx))?;

        log::debug!("Heartbeat thread started for {}", self.inner.device_id);
        *slot = Some(Supervisor { shutdown, thread });
        Ok(())
    }

    fn stop_supervisor(&self) {
        let Some(supervisor) = lock(&self.supervisor).take() else {
            return;
        };
        let _ = supervisor.shutdown.try_send(());

        let timeout = self.inner.config.close_timeout;
        let start = Instant::now();
        while !supervisor.thread.is_finished() {
            if start.elapsed() >= timeout {
                log::warn!(
                    "Heartbeat thread for {} did not stop within {:?}; detaching it",
                    self.inner.device_id,
                    timeout
                );
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        if supervisor.thread.join().is_err() {
            log::error!("Heartbeat thread for {} panicked", self.inner.device_id);
        }
    }
}

impl<D: DeviceCapabilities> Drop for DeviceSessionController<D> {
    fn drop(&mut self) {
        self.close();
    }
}

fn heartbeat_loop<D: DeviceCapabilities>(inner: Arc<Inner<D>>, shutdown: Receiver<()>) {
    let interval = inner.config.heartbeat_interval;
    loop {
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                inner.supervise();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("Heartbeat thread for {} exiting", inner.device_id);
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Failed to remove partial download {}: {}", path.display(), e);
        }
    }
}

impl<D: DeviceCapabilities> Inner<D> {
    fn hardware(&self) -> MutexGuard<'_, Hardware<D>> {
        lock(&self.hardware)
    }

    fn status(&self) -> MutexGuard<'_, SessionStatus> {
        lock(&self.status)
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn transition(&self, status: &mut SessionStatus, next: SessionState) {
        let from = status.state;
        if from == next {
            return;
        }
        check_invariant!(
            from.can_transition_to(next),
            "session transitions follow the state graph"
        );
        status.state = next;
        log::info!("Session {}: {} -> {}", self.device_id, from, next);
        self.emit(SessionEvent::StateChanged { from, to: next });
    }

    fn set_state(&self, next: SessionState) {
        let mut status = self.status();
        self.transition(&mut status, next);
    }

    /// Reset the device once, wait out the grace period and try to claim it
    /// once more. Leaves the session in `Locked`; the caller moves it on.
    fn force_unlock(&self, device: &mut D) -> Result<D::Handle, SyncError> {
        self.set_state(SessionState::Locked);
        self.emit(SessionEvent::ForceUnlockIssued);
        log::warn!(
            "Device {} reports a stale claim; issuing hardware reset",
            self.device_id
        );

        let reset = device.reset_device();
        if let Err(e) = &reset {
            log::warn!("Hardware reset of {} rejected: {}", self.device_id, e);
        }
        std::thread::sleep(self.config.reset_grace);

        match device.open_session() {
            Ok(handle) => {
                log::info!("Force-unlock cleared the stale claim on {}", self.device_id);
                Ok(handle)
            }
            Err(e) if reset.is_err() || e == DeviceError::Claimed => Err(SyncError::DeviceLocked(
                format!("{} still claimed after reset: {}", self.device_id, e),
            )),
            Err(e) => Err(SyncError::DeviceUnavailable(format!(
                "{} unreachable after reset: {}",
                self.device_id, e
            ))),
        }
    }

    /// Map a failed hardware command onto the operation-level taxonomy,
    /// moving the session to `Locked` or `Failed` where the fault calls for it.
    fn command_error(&self, operation: &str, error: DeviceError) -> SyncError {
        log::warn!("{} on {} failed: {}", operation, self.device_id, error);
        match error {
            DeviceError::Transient(msg) => SyncError::DeviceUnavailable(msg),
            DeviceError::Disconnected(msg) => {
                self.set_state(SessionState::Locked);
                SyncError::DeviceUnavailable(format!("{} disconnected: {}", self.device_id, msg))
            }
            DeviceError::Claimed => SyncError::DeviceLocked(self.device_id.clone()),
            DeviceError::Cancelled => SyncError::Cancelled,
            DeviceError::Fatal(msg) => {
                self.set_state(SessionState::Failed);
                SyncError::DeviceUnavailable(format!("fatal device error: {}", msg))
            }
            rejection => SyncError::HardwareRejected(format!("{}: {}", operation, rejection)),
        }
    }

    fn wait_until_recording(&self, device: &mut D, handle: &D::Handle) -> bool {
        let deadline = Instant::now() + self.config.trigger_timeout;
        loop {
            match device.heartbeat(handle) {
                Ok(status) if status.recording => return true,
                Ok(_) => {}
                Err(e) => log::debug!("Status check while waiting for trigger: {}", e),
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Poll the card until a file outside `baseline` shows up; newest wins.
    fn wait_for_new_file(
        &self,
        device: &mut D,
        handle: &D::Handle,
        baseline: &HashSet<String>,
    ) -> Option<RemoteFile> {
        let deadline = Instant::now() + self.config.file_appear_timeout;
        loop {
            match self
                .config
                .retry
                .run("list remote files", || device.list_remote_files(handle))
            {
                Ok(files) => {
                    let newest = files
                        .into_iter()
                        .filter(|f| !baseline.contains(&f.id))
                        .max_by_key(|f| f.created_at);
                    if newest.is_some() {
                        return newest;
                    }
                }
                Err(e) => log::warn!("Listing files on {} failed: {}", self.device_id, e),
            }
            if Instant::now() >= deadline {
                return None;
            }
            log::debug!("Waiting for {} to flush the take", self.device_id);
            std::thread::sleep(self.config.poll_interval);
        }
    }

    fn download_complete(&self, path: PathBuf) -> PathBuf {
        let mut status = self.status();
        status.pending = None;
        if let Some(job) = status.job.as_mut() {
            job.local_download_path = Some(path.clone());
        }
        check_invariant!(
            status.job.as_ref().map_or(true, |j| j.stopped_at.is_some()),
            "downloaded takes have stopped"
        );
        self.transition(&mut status, SessionState::Idle);
        drop(status);

        log::info!("Downloaded take to {}", path.display());
        self.emit(SessionEvent::DownloadComplete { path: path.clone() });
        path
    }

    fn download_cancelled(&self, partial: &Path) -> SyncError {
        remove_partial(partial);
        self.set_state(SessionState::Idle);
        log::info!("Download on {} cancelled; take kept pending", self.device_id);
        SyncError::Cancelled
    }

    fn supervise(&self) -> HeartbeatOutcome {
        let mut hw = match self.hardware.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::debug!("Heartbeat skipped; {} busy with a command", self.device_id);
                return HeartbeatOutcome::Skipped;
            }
        };
        if self.status().state != SessionState::Recording {
            return HeartbeatOutcome::Skipped;
        }
        let Hardware { device, handle } = &mut *hw;
        let Some(handle) = handle.as_ref() else {
            return HeartbeatOutcome::Skipped;
        };

        let result = self.config.retry.run("heartbeat", || device.heartbeat(handle));
        let mut status = self.status();

        match result {
            Ok(device_status) => {
                status.missed_heartbeats = 0;
                status.last_heartbeat = Some(Utc::now());
                if !device_status.recording && !status.interrupted {
                    status.interrupted = true;
                    log::warn!("Camera {} stopped recording on its own", self.device_id);
                    self.emit(SessionEvent::RecordingInterrupted);
                }
                HeartbeatOutcome::Alive
            }
            Err(e) => {
                status.missed_heartbeats += 1;
                let missed = status.missed_heartbeats;
                log::warn!(
                    "Heartbeat {} missed on {}: {}",
                    missed,
                    self.device_id,
                    e
                );
                self.emit(SessionEvent::HeartbeatMissed {
                    consecutive: missed,
                });

                if missed >= self.config.heartbeat_miss_threshold {
                    let job = status.job.clone();
                    self.transition(&mut status, SessionState::Locked);
                    log::error!(
                        "Camera {} unresponsive after {} heartbeats; take metadata kept",
                        self.device_id,
                        missed
                    );
                    self.emit(SessionEvent::CameraUnresponsive { missed, job });
                    HeartbeatOutcome::Locked
                } else {
                    HeartbeatOutcome::Missed {
                        consecutive: missed,
                    }
                }
            }
        }
    }
}
