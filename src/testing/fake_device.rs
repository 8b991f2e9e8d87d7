//! Scriptable in-memory camera
//!
//! `FakeCamera` implements [`DeviceCapabilities`] without hardware. Clones
//! share state, so a test can move one clone into a controller and keep
//! another to script faults and count the commands that reached the device.

use crate::device::{DeviceCapabilities, DeviceStatus, RemoteFile, RetryPolicy, TransferProgress};
use crate::errors::DeviceError;
use crate::session::{ExecutionContext, SessionConfig};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_TAKE_SIZE: usize = 64 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// How the next `download_file` call misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFault {
    /// Half the bytes arrive, then a transient USB error
    Transient,
    /// Half the bytes arrive and the device reports that count as success
    Truncate,
    /// Half the bytes arrive but the device claims the full size
    ShortWrite,
    /// Half the bytes arrive, then the cable is gone
    Disconnect,
}

/// Number of times each capability was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeCalls {
    pub open_session: u32,
    pub close_session: u32,
    pub reset_device: u32,
    pub begin_recording: u32,
    pub end_recording: u32,
    pub list_remote_files: u32,
    pub download_file: u32,
    pub heartbeat: u32,
}

impl FakeCalls {
    pub fn total(&self) -> u32 {
        self.open_session
            + self.close_session
            + self.reset_device
            + self.begin_recording
            + self.end_recording
            + self.list_remote_files
            + self.download_file
            + self.heartbeat
    }
}

#[derive(Debug)]
pub struct FakeHandle {
    session: u64,
}

type ChunkHook = Box<dyn FnMut(TransferProgress) + Send>;

struct FakeState {
    next_session: u64,
    active_session: Option<u64>,
    stale_claim: bool,
    reset_clears_claim: bool,
    reset_rejected: bool,
    open_failures: VecDeque<DeviceError>,

    recording: bool,
    ignore_trigger: bool,
    begin_error: Option<DeviceError>,
    end_error: Option<DeviceError>,
    heartbeat_dead: bool,
    heartbeat_failures: VecDeque<DeviceError>,

    clock: DateTime<Utc>,
    files: Vec<RemoteFile>,
    contents: HashMap<String, Vec<u8>>,
    unflushed: Option<(RemoteFile, u32)>,
    flush_after_lists: u32,
    withhold_takes: bool,
    take_counter: u32,
    take_payload: Option<(Vec<u8>, String)>,
    take_name: Option<String>,

    download_faults: VecDeque<DownloadFault>,
    chunk_size: usize,
    chunk_hook: Option<ChunkHook>,

    calls: FakeCalls,
}

impl FakeState {
    fn new() -> Self {
        let clock = Utc::now() - ChronoDuration::hours(1);
        let old = RemoteFile {
            id: "file-0000".to_string(),
            path: "/DCIM/100FAKE/MVI_0000.MOV".to_string(),
            name: "MVI_0000.MOV".to_string(),
            size: 1024,
            created_at: clock,
        };
        let mut contents = HashMap::new();
        contents.insert(old.id.clone(), vec![7u8; 1024]);

        Self {
            next_session: 0,
            active_session: None,
            stale_claim: false,
            reset_clears_claim: true,
            reset_rejected: false,
            open_failures: VecDeque::new(),
            recording: false,
            ignore_trigger: false,
            begin_error: None,
            end_error: None,
            heartbeat_dead: false,
            heartbeat_failures: VecDeque::new(),
            clock,
            files: vec![old],
            contents,
            unflushed: None,
            flush_after_lists: 0,
            withhold_takes: false,
            take_counter: 0,
            take_payload: None,
            take_name: None,
            download_faults: VecDeque::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_hook: None,
            calls: FakeCalls::default(),
        }
    }

    fn check_handle(&self, handle: &FakeHandle) -> Result<(), DeviceError> {
        if self.active_session == Some(handle.session) {
            Ok(())
        } else {
            Err(DeviceError::Disconnected("stale session handle".to_string()))
        }
    }

    /// Write the take the camera just finished to its card.
    fn store_take(&mut self) {
        self.take_counter += 1;
        self.clock = self.clock + ChronoDuration::seconds(60);

        let (payload, extension) = match &self.take_payload {
            Some((bytes, ext)) => (bytes.clone(), ext.clone()),
            None => (
                (0..DEFAULT_TAKE_SIZE).map(|i| (i % 251) as u8).collect(),
                "MOV".to_string(),
            ),
        };
        let name = self
            .take_name
            .clone()
            .unwrap_or_else(|| format!("MVI_{:04}.{}", self.take_counter, extension));
        let file = RemoteFile {
            id: format!("file-{:04}", self.take_counter),
            path: format!("/DCIM/100FAKE/{}", name),
            name,
            size: payload.len() as u64,
            created_at: self.clock,
        };
        self.contents.insert(file.id.clone(), payload);

        if self.withhold_takes {
            return;
        }
        if self.flush_after_lists == 0 {
            self.files.push(file);
        } else {
            self.unflushed = Some((file, self.flush_after_lists));
        }
    }
}

/// In-memory camera for tests, demos and the CLI simulator.
#[derive(Clone)]
pub struct FakeCamera {
    id: String,
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCamera {
    /// A camera with a unique id and one old file already on its card.
    pub fn new() -> Self {
        Self {
            id: format!("fake-{}", uuid::Uuid::new_v4()),
            state: Arc::new(Mutex::new(FakeState::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn calls(&self) -> FakeCalls {
        self.state().calls
    }

    pub fn is_recording(&self) -> bool {
        self.state().recording
    }

    pub fn remote_files(&self) -> Vec<RemoteFile> {
        self.state().files.clone()
    }

    /// Simulate a claim left behind by a crashed process.
    pub fn set_stale_claim(&self, stale: bool) {
        self.state().stale_claim = stale;
    }

    /// Whether a hardware reset clears a stale claim (default: yes).
    pub fn set_reset_clears_claim(&self, clears: bool) {
        self.state().reset_clears_claim = clears;
    }

    pub fn set_reset_rejected(&self, rejected: bool) {
        self.state().reset_rejected = rejected;
    }

    /// Errors returned, in order, by the next `open_session` calls.
    pub fn push_open_failures(&self, errors: impl IntoIterator<Item = DeviceError>) {
        self.state().open_failures.extend(errors);
    }

    /// The camera accepts record-begin but never starts.
    pub fn set_ignore_trigger(&self, ignore: bool) {
        self.state().ignore_trigger = ignore;
    }

    pub fn set_begin_error(&self, error: Option<DeviceError>) {
        self.state().begin_error = error;
    }

    pub fn set_end_error(&self, error: Option<DeviceError>) {
        self.state().end_error = error;
    }

    /// Stop answering heartbeats with a transient error.
    pub fn set_heartbeat_dead(&self, dead: bool) {
        self.state().heartbeat_dead = dead;
    }

    pub fn push_heartbeat_failures(&self, errors: impl IntoIterator<Item = DeviceError>) {
        self.state().heartbeat_failures.extend(errors);
    }

    /// New takes show up in the listing only after this many list calls.
    pub fn set_flush_after_lists(&self, lists: u32) {
        self.state().flush_after_lists = lists;
    }

    /// Takes are never written to the card.
    pub fn set_withhold_takes(&self, withhold: bool) {
        self.state().withhold_takes = withhold;
    }

    /// Contents and extension of every take recorded from now on.
    pub fn set_take_payload(&self, bytes: Vec<u8>, extension: &str) {
        self.state().take_payload = Some((bytes, extension.to_string()));
    }

    /// File name the camera reports for every take from now on.
    pub fn set_take_name(&self, name: &str) {
        self.state().take_name = Some(name.to_string());
    }

    pub fn push_download_faults(&self, faults: impl IntoIterator<Item = DownloadFault>) {
        self.state().download_faults.extend(faults);
    }

    pub fn set_chunk_size(&self, bytes: usize) {
        self.state().chunk_size = bytes.max(1);
    }

    /// Called after every chunk written during a download. The hook runs
    /// without the camera's lock held.
    pub fn set_chunk_hook(&self, hook: impl FnMut(TransferProgress) + Send + 'static) {
        self.state().chunk_hook = Some(Box::new(hook));
    }

    /// The camera stops on its own (card full, overheating) and writes its file.
    pub fn stop_externally(&self) {
        let mut state = self.state();
        if state.recording {
            state.recording = false;
            state.store_take();
        }
    }
}

impl DeviceCapabilities for FakeCamera {
    type Handle = FakeHandle;

    fn device_id(&self) -> String {
        self.id.clone()
    }

    fn open_session(&mut self) -> Result<FakeHandle, DeviceError> {
        let mut state = self.state();
        state.calls.open_session += 1;
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }
        if state.stale_claim || state.active_session.is_some() {
            return Err(DeviceError::Claimed);
        }
        state.next_session += 1;
        let session = state.next_session;
        state.active_session = Some(session);
        Ok(FakeHandle { session })
    }

    fn close_session(&mut self, handle: FakeHandle) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.calls.close_session += 1;
        state.check_handle(&handle)?;
        state.active_session = None;
        // Closing the session ends a running take, like most tethered bodies do
        if state.recording {
            state.recording = false;
            state.store_take();
        }
        Ok(())
    }

    fn reset_device(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.calls.reset_device += 1;
        if state.reset_rejected {
            return Err(DeviceError::Rejected {
                code: 0x2003,
                reason: "reset refused".to_string(),
            });
        }
        if state.reset_clears_claim {
            state.stale_claim = false;
            state.active_session = None;
        }
        Ok(())
    }

    fn begin_recording(&mut self, handle: &FakeHandle) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.calls.begin_recording += 1;
        state.check_handle(handle)?;
        if let Some(error) = state.begin_error.clone() {
            return Err(error);
        }
        if state.recording {
            return Err(DeviceError::Busy);
        }
        state.recording = !state.ignore_trigger;
        Ok(())
    }

    fn end_recording(&mut self, handle: &FakeHandle) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.calls.end_recording += 1;
        state.check_handle(handle)?;
        if let Some(error) = state.end_error.clone() {
            return Err(error);
        }
        if !state.recording {
            return Err(DeviceError::Rejected {
                code: 0x2019,
                reason: "not recording".to_string(),
            });
        }
        state.recording = false;
        state.store_take();
        Ok(())
    }

    fn list_remote_files(&mut self, handle: &FakeHandle) -> Result<Vec<RemoteFile>, DeviceError> {
        let mut state = self.state();
        state.calls.list_remote_files += 1;
        state.check_handle(handle)?;
        if let Some((file, remaining)) = state.unflushed.take() {
            if remaining <= 1 {
                state.files.push(file);
            } else {
                state.unflushed = Some((file, remaining - 1));
            }
        }
        Ok(state.files.clone())
    }

    fn download_file(
        &mut self,
        handle: &FakeHandle,
        file: &RemoteFile,
        destination: &Path,
        progress: &mut dyn FnMut(TransferProgress) -> ControlFlow<()>,
    ) -> Result<u64, DeviceError> {
        let (payload, fault, chunk_size, mut hook) = {
            let mut state = self.state();
            state.calls.download_file += 1;
            state.check_handle(handle)?;
            let payload = state
                .contents
                .get(&file.id)
                .cloned()
                .ok_or(DeviceError::NotFound)?;
            let fault = state.download_faults.pop_front();
            (payload, fault, state.chunk_size, state.chunk_hook.take())
        };

        let total = payload.len() as u64;
        let limit = if fault.is_some() {
            payload.len() / 2
        } else {
            payload.len()
        };

        let result = write_chunks(
            destination,
            &payload[..limit],
            chunk_size,
            total,
            &mut hook,
            progress,
        )
        .and_then(|written| match fault {
            None | Some(DownloadFault::Truncate) => Ok(written),
            Some(DownloadFault::ShortWrite) => Ok(total),
            Some(DownloadFault::Transient) => {
                Err(DeviceError::Transient("usb pipe stalled".to_string()))
            }
            Some(DownloadFault::Disconnect) => {
                Err(DeviceError::Disconnected("cable pulled".to_string()))
            }
        });

        if let Some(hook) = hook {
            let mut state = self.state();
            if state.chunk_hook.is_none() {
                state.chunk_hook = Some(hook);
            }
        }
        result
    }

    fn heartbeat(&mut self, handle: &FakeHandle) -> Result<DeviceStatus, DeviceError> {
        let mut state = self.state();
        state.calls.heartbeat += 1;
        state.check_handle(handle)?;
        if state.heartbeat_dead {
            return Err(DeviceError::Transient("no response".to_string()));
        }
        if let Some(error) = state.heartbeat_failures.pop_front() {
            return Err(error);
        }
        Ok(DeviceStatus {
            recording: state.recording,
            battery_percent: Some(87),
        })
    }
}

fn write_chunks(
    destination: &Path,
    data: &[u8],
    chunk_size: usize,
    total: u64,
    hook: &mut Option<ChunkHook>,
    progress: &mut dyn FnMut(TransferProgress) -> ControlFlow<()>,
) -> Result<u64, DeviceError> {
    let mut out = std::fs::File::create(destination)
        .map_err(|e| DeviceError::Fatal(format!("cannot create destination: {}", e)))?;
    let mut written = 0u64;
    for chunk in data.chunks(chunk_size) {
        out.write_all(chunk)
            .map_err(|e| DeviceError::Fatal(format!("write failed: {}", e)))?;
        written += chunk.len() as u64;
        let update = TransferProgress {
            transferred: written,
            total,
        };
        if let Some(hook) = hook.as_mut() {
            hook(update);
        }
        if progress(update).is_break() {
            return Err(DeviceError::Cancelled);
        }
    }
    out.flush()
        .map_err(|e| DeviceError::Fatal(format!("flush failed: {}", e)))?;
    Ok(written)
}

/// Session timings scaled down for tests: millisecond timeouts and manual supervision.
pub fn fast_session_config() -> SessionConfig {
    SessionConfig {
        trigger_timeout: Duration::from_millis(300),
        reset_grace: Duration::from_millis(5),
        file_appear_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(2),
        close_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::from_millis(20),
        heartbeat_miss_threshold: 3,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
        },
        download_attempts: 3,
        execution: ExecutionContext::Manual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_open_reports_claim() {
        let mut camera = FakeCamera::new();
        let handle = camera.open_session().unwrap();
        assert_eq!(camera.open_session().unwrap_err(), DeviceError::Claimed);

        camera.close_session(handle).unwrap();
        assert!(camera.open_session().is_ok());
        assert_eq!(camera.calls().open_session, 3);
        assert_eq!(camera.calls().close_session, 1);
    }

    #[test]
    fn test_take_is_written_on_end() {
        let mut camera = FakeCamera::new();
        let handle = camera.open_session().unwrap();
        camera.begin_recording(&handle).unwrap();
        assert!(camera.is_recording());
        camera.end_recording(&handle).unwrap();

        let files = camera.list_remote_files(&handle).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].name, "MVI_0001.MOV");
        assert!(files[1].created_at > files[0].created_at);
    }

    #[test]
    fn test_flush_delay() {
        let mut camera = FakeCamera::new();
        camera.set_flush_after_lists(2);
        let handle = camera.open_session().unwrap();
        camera.begin_recording(&handle).unwrap();
        camera.end_recording(&handle).unwrap();

        assert_eq!(camera.list_remote_files(&handle).unwrap().len(), 1);
        assert_eq!(camera.list_remote_files(&handle).unwrap().len(), 2);
    }

    #[test]
    fn test_stale_handle_is_disconnected() {
        let mut camera = FakeCamera::new();
        let handle = camera.open_session().unwrap();
        camera.reset_device().unwrap();
        assert!(matches!(
            camera.heartbeat(&handle),
            Err(DeviceError::Disconnected(_))
        ));
    }
}
