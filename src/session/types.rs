use crate::config::TetherSyncConfig;
use crate::device::{RemoteFile, RetryPolicy, TransferProgress};
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// One take, one physical file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingJob {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub remote_file_id: Option<String>,
    /// Empty until a verified, complete transfer
    pub local_download_path: Option<PathBuf>,
}

impl RecordingJob {
    pub(crate) fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            stopped_at: None,
            remote_file_id: None,
            local_download_path: None,
        }
    }

    /// The camera is (or was, before it went silent) still recording this take.
    pub fn is_in_progress(&self) -> bool {
        self.stopped_at.is_none()
    }

    pub fn is_downloaded(&self) -> bool {
        self.local_download_path.is_some()
    }
}

/// Where the heartbeat loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    /// A named background thread owned by the controller
    #[default]
    DedicatedThread,
    /// The caller drives supervision by calling `supervise()`
    Manual,
}

/// Runtime parameters of a session controller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub trigger_timeout: Duration,
    pub reset_grace: Duration,
    pub file_appear_timeout: Duration,
    pub poll_interval: Duration,
    pub close_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_miss_threshold: u32,
    pub retry: RetryPolicy,
    pub download_attempts: u32,
    pub execution: ExecutionContext,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&TetherSyncConfig::default())
    }
}

impl From<&TetherSyncConfig> for SessionConfig {
    fn from(config: &TetherSyncConfig) -> Self {
        Self {
            trigger_timeout: Duration::from_millis(config.device.trigger_timeout_ms),
            reset_grace: Duration::from_millis(config.device.reset_grace_ms),
            file_appear_timeout: Duration::from_millis(config.device.file_appear_timeout_ms),
            poll_interval: Duration::from_millis(config.device.poll_interval_ms.max(1)),
            close_timeout: Duration::from_millis(config.device.close_timeout_ms),
            heartbeat_interval: Duration::from_millis(config.heartbeat.interval_ms.max(1)),
            heartbeat_miss_threshold: config.heartbeat.miss_threshold.max(1),
            retry: RetryPolicy::from(&config.retry),
            download_attempts: config.download.max_attempts.max(1),
            execution: ExecutionContext::DedicatedThread,
        }
    }
}

impl SessionConfig {
    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }
}

/// Notifications published by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// The device reported a stale claim and a hardware reset was issued
    ForceUnlockIssued,
    HeartbeatMissed {
        consecutive: u32,
    },
    /// The camera stopped answering; the take's metadata is preserved
    CameraUnresponsive {
        missed: u32,
        job: Option<RecordingJob>,
    },
    /// A heartbeat came back saying the camera is no longer recording
    RecordingInterrupted,
    DownloadProgress(TransferProgress),
    DownloadRetry {
        attempt: u32,
        reason: String,
    },
    DownloadComplete {
        path: PathBuf,
    },
    /// A new take started while an earlier one was still waiting for download.
    /// The file stays on the card but the session no longer tracks it.
    PendingTakeDropped(RemoteFile),
    Closed,
}

/// Result of one supervision tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Nothing to supervise (not recording)
    Skipped,
    Alive,
    Missed { consecutive: u32 },
    /// The miss threshold was reached on this tick
    Locked,
}

/// Point-in-time view of a session, safe to hand to any thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub device_id: String,
    pub state: SessionState,
    pub has_handle: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub missed_heartbeats: u32,
    pub pending_file: Option<RemoteFile>,
    pub job: Option<RecordingJob>,
}

impl SessionSnapshot {
    /// Remote path of the take awaiting download, if any.
    pub fn pending_file_path(&self) -> Option<&str> {
        self.pending_file.as_ref().map(|f| f.path.as_str())
    }
}

/// Mutable session bookkeeping guarded by the controller's status lock.
#[derive(Debug)]
pub(crate) struct SessionStatus {
    pub state: SessionState,
    pub job: Option<RecordingJob>,
    pub pending: Option<RemoteFile>,
    pub baseline_files: HashSet<String>,
    pub handle_held: bool,
    pub missed_heartbeats: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// A heartbeat already reported the camera stopped on its own
    pub interrupted: bool,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            job: None,
            pending: None,
            baseline_files: HashSet::new(),
            handle_held: false,
            missed_heartbeats: 0,
            last_heartbeat: None,
            interrupted: false,
        }
    }
}
