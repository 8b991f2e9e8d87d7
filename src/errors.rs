use crate::session::SessionState;
use std::time::Duration;
use thiserror::Error;

/// Operation-level failures surfaced to callers of the session controller and the
/// alignment engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Device locked: {0}")]
    DeviceLocked(String),

    #[error("Hardware rejected command: {0}")]
    HardwareRejected(String),

    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Download incomplete after {attempts} attempts: received {received} of {expected} bytes")]
    DownloadIncomplete {
        attempts: u32,
        expected: u64,
        received: u64,
    },

    #[error("Download cancelled")]
    Cancelled,

    #[error("No new recording appeared on the device within {0:?}")]
    RecordingNotFound(Duration),

    #[error("Insufficient audio: {0}")]
    InsufficientAudio(String),

    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub(crate) fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        SyncError::InvalidState { operation, state }
    }
}

/// Typed outcomes reported by the device SDK layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// USB/transport hiccup; the command may be retried.
    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("device not found")]
    NotFound,

    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// Another (possibly dead) session still holds the device.
    #[error("device already claimed by another session")]
    Claimed,

    #[error("device busy")]
    Busy,

    #[error("storage full")]
    StorageFull,

    #[error("command rejected (code {code:#010x}): {reason}")]
    Rejected { code: u32, reason: String },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("fatal SDK error: {0}")]
    Fatal(String),
}

impl DeviceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Transient(_))
    }

    /// Semantic refusals. Retrying these could repeat a physical side effect.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DeviceError::NotFound
                | DeviceError::Busy
                | DeviceError::StorageFull
                | DeviceError::Rejected { .. }
        )
    }
}
