//! Device SDK boundary
//!
//! The session controller talks to camera hardware only through
//! [`DeviceCapabilities`]. A vendor binding (or the fake in
//! [`crate::testing`]) implements it; nothing above this layer knows how the
//! commands reach the camera.

mod retry;

pub use retry::RetryPolicy;

use crate::errors::DeviceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::path::Path;

/// A file stored on the camera's card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Stable identifier assigned by the device
    pub id: String,
    /// Path on the card, e.g. `/DCIM/100CANON/MVI_0042.MOV`
    pub path: String,
    /// File name used for the local copy
    pub name: String,
    /// Size in bytes as reported by the device
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Liveness answer to a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Whether the camera reports an active recording
    pub recording: bool,
    pub battery_percent: Option<u8>,
}

/// Byte counts reported while a transfer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.transferred.min(self.total) * 100) / self.total) as u8
    }
}

/// The capability set a camera binding must provide.
///
/// Every call returns a typed [`DeviceError`] on failure. Implementations must
/// not retry internally; retry policy belongs to the controller.
pub trait DeviceCapabilities: Send + 'static {
    /// Opaque reference to an open session. Owned exclusively by the controller.
    type Handle: Send + 'static;

    /// Identifier of the physical device, used to prevent double claims.
    fn device_id(&self) -> String;

    /// Claim the device. Returns [`DeviceError::Claimed`] when a previous
    /// session (possibly from a crashed process) still holds it.
    fn open_session(&mut self) -> Result<Self::Handle, DeviceError>;

    fn close_session(&mut self, handle: Self::Handle) -> Result<(), DeviceError>;

    /// Hardware reset that clears a stale claim. Needs no open session.
    fn reset_device(&mut self) -> Result<(), DeviceError>;

    fn begin_recording(&mut self, handle: &Self::Handle) -> Result<(), DeviceError>;

    fn end_recording(&mut self, handle: &Self::Handle) -> Result<(), DeviceError>;

    fn list_remote_files(&mut self, handle: &Self::Handle) -> Result<Vec<RemoteFile>, DeviceError>;

    /// Copy `file` to `destination`, reporting progress as it goes.
    ///
    /// Returning `ControlFlow::Break` from `progress` asks the transfer to stop;
    /// the implementation then returns [`DeviceError::Cancelled`]. On success the
    /// number of bytes written is returned.
    fn download_file(
        &mut self,
        handle: &Self::Handle,
        file: &RemoteFile,
        destination: &Path,
        progress: &mut dyn FnMut(TransferProgress) -> ControlFlow<()>,
    ) -> Result<u64, DeviceError>;

    fn heartbeat(&mut self, handle: &Self::Handle) -> Result<DeviceStatus, DeviceError>;
}
