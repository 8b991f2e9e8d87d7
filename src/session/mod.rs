//! Camera session lifecycle
//!
//! [`DeviceSessionController`] owns one device handle and moves it through
//! `Idle → Connecting → Ready → Recording → Stopping → Downloading → Idle`,
//! with `Locked` for hardware faults and stale claims and `Failed` for
//! unrecoverable errors. A heartbeat supervises the camera while it records.

mod controller;
pub mod registry;
mod state;
mod types;

pub use controller::{DeviceSessionController, DownloadCancel};
pub use state::SessionState;
pub use types::{
    ExecutionContext, HeartbeatOutcome, RecordingJob, SessionConfig, SessionEvent,
    SessionSnapshot,
};
