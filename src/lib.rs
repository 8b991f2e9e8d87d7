//! TetherSync: tethered camera control and clap-based sync for DAW sessions
//!
//! Two loosely coupled parts:
//! - [`session::DeviceSessionController`] drives one camera through
//!   connect, record, stop and download, supervises it with a heartbeat and
//!   recovers from stale hardware claims.
//! - [`alignment::AlignmentEngine`] finds the offset between the camera's
//!   audio and a reference recording by FFT cross-correlation, with a
//!   peak-to-noise confidence.
//!
//! They meet only through file paths and plain values; [`take::finish_take`]
//! strings them together.
//!
//! ```rust,ignore
//! use tethersync::{AlignmentEngine, AutoDecoder, DeviceSessionController, SessionConfig};
//!
//! let controller = DeviceSessionController::new(camera, SessionConfig::default())?;
//! controller.open()?;
//! controller.start_recording()?;
//! // ... performance ...
//! let outcome = tethersync::take::finish_take(
//!     &controller,
//!     "takes".as_ref(),
//!     Some("mix.wav".as_ref()),
//!     &AutoDecoder::default(),
//!     &AlignmentEngine::default(),
//! )?;
//! ```
pub mod alignment;
pub mod audio;
pub mod config;
pub mod device;
pub mod errors;
pub mod invariants;
pub mod session;
pub mod take;

// Testing utilities - fake camera and synthetic audio for offline testing
pub mod testing;

// Re-exports for convenience
pub use alignment::{AlignmentConfig, AlignmentEngine, AlignmentResult};
pub use audio::{AudioBuffer, AudioDecoder, AutoDecoder, FfmpegDecoder, WavDecoder};
pub use config::TetherSyncConfig;
pub use device::{DeviceCapabilities, DeviceStatus, RemoteFile, RetryPolicy, TransferProgress};
pub use errors::{DeviceError, SyncError};
pub use session::{
    DeviceSessionController, ExecutionContext, HeartbeatOutcome, RecordingJob, SessionConfig,
    SessionEvent, SessionSnapshot, SessionState,
};
pub use take::{finish_take, SyncStatus, TakeOutcome};

/// Initialize logging
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "tethersync=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
