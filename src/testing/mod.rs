//! Testing utilities for TetherSync
//!
//! Offline stand-ins for the two outside collaborators: a scriptable camera
//! and deterministic audio, so the session controller and the alignment
//! engine can be exercised without hardware.

pub mod fake_device;
pub mod synthetic_audio;

pub use fake_device::{fast_session_config, DownloadFault, FakeCalls, FakeCamera, FakeHandle};
pub use synthetic_audio::{clap_track, delayed, noise_track, wav_bytes, write_wav};
