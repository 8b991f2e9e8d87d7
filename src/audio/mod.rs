//! Audio input for alignment
//!
//! Submodules:
//! - `buffer`: immutable mono sample buffer
//! - `resample`: band-limited rate conversion
//! - `decode`: WAV (hound) and ffmpeg-backed decoders
//! - `transient`: envelope peak (clap) detection

mod buffer;
mod decode;
mod resample;
mod transient;

pub use buffer::AudioBuffer;
pub use decode::{AudioDecoder, AutoDecoder, FfmpegDecoder, WavDecoder};
pub use resample::resample;
pub use transient::{find_transient_peak, TransientPeak};
