//! Deterministic test signals
//!
//! The clap is a sum of decaying partials below 3 kHz, so it can be rendered
//! natively at any rate of 8 kHz or more and the renderings line up sample
//! for sample after rate conversion.

use crate::audio::AudioBuffer;
use crate::errors::SyncError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::io::Cursor;
use std::path::Path;

const CLAP_PARTIALS: [(f64, f64); 5] = [
    (620.0, 0.0),
    (1130.0, 1.1),
    (1790.0, 2.3),
    (2430.0, 0.7),
    (2950.0, 1.9),
];
const CLAP_DECAY_SECONDS: f64 = 0.015;
const CLAP_ATTACK_SECONDS: f64 = 0.0005;
const CLAP_LENGTH_SECONDS: f64 = 0.2;

fn clap_value(t: f64) -> f64 {
    if !(0.0..CLAP_LENGTH_SECONDS).contains(&t) {
        return 0.0;
    }
    let envelope = (1.0 - (-t / CLAP_ATTACK_SECONDS).exp()) * (-t / CLAP_DECAY_SECONDS).exp();
    let tone: f64 = CLAP_PARTIALS
        .iter()
        .map(|(freq, phase)| (2.0 * PI * freq * t + phase).sin())
        .sum();
    0.9 * envelope * tone / CLAP_PARTIALS.len() as f64
}

/// `duration_seconds` of background noise at `noise_level` with a clap at `clap_at_seconds`.
pub fn clap_track(
    sample_rate: u32,
    duration_seconds: f64,
    clap_at_seconds: f64,
    noise_level: f32,
    seed: u64,
) -> AudioBuffer {
    let len = (duration_seconds * sample_rate as f64).round() as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..len)
        .map(|n| {
            let t = n as f64 / sample_rate as f64;
            clap_value(t - clap_at_seconds) as f32 + rng.gen_range(-1.0f32..=1.0) * noise_level
        })
        .collect();
    buffer(samples, sample_rate)
}

/// Uniform white noise in `[-level, level]`; same seed, same noise.
pub fn noise_track(sample_rate: u32, duration_seconds: f64, level: f32, seed: u64) -> AudioBuffer {
    let len = (duration_seconds * sample_rate as f64).round() as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..len).map(|_| rng.gen_range(-1.0f32..=1.0) * level).collect();
    buffer(samples, sample_rate)
}

/// `source` preceded by `delay_seconds` of silence.
pub fn delayed(source: &AudioBuffer, delay_seconds: f64) -> AudioBuffer {
    let pad = (delay_seconds.max(0.0) * source.sample_rate() as f64).round() as usize;
    let mut samples = vec![0.0f32; pad];
    samples.extend_from_slice(source.samples());
    buffer(samples, source.sample_rate())
}

fn buffer(samples: Vec<f32>, sample_rate: u32) -> AudioBuffer {
    AudioBuffer::new(samples, sample_rate.max(1))
        .unwrap_or_else(|_| unreachable!("sample rate is positive"))
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    }
}

/// Write `audio` as a mono 32-bit float WAV file.
pub fn write_wav(path: &Path, audio: &AudioBuffer) -> Result<(), SyncError> {
    let mut writer = hound::WavWriter::create(path, wav_spec(audio.sample_rate()))
        .map_err(|e| SyncError::Decode(format!("{}: {}", path.display(), e)))?;
    for &sample in audio.samples() {
        writer
            .write_sample(sample)
            .map_err(|e| SyncError::Decode(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| SyncError::Decode(e.to_string()))
}

/// The bytes of a mono 32-bit float WAV file holding `audio`.
pub fn wav_bytes(audio: &AudioBuffer) -> Result<Vec<u8>, SyncError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(audio.sample_rate()))
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        for &sample in audio.samples() {
            writer
                .write_sample(sample)
                .map_err(|e| SyncError::Decode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| SyncError::Decode(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}
