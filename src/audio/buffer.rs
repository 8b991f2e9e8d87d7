//! Decoded mono audio
//!
//! # Spell: AudioBufferMono
//! ^ Intent: hold one immutable mono signal with its sample rate as alignment input
//!
//! @AudioBuffer
//!   : (samples, sample_rate) -> AudioBuffer
//!   ! mono_only
//!   ! immutable_after_construction
//!   ! non_finite_samples_zeroed
//!   - in_place_mutation

use super::resample::resample;
use crate::errors::SyncError;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(mut samples: Vec<f32>, sample_rate: u32) -> Result<Self, SyncError> {
        if sample_rate == 0 {
            return Err(SyncError::InvalidAudio("sample rate must be positive".into()));
        }
        for sample in samples.iter_mut() {
            if !sample.is_finite() {
                *sample = 0.0;
            }
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    /// Down-mix interleaved multi-channel samples by averaging each frame.
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(
        interleaved: &[f32],
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, SyncError> {
        if channels == 0 {
            return Err(SyncError::InvalidAudio("channel count must be positive".into()));
        }
        if channels == 1 {
            return Self::new(interleaved.to_vec(), sample_rate);
        }

        let width = channels as usize;
        let mono = interleaved
            .chunks_exact(width)
            .map(|frame| {
                let sum: f32 = frame
                    .iter()
                    .map(|s| if s.is_finite() { *s } else { 0.0 })
                    .sum();
                sum / width as f32
            })
            .collect();
        Self::new(mono, sample_rate)
    }

    pub fn silence(seconds: f64, sample_rate: u32) -> Result<Self, SyncError> {
        let len = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn peak_amplitude(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let energy: f64 = self.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (energy / self.samples.len() as f64).sqrt()
    }

    /// The first `seconds` of audio. Shares storage when nothing is cut.
    pub fn truncated(&self, seconds: f64) -> AudioBuffer {
        let limit = (seconds.max(0.0) * self.sample_rate as f64).floor() as usize;
        if limit >= self.samples.len() {
            return self.clone();
        }
        Self {
            samples: self.samples[..limit].into(),
            sample_rate: self.sample_rate,
        }
    }

    /// This signal at `target_rate`. Returns a shared copy when the rate already matches.
    pub fn resampled(&self, target_rate: u32) -> Result<AudioBuffer, SyncError> {
        if target_rate == 0 {
            return Err(SyncError::InvalidAudio("target rate must be positive".into()));
        }
        if target_rate == self.sample_rate {
            return Ok(self.clone());
        }
        Ok(Self {
            samples: resample(&self.samples, self.sample_rate, target_rate)?.into(),
            sample_rate: target_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_rate() {
        assert!(matches!(
            AudioBuffer::new(vec![0.0; 10], 0),
            Err(SyncError::InvalidAudio(_))
        ));
    }

    #[test]
    fn test_non_finite_samples_are_zeroed() {
        let buffer = AudioBuffer::new(vec![f32::NAN, 0.5, f32::INFINITY], 8000).unwrap();
        assert_eq!(buffer.samples(), &[0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_stereo_downmix() {
        let interleaved = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0, 0.25];
        let buffer = AudioBuffer::from_interleaved(&interleaved, 2, 48000).unwrap();
        assert_eq!(buffer.samples(), &[0.5, 0.5, 0.0]);
        assert_eq!(buffer.sample_rate(), 48000);
    }

    #[test]
    fn test_truncation() {
        let buffer = AudioBuffer::new(vec![0.1; 1000], 100).unwrap();
        assert_eq!(buffer.truncated(2.5).len(), 250);
        assert_eq!(buffer.truncated(60.0).len(), 1000);
        assert!((buffer.duration_seconds() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_level_measurements() {
        let buffer = AudioBuffer::new(vec![0.5, -0.5, 0.5, -0.5], 4).unwrap();
        assert_eq!(buffer.peak_amplitude(), 0.5);
        assert!((buffer.rms() - 0.5).abs() < 1e-9);
    }
}
