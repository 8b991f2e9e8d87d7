//! Clap-based time alignment of two recordings
//!
//! [`AlignmentEngine::align`] looks only at the opening search window of
//! each buffer (the slate is expected there), brings both to the lower of
//! their two sample rates, and cross-correlates them in the frequency domain.
//! The result carries a signed offset and a scale-invariant confidence; a
//! weak match is still a result, never an error.

mod correlate;

pub use correlate::{
    confidence_from_peak_to_noise, cross_correlate, locate_peak, parabolic_offset,
    transform_len, CorrelationPeak, FULL_CONFIDENCE_PEAK_TO_NOISE, MAX_PEAK_TO_NOISE,
};

use crate::audio::{find_transient_peak, AudioBuffer};
use crate::config::AlignmentSettings;
use crate::errors::SyncError;
use serde::{Deserialize, Serialize};

/// Signals whose mean power (after DC removal) is below this are treated as silent.
const SILENCE_POWER: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Used by [`AlignmentEngine::align_default`]
    pub search_window_seconds: f64,
    /// Minimum confidence for a result to be labelled usable
    pub usable_confidence: f64,
    /// Buffers shorter than this (at the common rate) are rejected
    pub analysis_frame_seconds: f64,
    /// Parabolic interpolation around the correlation peak
    pub refine_peak: bool,
    pub transient_smoothing_seconds: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self::from(&AlignmentSettings::default())
    }
}

impl From<&AlignmentSettings> for AlignmentConfig {
    fn from(settings: &AlignmentSettings) -> Self {
        Self {
            search_window_seconds: settings.search_window_seconds,
            usable_confidence: settings.usable_confidence,
            analysis_frame_seconds: settings.analysis_frame_seconds,
            refine_peak: settings.refine_peak,
            transient_smoothing_seconds: settings.transient_smoothing_seconds,
        }
    }
}

/// Outcome of one alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// Positive: the camera (candidate) track must be shifted later
    pub offset_seconds: f64,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub search_window_seconds: f64,
    /// Common rate the correlation ran at
    pub sample_rate: u32,
    pub lag_samples: i64,
    pub peak_to_noise: f64,
    pub usable: bool,
}

impl AlignmentResult {
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    pub fn sample_period(&self) -> f64 {
        1.0 / self.sample_rate as f64
    }

    /// Timeline position for the camera item when the reference starts at
    /// `reference_start` (seconds).
    pub fn candidate_position(&self, reference_start: f64) -> f64 {
        reference_start + self.offset_seconds
    }
}

/// Stateless apart from its configuration; safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct AlignmentEngine {
    config: AlignmentConfig,
}

impl AlignmentEngine {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    pub fn align_default(
        &self,
        reference: &AudioBuffer,
        candidate: &AudioBuffer,
    ) -> Result<AlignmentResult, SyncError> {
        self.align(reference, candidate, self.config.search_window_seconds)
    }

    pub fn align(
        &self,
        reference: &AudioBuffer,
        candidate: &AudioBuffer,
        search_window_seconds: f64,
    ) -> Result<AlignmentResult, SyncError> {
        if !search_window_seconds.is_finite() || search_window_seconds <= 0.0 {
            return Err(SyncError::Config(format!(
                "search window must be positive, got {}",
                search_window_seconds
            )));
        }

        let (reference, candidate) =
            self.prepare(reference, candidate, search_window_seconds)?;
        let sample_rate = reference.sample_rate();

        let reference = centered(reference.samples());
        let candidate = centered(candidate.samples());

        if is_silent(&reference) || is_silent(&candidate) {
            log::debug!("Alignment input is silent; reporting zero confidence");
            return Ok(AlignmentResult {
                offset_seconds: 0.0,
                confidence: 0.0,
                search_window_seconds,
                sample_rate,
                lag_samples: 0,
                peak_to_noise: 0.0,
                usable: false,
            });
        }

        let correlation = cross_correlate(&reference, &candidate);
        let peak = locate_peak(&correlation).ok_or_else(|| {
            SyncError::InsufficientAudio("empty correlation".to_string())
        })?;

        let lag_samples = peak.index as i64 - (candidate.len() as i64 - 1);
        let fraction = if self.config.refine_peak {
            parabolic_offset(&correlation, peak.index)
        } else {
            0.0
        };
        let offset_seconds = (lag_samples as f64 + fraction) / sample_rate as f64;
        let confidence = confidence_from_peak_to_noise(peak.peak_to_noise);
        let usable = confidence >= self.config.usable_confidence;

        log::info!(
            "Aligned at {:+.4}s (lag {} @ {} Hz), confidence {:.2} (pnr {:.1}){}",
            offset_seconds,
            lag_samples,
            sample_rate,
            confidence,
            peak.peak_to_noise,
            if usable { "" } else { ", below usable threshold" }
        );

        Ok(AlignmentResult {
            offset_seconds,
            confidence,
            search_window_seconds,
            sample_rate,
            lag_samples,
            peak_to_noise: peak.peak_to_noise,
            usable,
        })
    }

    /// Offset implied by the loudest transient in each buffer
    /// (`t_reference - t_candidate`), or `None` when either is silent.
    pub fn transient_offset(
        &self,
        reference: &AudioBuffer,
        candidate: &AudioBuffer,
        search_window_seconds: f64,
    ) -> Option<f64> {
        let smoothing = self.config.transient_smoothing_seconds;
        let r = find_transient_peak(&reference.truncated(search_window_seconds), smoothing)?;
        let c = find_transient_peak(&candidate.truncated(search_window_seconds), smoothing)?;
        Some(r.time_seconds - c.time_seconds)
    }

    /// Window, bring to a common rate and check the length floor.
    fn prepare(
        &self,
        reference: &AudioBuffer,
        candidate: &AudioBuffer,
        search_window_seconds: f64,
    ) -> Result<(AudioBuffer, AudioBuffer), SyncError> {
        let common_rate = reference.sample_rate().min(candidate.sample_rate());

        let reference = reference
            .truncated(search_window_seconds)
            .resampled(common_rate)?;
        let candidate = candidate
            .truncated(search_window_seconds)
            .resampled(common_rate)?;

        let frame = ((self.config.analysis_frame_seconds.max(0.0) * common_rate as f64).ceil()
            as usize)
            .max(1);
        for (name, buffer) in [("reference", &reference), ("candidate", &candidate)] {
            if buffer.len() < frame {
                return Err(SyncError::InsufficientAudio(format!(
                    "{} has {} samples at {} Hz, need at least {}",
                    name,
                    buffer.len(),
                    common_rate,
                    frame
                )));
            }
        }

        Ok((reference, candidate))
    }
}

fn centered(samples: &[f32]) -> Vec<f64> {
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len().max(1) as f64;
    samples.iter().map(|&s| s as f64 - mean).collect()
}

fn is_silent(samples: &[f64]) -> bool {
    let power = samples.iter().map(|s| s * s).sum::<f64>() / samples.len().max(1) as f64;
    power < SILENCE_POWER
}
