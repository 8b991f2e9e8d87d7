//! End-to-end alignment on synthetic slate recordings.

use tempfile::TempDir;
use tethersync::alignment::{AlignmentConfig, AlignmentEngine};
use tethersync::audio::{AudioBuffer, WavDecoder};
use tethersync::errors::SyncError;
use tethersync::take::align_files;
use tethersync::testing::{clap_track, delayed, noise_track, write_wav};

const RATE: u32 = 8000;
/// One sample at `RATE`, plus rounding slack.
const ONE_SAMPLE: f64 = 1.0 / RATE as f64 + 1e-9;

fn engine() -> AlignmentEngine {
    AlignmentEngine::default()
}

#[test]
fn test_identical_recordings_align_at_zero() {
    let track = clap_track(RATE, 2.0, 0.8, 0.01, 1);
    let result = engine().align(&track, &track, 60.0).unwrap();

    assert_eq!(result.lag_samples, 0);
    assert!(result.offset_seconds.abs() <= ONE_SAMPLE);
    assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
    assert!(result.is_usable());
    assert_eq!(result.sample_rate, RATE);
}

#[test]
fn test_injected_delay_is_recovered() {
    let camera = clap_track(RATE, 2.0, 0.4, 0.01, 2);
    let reference = delayed(&camera, 0.731);

    let result = engine().align(&reference, &camera, 60.0).unwrap();
    assert!(
        (result.offset_seconds - 0.731).abs() <= ONE_SAMPLE,
        "offset {}",
        result.offset_seconds
    );
    assert!(result.is_usable());
    assert!((result.candidate_position(12.0) - 12.731).abs() <= ONE_SAMPLE);
}

#[test]
fn test_swapping_inputs_negates_offset() {
    let reference = clap_track(RATE, 2.0, 1.3, 0.02, 3);
    let camera = clap_track(RATE, 2.0, 0.45, 0.02, 4);

    let forward = engine().align(&reference, &camera, 60.0).unwrap();
    let backward = engine().align(&camera, &reference, 60.0).unwrap();
    assert!((forward.offset_seconds - 0.85).abs() <= ONE_SAMPLE);
    assert!((forward.offset_seconds + backward.offset_seconds).abs() <= ONE_SAMPLE);
}

#[test]
fn test_uncorrelated_noise_is_not_usable() {
    let a = noise_track(RATE, 2.0, 0.5, 10);
    let b = noise_track(RATE, 2.0, 0.5, 11);

    let result = engine().align(&a, &b, 60.0).unwrap();
    assert!(result.confidence < 0.5, "confidence {}", result.confidence);
    assert!(!result.is_usable());
}

#[test]
fn test_silent_camera_track() {
    let reference = clap_track(RATE, 2.0, 0.5, 0.01, 5);
    let camera = AudioBuffer::silence(2.0, RATE).unwrap();

    let result = engine().align(&reference, &camera, 60.0).unwrap();
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.offset_seconds, 0.0);
}

#[test]
fn test_too_short_to_analyze() {
    let reference = clap_track(RATE, 2.0, 0.5, 0.01, 6);
    let blip = AudioBuffer::new(vec![0.5; 10], RATE).unwrap();
    let empty = AudioBuffer::new(Vec::new(), RATE).unwrap();

    for short in [&blip, &empty] {
        assert!(matches!(
            engine().align(&reference, short, 60.0),
            Err(SyncError::InsufficientAudio(_))
        ));
        assert!(matches!(
            engine().align(short, &reference, 60.0),
            Err(SyncError::InsufficientAudio(_))
        ));
    }
}

#[test]
fn test_mixed_sample_rates() {
    // Same physical clap time base, rendered natively at both rates
    let reference = clap_track(16_000, 2.0, 0.7, 0.0, 7);
    let camera = clap_track(RATE, 2.0, 0.3, 0.0, 8);

    let result = engine().align(&reference, &camera, 60.0).unwrap();
    assert_eq!(result.sample_rate, RATE);
    assert!(
        (result.offset_seconds - 0.4).abs() <= ONE_SAMPLE,
        "offset {}",
        result.offset_seconds
    );
    assert!(result.is_usable());

    let swapped = engine().align(&camera, &reference, 60.0).unwrap();
    assert!((swapped.offset_seconds + 0.4).abs() <= ONE_SAMPLE);
}

#[test]
fn test_stereo_camera_audio_is_downmixed() {
    let mono = clap_track(RATE, 2.0, 0.6, 0.01, 9);
    let interleaved: Vec<f32> = mono
        .samples()
        .iter()
        .flat_map(|&s| [s, s * 0.5])
        .collect();
    let stereo = AudioBuffer::from_interleaved(&interleaved, 2, RATE).unwrap();
    let reference = delayed(&mono, 0.2);

    let result = engine().align(&reference, &stereo, 60.0).unwrap();
    assert!((result.offset_seconds - 0.2).abs() <= ONE_SAMPLE);
}

#[test]
fn test_search_window_ignores_later_audio() {
    // A louder clap outside the window must not win
    let early = clap_track(RATE, 6.0, 0.5, 0.005, 12);
    let mut samples = early.samples().to_vec();
    let late = clap_track(RATE, 6.0, 4.5, 0.0, 13);
    for (s, l) in samples.iter_mut().zip(late.samples()) {
        *s += 3.0 * l;
    }
    let camera = AudioBuffer::new(samples, RATE).unwrap();
    let reference = delayed(&early, 0.25).truncated(6.0);

    let result = engine().align(&reference, &camera, 2.0).unwrap();
    assert_eq!(result.search_window_seconds, 2.0);
    assert!((result.offset_seconds - 0.25).abs() <= ONE_SAMPLE);
}

#[test]
fn test_default_window_comes_from_config() {
    let engine = AlignmentEngine::new(AlignmentConfig {
        search_window_seconds: 1.5,
        ..AlignmentConfig::default()
    });
    let camera = clap_track(RATE, 3.0, 0.2, 0.01, 14);
    let reference = delayed(&camera, 0.5);

    let result = engine.align_default(&reference, &camera).unwrap();
    assert_eq!(result.search_window_seconds, 1.5);
    assert!((result.offset_seconds - 0.5).abs() <= ONE_SAMPLE);
}

#[test]
fn test_refined_offset_stays_near_integer_lag() {
    let engine = AlignmentEngine::new(AlignmentConfig {
        refine_peak: true,
        ..AlignmentConfig::default()
    });
    let camera = clap_track(RATE, 2.0, 0.3, 0.01, 15);
    let reference = delayed(&camera, 0.1);

    let result = engine.align(&reference, &camera, 60.0).unwrap();
    assert!((result.offset_seconds - 0.1).abs() <= ONE_SAMPLE);
}

#[test]
fn test_transient_cross_check_agrees() {
    let camera = clap_track(RATE, 2.0, 0.3, 0.001, 16);
    let reference = delayed(&camera, 0.6);

    let coarse = engine().transient_offset(&reference, &camera, 60.0).unwrap();
    let fine = engine().align(&reference, &camera, 60.0).unwrap();
    assert!((coarse - fine.offset_seconds).abs() < 0.01);
}

#[test]
fn test_align_wav_files() {
    let dir = TempDir::new().unwrap();
    let camera = clap_track(RATE, 2.0, 0.5, 0.01, 17);
    let reference = delayed(&camera, 0.125);

    let reference_path = dir.path().join("mix.wav");
    let camera_path = dir.path().join("camera.wav");
    write_wav(&reference_path, &reference).unwrap();
    write_wav(&camera_path, &camera).unwrap();

    let result = align_files(&reference_path, &camera_path, &WavDecoder, &engine()).unwrap();
    assert!((result.offset_seconds - 0.125).abs() <= ONE_SAMPLE);
    assert!(result.is_usable());

    let json = serde_json::to_value(&result).unwrap();
    assert!(json["offset_seconds"].is_number());
    assert_eq!(json["usable"], true);
}

#[test]
fn test_missing_file_is_decode_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.wav");
    assert!(matches!(
        align_files(&missing, &missing, &WavDecoder, &engine()),
        Err(SyncError::Decode(_))
    ));
}
