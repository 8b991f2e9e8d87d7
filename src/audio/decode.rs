//! File → [`AudioBuffer`]
//!
//! WAV is read in-process with `hound`. Everything else (camera movie files in
//! particular) goes through an external `ffmpeg`, which hands back mono
//! little-endian f32 at the analysis rate.

use super::AudioBuffer;
use crate::config::DecodeConfig;
use crate::errors::SyncError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub trait AudioDecoder: Send + Sync {
    /// Decode at most `max_seconds` from the start of `path`, down-mixed to mono.
    fn decode(&self, path: &Path, max_seconds: Option<f64>) -> Result<AudioBuffer, SyncError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &Path, max_seconds: Option<f64>) -> Result<AudioBuffer, SyncError> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| SyncError::Decode(format!("{}: {}", path.display(), e)))?;

        let spec = reader.spec();
        let channels = spec.channels;
        let sample_rate = spec.sample_rate;
        let limit = match max_seconds {
            Some(seconds) => {
                (seconds.max(0.0) * sample_rate as f64).floor() as usize * channels as usize
            }
            None => usize::MAX,
        };

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .take(limit)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| SyncError::Decode(format!("failed to read float samples: {}", e)))?,
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample;
                let max_val = (1i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .take(limit)
                    .map(|s| s.map(|v| v as f32 / max_val))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| SyncError::Decode(format!("failed to read int samples: {}", e)))?
            }
        };

        log::debug!(
            "Decoded {} ({} Hz, {} ch, {} samples)",
            path.display(),
            sample_rate,
            channels,
            samples.len()
        );
        AudioBuffer::from_interleaved(&samples, channels, sample_rate)
    }
}

/// Extracts the first audio stream of any container ffmpeg understands.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    pub binary: PathBuf,
    pub sample_rate: u32,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::from(&DecodeConfig::default())
    }
}

impl From<&DecodeConfig> for FfmpegDecoder {
    fn from(config: &DecodeConfig) -> Self {
        Self {
            binary: PathBuf::from(&config.ffmpeg_binary),
            sample_rate: config.analysis_sample_rate,
        }
    }
}

impl FfmpegDecoder {
    fn arguments(&self, path: &Path, max_seconds: Option<f64>) -> Vec<String> {
        let mut args = vec!["-v".to_string(), "error".to_string(), "-nostdin".to_string()];
        if let Some(seconds) = max_seconds {
            args.push("-t".to_string());
            args.push(format!("{}", seconds.max(0.0)));
        }
        args.push("-i".to_string());
        args.push(path.display().to_string());
        args.extend(
            ["-vn", "-f", "f32le", "-ac", "1", "-ar"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.sample_rate.to_string());
        args.push("pipe:1".to_string());
        args
    }
}

impl AudioDecoder for FfmpegDecoder {
    fn decode(&self, path: &Path, max_seconds: Option<f64>) -> Result<AudioBuffer, SyncError> {
        if !path.exists() {
            return Err(SyncError::Decode(format!("{} does not exist", path.display())));
        }

        let output = Command::new(&self.binary)
            .args(self.arguments(path, max_seconds))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SyncError::Decode(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Decode(format!(
                "ffmpeg exited with {} for {}: {}",
                output.status,
                path.display(),
                stderr.trim()
            )));
        }

        let samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        log::debug!(
            "ffmpeg extracted {} samples at {} Hz from {}",
            samples.len(),
            self.sample_rate,
            path.display()
        );
        AudioBuffer::new(samples, self.sample_rate)
    }
}

/// WAV files in-process, anything else through ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct AutoDecoder {
    pub wav: WavDecoder,
    pub ffmpeg: FfmpegDecoder,
}

impl From<&DecodeConfig> for AutoDecoder {
    fn from(config: &DecodeConfig) -> Self {
        Self {
            wav: WavDecoder,
            ffmpeg: FfmpegDecoder::from(config),
        }
    }
}

impl AutoDecoder {
    pub fn is_wav(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
            .unwrap_or(false)
    }
}

impl AudioDecoder for AutoDecoder {
    fn decode(&self, path: &Path, max_seconds: Option<f64>) -> Result<AudioBuffer, SyncError> {
        if Self::is_wav(path) {
            self.wav.decode(path, max_seconds)
        } else {
            self.ffmpeg.decode(path, max_seconds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_stereo_i16(path: &Path, frames: &[(i16, i16)], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for (l, r) in frames {
            writer.write_sample(*l).unwrap();
            writer.write_sample(*r).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_wav_int_is_scaled_and_downmixed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        write_stereo_i16(&path, &[(16384, 16384), (-32768, 0), (0, 0)], 8000);

        let buffer = WavDecoder.decode(&path, None).unwrap();
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.len(), 3);
        assert!((buffer.samples()[0] - 0.5).abs() < 1e-6);
        assert!((buffer.samples()[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_wav_respects_max_seconds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("long.wav");
        let frames = vec![(1000i16, 1000i16); 8000];
        write_stereo_i16(&path, &frames, 4000);

        let buffer = WavDecoder.decode(&path, Some(0.5)).unwrap();
        assert_eq!(buffer.len(), 2000);
    }

    #[test]
    fn test_missing_wav_is_decode_error() {
        let result = WavDecoder.decode(Path::new("/nonexistent/take.wav"), None);
        assert!(matches!(result, Err(SyncError::Decode(_))));
    }

    #[test]
    fn test_missing_ffmpeg_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("take.mov");
        std::fs::write(&path, b"not really a movie").unwrap();

        let decoder = FfmpegDecoder {
            binary: PathBuf::from("/nonexistent/ffmpeg-binary"),
            sample_rate: 16000,
        };
        assert!(matches!(
            decoder.decode(&path, Some(60.0)),
            Err(SyncError::Decode(_))
        ));
    }

    #[test]
    fn test_ffmpeg_arguments() {
        let decoder = FfmpegDecoder::default();
        let args = decoder.arguments(Path::new("clip.mov"), Some(15.0));
        assert_eq!(
            args,
            vec![
                "-v", "error", "-nostdin", "-t", "15", "-i", "clip.mov", "-vn", "-f", "f32le",
                "-ac", "1", "-ar", "16000", "pipe:1"
            ]
        );
    }

    #[test]
    fn test_auto_dispatch_by_extension() {
        assert!(AutoDecoder::is_wav(Path::new("a/b/ref.WAV")));
        assert!(AutoDecoder::is_wav(Path::new("ref.wave")));
        assert!(!AutoDecoder::is_wav(Path::new("MVI_0042.MOV")));
        assert!(!AutoDecoder::is_wav(Path::new("noext")));
    }
}
