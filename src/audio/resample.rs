use crate::errors::SyncError;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const SINC_LEN: usize = 128;
const OVERSAMPLING: usize = 128;

/// Band-limited sample rate conversion of a mono signal.
///
/// The whole signal goes through one `SincFixedIn` chunk. The input is padded
/// with silence so the kernel's tail drains, then the resampler's output delay
/// is cut off so sample `n` of the result sits at time `n / to_rate`, the same
/// instant as the input. When downsampling the cutoff follows the target
/// Nyquist.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, SyncError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(SyncError::InvalidAudio("sample rate must be positive".into()));
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: OVERSAMPLING,
        window: WindowFunction::BlackmanHarris2,
    };

    // Enough trailing silence to flush the kernel at either ratio
    let tail = 2 * SINC_LEN + (SINC_LEN as f64 / ratio).ceil() as usize;
    let mut padded = Vec::with_capacity(samples.len() + tail);
    padded.extend_from_slice(samples);
    padded.resize(samples.len() + tail, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, padded.len(), 1)
        .map_err(|e| SyncError::InvalidAudio(format!("Resampler error: {}", e)))?;
    let delay = resampler.output_delay();

    let input = vec![padded];
    let output = resampler
        .process(&input, None)
        .map_err(|e| SyncError::InvalidAudio(format!("Resample failed: {}", e)))?;

    let mut channel = output.into_iter().next().unwrap_or_default();
    let start = delay.min(channel.len());
    let mut aligned = channel.split_off(start);
    aligned.resize(out_len, 0.0);
    Ok(aligned)
}
