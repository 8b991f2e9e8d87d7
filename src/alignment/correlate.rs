use crate::check_invariant;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Peak-to-noise ratio treated as full confidence.
pub const FULL_CONFIDENCE_PEAK_TO_NOISE: f64 = 1000.0;

/// Upper bound on reported peak-to-noise ratios, keeps results serializable.
pub const MAX_PEAK_TO_NOISE: f64 = 1e12;

/// Smallest transform that holds the full linear correlation of the two inputs.
pub fn transform_len(reference_len: usize, candidate_len: usize) -> usize {
    (reference_len + candidate_len).saturating_sub(1).max(1).next_power_of_two()
}

/// Linear cross-correlation `c[k] = Σ r[n+k]·cand[n]` via FFT.
///
/// The result covers lags `-(candidate.len()-1) ..= reference.len()-1` in
/// order, so index `i` is lag `i - (candidate.len()-1)`. A positive lag means
/// the shared event sits later in `reference` than in `candidate`.
pub fn cross_correlate(reference: &[f64], candidate: &[f64]) -> Vec<f64> {
    if reference.is_empty() || candidate.is_empty() {
        return Vec::new();
    }

    let needed = reference.len() + candidate.len() - 1;
    let fft_len = transform_len(reference.len(), candidate.len());
    check_invariant!(
        fft_len >= needed,
        "correlation transform covers both windows"
    );

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let mut spectrum = padded(reference, fft_len);
    let mut candidate_spectrum = padded(candidate, fft_len);
    forward.process(&mut spectrum);
    forward.process(&mut candidate_spectrum);

    for (r, c) in spectrum.iter_mut().zip(candidate_spectrum.iter()) {
        *r *= c.conj();
    }
    inverse.process(&mut spectrum);

    let scale = 1.0 / fft_len as f64;
    let max_negative = (candidate.len() - 1) as i64;
    (0..needed)
        .map(|i| {
            let lag = i as i64 - max_negative;
            let index = if lag < 0 {
                (fft_len as i64 + lag) as usize
            } else {
                lag as usize
            };
            spectrum[index].re * scale
        })
        .collect()
}

fn padded(signal: &[f64], len: usize) -> Vec<Complex<f64>> {
    let mut out: Vec<Complex<f64>> = signal.iter().map(|&s| Complex::new(s, 0.0)).collect();
    out.resize(len, Complex::new(0.0, 0.0));
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// Position of the maximum-magnitude value in the correlation sequence
    pub index: usize,
    pub magnitude: f64,
    /// Peak magnitude over the mean magnitude of every other lag
    pub peak_to_noise: f64,
}

/// First maximum of `|correlation|` and its peak-to-noise ratio.
pub fn locate_peak(correlation: &[f64]) -> Option<CorrelationPeak> {
    let (index, magnitude) = correlation
        .iter()
        .map(|v| v.abs())
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, m)| match best {
            Some((_, b)) if b >= m => best,
            _ => Some((i, m)),
        })?;

    let total: f64 = correlation.iter().map(|v| v.abs()).sum();
    let rest = correlation.len() - 1;
    let peak_to_noise = if magnitude <= 0.0 {
        0.0
    } else if rest == 0 {
        MAX_PEAK_TO_NOISE
    } else {
        let noise = ((total - magnitude) / rest as f64).max(0.0);
        if noise > 0.0 {
            (magnitude / noise).min(MAX_PEAK_TO_NOISE)
        } else {
            MAX_PEAK_TO_NOISE
        }
    };

    Some(CorrelationPeak {
        index,
        magnitude,
        peak_to_noise,
    })
}

/// Sub-sample vertex of the parabola through the peak and its neighbours,
/// in samples relative to `index`, within ±0.5.
pub fn parabolic_offset(correlation: &[f64], index: usize) -> f64 {
    if index == 0 || index + 1 >= correlation.len() {
        return 0.0;
    }
    let left = correlation[index - 1].abs();
    let center = correlation[index].abs();
    let right = correlation[index + 1].abs();
    let curvature = left - 2.0 * center + right;
    if curvature >= 0.0 {
        return 0.0;
    }
    (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
}

/// Log-scaled mapping of a peak-to-noise ratio onto `[0, 1]`.
///
/// A ratio of 1 (peak indistinguishable from background) maps to 0 and
/// [`FULL_CONFIDENCE_PEAK_TO_NOISE`] or more maps to 1.
pub fn confidence_from_peak_to_noise(peak_to_noise: f64) -> f64 {
    if peak_to_noise.is_nan() || peak_to_noise <= 1.0 {
        return 0.0;
    }
    (peak_to_noise.log10() / FULL_CONFIDENCE_PEAK_TO_NOISE.log10()).clamp(0.0, 1.0)
}
