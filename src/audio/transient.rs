use super::AudioBuffer;

/// A located transient (e.g. a slate clap).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransientPeak {
    pub time_seconds: f64,
    pub sample_index: usize,
    /// Smoothed envelope value at the peak
    pub envelope: f64,
}

/// Find the loudest short event: moving-average of |x| over
/// `smoothing_seconds`, then the position of its maximum (first on ties).
///
/// Returns `None` for an empty or fully silent buffer.
pub fn find_transient_peak(buffer: &AudioBuffer, smoothing_seconds: f64) -> Option<TransientPeak> {
    let samples = buffer.samples();
    if samples.is_empty() {
        return None;
    }

    let window = ((smoothing_seconds.max(0.0) * buffer.sample_rate() as f64).round() as usize)
        .clamp(1, samples.len());

    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0f64);
    let mut running = 0.0f64;
    for s in samples {
        running += s.abs() as f64;
        prefix.push(running);
    }

    // Centered window, clipped at the edges
    let before = window / 2;
    let after = window - before;
    let mut best_index = 0usize;
    let mut best_value = f64::NEG_INFINITY;
    for i in 0..samples.len() {
        let lo = i.saturating_sub(before);
        let hi = (i + after).min(samples.len());
        let value = (prefix[hi] - prefix[lo]) / window as f64;
        if value > best_value {
            best_value = value;
            best_index = i;
        }
    }

    if best_value <= 0.0 {
        return None;
    }

    Some(TransientPeak {
        time_seconds: best_index as f64 / buffer.sample_rate() as f64,
        sample_index: best_index,
        envelope: best_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_burst() {
        let rate = 16000;
        let mut samples = vec![0.001f32; rate as usize * 2];
        let onset = 20000;
        for (k, s) in samples[onset..onset + 80].iter_mut().enumerate() {
            *s = if k % 2 == 0 { 0.9 } else { -0.9 };
        }
        let buffer = AudioBuffer::new(samples, rate).unwrap();

        let peak = find_transient_peak(&buffer, 0.005).unwrap();
        assert!(
            (peak.sample_index as i64 - (onset as i64 + 40)).abs() <= 40,
            "peak at {}",
            peak.sample_index
        );
        assert!((peak.time_seconds - 1.25).abs() < 0.01);
    }

    #[test]
    fn test_silence_has_no_peak() {
        let buffer = AudioBuffer::silence(1.0, 8000).unwrap();
        assert!(find_transient_peak(&buffer, 0.005).is_none());

        let empty = AudioBuffer::new(Vec::new(), 8000).unwrap();
        assert!(find_transient_peak(&empty, 0.005).is_none());
    }
}
