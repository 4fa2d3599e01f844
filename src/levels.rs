//! Shared level math: RMS, peak, and dB conversion.

use crate::audio_constants::AMPLITUDE_EPSILON;

/// Root-mean-square of a sample slice. Empty input yields 0.0.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Largest absolute sample value. Empty input yields 0.0.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Linear amplitude to dB, clamped at the epsilon floor so silent or
/// denormal input maps to -120 dB instead of -inf/NaN.
pub fn linear_to_db(value: f32) -> f32 {
    20.0 * value.max(AMPLITUDE_EPSILON).log10()
}

/// RMS over an inclusive bin range of a magnitude spectrum.
pub fn band_rms(magnitudes: &[f32], low: usize, high: usize) -> f32 {
    if magnitudes.is_empty() || low >= magnitudes.len() {
        return 0.0;
    }
    let high = high.min(magnitudes.len() - 1);
    rms(&magnitudes[low..=high])
}
