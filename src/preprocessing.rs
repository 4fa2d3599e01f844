//! Stateful speech preprocessing filters.
//!
//! - Highpass: 2nd-order Butterworth removing sub-80 Hz rumble before the
//!   spectral stage sees it.
//! - Pre-emphasis / de-emphasis: the matched FIR/IIR pair wrapped around
//!   spectral subtraction. With identical coefficients and zeroed state the
//!   pair is an identity, which is what makes the uncalibrated pass-through
//!   path transparent.
//!
//! All filters keep state across calls so arbitrary frame boundaries do not
//! introduce discontinuities. Call `reset()` between sessions.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};

use crate::audio_constants::{HIGHPASS_CUTOFF_HZ, PRE_EMPHASIS_ALPHA};

/// Butterworth highpass for low-frequency rumble.
pub struct HighpassFilter {
    filter: DirectForm2Transposed<f32>,
}

impl HighpassFilter {
    /// Create a highpass at the default 80 Hz cutoff.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_cutoff(sample_rate, HIGHPASS_CUTOFF_HZ)
    }

    /// Create a highpass with a custom cutoff frequency.
    pub fn with_cutoff(sample_rate: u32, cutoff_hz: f32) -> Self {
        // Only fails for non-positive or super-Nyquist cutoffs, which the
        // constants rule out.
        let coeffs = Coefficients::<f32>::from_params(
            Type::HighPass,
            sample_rate.hz(),
            cutoff_hz.hz(),
            Q_BUTTERWORTH_F32,
        )
        .expect("valid highpass filter coefficients");

        Self {
            filter: DirectForm2Transposed::<f32>::new(coeffs),
        }
    }

    pub fn reset(&mut self) {
        self.filter.reset_state();
    }

    pub fn process_inplace(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.filter.run(*sample);
        }
    }
}

/// Pre-emphasis: `y[n] = x[n] - alpha * x[n-1]`.
///
/// Boosts the high end before spectral subtraction so consonants survive
/// the magnitude floor.
pub struct PreEmphasisFilter {
    alpha: f32,
    prev_input: f32,
}

impl PreEmphasisFilter {
    pub fn new() -> Self {
        Self::with_alpha(PRE_EMPHASIS_ALPHA)
    }

    pub fn with_alpha(alpha: f32) -> Self {
        Self {
            alpha,
            prev_input: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.prev_input = 0.0;
    }

    pub fn process_inplace(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let input = *sample;
            *sample = input - self.alpha * self.prev_input;
            self.prev_input = input;
        }
    }
}

impl Default for PreEmphasisFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// De-emphasis: `y[n] = x[n] + alpha * y[n-1]`, the inverse of
/// [`PreEmphasisFilter`] with the same coefficient.
pub struct DeEmphasisFilter {
    alpha: f32,
    prev_output: f32,
}

impl DeEmphasisFilter {
    pub fn new() -> Self {
        Self::with_alpha(PRE_EMPHASIS_ALPHA)
    }

    pub fn with_alpha(alpha: f32) -> Self {
        Self {
            alpha,
            prev_output: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.prev_output = 0.0;
    }

    pub fn process_inplace(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let output = *sample + self.alpha * self.prev_output;
            *sample = output;
            self.prev_output = output;
        }
    }
}

impl Default for DeEmphasisFilter {
    fn default() -> Self {
        Self::new()
    }
}
