//! Spectral noise suppression.
//!
//! Frame-synchronous spectral subtraction: an adaptive noise profile is
//! learned during a short calibration phase, then each frame is cleaned in
//! the frequency domain with over-subtraction, a spectral floor, and a
//! voice-band mask that protects speech frequencies.

use serde::Serialize;

use crate::audio_constants::{
    DB_FLOOR, DEFAULT_CALIBRATION_TARGET, DEFAULT_FFT_SIZE, DEFAULT_SAMPLE_RATE,
    NOISE_MIN_TRACKING, NOISE_PROFILE_SMOOTHING, PRE_EMPHASIS_ALPHA, RESIDUAL_RETENTION,
    VOICE_BAND_RETENTION,
};

mod spectral;
pub use spectral::SpectralNoiseSuppressor;

#[cfg(test)]
mod tests;

/// Tuning knobs for the suppressor.
///
/// Fields outside their documented ranges are clamped when the config is
/// handed to the suppressor, so a bad UI slider can never produce NaN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuppressionConfig {
    /// Suppression aggressiveness in [0, 3]. Drives over-subtraction.
    pub aggressiveness: f32,
    /// Scale on the subtracted noise estimate in [0, 1]. This is the knob
    /// the diagnostic's recommendations adjust.
    pub suppression_factor: f32,
    /// Fraction of the original magnitude kept as a floor, in (0, 1).
    /// Prevents musical noise from over-subtracted bins.
    pub spectral_floor: f32,
    /// Exponential smoothing while building the calibration profile.
    pub noise_smoothing: f32,
    /// Minimum-statistics tracking coefficient for the running estimate.
    pub min_tracking: f32,
    /// Frames below this input level are gated down to the spectral floor.
    pub noise_gate_db: f32,
    /// Input below this level is never reported as voice.
    pub min_voice_db: f32,
    /// Voice is reported when the frame SNR exceeds this.
    pub snr_voice_threshold_db: f32,
    /// Pre/de-emphasis coefficient.
    pub pre_emphasis_alpha: f32,
    /// Whether the pre/de-emphasis pair wraps the spectral stage.
    pub enable_emphasis: bool,
    /// Silence frames folded into the profile before suppression starts.
    pub calibration_target: usize,
    /// FFT size in samples; rounded up to a power of two.
    pub fft_size: usize,
    /// Sample rate the voice band is derived from.
    pub sample_rate: u32,
    /// Cleaned-spectrum share kept inside the voice band.
    pub voice_band_retention: f32,
    /// Cleaned-spectrum share kept outside the voice band.
    pub residual_retention: f32,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            aggressiveness: 2.0,
            suppression_factor: 0.8,
            spectral_floor: 0.05,
            noise_smoothing: NOISE_PROFILE_SMOOTHING,
            min_tracking: NOISE_MIN_TRACKING,
            noise_gate_db: -50.0,
            min_voice_db: -30.0,
            snr_voice_threshold_db: -5.0,
            pre_emphasis_alpha: PRE_EMPHASIS_ALPHA,
            enable_emphasis: true,
            calibration_target: DEFAULT_CALIBRATION_TARGET,
            fft_size: DEFAULT_FFT_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            voice_band_retention: VOICE_BAND_RETENTION,
            residual_retention: RESIDUAL_RETENTION,
        }
    }
}

impl SuppressionConfig {
    /// Clamp every field into its valid range.
    pub(crate) fn normalized(mut self) -> Self {
        self.aggressiveness = self.aggressiveness.clamp(0.0, 3.0);
        self.suppression_factor = self.suppression_factor.clamp(0.0, 1.0);
        self.spectral_floor = self.spectral_floor.clamp(0.001, 0.5);
        self.noise_smoothing = self.noise_smoothing.clamp(0.5, 0.999);
        self.min_tracking = self.min_tracking.clamp(0.9, 0.9999);
        self.pre_emphasis_alpha = self.pre_emphasis_alpha.clamp(0.0, 0.99);
        self.calibration_target = self.calibration_target.max(1);
        self.fft_size = self.fft_size.clamp(64, 16_384).next_power_of_two();
        self.sample_rate = self.sample_rate.max(8_000);
        self.voice_band_retention = self.voice_band_retention.clamp(0.0, 1.0);
        self.residual_retention = self.residual_retention.clamp(0.0, 1.0);
        self
    }

    /// Over-subtraction factor derived from aggressiveness.
    pub fn over_subtraction(&self) -> f32 {
        1.2 + 0.2 * self.aggressiveness
    }
}

/// Per-frame quality metrics emitted alongside the cleaned audio.
///
/// All dB fields are clamped at -120; none can be NaN or infinite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseMetrics {
    /// Level of the raw input frame.
    pub input_db: f32,
    /// Level of the current noise estimate.
    pub noise_db: f32,
    /// Level of the cleaned spectrum inside the voice band.
    pub voice_db: f32,
    /// `voice_db - noise_db`.
    pub snr_db: f32,
    /// True when the frame looks like speech.
    pub is_voice_detected: bool,
    /// How much the frame was attenuated, >= 0.
    pub noise_reduction_db: f32,
}

impl NoiseMetrics {
    /// Inert metrics for empty input.
    pub fn quiet() -> Self {
        Self {
            input_db: DB_FLOOR,
            noise_db: DB_FLOOR,
            voice_db: DB_FLOOR,
            snr_db: 0.0,
            is_voice_detected: false,
            noise_reduction_db: 0.0,
        }
    }
}

/// Progress of the noise-floor calibration phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationStatus {
    pub is_calibrated: bool,
    /// Silence frames consumed so far.
    pub frames: usize,
    /// Frames required before suppression activates.
    pub target: usize,
    /// Completion in percent, [0, 100].
    pub progress: f32,
}
