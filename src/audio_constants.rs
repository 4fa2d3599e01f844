//! Centralized audio pipeline constants.
//!
//! All tunable magic numbers live here with their rationale so the DSP
//! modules stay free of unexplained literals.

/// Target sample rate for the pipeline (16 kHz mono, speech band).
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Default FFT size for spectral subtraction (64 ms at 16 kHz).
/// Must be a power of two; the suppressor rounds up otherwise.
pub const DEFAULT_FFT_SIZE: usize = 1024;

/// Number of silence frames folded into the noise profile before
/// suppression activates.
pub const DEFAULT_CALIBRATION_TARGET: usize = 120;

/// Exponential smoothing applied while building the noise profile.
pub const NOISE_PROFILE_SMOOTHING: f32 = 0.95;

/// Minimum-statistics tracking coefficient for the running noise estimate.
/// Close to 1.0 so the estimate adapts slowly and never latches onto speech.
pub const NOISE_MIN_TRACKING: f32 = 0.998;

/// Pre-emphasis coefficient, standard for speech front-ends.
pub const PRE_EMPHASIS_ALPHA: f32 = 0.97;

/// Highpass cutoff for removing low-frequency rumble (HVAC, desk thumps).
pub const HIGHPASS_CUTOFF_HZ: f32 = 80.0;

/// Lower edge of the protected voice band.
pub const VOICE_BAND_LOW_HZ: f32 = 300.0;

/// Upper edge of the protected voice band (telephone-band speech).
pub const VOICE_BAND_HIGH_HZ: f32 = 3400.0;

/// Fraction of the cleaned spectrum kept inside the voice band.
pub const VOICE_BAND_RETENTION: f32 = 0.95;

/// Fraction of the cleaned spectrum kept outside the voice band.
pub const RESIDUAL_RETENTION: f32 = 0.7;

/// Floor for amplitude values before dB conversion. Maps to -120 dB and
/// keeps every metric finite on silent input.
pub const AMPLITUDE_EPSILON: f32 = 1e-6;

/// dB value corresponding to [`AMPLITUDE_EPSILON`].
pub const DB_FLOOR: f32 = -120.0;

/// Absolute sample value treated as clipping.
pub const CLIPPING_THRESHOLD: f32 = 0.99;

/// Session RMS below this is flagged as a too-quiet microphone (-30 dBFS).
pub const QUIET_THRESHOLD_RMS: f32 = 0.0316;

/// Default VAD energy threshold.
pub const DEFAULT_VAD_THRESHOLD_DB: f32 = -40.0;

/// Energy must stay above threshold this long before speech is reported.
pub const DEFAULT_VAD_MIN_DURATION_MS: u64 = 100;

/// Speech persists through gaps shorter than this (hysteresis).
pub const DEFAULT_VAD_MAX_SILENCE_MS: u64 = 800;

/// Exponential smoothing factor for the VAD energy envelope.
pub const DEFAULT_VAD_SMOOTHING: f32 = 0.7;

/// Entries retained in the VAD energy history backing the confidence score.
pub const ENERGY_HISTORY_SIZE: usize = 50;

/// A completed user turn shorter than this is treated as an unfinished
/// utterance when deciding whether the AI may take the floor.
pub const MIN_USER_SPEECH_MS: u64 = 300;

/// Quiet buffer enforced after a turn change before the user may start.
pub const TURN_CHANGE_BUFFER_MS: u64 = 200;

/// Default microphone test length for the diagnostic.
pub const DEFAULT_DIAGNOSTIC_DURATION_MS: u64 = 5_000;

/// Map the protected voice band to FFT bin indices for a given sample rate.
///
/// Returns an inclusive `(low, high)` bin range, clamped to the spectrum
/// half covered by the noise profile.
pub fn voice_band_bins(sample_rate: u32, fft_size: usize) -> (usize, usize) {
    let hz_per_bin = sample_rate as f32 / fft_size as f32;
    let max_bin = fft_size / 2 - 1;
    let low = (VOICE_BAND_LOW_HZ / hz_per_bin).floor() as usize;
    let high = (VOICE_BAND_HIGH_HZ / hz_per_bin).ceil() as usize;
    (low.min(max_bin), high.min(max_bin))
}
