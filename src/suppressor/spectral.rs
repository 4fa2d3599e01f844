//! Core spectral subtraction engine.

use log::{debug, info, warn};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use super::{CalibrationStatus, NoiseMetrics, SuppressionConfig};
use crate::audio_constants::{voice_band_bins, AMPLITUDE_EPSILON, DB_FLOOR};
use crate::levels::{band_rms, linear_to_db, rms};
use crate::preprocessing::{DeEmphasisFilter, PreEmphasisFilter};

/// Spectral subtraction denoiser with adaptive noise-floor calibration.
///
/// Frames of any length are processed in `fft_size` blocks (the last block
/// is zero-padded and the output truncated), so the returned frame always
/// has the caller's length. Until calibration completes, frames pass
/// through untouched apart from the pre/de-emphasis pair, which cancels.
pub struct SpectralNoiseSuppressor {
    config: SuppressionConfig,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Restores the RMS the analysis window removes (1 / sqrt(mean(w^2))).
    window_compensation: f32,
    /// Inclusive bin range covering 300-3400 Hz.
    voice_band: (usize, usize),

    /// Calibrated noise floor, one magnitude per bin.
    noise_profile: Vec<f32>,
    /// Minimum-statistics running estimate, seeded from the profile.
    smoothed_noise: Vec<f32>,
    calibration_frames: usize,
    calibrated: bool,

    pre_emphasis: PreEmphasisFilter,
    de_emphasis: DeEmphasisFilter,
    scratch: Vec<Complex<f32>>,
}

impl SpectralNoiseSuppressor {
    pub fn new(config: SuppressionConfig) -> Self {
        let config = config.normalized();
        let fft_size = config.fft_size;
        let bins = fft_size / 2;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let window = hann_window(fft_size);
        let window_compensation = window_compensation(&window);

        Self {
            voice_band: voice_band_bins(config.sample_rate, fft_size),
            pre_emphasis: PreEmphasisFilter::with_alpha(config.pre_emphasis_alpha),
            de_emphasis: DeEmphasisFilter::with_alpha(config.pre_emphasis_alpha),
            noise_profile: vec![AMPLITUDE_EPSILON; bins],
            smoothed_noise: vec![AMPLITUDE_EPSILON; bins],
            calibration_frames: 0,
            calibrated: false,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            fft_size,
            fft,
            ifft,
            window,
            window_compensation,
            config,
        }
    }

    /// Fold one silence frame into the noise profile.
    ///
    /// Ignored once the profile is complete or when the frame is empty, so
    /// callers may keep feeding frames without checking state first.
    pub fn calibrate(&mut self, frame: &[f32]) {
        if self.calibrated || frame.is_empty() {
            return;
        }

        let mut work = frame[..frame.len().min(self.fft_size)].to_vec();
        if self.config.enable_emphasis {
            self.pre_emphasis.process_inplace(&mut work);
        }
        let spectrum = self.magnitude_spectrum(&work);

        if self.calibration_frames == 0 {
            self.noise_profile.copy_from_slice(&spectrum);
        } else {
            let alpha = self.config.noise_smoothing;
            for (profile, &mag) in self.noise_profile.iter_mut().zip(&spectrum) {
                *profile = alpha * *profile + (1.0 - alpha) * mag;
            }
        }

        self.calibration_frames += 1;
        if self.calibration_frames >= self.config.calibration_target {
            for (track, &profile) in self.smoothed_noise.iter_mut().zip(&self.noise_profile) {
                *track = profile.max(AMPLITUDE_EPSILON);
            }
            self.calibrated = true;
            info!(
                "noise profile calibrated after {} frames (floor {:.1} dB)",
                self.calibration_frames,
                linear_to_db(rms(&self.noise_profile))
            );
        }
    }

    /// Clean one frame, returning the processed samples and frame metrics.
    ///
    /// The output length always equals the input length. Empty input yields
    /// an empty frame with inert metrics; this path never fails or panics.
    pub fn process(&mut self, frame: &[f32]) -> (Vec<f32>, NoiseMetrics) {
        if frame.is_empty() {
            return (Vec::new(), NoiseMetrics::quiet());
        }
        let input_db = linear_to_db(rms(frame));

        let mut work = frame.to_vec();
        if self.config.enable_emphasis {
            self.pre_emphasis.process_inplace(&mut work);
        }

        let mut output;
        let mut orig_spectrum = Vec::new();
        let mut clean_spectrum = Vec::new();

        if self.calibrated {
            output = Vec::with_capacity(work.len());
            for (idx, block) in work.chunks(self.fft_size).enumerate() {
                let (block_out, orig, clean) = self.process_block(block);
                output.extend_from_slice(&block_out[..block.len()]);
                if idx == 0 {
                    orig_spectrum = orig;
                    clean_spectrum = clean;
                }
            }
        } else {
            // Pass-through until the noise floor is known; spectrum is
            // still computed so metrics stay meaningful.
            let head = &work[..work.len().min(self.fft_size)];
            orig_spectrum = self.magnitude_spectrum(head);
            clean_spectrum = orig_spectrum.clone();
            output = work;
        }

        if self.config.enable_emphasis {
            self.de_emphasis.process_inplace(&mut output);
        }

        if self.calibrated && input_db < self.config.noise_gate_db {
            debug!("noise gate engaged at {:.1} dB", input_db);
            for sample in output.iter_mut() {
                *sample *= self.config.spectral_floor;
            }
        }

        let metrics = self.frame_metrics(input_db, &orig_spectrum, &clean_spectrum);
        (output, metrics)
    }

    /// Process a single block: window, FFT, subtract, mask, reconstruct.
    ///
    /// Returns the full `fft_size` output (callers truncate) plus the
    /// original and cleaned magnitude spectra for metrics.
    fn process_block(&mut self, block: &[f32]) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let n = self.fft_size;
        let bins = n / 2;

        let compensation = self.windowed_fft(block);
        let orig: Vec<f32> = self.scratch[..bins].iter().map(|c| c.norm()).collect();

        self.update_noise_tracking(&orig);
        let clean = self.subtract_and_mask(&orig);

        // Apply the per-bin gains to the complex spectrum so phase is
        // untouched, then rebuild the conjugate-symmetric upper half.
        for i in 0..bins {
            let gain = clean[i] / orig[i].max(AMPLITUDE_EPSILON);
            self.scratch[i] *= gain;
            if i > 0 {
                self.scratch[n - i] = self.scratch[i].conj();
            }
        }
        self.scratch[0].im = 0.0;
        self.scratch[bins].im = 0.0;

        self.ifft.process(&mut self.scratch);
        let scale = compensation / n as f32;
        let out: Vec<f32> = self.scratch.iter().map(|c| c.re * scale).collect();

        (out, orig, clean)
    }

    /// Window the block, zero-pad to `fft_size`, and run the forward FFT
    /// into `scratch`. Returns the gain restoring the RMS the window
    /// removed.
    ///
    /// Blocks shorter than `fft_size` get a Hann window of their own
    /// length; tapering them with the front ramp of the full window would
    /// both skew the analysis and sink most of the block's energy.
    fn windowed_fft(&mut self, block: &[f32]) -> f32 {
        let short_window;
        let (window, compensation): (&[f32], f32) = if block.len() >= self.fft_size {
            (&self.window, self.window_compensation)
        } else {
            short_window = hann_window(block.len());
            (&short_window, window_compensation(&short_window))
        };

        self.scratch.clear();
        self.scratch.extend(
            block
                .iter()
                .zip(window.iter())
                .map(|(&s, &w)| Complex::new(s * w, 0.0)),
        );
        self.scratch.resize(self.fft_size, Complex::new(0.0, 0.0));
        self.fft.process(&mut self.scratch);
        compensation
    }

    /// Minimum-statistics update: the estimate leaks slowly upward and
    /// snaps down immediately, so it follows the noise floor under speech.
    fn update_noise_tracking(&mut self, spectrum: &[f32]) {
        let c = self.config.min_tracking;
        for (track, &mag) in self.smoothed_noise.iter_mut().zip(spectrum) {
            let leaked = c * *track + (1.0 - c) * mag;
            *track = leaked.min(mag).max(AMPLITUDE_EPSILON);
        }
    }

    /// Over-subtraction with a spectral floor, then the voice-band mask.
    fn subtract_and_mask(&self, spectrum: &[f32]) -> Vec<f32> {
        let over = self.config.over_subtraction() * self.config.suppression_factor;
        let boost = 1.0 + 0.1 * self.config.aggressiveness;
        let (low, high) = self.voice_band;

        spectrum
            .iter()
            .enumerate()
            .map(|(i, &mag)| {
                let noise = self.smoothed_noise[i] * boost;
                let subtracted = (mag - over * noise).max(self.config.spectral_floor * mag);
                let retention = if i >= low && i <= high {
                    self.config.voice_band_retention
                } else {
                    self.config.residual_retention
                };
                subtracted * retention + mag * (1.0 - retention)
            })
            .collect()
    }

    /// Windowed magnitude spectrum of up to one block, zero-padded.
    fn magnitude_spectrum(&mut self, block: &[f32]) -> Vec<f32> {
        self.windowed_fft(block);
        self.scratch[..self.fft_size / 2]
            .iter()
            .map(|c| c.norm())
            .collect()
    }

    fn frame_metrics(&self, input_db: f32, orig: &[f32], clean: &[f32]) -> NoiseMetrics {
        let (low, high) = self.voice_band;
        let voice_db = linear_to_db(band_rms(clean, low, high));
        let noise_db = if self.calibrated {
            linear_to_db(rms(&self.smoothed_noise))
        } else {
            DB_FLOOR
        };
        let snr_db = voice_db - noise_db;
        let reduction = (linear_to_db(rms(orig)) - linear_to_db(rms(clean))).max(0.0);

        NoiseMetrics {
            input_db,
            noise_db,
            voice_db,
            snr_db,
            is_voice_detected: snr_db > self.config.snr_voice_threshold_db
                && input_db > self.config.min_voice_db,
            noise_reduction_db: reduction,
        }
    }

    /// Discard the noise profile and restart calibration.
    pub fn reset(&mut self) {
        self.noise_profile.fill(AMPLITUDE_EPSILON);
        self.smoothed_noise.fill(AMPLITUDE_EPSILON);
        self.calibration_frames = 0;
        self.calibrated = false;
        self.pre_emphasis.reset();
        self.de_emphasis.reset();
        debug!("noise profile reset");
    }

    /// Swap in a new configuration.
    ///
    /// Changing the FFT size, sample rate, or emphasis coefficient rebuilds
    /// the spectral layout and restarts calibration; other fields take
    /// effect on the next frame.
    pub fn update_config(&mut self, config: SuppressionConfig) {
        let config = config.normalized();
        let rebuild = config.fft_size != self.config.fft_size
            || config.sample_rate != self.config.sample_rate
            || config.pre_emphasis_alpha != self.config.pre_emphasis_alpha;
        if rebuild {
            warn!("spectral layout changed, restarting calibration");
            *self = Self::new(config);
        } else {
            self.config = config;
        }
    }

    pub fn config(&self) -> &SuppressionConfig {
        &self.config
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// The calibrated per-bin noise floor (`fft_size / 2` magnitudes).
    pub fn noise_profile(&self) -> &[f32] {
        &self.noise_profile
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        let target = self.config.calibration_target;
        CalibrationStatus {
            is_calibrated: self.calibrated,
            frames: self.calibration_frames,
            target,
            progress: (self.calibration_frames as f32 / target as f32 * 100.0).min(100.0),
        }
    }
}

impl std::fmt::Debug for SpectralNoiseSuppressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralNoiseSuppressor")
            .field("fft_size", &self.fft_size)
            .field("calibrated", &self.calibrated)
            .field("calibration_frames", &self.calibration_frames)
            .finish_non_exhaustive()
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Gain that restores the RMS a window removes: `1 / sqrt(mean(w^2))`.
fn window_compensation(window: &[f32]) -> f32 {
    let power =
        window.iter().map(|w| w * w).sum::<f32>() / window.len().max(1) as f32;
    1.0 / power.sqrt().max(AMPLITUDE_EPSILON)
}
