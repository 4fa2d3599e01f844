//! Microphone test and environment calibration.
//!
//! Captures a few seconds of audio, measures the noise floor and speech
//! level with a percentile analysis, and maps the resulting SNR onto
//! recommended suppressor settings. This is the one place in the crate that
//! touches a device and the only operation that can fail.

use log::{info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::audio_constants::{CLIPPING_THRESHOLD, DEFAULT_DIAGNOSTIC_DURATION_MS};
use crate::capture::{AudioBuffer, AudioCaptureBackend, AudioCaptureError, TARGET_SAMPLE_RATE};
use crate::levels::linear_to_db;
use crate::suppressor::SuppressionConfig;
use crate::vad::VadConfig;

/// Set this env var to a file path to dump the captured test audio as WAV.
pub const DIAGNOSTIC_WAV_ENV: &str = "VOICEGATE_DIAGNOSTIC_WAV";

/// How often the capture buffer is drained during a test.
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("audio capture failed: {0}")]
    Capture(#[from] AudioCaptureError),
}

/// Suppressor settings derived from the measured environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecommendedSettings {
    pub suppression_factor: f32,
    pub noise_gate_db: f32,
    /// Linear amplitude threshold for voice activity.
    pub voice_activity_threshold: f32,
}

impl RecommendedSettings {
    /// Settings used when the environment is unknown or unremarkable.
    pub fn baseline() -> Self {
        Self {
            suppression_factor: 0.7,
            noise_gate_db: -50.0,
            voice_activity_threshold: 0.02,
        }
    }

    /// Map a measured SNR onto settings. Noisier environments get stronger
    /// suppression, a higher gate, and a less sensitive VAD.
    pub fn for_snr(snr_db: f32) -> Self {
        if snr_db < 5.0 {
            Self {
                suppression_factor: 0.95,
                noise_gate_db: -35.0,
                voice_activity_threshold: 0.035,
            }
        } else if snr_db < 10.0 {
            Self {
                suppression_factor: 0.85,
                noise_gate_db: -42.0,
                voice_activity_threshold: 0.028,
            }
        } else if snr_db < 15.0 {
            Self {
                suppression_factor: 0.75,
                noise_gate_db: -48.0,
                voice_activity_threshold: 0.022,
            }
        } else if snr_db >= 20.0 {
            Self {
                suppression_factor: 0.5,
                noise_gate_db: -58.0,
                voice_activity_threshold: 0.012,
            }
        } else {
            Self::baseline()
        }
    }

    /// The VAD threshold expressed in dB.
    pub fn voice_activity_threshold_db(&self) -> f32 {
        linear_to_db(self.voice_activity_threshold)
    }

    /// Feed the recommendation into a suppressor config.
    pub fn apply_to(&self, config: &mut SuppressionConfig) {
        config.suppression_factor = self.suppression_factor;
        config.noise_gate_db = self.noise_gate_db;
    }

    /// Feed the recommendation into a VAD config.
    pub fn apply_to_vad(&self, config: &mut VadConfig) {
        config.threshold_db = self.voice_activity_threshold_db();
    }
}

/// Result of a microphone test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioTestResult {
    /// 5th percentile of absolute amplitude, in dB.
    pub noise_floor_db: f32,
    /// 95th percentile of absolute amplitude, in dB.
    pub speech_level_db: f32,
    pub snr_db: f32,
    pub clipping_detected: bool,
    pub recommended: RecommendedSettings,
}

impl AudioTestResult {
    /// Returned when no audio was captured at all.
    fn fallback() -> Self {
        Self {
            noise_floor_db: -80.0,
            speech_level_db: -60.0,
            snr_db: 0.0,
            clipping_detected: false,
            recommended: RecommendedSettings::baseline(),
        }
    }
}

/// Cancels a running diagnostic from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Microphone diagnostic over any capture backend.
pub struct AudioDiagnostic<B: AudioCaptureBackend> {
    backend: B,
    cancel: Arc<AtomicBool>,
}

impl<B: AudioCaptureBackend> AudioDiagnostic<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cancelling a test in progress.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Run a test with the default 5 second duration.
    pub async fn test_default(&mut self) -> Result<AudioTestResult, DiagnosticError> {
        self.test_audio_input(Duration::from_millis(DEFAULT_DIAGNOSTIC_DURATION_MS))
            .await
    }

    /// Capture `duration` of audio and analyze it.
    ///
    /// Device or stream failure is the only error; capturing nothing (e.g.
    /// cancelled immediately) yields the fallback result instead.
    pub async fn test_audio_input(
        &mut self,
        duration: Duration,
    ) -> Result<AudioTestResult, DiagnosticError> {
        self.cancel.store(false, Ordering::SeqCst);

        let capacity = TARGET_SAMPLE_RATE as usize * (duration.as_secs() as usize + 2);
        let buffer = AudioBuffer::with_capacity(capacity);
        let rate = self.backend.start(buffer.clone(), None)?;
        info!("diagnostic capture started ({} Hz, {:?})", rate, duration);

        let deadline = tokio::time::Instant::now() + duration;
        let mut samples: Vec<f32> = Vec::new();
        loop {
            samples.extend(buffer.drain_samples());
            if self.cancel.load(Ordering::SeqCst) {
                info!("diagnostic cancelled after {} samples", samples.len());
                break;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep_until(deadline.min(now + DRAIN_INTERVAL)).await;
        }

        if let Err(e) = self.backend.stop() {
            warn!("failed to stop capture cleanly: {}", e);
        }
        samples.extend(buffer.drain_samples());

        maybe_dump_wav(&samples);
        Ok(analyze_samples(&samples))
    }
}

/// Percentile analysis over the captured samples.
fn analyze_samples(samples: &[f32]) -> AudioTestResult {
    if samples.is_empty() {
        warn!("no audio captured, reporting fallback result");
        return AudioTestResult::fallback();
    }

    let mut sorted: Vec<f32> = samples.iter().map(|s| s.abs()).collect();
    sorted.sort_unstable_by(f32::total_cmp);

    let index = |fraction: f32| -> usize {
        ((sorted.len() as f32 * fraction) as usize).min(sorted.len() - 1)
    };
    let noise_floor_db = linear_to_db(sorted[index(0.05)]);
    let speech_level_db = linear_to_db(sorted[index(0.95)]);
    let snr_db = speech_level_db - noise_floor_db;
    let clipping_detected = sorted
        .last()
        .map(|&peak| peak > CLIPPING_THRESHOLD)
        .unwrap_or(false);

    info!(
        "diagnostic: noise floor {:.1} dB, speech {:.1} dB, SNR {:.1} dB, clipping {}",
        noise_floor_db, speech_level_db, snr_db, clipping_detected
    );

    AudioTestResult {
        noise_floor_db,
        speech_level_db,
        snr_db,
        clipping_detected,
        recommended: RecommendedSettings::for_snr(snr_db),
    }
}

/// Dump the captured audio when the debug env var names a path.
fn maybe_dump_wav(samples: &[f32]) {
    let path = match std::env::var(DIAGNOSTIC_WAV_ENV) {
        Ok(path) if !path.is_empty() => path,
        _ => return,
    };
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    match hound::WavWriter::create(&path, spec) {
        Ok(mut writer) => {
            for &sample in samples {
                if writer.write_sample(sample).is_err() {
                    warn!("failed while writing diagnostic wav to {}", path);
                    return;
                }
            }
            match writer.finalize() {
                Ok(()) => info!("wrote diagnostic wav to {}", path),
                Err(e) => warn!("failed to finalize diagnostic wav: {}", e),
            }
        }
        Err(e) => warn!("failed to create diagnostic wav {}: {}", path, e),
    }
}

#[cfg(test)]
#[path = "diagnostics_test.rs"]
mod tests;
