//! Per-frame pipeline facade: suppressor -> VAD -> conversation flow.
//!
//! One `process_frame` call cleans a microphone frame, classifies it as
//! speech or silence, and drives the turn-taking state machine. The
//! `transmit` flag in the outcome tells the caller whether the frame
//! belongs to an open user turn and should be sent upstream.

use log::info;
use serde::Serialize;

use crate::audio_constants::{CLIPPING_THRESHOLD, QUIET_THRESHOLD_RMS};
use crate::diagnostics::RecommendedSettings;
use crate::flow::ConversationFlowManager;
use crate::suppressor::{
    CalibrationStatus, NoiseMetrics, SpectralNoiseSuppressor, SuppressionConfig,
};
use crate::vad::{VadConfig, VadError, VadState, VoiceActivityDetector};

/// Combined configuration for the full pipeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineConfig {
    pub suppression: SuppressionConfig,
    pub vad: VadConfig,
}

/// Everything produced by one frame of processing.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    /// The cleaned frame, same length as the input.
    pub samples: Vec<f32>,
    pub metrics: NoiseMetrics,
    pub vad: VadState,
    /// True while the frame belongs to an open user turn.
    pub transmit: bool,
}

/// Session-level input problems worth surfacing to the user once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityWarning {
    /// Session RMS below -30 dBFS; the microphone is probably misconfigured.
    TooQuiet,
    /// Input samples exceeded the clipping threshold.
    Clipping,
}

/// Session RMS is only judged after this much audio (1 s at 16 kHz),
/// otherwise a quiet lead-in would trigger a false warning.
const QUIET_CHECK_MIN_SAMPLES: u64 = 16_000;

/// Running input statistics for quality warnings.
#[derive(Debug, Default)]
struct SessionStats {
    frames: u64,
    samples: u64,
    sum_squares: f64,
    peak: f32,
    clipped_samples: u64,
    warned_quiet: bool,
    warned_clipping: bool,
}

impl SessionStats {
    fn observe(&mut self, frame: &[f32]) {
        self.frames += 1;
        self.samples += frame.len() as u64;
        for &sample in frame {
            let magnitude = sample.abs();
            self.sum_squares += (sample as f64) * (sample as f64);
            if magnitude > self.peak {
                self.peak = magnitude;
            }
            if magnitude > CLIPPING_THRESHOLD {
                self.clipped_samples += 1;
            }
        }
    }

    fn session_rms(&self) -> f32 {
        if self.samples == 0 {
            return 0.0;
        }
        (self.sum_squares / self.samples as f64).sqrt() as f32
    }
}

/// The full client-side voice pipeline.
pub struct VoicePipeline {
    suppressor: SpectralNoiseSuppressor,
    vad: VoiceActivityDetector,
    flow: ConversationFlowManager,
    stats: SessionStats,
}

impl VoicePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, VadError> {
        Ok(Self {
            suppressor: SpectralNoiseSuppressor::new(config.suppression),
            vad: VoiceActivityDetector::new(config.vad)?,
            flow: ConversationFlowManager::new(),
            stats: SessionStats::default(),
        })
    }

    pub fn with_defaults() -> Self {
        Self::new(PipelineConfig::default()).expect("default pipeline config is valid")
    }

    /// Feed a silence frame into noise-floor calibration.
    pub fn calibrate(&mut self, frame: &[f32]) {
        self.suppressor.calibrate(frame);
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        self.suppressor.calibration_status()
    }

    /// Process one microphone frame at the given stream timestamp.
    pub fn process_frame(&mut self, frame: &[f32], timestamp_ms: u64) -> FrameOutcome {
        self.stats.observe(frame);

        let (samples, metrics) = self.suppressor.process(frame);
        let vad = self.vad.analyze_frame(&samples, timestamp_ms);

        if vad.is_speaking {
            if !self.flow.is_user_speaking() && self.flow.can_user_speak() {
                self.flow.user_speaking_started();
            }
        } else if self.flow.is_user_speaking() {
            self.flow.user_speaking_ended();
        }

        FrameOutcome {
            samples,
            metrics,
            vad,
            transmit: self.flow.is_user_speaking(),
        }
    }

    /// The AI interviewer started speaking (e.g. TTS playback began).
    pub fn ai_speaking_started(&mut self) {
        self.flow.ai_speaking_started();
    }

    /// The AI interviewer finished speaking.
    pub fn ai_speaking_finished(&mut self) {
        self.flow.ai_speaking_ended();
    }

    pub fn flow(&self) -> &ConversationFlowManager {
        &self.flow
    }

    pub fn suppressor(&self) -> &SpectralNoiseSuppressor {
        &self.suppressor
    }

    /// Apply a diagnostic recommendation to the running pipeline.
    pub fn apply_recommendation(&mut self, recommendation: &RecommendedSettings) {
        let mut config = self.suppressor.config().clone();
        recommendation.apply_to(&mut config);
        self.suppressor.update_config(config);
        info!(
            "applied recommended settings: suppression {:.2}, gate {:.0} dB",
            recommendation.suppression_factor, recommendation.noise_gate_db
        );
    }

    /// Quality warnings not yet reported this session.
    pub fn quality_warnings(&mut self) -> Vec<QualityWarning> {
        let mut warnings = Vec::new();
        if !self.stats.warned_clipping && self.stats.clipped_samples > 0 {
            self.stats.warned_clipping = true;
            warnings.push(QualityWarning::Clipping);
        }
        if !self.stats.warned_quiet
            && self.stats.samples >= QUIET_CHECK_MIN_SAMPLES
            && self.stats.session_rms() < QUIET_THRESHOLD_RMS
        {
            self.stats.warned_quiet = true;
            warnings.push(QualityWarning::TooQuiet);
        }
        warnings
    }

    /// Reset every stage for a new interview session.
    pub fn reset(&mut self) {
        self.suppressor.reset();
        self.vad.reset();
        self.flow.reset();
        self.stats = SessionStats::default();
        info!("voice pipeline reset");
    }
}
