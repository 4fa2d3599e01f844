//! Energy-based voice activity detection.
//!
//! Works on the suppressor's output: frame RMS is converted to dB, smoothed
//! with an exponential envelope, and compared against a threshold with
//! hysteresis. Speech is only reported after the energy has held above the
//! threshold for a minimum duration, and it persists through short pauses
//! so mid-sentence breaths do not close the user's turn.

use log::debug;
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;

use crate::audio_constants::{
    DEFAULT_VAD_MAX_SILENCE_MS, DEFAULT_VAD_MIN_DURATION_MS, DEFAULT_VAD_SMOOTHING,
    DEFAULT_VAD_THRESHOLD_DB, ENERGY_HISTORY_SIZE,
};
use crate::levels::{linear_to_db, rms};

/// Configuration for the voice activity detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VadConfig {
    /// Smoothed energy above this counts as voice.
    pub threshold_db: f32,
    /// Energy must stay above threshold this long before speech is reported.
    pub min_duration_ms: u64,
    /// Speech persists through silent gaps up to this long (hysteresis).
    pub max_silence_ms: u64,
    /// Exponential smoothing factor in (0, 1); higher reacts slower.
    pub smoothing_factor: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold_db: DEFAULT_VAD_THRESHOLD_DB,
            min_duration_ms: DEFAULT_VAD_MIN_DURATION_MS,
            max_silence_ms: DEFAULT_VAD_MAX_SILENCE_MS,
            smoothing_factor: DEFAULT_VAD_SMOOTHING,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<(), VadError> {
        if !(0.0..1.0).contains(&self.smoothing_factor) || self.smoothing_factor == 0.0 {
            return Err(VadError::InvalidSmoothing(self.smoothing_factor));
        }
        if self.max_silence_ms < self.min_duration_ms {
            return Err(VadError::InvalidDurations {
                min_duration_ms: self.min_duration_ms,
                max_silence_ms: self.max_silence_ms,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum VadError {
    #[error("smoothing factor must be in (0, 1), got {0}")]
    InvalidSmoothing(f32),
    #[error("max silence ({max_silence_ms}ms) must not be shorter than min duration ({min_duration_ms}ms)")]
    InvalidDurations {
        min_duration_ms: u64,
        max_silence_ms: u64,
    },
}

/// Per-frame detector output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VadState {
    pub is_speaking: bool,
    /// Stability of the energy envelope, [0, 1].
    pub confidence: f32,
    /// How long the current speech run has lasted; 0 while silent.
    pub voice_duration_ms: u64,
    /// Time since speech last ended; 0 while speaking.
    pub silence_duration_ms: u64,
    /// Smoothed energy of this frame.
    pub energy_db: f32,
}

/// Energy-based VAD with hysteresis.
pub struct VoiceActivityDetector {
    config: VadConfig,
    smoothed_db: Option<f32>,
    energy_history: VecDeque<f32>,
    speaking: bool,
    /// First timestamp of the current above-threshold run, while not yet
    /// reported as speech.
    candidate_since_ms: Option<u64>,
    /// Last timestamp the smoothed energy was above threshold.
    last_above_ms: u64,
    speech_started_ms: u64,
    last_speech_ended_ms: Option<u64>,
}

impl VoiceActivityDetector {
    /// Create a detector after validating the config.
    pub fn new(config: VadConfig) -> Result<Self, VadError> {
        config.validate()?;
        Ok(Self {
            config,
            smoothed_db: None,
            energy_history: VecDeque::with_capacity(ENERGY_HISTORY_SIZE),
            speaking: false,
            candidate_since_ms: None,
            last_above_ms: 0,
            speech_started_ms: 0,
            last_speech_ended_ms: None,
        })
    }

    /// Analyze one frame at the given stream timestamp.
    ///
    /// Timestamps must be monotonically non-decreasing; the caller owns the
    /// clock so tests and offline processing stay deterministic. An empty
    /// frame is treated as silence.
    pub fn analyze_frame(&mut self, frame: &[f32], timestamp_ms: u64) -> VadState {
        let frame_db = linear_to_db(rms(frame));
        let smoothed = match self.smoothed_db {
            // Seed directly so the envelope does not start at an arbitrary level
            None => frame_db,
            Some(prev) => {
                self.config.smoothing_factor * prev
                    + (1.0 - self.config.smoothing_factor) * frame_db
            }
        };
        self.smoothed_db = Some(smoothed);

        if self.energy_history.len() == ENERGY_HISTORY_SIZE {
            self.energy_history.pop_front();
        }
        self.energy_history.push_back(smoothed);

        let above = smoothed > self.config.threshold_db;
        if above {
            self.last_above_ms = timestamp_ms;
            if !self.speaking {
                let start = *self.candidate_since_ms.get_or_insert(timestamp_ms);
                if timestamp_ms.saturating_sub(start) >= self.config.min_duration_ms {
                    self.speaking = true;
                    self.speech_started_ms = start;
                    debug!("speech started at {}ms ({:.1} dB)", start, smoothed);
                }
            }
        } else if self.speaking {
            if timestamp_ms.saturating_sub(self.last_above_ms) >= self.config.max_silence_ms {
                self.speaking = false;
                self.candidate_since_ms = None;
                self.last_speech_ended_ms = Some(timestamp_ms);
                debug!("speech ended at {}ms", timestamp_ms);
            }
        } else {
            self.candidate_since_ms = None;
        }

        VadState {
            is_speaking: self.speaking,
            confidence: self.confidence(),
            voice_duration_ms: if self.speaking {
                timestamp_ms.saturating_sub(self.speech_started_ms)
            } else {
                0
            },
            silence_duration_ms: if self.speaking {
                0
            } else {
                timestamp_ms.saturating_sub(self.last_speech_ended_ms.unwrap_or(0))
            },
            energy_db: smoothed,
        }
    }

    /// Confidence from the stability of recent smoothed energies: a steady
    /// envelope (all speech or all silence) scores high, a jittery one low.
    fn confidence(&self) -> f32 {
        let recent: Vec<f32> = self.energy_history.iter().rev().take(10).copied().collect();
        if recent.len() < 2 {
            return 1.0;
        }
        let mean = recent.iter().sum::<f32>() / recent.len() as f32;
        let variance =
            recent.iter().map(|e| (e - mean) * (e - mean)).sum::<f32>() / recent.len() as f32;
        (1.0 - variance.sqrt() / 20.0).clamp(0.0, 1.0)
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Clear all detector state for a new session.
    pub fn reset(&mut self) {
        self.smoothed_db = None;
        self.energy_history.clear();
        self.speaking = false;
        self.candidate_since_ms = None;
        self.last_above_ms = 0;
        self.speech_started_ms = 0;
        self.last_speech_ended_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: u64 = 50;

    fn loud_frame() -> Vec<f32> {
        vec![0.1; 800] // -20 dB
    }

    fn quiet_frame() -> Vec<f32> {
        vec![0.0001; 800] // -80 dB
    }

    fn detector() -> VoiceActivityDetector {
        VoiceActivityDetector::new(VadConfig::default()).expect("default config is valid")
    }

    /// Feed `count` frames starting at `start_ms`, returning the last state.
    fn feed(
        vad: &mut VoiceActivityDetector,
        frame: &[f32],
        start_ms: u64,
        count: usize,
    ) -> VadState {
        let mut state = vad.analyze_frame(frame, start_ms);
        for i in 1..count {
            state = vad.analyze_frame(frame, start_ms + i as u64 * FRAME_MS);
        }
        state
    }

    #[test]
    fn test_config_validation() {
        assert!(VadConfig::default().validate().is_ok());

        let bad_smoothing = VadConfig {
            smoothing_factor: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            bad_smoothing.validate(),
            Err(VadError::InvalidSmoothing(_))
        ));

        let bad_durations = VadConfig {
            min_duration_ms: 900,
            max_silence_ms: 800,
            ..Default::default()
        };
        assert!(matches!(
            bad_durations.validate(),
            Err(VadError::InvalidDurations { .. })
        ));
    }

    #[test]
    fn test_silence_is_not_speech() {
        let mut vad = detector();
        let state = feed(&mut vad, &quiet_frame(), 0, 20);
        assert!(!state.is_speaking);
        assert_eq!(state.voice_duration_ms, 0);
    }

    #[test]
    fn test_min_duration_gates_speech_onset() {
        let mut vad = detector();

        // First loud frame: above threshold but not yet held for 100ms
        let state = vad.analyze_frame(&loud_frame(), 0);
        assert!(!state.is_speaking);

        let state = vad.analyze_frame(&loud_frame(), 50);
        assert!(!state.is_speaking);

        // 100ms above threshold: speech confirmed, backdated to the onset
        let state = vad.analyze_frame(&loud_frame(), 100);
        assert!(state.is_speaking);
        assert_eq!(state.voice_duration_ms, 100);
    }

    #[test]
    fn test_brief_blip_is_ignored() {
        let mut vad = detector();
        let state = vad.analyze_frame(&loud_frame(), 0);
        assert!(!state.is_speaking);

        // Energy drops before min_duration elapses; candidate is discarded.
        // One quiet frame is not enough to pull the envelope down, so feed
        // several.
        let state = feed(&mut vad, &quiet_frame(), 50, 10);
        assert!(!state.is_speaking);
    }

    #[test]
    fn test_hysteresis_bridges_short_pauses() {
        let mut vad = detector();
        let state = feed(&mut vad, &loud_frame(), 0, 5);
        assert!(state.is_speaking);

        // 400ms of silence, shorter than the 800ms hangover
        let state = feed(&mut vad, &quiet_frame(), 250, 8);
        assert!(state.is_speaking, "short pause should not end speech");

        // Speech resumes seamlessly
        let state = feed(&mut vad, &loud_frame(), 650, 4);
        assert!(state.is_speaking);
    }

    #[test]
    fn test_long_silence_ends_speech() {
        let mut vad = detector();
        let state = feed(&mut vad, &loud_frame(), 0, 5);
        assert!(state.is_speaking);

        // Well past the 800ms hangover
        let state = feed(&mut vad, &quiet_frame(), 250, 25);
        assert!(!state.is_speaking);
        assert!(state.silence_duration_ms > 0);
    }

    #[test]
    fn test_confidence_high_for_steady_signal() {
        let mut vad = detector();
        let state = feed(&mut vad, &loud_frame(), 0, 20);
        assert!(
            state.confidence > 0.9,
            "steady signal should be confident, got {}",
            state.confidence
        );
    }

    #[test]
    fn test_confidence_drops_for_jittery_signal() {
        let mut vad = detector();
        let mut state = vad.analyze_frame(&loud_frame(), 0);
        for i in 1..20 {
            let frame = if i % 2 == 0 { loud_frame() } else { quiet_frame() };
            state = vad.analyze_frame(&frame, i * FRAME_MS);
        }
        assert!(
            state.confidence < 0.8,
            "alternating signal should lower confidence, got {}",
            state.confidence
        );
    }

    #[test]
    fn test_empty_frame_counts_as_silence() {
        let mut vad = detector();
        let state = vad.analyze_frame(&[], 0);
        assert!(!state.is_speaking);
        assert!(state.energy_db <= -100.0);
    }

    #[test]
    fn test_reset_clears_speech_state() {
        let mut vad = detector();
        let state = feed(&mut vad, &loud_frame(), 0, 5);
        assert!(state.is_speaking);

        vad.reset();
        assert!(!vad.is_speaking());
        let state = vad.analyze_frame(&quiet_frame(), 1000);
        assert!(!state.is_speaking);
    }
}
