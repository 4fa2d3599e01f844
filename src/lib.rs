//! Real-time voice pipeline for AI interview calls.
//!
//! The crate covers the audio path between a microphone and an AI
//! interviewer session:
//! - [`suppressor`]: FFT spectral subtraction with adaptive noise-floor
//!   calibration
//! - [`vad`]: energy-based voice activity detection with hysteresis
//! - [`flow`]: AI/user turn-taking state machine
//! - [`diagnostics`]: microphone test and settings calibration
//! - [`pipeline`]: per-frame facade wiring suppressor -> VAD -> flow
//!
//! All DSP-path operations are infallible and frame-synchronous; only the
//! diagnostic (and the capture layer underneath it) is async and fallible.

pub mod audio_constants;
pub mod capture;
pub mod diagnostics;
pub mod flow;
pub mod levels;
pub mod pipeline;
pub mod preprocessing;
pub mod suppressor;
pub mod vad;

pub use capture::{AudioBuffer, AudioCaptureBackend, AudioCaptureError, CpalBackend};
pub use diagnostics::{
    AudioDiagnostic, AudioTestResult, CancelHandle, DiagnosticError, RecommendedSettings,
};
pub use flow::{
    ConversationFlowManager, ConversationFlowState, ConversationSummary, ConversationTurn,
    Speaker, TurnOwner,
};
pub use pipeline::{FrameOutcome, PipelineConfig, QualityWarning, VoicePipeline};
pub use suppressor::{CalibrationStatus, NoiseMetrics, SpectralNoiseSuppressor, SuppressionConfig};
pub use vad::{VadConfig, VadError, VadState, VoiceActivityDetector};
