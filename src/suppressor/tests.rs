use super::*;
use std::f32::consts::PI;

const SAMPLE_RATE: u32 = 16_000;
const FRAME: usize = 1024;

/// Deterministic white noise so tests never flake.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 32) as u32 as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

fn noise_frame(len: usize, amplitude: f32, rng: &mut Lcg) -> Vec<f32> {
    (0..len).map(|_| amplitude * rng.next_f32()).collect()
}

fn sine_frame(frequency: f32, len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}

fn rms(samples: &[f32]) -> f32 {
    crate::levels::rms(samples)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config(calibration_target: usize) -> SuppressionConfig {
    SuppressionConfig {
        calibration_target,
        ..Default::default()
    }
}

fn calibrated_suppressor(noise_amplitude: f32) -> (SpectralNoiseSuppressor, Lcg) {
    let mut suppressor = SpectralNoiseSuppressor::new(test_config(10));
    let mut rng = Lcg::new(42);
    for _ in 0..10 {
        let frame = noise_frame(FRAME, noise_amplitude, &mut rng);
        suppressor.calibrate(&frame);
    }
    assert!(suppressor.is_calibrated());
    (suppressor, rng)
}

fn assert_metrics_finite(metrics: &NoiseMetrics) {
    assert!(metrics.input_db.is_finite());
    assert!(metrics.noise_db.is_finite());
    assert!(metrics.voice_db.is_finite());
    assert!(metrics.snr_db.is_finite());
    assert!(metrics.noise_reduction_db.is_finite());
    assert!(metrics.noise_reduction_db >= 0.0);
}

#[test]
fn test_calibration_completes_at_target() {
    let mut suppressor = SpectralNoiseSuppressor::new(test_config(10));
    let mut rng = Lcg::new(1);
    for i in 0..10 {
        assert!(!suppressor.is_calibrated(), "calibrated early at frame {}", i);
        let frame = noise_frame(FRAME, 0.03, &mut rng);
        suppressor.calibrate(&frame);
    }
    assert!(suppressor.is_calibrated());

    let status = suppressor.calibration_status();
    assert_eq!(status.frames, 10);
    assert!((status.progress - 100.0).abs() < f32::EPSILON);
}

#[test]
fn test_calibration_is_idempotent_after_completion() {
    let (mut suppressor, mut rng) = calibrated_suppressor(0.03);
    let snapshot = suppressor.noise_profile().to_vec();

    // Further calibration calls must not touch the frozen profile
    for _ in 0..5 {
        let frame = noise_frame(FRAME, 0.5, &mut rng);
        suppressor.calibrate(&frame);
    }
    assert_eq!(suppressor.noise_profile(), snapshot.as_slice());
    assert_eq!(suppressor.calibration_status().frames, 10);
}

#[test]
fn test_calibration_ignores_empty_frames() {
    let mut suppressor = SpectralNoiseSuppressor::new(test_config(5));
    suppressor.calibrate(&[]);
    assert_eq!(suppressor.calibration_status().frames, 0);
}

#[test]
fn test_calibration_progress_reporting() {
    let mut suppressor = SpectralNoiseSuppressor::new(test_config(10));
    let mut rng = Lcg::new(7);
    for _ in 0..5 {
        let frame = noise_frame(FRAME, 0.03, &mut rng);
        suppressor.calibrate(&frame);
    }
    let status = suppressor.calibration_status();
    assert!(!status.is_calibrated);
    assert_eq!(status.frames, 5);
    assert!((status.progress - 50.0).abs() < 0.01);
}

#[test]
fn test_output_length_matches_input_length() {
    let (mut suppressor, mut rng) = calibrated_suppressor(0.03);
    for len in [1, 128, 480, FRAME, FRAME + 1, 3000] {
        let frame = noise_frame(len, 0.03, &mut rng);
        let (output, _) = suppressor.process(&frame);
        assert_eq!(output.len(), len, "length mismatch for input of {}", len);
    }
}

#[test]
fn test_empty_frame_yields_empty_output() {
    let mut suppressor = SpectralNoiseSuppressor::new(SuppressionConfig::default());
    let (output, metrics) = suppressor.process(&[]);
    assert!(output.is_empty());
    assert!(!metrics.is_voice_detected);
    assert_metrics_finite(&metrics);
}

#[test]
fn test_silence_is_not_amplified() {
    let (mut suppressor, _) = calibrated_suppressor(0.03);
    let (output, metrics) = suppressor.process(&vec![0.0; FRAME]);

    let max = output.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    assert!(max < 1e-4, "silent frame grew to {}", max);
    assert!(!metrics.is_voice_detected);
    assert_metrics_finite(&metrics);
}

#[test]
fn test_cold_start_passes_audio_through() {
    let mut suppressor = SpectralNoiseSuppressor::new(SuppressionConfig::default());
    let input = sine_frame(1000.0, FRAME, 0.4);
    let (output, metrics) = suppressor.process(&input);

    assert!(!suppressor.is_calibrated());
    assert_eq!(output.len(), input.len());
    for (a, b) in input.iter().zip(output.iter()) {
        assert!(
            (a - b).abs() < 1e-3,
            "uncalibrated frame should pass through: {} vs {}",
            a,
            b
        );
    }
    assert!((metrics.noise_reduction_db - 0.0).abs() < 0.1);
    assert_metrics_finite(&metrics);
}

#[test]
fn test_suppresses_stationary_noise() {
    let (mut suppressor, mut rng) = calibrated_suppressor(0.03);
    let frame = noise_frame(FRAME, 0.03, &mut rng);
    let (output, metrics) = suppressor.process(&frame);

    assert!(
        rms(&output) < 0.5 * rms(&frame),
        "noise frame should be attenuated: in {} out {}",
        rms(&frame),
        rms(&output)
    );
    assert!(metrics.noise_reduction_db > 0.0);
    assert!(!metrics.is_voice_detected);
}

#[test]
fn test_preserves_speech_energy() {
    let (mut suppressor, mut rng) = calibrated_suppressor(0.03);
    let speech: Vec<f32> = sine_frame(1000.0, FRAME, 0.4)
        .iter()
        .zip(noise_frame(FRAME, 0.03, &mut rng))
        .map(|(s, n)| s + n)
        .collect();
    let (output, metrics) = suppressor.process(&speech);

    assert!(
        rms(&output) > 0.5 * rms(&speech),
        "speech should survive suppression: in {} out {}",
        rms(&speech),
        rms(&output)
    );
    assert!(metrics.is_voice_detected);
    assert!(metrics.snr_db > 0.0);
}

#[test]
fn test_short_frames_keep_speech_energy() {
    // Capture stacks commonly deliver 16-30ms buffers, well under one FFT
    // block; the window must not sink their energy.
    let (mut suppressor, _) = calibrated_suppressor(0.03);
    for len in [256, 480] {
        let input = sine_frame(1000.0, len, 0.4);
        let (output, _) = suppressor.process(&input);
        assert!(
            rms(&output) > 0.8 * rms(&input),
            "{}-sample frame lost energy: in {} out {}",
            len,
            rms(&input),
            rms(&output)
        );
    }
}

#[test]
fn test_snr_grows_with_signal_level() {
    let (mut suppressor, _) = calibrated_suppressor(0.03);
    let (_, quiet) = suppressor.process(&sine_frame(1000.0, FRAME, 0.05));
    let (_, loud) = suppressor.process(&sine_frame(1000.0, FRAME, 0.4));
    assert!(
        loud.snr_db > quiet.snr_db,
        "louder tone should report higher SNR: {} vs {}",
        loud.snr_db,
        quiet.snr_db
    );
}

#[test]
fn test_noise_gate_mutes_subthreshold_frames() {
    let config = SuppressionConfig {
        noise_gate_db: -30.0,
        calibration_target: 10,
        ..Default::default()
    };
    let mut suppressor = SpectralNoiseSuppressor::new(config);
    let mut rng = Lcg::new(9);
    for _ in 0..10 {
        let frame = noise_frame(FRAME, 0.005, &mut rng);
        suppressor.calibrate(&frame);
    }

    // ~-51 dB input, well under the -30 dB gate
    let frame = noise_frame(FRAME, 0.005, &mut rng);
    let (output, _) = suppressor.process(&frame);
    assert!(
        rms(&output) < 0.1 * rms(&frame),
        "gated frame should be near-muted: in {} out {}",
        rms(&frame),
        rms(&output)
    );
}

#[test]
fn test_config_values_are_clamped() {
    let suppressor = SpectralNoiseSuppressor::new(SuppressionConfig {
        aggressiveness: 9.0,
        suppression_factor: 2.0,
        fft_size: 1000,
        calibration_target: 0,
        ..Default::default()
    });
    let config = suppressor.config();
    assert!((config.aggressiveness - 3.0).abs() < f32::EPSILON);
    assert!((config.suppression_factor - 1.0).abs() < f32::EPSILON);
    assert_eq!(config.fft_size, 1024);
    assert_eq!(config.calibration_target, 1);
}

#[test]
fn test_over_subtraction_scales_with_aggressiveness() {
    let gentle = SuppressionConfig {
        aggressiveness: 0.0,
        ..Default::default()
    };
    let harsh = SuppressionConfig {
        aggressiveness: 3.0,
        ..Default::default()
    };
    assert!((gentle.over_subtraction() - 1.2).abs() < 1e-6);
    assert!((harsh.over_subtraction() - 1.8).abs() < 1e-6);
}

#[test]
fn test_update_config_keeps_calibration_for_tuning_changes() {
    let (mut suppressor, _) = calibrated_suppressor(0.03);
    let mut config = suppressor.config().clone();
    config.aggressiveness = 1.0;
    suppressor.update_config(config);
    assert!(suppressor.is_calibrated());
}

#[test]
fn test_update_config_rebuilds_on_layout_change() {
    let (mut suppressor, _) = calibrated_suppressor(0.03);
    let mut config = suppressor.config().clone();
    config.fft_size = 2048;
    suppressor.update_config(config);

    assert!(!suppressor.is_calibrated());
    assert_eq!(suppressor.noise_profile().len(), 1024);
}

#[test]
fn test_reset_restarts_calibration() {
    let (mut suppressor, mut rng) = calibrated_suppressor(0.03);
    suppressor.reset();
    assert!(!suppressor.is_calibrated());
    assert_eq!(suppressor.calibration_status().frames, 0);

    // A reset suppressor passes audio through again
    let input = noise_frame(FRAME, 0.03, &mut rng);
    let (output, metrics) = suppressor.process(&input);
    assert!((rms(&output) - rms(&input)).abs() < 0.01);
    assert!((metrics.noise_reduction_db - 0.0).abs() < 0.1);
}

#[test]
fn test_full_session_scenario() {
    init_logging();
    let (mut suppressor, mut rng) = calibrated_suppressor(0.03);

    // Ambient noise between questions is suppressed
    let ambient = noise_frame(FRAME, 0.03, &mut rng);
    let (_, noise_metrics) = suppressor.process(&ambient);
    assert!(!noise_metrics.is_voice_detected);
    assert!(noise_metrics.noise_reduction_db > 0.0);

    // The candidate answers: speech detected, voice band preserved
    for _ in 0..5 {
        let answer: Vec<f32> = sine_frame(700.0, FRAME, 0.3)
            .iter()
            .zip(noise_frame(FRAME, 0.03, &mut rng))
            .map(|(s, n)| s + n)
            .collect();
        let (output, metrics) = suppressor.process(&answer);
        assert!(metrics.is_voice_detected);
        assert!(rms(&output) > 0.4 * rms(&answer));
        assert_metrics_finite(&metrics);
    }
}
