//! Microphone capture: lock-free sample buffer and backend abstraction.
//!
//! The audio callback pushes into an SPSC ring buffer; the diagnostic's
//! drain loop pulls from it on its own schedule. The backend trait exists
//! so tests can inject synthetic capture sources.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::{Arc, Mutex};
use thiserror::Error;

mod cpal_backend;
pub use cpal_backend::CpalBackend;

/// Target sample rate for captured audio (16 kHz mono speech).
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Default buffer capacity: 30 seconds at the target rate, comfortably
/// above the longest diagnostic run.
pub const DEFAULT_BUFFER_SAMPLES: usize = TARGET_SAMPLE_RATE as usize * 30;

/// Cap on samples accumulated before resampling; bounds memory if the
/// resampler falls behind a 48 kHz source.
pub const MAX_RESAMPLE_BUFFER_SAMPLES: usize = 48_000 * 3;

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// Thread-safe audio sample buffer backed by an SPSC ring buffer.
///
/// The producer side (audio callback) writes via [`push_samples`]; the
/// consumer side drains via [`drain_samples`]. Samples that overflow the
/// ring are dropped by the producer, which is acceptable for a bounded
/// diagnostic capture.
///
/// [`push_samples`]: AudioBuffer::push_samples
/// [`drain_samples`]: AudioBuffer::drain_samples
pub struct AudioBuffer {
    producer: Arc<Mutex<RingProducer>>,
    consumer: Arc<Mutex<RingConsumer>>,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SAMPLES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let rb = HeapRb::<f32>::new(capacity.max(1));
        let (producer, consumer) = rb.split();
        Self {
            producer: Arc::new(Mutex::new(producer)),
            consumer: Arc::new(Mutex::new(consumer)),
        }
    }

    /// Push samples from the audio callback. Returns how many were written;
    /// the rest were dropped because the ring was full.
    pub fn push_samples(&self, samples: &[f32]) -> usize {
        match self.producer.lock() {
            Ok(mut producer) => producer.push_slice(samples),
            Err(_) => 0,
        }
    }

    /// Drain all currently buffered samples.
    pub fn drain_samples(&self) -> Vec<f32> {
        let mut drained = Vec::new();
        if let Ok(mut consumer) = self.consumer.lock() {
            let available = consumer.occupied_len();
            if available > 0 {
                drained.resize(available, 0.0);
                consumer.pop_slice(&mut drained);
            }
        }
        drained
    }

    /// Samples currently waiting in the ring.
    pub fn pending(&self) -> usize {
        self.consumer
            .lock()
            .map(|consumer| consumer.occupied_len())
            .unwrap_or(0)
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for AudioBuffer {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            consumer: Arc::clone(&self.consumer),
        }
    }
}

impl std::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("pending", &self.pending())
            .finish()
    }
}

/// State of a capture backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing,
    Stopped,
}

/// Errors from the capture layer. This is the pipeline's only rejection
/// path; everything downstream of capture is infallible.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioCaptureError {
    #[error("no audio input device available")]
    NoDeviceAvailable,
    #[error("audio device error: {0}")]
    DeviceError(String),
    #[error("audio stream error: {0}")]
    StreamError(String),
}

/// Capture backend abstraction so the diagnostic can be tested with
/// synthetic audio sources.
pub trait AudioCaptureBackend {
    /// Start capturing into `buffer`, optionally on a named device.
    /// Returns the delivered sample rate (resampling happens inside the
    /// backend, so this is always the target rate for real devices).
    fn start(
        &mut self,
        buffer: AudioBuffer,
        device_name: Option<String>,
    ) -> Result<u32, AudioCaptureError>;

    /// Stop capturing.
    fn stop(&mut self) -> Result<(), AudioCaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain_roundtrip() {
        let buffer = AudioBuffer::with_capacity(16);
        let written = buffer.push_samples(&[0.1, 0.2, 0.3]);
        assert_eq!(written, 3);
        assert_eq!(buffer.pending(), 3);

        let drained = buffer.drain_samples();
        assert_eq!(drained, vec![0.1, 0.2, 0.3]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_drain_empty_buffer() {
        let buffer = AudioBuffer::new();
        assert!(buffer.drain_samples().is_empty());
    }

    #[test]
    fn test_overflow_drops_excess_samples() {
        let buffer = AudioBuffer::with_capacity(4);
        let written = buffer.push_samples(&[1.0; 10]);
        assert_eq!(written, 4);
        assert_eq!(buffer.drain_samples().len(), 4);
    }

    #[test]
    fn test_clone_shares_the_ring() {
        let buffer = AudioBuffer::with_capacity(8);
        let writer = buffer.clone();
        writer.push_samples(&[0.5, 0.6]);
        assert_eq!(buffer.drain_samples(), vec![0.5, 0.6]);
    }

    #[test]
    fn test_capture_error_display() {
        assert_eq!(
            AudioCaptureError::NoDeviceAvailable.to_string(),
            "no audio input device available"
        );
        assert!(AudioCaptureError::DeviceError("busy".into())
            .to_string()
            .contains("busy"));
    }
}
