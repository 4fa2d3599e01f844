//! cpal-based capture backend.
//!
//! Interacts with real hardware, so the logic here is kept thin: pick a
//! device, prefer a native 16 kHz config, otherwise resample, highpass the
//! result to strip rumble, and forward everything to [`AudioBuffer`].
//! Samples that do not fit the ring are dropped rather than stalling the
//! audio callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use log::{debug, error, info, warn};
use rubato::{FftFixedIn, Resampler};
use std::sync::{Arc, Mutex};

use super::{
    AudioBuffer, AudioCaptureBackend, AudioCaptureError, CaptureState,
    MAX_RESAMPLE_BUFFER_SAMPLES, TARGET_SAMPLE_RATE,
};
use crate::preprocessing::HighpassFilter;

/// Resampler input chunk size; small enough for real-time latency.
const RESAMPLE_CHUNK: usize = 1024;

/// Audio capture backend using cpal for platform audio.
pub struct CpalBackend {
    state: CaptureState,
    stream: Option<Stream>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            stream: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn find_device_by_name(name: &str) -> Option<cpal::Device> {
    let host = cpal::default_host();
    host.input_devices()
        .ok()?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

fn find_config_with_sample_rate(
    device: &cpal::Device,
    target_rate: u32,
) -> Option<cpal::SupportedStreamConfig> {
    if let Ok(configs) = device.supported_input_configs() {
        for range in configs {
            let min_rate = range.min_sample_rate().0;
            let max_rate = range.max_sample_rate().0;
            if min_rate <= target_rate && target_rate <= max_rate {
                return Some(range.with_sample_rate(SampleRate(target_rate)));
            }
        }
    }
    None
}

fn create_resampler(
    source_rate: u32,
    target_rate: u32,
) -> Result<FftFixedIn<f32>, AudioCaptureError> {
    FftFixedIn::new(
        source_rate as usize,
        target_rate as usize,
        RESAMPLE_CHUNK,
        1, // sub chunks
        1, // mono
    )
    .map_err(|e| AudioCaptureError::DeviceError(format!("failed to create resampler: {}", e)))
}

/// State shared by the per-format stream callbacks.
struct CallbackState {
    buffer: AudioBuffer,
    resampler: Option<Mutex<FftFixedIn<f32>>>,
    resample_buffer: Mutex<Vec<f32>>,
    /// Rumble removal, running at the delivered (post-resample) rate.
    highpass: Mutex<HighpassFilter>,
}

impl CallbackState {
    fn process_samples(&self, samples: &[f32]) {
        if let Some(ref resampler) = self.resampler {
            let mut pending = match self.resample_buffer.lock() {
                Ok(buf) => buf,
                Err(_) => return,
            };
            if pending.len() + samples.len() > MAX_RESAMPLE_BUFFER_SAMPLES {
                warn!("resample buffer overflow, dropping {} samples", samples.len());
                return;
            }
            pending.extend_from_slice(samples);

            while pending.len() >= RESAMPLE_CHUNK {
                let chunk: Vec<f32> = pending.drain(..RESAMPLE_CHUNK).collect();
                if let Ok(mut r) = resampler.lock() {
                    if let Ok(output) = r.process(&[chunk], None) {
                        if let Some(mut resampled) = output.into_iter().next() {
                            self.push_filtered(&mut resampled);
                        }
                    }
                }
            }
        } else {
            let mut samples = samples.to_vec();
            self.push_filtered(&mut samples);
        }
    }

    fn push_filtered(&self, samples: &mut [f32]) {
        if let Ok(mut highpass) = self.highpass.lock() {
            highpass.process_inplace(samples);
        }
        self.buffer.push_samples(samples);
    }
}

impl AudioCaptureBackend for CpalBackend {
    fn start(
        &mut self,
        buffer: AudioBuffer,
        device_name: Option<String>,
    ) -> Result<u32, AudioCaptureError> {
        info!("starting audio capture (target {} Hz)", TARGET_SAMPLE_RATE);
        let host = cpal::default_host();

        let device = if let Some(ref name) = device_name {
            match find_device_by_name(name) {
                Some(d) => d,
                None => {
                    warn!("device '{}' not found, falling back to default", name);
                    host.default_input_device()
                        .ok_or(AudioCaptureError::NoDeviceAvailable)?
                }
            }
        } else {
            host.default_input_device()
                .ok_or(AudioCaptureError::NoDeviceAvailable)?
        };
        debug!(
            "input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let (config, needs_resampling) =
            if let Some(native) = find_config_with_sample_rate(&device, TARGET_SAMPLE_RATE) {
                (native, false)
            } else {
                let default_config = device
                    .default_input_config()
                    .map_err(|e| AudioCaptureError::DeviceError(e.to_string()))?;
                warn!(
                    "no native {} Hz support, resampling from {} Hz",
                    TARGET_SAMPLE_RATE,
                    default_config.sample_rate().0
                );
                (default_config, true)
            };
        let device_rate = config.sample_rate().0;

        let resampler = if needs_resampling {
            Some(Mutex::new(create_resampler(device_rate, TARGET_SAMPLE_RATE)?))
        } else {
            None
        };

        let callback_state = Arc::new(CallbackState {
            buffer,
            resampler,
            resample_buffer: Mutex::new(Vec::new()),
            highpass: Mutex::new(HighpassFilter::new(TARGET_SAMPLE_RATE)),
        });

        let err_fn = |err: cpal::StreamError| {
            error!("audio stream error: {}", err);
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                let state = callback_state.clone();
                device.build_input_stream(
                    &config.into(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        state.process_samples(data);
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let state = callback_state.clone();
                device.build_input_stream(
                    &config.into(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let samples: Vec<f32> =
                            data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                        state.process_samples(&samples);
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                let state = callback_state;
                device.build_input_stream(
                    &config.into(),
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        let samples: Vec<f32> = data
                            .iter()
                            .map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
                            .collect();
                        state.process_samples(&samples);
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(AudioCaptureError::DeviceError(format!(
                    "unsupported sample format: {:?}",
                    other
                )))
            }
        }
        .map_err(|e| AudioCaptureError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioCaptureError::StreamError(e.to_string()))?;

        info!(
            "audio stream started at {} Hz (delivering {} Hz)",
            device_rate, TARGET_SAMPLE_RATE
        );
        self.stream = Some(stream);
        self.state = CaptureState::Capturing;
        Ok(TARGET_SAMPLE_RATE)
    }

    fn stop(&mut self) -> Result<(), AudioCaptureError> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!("audio stream stopped");
        }
        self.state = CaptureState::Stopped;
        Ok(())
    }
}
