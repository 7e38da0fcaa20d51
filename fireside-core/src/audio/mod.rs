//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate, block on a lock, or perform I/O. The callback only
//! downmixes to mono into a reused scratch buffer and `push_slice`s into an
//! SPSC ring whose producer is wait-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `InputStream` must therefore be created and dropped on the same
//! thread; the capture recorder does this inside `spawn_blocking`.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    buffering::{AudioProducer, Producer},
    error::{FiresideError, Result},
};

/// Handle to an active microphone stream.
///
/// **Not `Send`** — bound to its creation thread. Create and drop on the same
/// OS thread.
pub struct InputStream {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — cleared to make the callback a no-op before teardown.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

/// Interleaved → mono downmix into a reused scratch buffer.
#[cfg(feature = "audio-cpal")]
fn downmix_into(scratch: &mut Vec<f32>, data: &[f32], channels: usize) {
    let frames = data.len() / channels;
    scratch.resize(frames, 0.0);
    for (frame, out) in scratch.iter_mut().enumerate() {
        let base = frame * channels;
        let sum: f32 = data[base..base + channels].iter().sum();
        *out = sum / channels as f32;
    }
}

impl InputStream {
    /// Open an input device by preferred name, falling back to the default
    /// input device and then the first available device.
    ///
    /// # Errors
    /// `FiresideError::NoDefaultInputDevice` when no microphone exists,
    /// `FiresideError::AudioStream` when cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = device::resolve_input_device(&host, preferred_device_name)?;
        tracing::info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| FiresideError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        tracing::info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ch = channels as usize;
        let running_cb = Arc::clone(&running);
        let mut scratch: Vec<f32> = Vec::new();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let written = if ch == 1 {
                        producer.push_slice(data)
                    } else {
                        downmix_into(&mut scratch, data, ch);
                        producer.push_slice(&scratch)
                    };
                    let expected = data.len() / ch;
                    if written < expected {
                        tracing::warn!(
                            dropped = expected - written,
                            "capture ring full: dropping frames"
                        );
                    }
                },
                |err| tracing::error!("capture stream error: {err}"),
                None,
            ),

            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / ch;
                    scratch.resize(frames, 0.0);
                    for (frame, out) in scratch.iter_mut().enumerate() {
                        let base = frame * ch;
                        let sum: f32 = data[base..base + ch]
                            .iter()
                            .map(|s| f32::from(*s) / 32768.0)
                            .sum();
                        *out = sum / ch as f32;
                    }
                    let written = producer.push_slice(&scratch);
                    if written < frames {
                        tracing::warn!(
                            dropped = frames - written,
                            "capture ring full: dropping frames"
                        );
                    }
                },
                |err| tracing::error!("capture stream error: {err}"),
                None,
            ),

            fmt => {
                return Err(FiresideError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| FiresideError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| FiresideError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stub when the `audio-cpal` feature is disabled.
    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(FiresideError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
