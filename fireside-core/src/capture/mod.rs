//! Microphone capture recorder.
//!
//! Turns the live microphone stream into a cadence of base64-encoded PCM16
//! chunks at the 16 kHz wire rate:
//!
//! ```text
//! cpal callback → SPSC ring → emission task (spawn_blocking)
//!                                 │ drain + resample + encode
//!                                 └─► broadcast::Sender<CaptureChunk>
//! ```
//!
//! `start()`/`stop()` are both idempotent: starting a running recorder and
//! stopping a stopped one are no-ops. A device-acquisition failure surfaces
//! from `start()` and leaves the recorder stopped and retryable.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::{resample::RateConverter, InputStream},
    buffering::{create_capture_ring, Consumer},
    error::Result,
    pcm::{self, CAPTURE_SAMPLE_RATE},
};

/// Broadcast capacity for capture chunks.
const BROADCAST_CAP: usize = 256;

/// Scratch size for each ring drain pass.
const DRAIN_CHUNK: usize = 2048;

/// MIME type declared on every realtime audio message.
pub const REALTIME_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// One emitted microphone chunk, ready for the realtime input message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureChunk {
    /// Monotonically increasing chunk sequence number.
    pub seq: u64,
    /// Always [`REALTIME_AUDIO_MIME`].
    pub mime_type: String,
    /// Base64-encoded 16 kHz mono PCM16 captured since the previous emission.
    pub data: String,
}

/// Recorder tuning knobs.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Emission cadence in milliseconds. Default: 50.
    pub emit_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            emit_interval_ms: 50,
        }
    }
}

/// Periodic microphone chunk emitter.
///
/// `CaptureRecorder` is `Send + Sync` — all fields use interior mutability.
pub struct CaptureRecorder {
    config: RecorderConfig,
    /// `true` while the device is open and the emission task runs.
    running: Arc<AtomicBool>,
    chunk_tx: broadcast::Sender<CaptureChunk>,
    seq: Arc<AtomicU64>,
}

impl CaptureRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        let (chunk_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            chunk_tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to emitted chunks.
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureChunk> {
        self.chunk_tx.subscribe()
    }

    /// `true` while the microphone is open and chunks are being emitted.
    pub fn recording(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start capturing from the default input device.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start capturing, preferring the named input device.
    ///
    /// No-op when already recording. Blocks until the device is confirmed
    /// open (or failed); the emission task then runs in the background.
    ///
    /// # Errors
    /// Device-acquisition failures are returned and the recorder stays in the
    /// stopped state, observable via [`recording`](Self::recording).
    pub fn start_with_device(&self, preferred_input_device: Option<String>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("recorder already running — start ignored");
            return Ok(());
        }

        let (producer, mut consumer) = create_capture_ring();
        let running = Arc::clone(&self.running);
        let chunk_tx = self.chunk_tx.clone();
        let seq = Arc::clone(&self.seq);
        let emit_interval = Duration::from_millis(self.config.emit_interval_ms.max(10));

        // Sync oneshot: the capture thread signals open success/failure back
        // to start(). Carries the device sample rate on success.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // Device must open on THIS thread — cpal::Stream is !Send.
            let stream = match InputStream::open(
                producer,
                Arc::clone(&running),
                preferred_input_device.as_deref(),
            ) {
                Ok(s) => {
                    let _ = open_tx.send(Ok(s.sample_rate));
                    s
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let mut converter = match RateConverter::new(stream.sample_rate, CAPTURE_SAMPLE_RATE) {
                Ok(c) => c,
                Err(e) => {
                    warn!("capture resampler init failed: {e}");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let mut raw = vec![0f32; DRAIN_CHUNK];
            let mut interval_samples: Vec<f32> = Vec::new();

            while running.load(Ordering::Relaxed) {
                std::thread::sleep(emit_interval);

                // Drain everything captured since the previous emission.
                loop {
                    let n = consumer.pop_slice(&mut raw);
                    if n == 0 {
                        break;
                    }
                    interval_samples.extend_from_slice(&converter.process(&raw[..n]));
                }

                if interval_samples.is_empty() {
                    continue;
                }

                let chunk = CaptureChunk {
                    seq: seq.fetch_add(1, Ordering::Relaxed),
                    mime_type: REALTIME_AUDIO_MIME.to_string(),
                    data: pcm::encode_pcm16_base64(&interval_samples),
                };
                interval_samples.clear();

                // No receivers is fine — the recorder keeps running.
                let _ = chunk_tx.send(chunk);
            }

            // Stream drops here, releasing the microphone on this thread.
            stream.stop();
            drop(stream);
            debug!("capture emission task stopped");
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(device_rate = rate, "recorder started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(crate::error::FiresideError::AudioStream(
                    "capture task died before confirming device open".into(),
                ))
            }
        }
    }

    /// Stop capturing and release the device. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("recorder stop requested");
        }
    }
}
