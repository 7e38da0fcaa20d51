//! Output-device seam for the playback scheduler.
//!
//! `AudioSink` abstracts the hardware so the scheduler's state machine can be
//! exercised with a scripted sink in tests. The cpal implementation keeps one
//! persistent 24 kHz output stream alive and feeds it through an SPSC ring,
//! so consecutive buffers play back-to-back with no device re-open between
//! them.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send`, so `CpalSink` spawns a dedicated feeder thread
//! that builds and owns the stream. The handle only passes commands over a
//! channel; the real-time callback communicates back through atomics and the
//! meter ring, never through locks.

use crossbeam_channel::Sender;

use crate::error::Result;
use crate::pcm::DecodedBuffer;

/// Completion notifications, one per scheduled buffer, in FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    /// The buffer with this id has fully left the output ring.
    Finished { id: u64 },
}

/// Contract for playback output backends.
pub trait AudioSink: Send + 'static {
    /// Queue a decoded buffer to sound seamlessly after anything already
    /// scheduled. Emits `SinkEvent::Finished { id }` once its last sample has
    /// been consumed by the device.
    fn schedule(&mut self, id: u64, buffer: DecodedBuffer) -> Result<()>;

    /// Discard everything scheduled and silence output immediately. No
    /// `Finished` events are emitted for discarded buffers.
    fn flush(&mut self);

    /// Ensure the device is running (it may be suspended by OS power policy)
    /// and restore nominal output gain.
    fn resume(&mut self) -> Result<()>;
}

#[cfg(feature = "audio-cpal")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "audio-cpal")]
mod cpal_sink {
    use std::collections::VecDeque;
    use std::sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    };
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleRate, StreamConfig};
    use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

    use super::{AudioSink, SinkEvent};
    use crate::buffering::{create_playback_ring, AudioProducer, Consumer, Producer};
    use crate::error::{FiresideError, Result};
    use crate::pcm::{DecodedBuffer, PLAYBACK_SAMPLE_RATE};

    /// Feeder poll cadence while waiting for commands or ring space.
    const FEEDER_TICK: Duration = Duration::from_millis(2);

    enum FeederCmd {
        Schedule(u64, DecodedBuffer),
        Flush,
        Resume,
        Shutdown,
    }

    /// State shared between the feeder thread and the RT callback.
    struct Shared {
        /// Total samples the callback has consumed (played or skipped).
        consumed: AtomicU64,
        /// Samples below this watermark are skipped instead of played.
        discard_until: AtomicU64,
        /// Output gain as f32 bits (nominal 1.0).
        gain_bits: AtomicU32,
    }

    impl Shared {
        fn new() -> Self {
            Self {
                consumed: AtomicU64::new(0),
                discard_until: AtomicU64::new(0),
                gain_bits: AtomicU32::new(1.0f32.to_bits()),
            }
        }

        fn gain(&self) -> f32 {
            f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
        }
    }

    /// cpal-backed [`AudioSink`].
    pub struct CpalSink {
        cmd_tx: Sender<FeederCmd>,
    }

    impl CpalSink {
        /// Open the default output device and spawn the feeder thread.
        ///
        /// `events` receives one `Finished` per fully played buffer.
        /// `meter_feed`, when present, receives a copy of every played sample
        /// for the level meter tap.
        ///
        /// Blocks until the output stream is confirmed open.
        ///
        /// # Errors
        /// Surfaces device lookup or stream construction failures from the
        /// feeder thread.
        pub fn spawn(
            events: Sender<SinkEvent>,
            meter_feed: Option<AudioProducer>,
        ) -> Result<Self> {
            let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
            let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

            std::thread::Builder::new()
                .name("fireside-playback".into())
                .spawn(move || feeder_main(cmd_rx, events, meter_feed, open_tx))
                .map_err(|e| FiresideError::AudioStream(e.to_string()))?;

            match open_rx.recv() {
                Ok(Ok(())) => Ok(Self { cmd_tx }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(FiresideError::AudioStream(
                    "playback thread died before confirming device open".into(),
                )),
            }
        }
    }

    impl AudioSink for CpalSink {
        fn schedule(&mut self, id: u64, buffer: DecodedBuffer) -> Result<()> {
            self.cmd_tx
                .send(FeederCmd::Schedule(id, buffer))
                .map_err(|_| FiresideError::AudioStream("playback thread gone".into()))
        }

        fn flush(&mut self) {
            let _ = self.cmd_tx.send(FeederCmd::Flush);
        }

        fn resume(&mut self) -> Result<()> {
            self.cmd_tx
                .send(FeederCmd::Resume)
                .map_err(|_| FiresideError::AudioStream("playback thread gone".into()))
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            let _ = self.cmd_tx.send(FeederCmd::Shutdown);
        }
    }

    fn open_output_stream(
        shared: Arc<Shared>,
        mut meter_feed: Option<AudioProducer>,
    ) -> Result<(cpal::Stream, AudioProducer)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(FiresideError::NoDefaultOutputDevice)?;

        // Prefer mono at the wire rate, fall back to stereo.
        let pick = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        };
        let supported = pick(1).or_else(|| pick(2)).ok_or_else(|| {
            FiresideError::AudioDevice("no output config supports 24 kHz playback".into())
        })?;

        let config: StreamConfig = supported
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        let channels = config.channels as usize;

        tracing::info!(
            device = device.name().unwrap_or_default(),
            channels,
            sample_rate = PLAYBACK_SAMPLE_RATE,
            "playback output initialized"
        );

        let (producer, mut consumer) = create_playback_ring();
        let mut scratch: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    // Fast-forward past samples discarded by a flush.
                    let mut consumed = shared.consumed.load(Ordering::Relaxed);
                    let discard_until = shared.discard_until.load(Ordering::Relaxed);
                    if consumed < discard_until {
                        let skipped =
                            consumer.skip((discard_until - consumed) as usize) as u64;
                        consumed += skipped;
                    }

                    let frames = data.len() / channels;
                    scratch.resize(frames, 0.0);
                    let popped = consumer.pop_slice(&mut scratch[..frames]);
                    consumed += popped as u64;
                    shared.consumed.store(consumed, Ordering::Release);

                    let gain = shared.gain();
                    for (frame_idx, frame) in data.chunks_mut(channels).enumerate() {
                        let sample = if frame_idx < popped {
                            scratch[frame_idx] * gain
                        } else {
                            0.0 // underrun → silence, never stale samples
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }

                    if let Some(feed) = meter_feed.as_mut() {
                        feed.push_slice(&scratch[..popped]);
                    }
                },
                |err| tracing::error!("playback stream error: {err}"),
                None,
            )
            .map_err(|e| FiresideError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| FiresideError::AudioStream(e.to_string()))?;

        Ok((stream, producer))
    }

    fn feeder_main(
        cmd_rx: Receiver<FeederCmd>,
        events: Sender<SinkEvent>,
        meter_feed: Option<AudioProducer>,
        open_tx: std::sync::mpsc::Sender<Result<()>>,
    ) {
        let shared = Arc::new(Shared::new());

        let (stream, mut producer) = match open_output_stream(Arc::clone(&shared), meter_feed) {
            Ok(pair) => {
                let _ = open_tx.send(Ok(()));
                pair
            }
            Err(e) => {
                let _ = open_tx.send(Err(e));
                return;
            }
        };

        // Buffers accepted but not yet fully pushed into the ring.
        let mut inbox: VecDeque<(u64, DecodedBuffer)> = VecDeque::new();
        // Offset into the front inbox buffer.
        let mut front_offset = 0usize;
        // (id, ring position of the buffer's last sample), push order.
        let mut awaiting: VecDeque<(u64, u64)> = VecDeque::new();
        let mut pushed_total = 0u64;

        loop {
            // Report buffers whose last sample has been consumed.
            let consumed = shared.consumed.load(Ordering::Acquire);
            while let Some((id, end)) = awaiting.front().copied() {
                if end > consumed {
                    break;
                }
                awaiting.pop_front();
                if events.send(SinkEvent::Finished { id }).is_err() {
                    return; // scheduler gone
                }
            }

            // Move pending samples into the ring while space allows.
            while let Some((id, buffer)) = inbox.front() {
                let remaining = &buffer.samples[front_offset..];
                if remaining.is_empty() {
                    awaiting.push_back((*id, pushed_total));
                    inbox.pop_front();
                    front_offset = 0;
                    continue;
                }
                let written = producer.push_slice(remaining);
                pushed_total += written as u64;
                front_offset += written;
                if written < remaining.len() {
                    break; // ring full — try again next tick
                }
            }

            match cmd_rx.recv_timeout(FEEDER_TICK) {
                Ok(FeederCmd::Schedule(id, buffer)) => {
                    inbox.push_back((id, buffer));
                }
                Ok(FeederCmd::Flush) => {
                    inbox.clear();
                    front_offset = 0;
                    awaiting.clear();
                    shared.discard_until.store(pushed_total, Ordering::Release);
                }
                Ok(FeederCmd::Resume) => {
                    shared
                        .gain_bits
                        .store(1.0f32.to_bits(), Ordering::Relaxed);
                    if let Err(e) = stream.play() {
                        tracing::warn!("playback resume failed: {e}");
                    }
                }
                Ok(FeederCmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        // Stream drops here, releasing the output device on this thread.
        drop(stream);
        tracing::debug!("playback feeder stopped");
    }
}

/// Convenience alias for the sink event channel pair.
pub fn sink_event_channel() -> (Sender<SinkEvent>, crossbeam_channel::Receiver<SinkEvent>) {
    crossbeam_channel::unbounded()
}
