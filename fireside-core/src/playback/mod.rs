//! Streaming playback scheduler.
//!
//! ## State machine
//!
//! ```text
//! Idle ──enqueue──► Playing ──buffer finished, queue non-empty──► Playing
//!                      │
//!                      └─buffer finished, queue empty──► Idle + Completed
//!
//! stop(): any state → Idle. Clears the queue, aborts the in-flight buffer,
//! and suppresses the completion notification (discard, not drain).
//! ```
//!
//! The scheduler hands the sink at most two buffers at a time — one sounding,
//! one pre-queued — so consecutive buffers are gapless while the queue itself
//! stays owned by the control thread. Buffer ids are monotonic; a `Finished`
//! event for an id cleared by `stop()` is stale and ignored.

pub mod meter;
pub mod sink;

pub use meter::{MeterTap, VolumeEvent, METER_BLOCK};
pub use sink::{sink_event_channel, AudioSink, SinkEvent};

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::pcm::{self, DecodedBuffer, PLAYBACK_SAMPLE_RATE};

/// Broadcast capacity for playback notifications.
const BROADCAST_CAP: usize = 64;

/// One sounding + one pre-queued buffer at the sink.
const MAX_SCHEDULED: usize = 2;

/// Notifications from the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The queue fully drained: every enqueued buffer finished playing.
    Completed { seq: u64 },
}

enum Command {
    Enqueue(DecodedBuffer),
    Stop,
    Resume,
    Shutdown,
}

/// Handle to the playback control thread.
///
/// `PlaybackScheduler` is `Send + Sync`; all mutation happens on the control
/// thread, serialized through the command channel.
pub struct PlaybackScheduler {
    cmd_tx: Sender<Command>,
    event_tx: broadcast::Sender<PlaybackEvent>,
    playing: Arc<AtomicBool>,
    /// Keeps the meter drain thread alive for the cpal wiring.
    meter_running: Option<Arc<AtomicBool>>,
}

impl PlaybackScheduler {
    /// Build a scheduler over any sink. `sink_events` must be the receiving
    /// half of the channel the sink reports completions on.
    pub fn with_sink(
        sink: Box<dyn AudioSink>,
        sink_events: Receiver<SinkEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        let playing = Arc::new(AtomicBool::new(false));

        let thread_events = event_tx.clone();
        let thread_playing = Arc::clone(&playing);
        std::thread::Builder::new()
            .name("fireside-sched".into())
            .spawn(move || control_main(cmd_rx, sink_events, sink, thread_events, thread_playing))
            .expect("scheduler thread spawn");

        Self {
            cmd_tx,
            event_tx,
            playing,
            meter_running: None,
        }
    }

    /// Open the default output device and wire the level meter tap onto the
    /// played-sample path under `lane`.
    ///
    /// # Errors
    /// Surfaces output-device initialization failures to the caller.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(tap: Arc<MeterTap>, lane: &str) -> Result<Self> {
        let (sink_tx, sink_rx) = sink_event_channel();
        let (meter_producer, meter_consumer) = crate::buffering::create_meter_ring();

        let sink = sink::CpalSink::spawn(sink_tx, Some(meter_producer))?;

        let meter_running = Arc::new(AtomicBool::new(true));
        meter::spawn_meter_thread(
            meter_consumer,
            tap,
            lane.to_string(),
            Arc::clone(&meter_running),
        );

        let mut scheduler = Self::with_sink(Box::new(sink), sink_rx);
        scheduler.meter_running = Some(meter_running);
        Ok(scheduler)
    }

    /// Decode a raw PCM16 chunk and queue it for playback. If the scheduler
    /// is idle, playback starts immediately.
    ///
    /// A chunk that decodes to nothing is logged and dropped; the stream
    /// continues uninterrupted.
    pub fn enqueue(&self, pcm_bytes: &[u8]) {
        let buffer = pcm::decode_pcm16(pcm_bytes, PLAYBACK_SAMPLE_RATE);
        if buffer.is_empty() {
            warn!(bytes = pcm_bytes.len(), "dropping malformed audio chunk");
            return;
        }
        self.enqueue_decoded(buffer);
    }

    /// Queue an already-decoded buffer.
    pub fn enqueue_decoded(&self, buffer: DecodedBuffer) {
        let _ = self.cmd_tx.send(Command::Enqueue(buffer));
    }

    /// Hard cancel: discard the queue, abort in-flight playback, suppress the
    /// completion notification, return to Idle.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    /// Re-activate a suspended output device and restore nominal gain.
    pub fn resume(&self) {
        let _ = self.cmd_tx.send(Command::Resume);
    }

    /// `true` while at least one buffer is sounding or queued.
    pub fn playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Subscribe to playback notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(running) = &self.meter_running {
            running.store(false, Ordering::SeqCst);
        }
    }
}

fn control_main(
    cmd_rx: Receiver<Command>,
    sink_rx: Receiver<SinkEvent>,
    mut sink: Box<dyn AudioSink>,
    event_tx: broadcast::Sender<PlaybackEvent>,
    playing: Arc<AtomicBool>,
) {
    // Buffers waiting to be handed to the sink, FIFO.
    let mut queue: VecDeque<DecodedBuffer> = VecDeque::new();
    // Ids currently at the sink, oldest first.
    let mut scheduled: VecDeque<u64> = VecDeque::new();
    let mut next_id = 0u64;
    let mut completed_seq = 0u64;

    // Hand buffers to the sink up to the sounding + pre-queued limit.
    fn pump(
        queue: &mut VecDeque<DecodedBuffer>,
        scheduled: &mut VecDeque<u64>,
        next_id: &mut u64,
        sink: &mut Box<dyn AudioSink>,
    ) {
        while scheduled.len() < MAX_SCHEDULED {
            let Some(buffer) = queue.pop_front() else { break };
            let id = *next_id;
            *next_id += 1;
            match sink.schedule(id, buffer) {
                Ok(()) => scheduled.push_back(id),
                Err(e) => warn!("sink rejected buffer {id}: {e}"),
            }
        }
    }

    loop {
        crossbeam_channel::select! {
            recv(cmd_rx) -> msg => match msg {
                Ok(Command::Enqueue(buffer)) => {
                    queue.push_back(buffer);
                    pump(&mut queue, &mut scheduled, &mut next_id, &mut sink);
                    playing.store(!scheduled.is_empty(), Ordering::SeqCst);
                }
                Ok(Command::Stop) => {
                    let discarded = queue.len() + scheduled.len();
                    queue.clear();
                    scheduled.clear();
                    sink.flush();
                    playing.store(false, Ordering::SeqCst);
                    debug!(discarded, "playback stopped");
                }
                Ok(Command::Resume) => {
                    if let Err(e) = sink.resume() {
                        warn!("playback resume failed: {e}");
                    }
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(sink_rx) -> msg => match msg {
                Ok(SinkEvent::Finished { id }) => {
                    if scheduled.front() == Some(&id) {
                        scheduled.pop_front();
                        pump(&mut queue, &mut scheduled, &mut next_id, &mut sink);
                        if scheduled.is_empty() && queue.is_empty() {
                            playing.store(false, Ordering::SeqCst);
                            let _ = event_tx.send(PlaybackEvent::Completed {
                                seq: completed_seq,
                            });
                            completed_seq += 1;
                        }
                    } else {
                        // Completion for a buffer cleared by stop().
                        debug!(id, "ignoring stale sink completion");
                    }
                }
                Err(_) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::error::TryRecvError;

    /// Scripted sink: records scheduled buffers; the test injects `Finished`
    /// events through its half of the sink event channel.
    struct TestSink {
        scheduled: Arc<Mutex<Vec<(u64, usize)>>>,
        flushes: Arc<AtomicUsize>,
        resumes: Arc<AtomicUsize>,
    }

    impl AudioSink for TestSink {
        fn schedule(&mut self, id: u64, buffer: DecodedBuffer) -> Result<()> {
            self.scheduled.lock().push((id, buffer.samples.len()));
            Ok(())
        }

        fn flush(&mut self) {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }

        fn resume(&mut self) -> Result<()> {
            self.resumes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Harness {
        scheduler: PlaybackScheduler,
        sink_tx: Sender<SinkEvent>,
        scheduled: Arc<Mutex<Vec<(u64, usize)>>>,
        flushes: Arc<AtomicUsize>,
        resumes: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let (sink_tx, sink_rx) = sink_event_channel();
        let scheduled = Arc::new(Mutex::new(Vec::new()));
        let flushes = Arc::new(AtomicUsize::new(0));
        let resumes = Arc::new(AtomicUsize::new(0));
        let sink = TestSink {
            scheduled: Arc::clone(&scheduled),
            flushes: Arc::clone(&flushes),
            resumes: Arc::clone(&resumes),
        };
        Harness {
            scheduler: PlaybackScheduler::with_sink(Box::new(sink), sink_rx),
            sink_tx,
            scheduled,
            flushes,
            resumes,
        }
    }

    fn pcm_chunk(samples: usize) -> Vec<u8> {
        pcm::encode_pcm16(&vec![0.25; samples])
    }

    fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
        let start = Instant::now();
        while !cond() {
            assert!(
                start.elapsed() < Duration::from_secs(2),
                "timed out waiting for {what}"
            );
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn assert_no_event(rx: &mut broadcast::Receiver<PlaybackEvent>, for_ms: u64) {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(for_ms) {
            match rx.try_recv() {
                Ok(ev) => panic!("expected no playback event, got {ev:?}"),
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(2)),
                Err(_) => return,
            }
        }
    }

    fn recv_completed(rx: &mut broadcast::Receiver<PlaybackEvent>) -> u64 {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(PlaybackEvent::Completed { seq }) => return seq,
                Err(TryRecvError::Empty) => {
                    assert!(
                        start.elapsed() < Duration::from_secs(2),
                        "timed out waiting for completion"
                    );
                    thread::sleep(Duration::from_millis(2));
                }
                Err(e) => panic!("playback channel error: {e:?}"),
            }
        }
    }

    #[test]
    fn completion_fires_once_after_all_buffers_in_fifo_order() {
        let h = harness();
        let mut rx = h.scheduler.subscribe();

        h.scheduler.enqueue(&pcm_chunk(100));
        h.scheduler.enqueue(&pcm_chunk(200));
        h.scheduler.enqueue(&pcm_chunk(300));

        // One sounding + one pre-queued; the third waits in the queue.
        wait_for(|| h.scheduled.lock().len() == 2, "two scheduled buffers");
        assert!(h.scheduler.playing());

        h.sink_tx.send(SinkEvent::Finished { id: 0 }).unwrap();
        wait_for(|| h.scheduled.lock().len() == 3, "third buffer scheduled");
        assert_no_event(&mut rx, 30);

        h.sink_tx.send(SinkEvent::Finished { id: 1 }).unwrap();
        assert_no_event(&mut rx, 30);

        h.sink_tx.send(SinkEvent::Finished { id: 2 }).unwrap();
        assert_eq!(recv_completed(&mut rx), 0);
        assert!(!h.scheduler.playing());

        // Buffers reached the sink in enqueue order with their own identity.
        let log = h.scheduled.lock();
        assert_eq!(
            &*log,
            &[(0, 100), (1, 200), (2, 300)],
            "FIFO order violated"
        );
    }

    #[test]
    fn stop_discards_queue_and_suppresses_completion() {
        let h = harness();
        let mut rx = h.scheduler.subscribe();

        h.scheduler.enqueue(&pcm_chunk(100));
        h.scheduler.enqueue(&pcm_chunk(100));
        wait_for(|| h.scheduled.lock().len() == 2, "scheduled buffers");

        h.scheduler.stop();
        wait_for(|| h.flushes.load(Ordering::Relaxed) == 1, "sink flush");
        assert!(!h.scheduler.playing());

        // A completion for the aborted buffer is stale and must not fire the
        // notification.
        h.sink_tx.send(SinkEvent::Finished { id: 0 }).unwrap();
        assert_no_event(&mut rx, 60);
    }

    #[test]
    fn enqueue_after_stop_restarts_playback() {
        let h = harness();
        let mut rx = h.scheduler.subscribe();

        h.scheduler.enqueue(&pcm_chunk(100));
        wait_for(|| h.scheduled.lock().len() == 1, "first buffer");
        h.scheduler.stop();
        wait_for(|| h.flushes.load(Ordering::Relaxed) == 1, "flush");

        h.scheduler.enqueue(&pcm_chunk(50));
        wait_for(|| h.scheduled.lock().len() == 2, "new buffer scheduled");

        // New buffer got a fresh id (1); finishing it completes the stream.
        h.sink_tx.send(SinkEvent::Finished { id: 1 }).unwrap();
        assert_eq!(recv_completed(&mut rx), 0);
    }

    #[test]
    fn malformed_chunks_are_dropped_without_stopping() {
        let h = harness();

        h.scheduler.enqueue(&[]);
        h.scheduler.enqueue(&[0x7f]); // lone trailing byte → empty decode
        h.scheduler.enqueue(&pcm_chunk(10));

        wait_for(|| h.scheduled.lock().len() == 1, "valid buffer scheduled");
        assert_eq!(h.scheduled.lock()[0].1, 10);
    }

    #[test]
    fn resume_reaches_the_sink() {
        let h = harness();
        h.scheduler.resume();
        wait_for(|| h.resumes.load(Ordering::Relaxed) == 1, "sink resume");
    }
}
