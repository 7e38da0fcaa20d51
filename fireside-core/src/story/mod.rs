//! Story session orchestration.
//!
//! ```text
//! LiveEvent stream ──► StoryDirector ──► reconciler (pure state machine)
//!                          │                  │ effects
//!                          │                  ▼
//!                          │        speaking gate · response timer ·
//!                          │        illustration requests
//!                          └──► broadcast::Sender<TurnEvent> (presentation)
//!
//! CaptureChunk stream ──► forward_capture ──► LiveClient
//!                          (dropped while the agent is speaking)
//! ```
//!
//! The director owns the shared session state — conversation log, speaking
//! flag, response timer — constructed at session start, reset at the "new
//! story" boundary, and torn down with the process.

pub mod log;
pub mod reconciler;
pub mod timer;

pub use log::{ConversationLog, ConversationTurn, Role};
pub use reconciler::Effect;
pub use timer::ResponseTimer;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capture::CaptureChunk;
use crate::illustration::Illustrator;
use crate::live::{LiveClient, LiveEvent};

/// Broadcast capacity for turn snapshots.
const BROADCAST_CAP: usize = 256;

/// Shared "agent is speaking" flag.
///
/// Set when the agent's turn begins, cleared when it finalizes. Read at the
/// capture → connection boundary to keep the assistant's own voice from
/// echoing back as user input.
#[derive(Debug, Clone, Default)]
pub struct SpeakingState(Arc<AtomicBool>);

impl SpeakingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_agent_speaking(&self, speaking: bool) {
        self.0.store(speaking, Ordering::SeqCst);
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot of the turn a state transition touched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// The tail turn after the transition.
    pub turn: ConversationTurn,
}

/// Director tuning.
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// Grace period after the agent asks a question.
    pub response_window: Duration,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            response_window: Duration::from_secs(10),
        }
    }
}

struct DirectorInner {
    log: Mutex<ConversationLog>,
    speaking: SpeakingState,
    timer: ResponseTimer,
    turn_tx: broadcast::Sender<TurnEvent>,
    seq: AtomicU64,
    response_window: Duration,
    illustrator: Option<Arc<Illustrator>>,
    /// Microphone chunks dropped by the speaking gate.
    gated_chunks: AtomicU64,
}

/// Turn-reconciling session orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct StoryDirector {
    inner: Arc<DirectorInner>,
}

impl StoryDirector {
    pub fn new(config: DirectorConfig, illustrator: Option<Arc<Illustrator>>) -> Self {
        let (turn_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            inner: Arc::new(DirectorInner {
                log: Mutex::new(ConversationLog::new()),
                speaking: SpeakingState::new(),
                timer: ResponseTimer::new(),
                turn_tx,
                seq: AtomicU64::new(0),
                response_window: config.response_window,
                illustrator,
                gated_chunks: AtomicU64::new(0),
            }),
        }
    }

    /// Drive the reconciler from a live event stream until it closes.
    pub fn spawn(&self, mut events: broadcast::Receiver<LiveEvent>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => handle_event(&inner, event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("director lagged by {n} live events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("director event loop ended");
        })
    }

    /// Forward microphone chunks to the session, dropping them while the
    /// agent is speaking. This is the mutual-exclusion boundary between the
    /// capture recorder and the connection client.
    pub fn forward_capture(
        &self,
        mut chunks: broadcast::Receiver<CaptureChunk>,
        client: LiveClient,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                match chunks.recv().await {
                    Ok(chunk) => {
                        if inner.speaking.is_agent_speaking() {
                            inner.gated_chunks.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        client.send_realtime_audio(&chunk.mime_type, chunk.data);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("capture forwarding lagged by {n} chunks");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("capture forwarding ended");
        })
    }

    /// Subscribe to turn snapshots for rendering.
    pub fn subscribe_turns(&self) -> broadcast::Receiver<TurnEvent> {
        self.inner.turn_tx.subscribe()
    }

    pub fn speaking(&self) -> SpeakingState {
        self.inner.speaking.clone()
    }

    pub fn timer(&self) -> ResponseTimer {
        self.inner.timer.clone()
    }

    /// Copy of the conversation so far.
    pub fn log_snapshot(&self) -> Vec<ConversationTurn> {
        self.inner.log.lock().turns().to_vec()
    }

    /// Chunks dropped by the speaking gate since session start.
    pub fn gated_chunk_count(&self) -> u64 {
        self.inner.gated_chunks.load(Ordering::Relaxed)
    }

    /// "New story" boundary: clear the log, disarm the timer, drop the gate.
    pub fn reset(&self) {
        self.inner.log.lock().clear();
        self.inner.timer.cancel();
        self.inner.speaking.set_agent_speaking(false);
        debug!("story reset");
    }
}

fn handle_event(inner: &Arc<DirectorInner>, event: LiveEvent) {
    let effects = match event {
        LiveEvent::InputTranscription { text, is_final } => {
            reconcile(inner, Role::User, &text, is_final)
        }
        LiveEvent::OutputTranscription { text, is_final } => {
            reconcile(inner, Role::Agent, &text, is_final)
        }
        LiveEvent::TurnComplete => {
            let mut log = inner.log.lock();
            let had_open_tail = log.tail().map(|t| !t.is_final).unwrap_or(false);
            let effects = reconciler::apply_turn_complete(&mut log);
            if had_open_tail {
                publish_tail(inner, &log);
            }
            effects
        }
        LiveEvent::Close { .. } => {
            // A dead session cannot be speaking.
            inner.speaking.set_agent_speaking(false);
            Vec::new()
        }
        LiveEvent::Open | LiveEvent::Audio(_) | LiveEvent::Content(_) => Vec::new(),
    };

    for effect in effects {
        apply_effect(inner, effect);
    }
}

fn reconcile(inner: &Arc<DirectorInner>, role: Role, text: &str, is_final: bool) -> Vec<Effect> {
    let mut log = inner.log.lock();
    let effects = reconciler::apply_transcription(&mut log, role, text, is_final);
    publish_tail(inner, &log);
    effects
}

fn publish_tail(inner: &DirectorInner, log: &ConversationLog) {
    if let Some(turn) = log.tail() {
        let _ = inner.turn_tx.send(TurnEvent {
            seq: inner.seq.fetch_add(1, Ordering::Relaxed),
            turn: turn.clone(),
        });
    }
}

fn apply_effect(inner: &Arc<DirectorInner>, effect: Effect) {
    match effect {
        Effect::SetAgentSpeaking(speaking) => {
            inner.speaking.set_agent_speaking(speaking);
        }
        Effect::CancelResponseTimer => {
            inner.timer.cancel();
        }
        Effect::ArmResponseTimer => {
            let epoch = inner.timer.arm();
            let timer = inner.timer.clone();
            let window = inner.response_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if timer.expire(epoch) {
                    debug!("response window elapsed without a reply");
                }
            });
        }
        Effect::RequestIllustration(text) => {
            if let Some(illustrator) = &inner.illustrator {
                illustrator.request(text);
            } else {
                debug!("no illustrator configured, skipping illustration");
            }
        }
    }
}
