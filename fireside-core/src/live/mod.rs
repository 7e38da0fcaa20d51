//! Live conversation session client.
//!
//! `LiveClient` encapsulates one logical duplex session against the remote
//! service: connect/disconnect lifecycle, an outbound path for realtime
//! microphone chunks, and a broadcast of inbound [`LiveEvent`]s (open, close,
//! audio, transcriptions, turn-complete).
//!
//! Reconnecting tears the prior session down completely — pump task
//! invalidated, outbound sender dropped, `Close` emitted — before the new one
//! opens, so two sessions can never interleave events. The client never
//! reconnects on its own; the caller owns reconnection policy.

pub mod config;
pub mod events;
pub mod stub;
pub mod transport;

pub use config::{Modality, SessionConfig};
pub use events::{ClientMessage, LiveEvent, ServerEvent};
pub use stub::StubStoryteller;
pub use transport::{pair, LiveTransport, PairTransport, RemoteEnd};

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;

/// Broadcast capacity for live events.
const BROADCAST_CAP: usize = 256;

struct Session {
    outbound: mpsc::Sender<ClientMessage>,
    pump: JoinHandle<()>,
}

struct Inner {
    transport: Mutex<Box<dyn LiveTransport>>,
    event_tx: broadcast::Sender<LiveEvent>,
    session: Mutex<Option<Session>>,
    /// Bumped on every connect/teardown; a pump task only forwards while its
    /// generation is current, so a superseded session cannot emit.
    generation: AtomicU64,
    connected: AtomicBool,
}

/// Handle to the live session. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<Inner>,
}

impl LiveClient {
    pub fn new(transport: Box<dyn LiveTransport>) -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            inner: Arc::new(Inner {
                transport: Mutex::new(transport),
                event_tx,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Open a session with the given configuration.
    ///
    /// An already-connected client is torn down first; `Close` for the old
    /// session is emitted before `Open` for the new one.
    ///
    /// # Errors
    /// `FiresideError::Precondition` when required config fields are missing
    /// (checked before any I/O), or transport errors from establishment.
    pub fn connect(&self, config: &SessionConfig) -> Result<()> {
        config.validate()?;
        self.teardown("superseded by reconnect");

        let pipes = self.inner.transport.lock().open(config)?;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let pump = tokio::spawn(pump_events(
            Arc::clone(&self.inner),
            pipes.inbound,
            generation,
        ));
        *self.inner.session.lock() = Some(Session {
            outbound: pipes.outbound,
            pump,
        });
        self.inner.connected.store(true, Ordering::SeqCst);
        let _ = self.inner.event_tx.send(LiveEvent::Open);
        info!("live session connected");
        Ok(())
    }

    /// Close the current session. No-op when not connected.
    pub fn disconnect(&self) {
        self.teardown("client disconnect");
    }

    /// Forward one realtime microphone chunk.
    ///
    /// Fire-and-forget: chunks sent while disconnected or under backpressure
    /// are dropped (audio is perishable — a late chunk is worthless).
    pub fn send_realtime_audio(&self, mime_type: &str, data: String) {
        let guard = self.inner.session.lock();
        let Some(session) = guard.as_ref() else {
            debug!("dropping realtime audio: not connected");
            return;
        };
        let message = ClientMessage::RealtimeInput {
            mime_type: mime_type.to_string(),
            data,
        };
        if session.outbound.try_send(message).is_err() {
            debug!("dropping realtime audio: session backpressure");
        }
    }

    fn teardown(&self, reason: &str) {
        let prior = self.inner.session.lock().take();
        if let Some(session) = prior {
            // Invalidate before aborting so a mid-flight forward can't land.
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            session.pump.abort();
            self.inner.connected.store(false, Ordering::SeqCst);
            let _ = self.inner.event_tx.send(LiveEvent::Close {
                reason: reason.to_string(),
            });
            info!(reason, "live session closed");
        }
    }
}

async fn pump_events(
    inner: Arc<Inner>,
    mut inbound: mpsc::Receiver<ServerEvent>,
    generation: u64,
) {
    loop {
        match inbound.recv().await {
            Some(event) => {
                if inner.generation.load(Ordering::SeqCst) != generation {
                    break; // superseded — never interleave a stale session
                }
                let closing = matches!(event, ServerEvent::Closed { .. });
                let _ = inner.event_tx.send(LiveEvent::from_server(event));
                if closing {
                    inner.connected.store(false, Ordering::SeqCst);
                    inner.session.lock().take();
                    break;
                }
            }
            None => {
                if inner.generation.load(Ordering::SeqCst) == generation {
                    inner.connected.store(false, Ordering::SeqCst);
                    inner.session.lock().take();
                    let _ = inner.event_tx.send(LiveEvent::Close {
                        reason: "transport closed".into(),
                    });
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn recv_event(rx: &mut broadcast::Receiver<LiveEvent>) -> LiveEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for live event")
            .expect("event channel closed")
    }

    fn voice_config() -> SessionConfig {
        SessionConfig::for_voice("Aoede", "You are a storyteller.")
    }

    #[tokio::test]
    async fn connect_rejects_incomplete_config_before_io() {
        let (transport, mut remotes) = pair();
        let client = LiveClient::new(Box::new(transport));

        let mut config = voice_config();
        config.system_instruction.clear();
        assert!(client.connect(&config).is_err());
        assert!(!client.connected());
        assert!(remotes.try_recv().is_err(), "no session may be opened");
    }

    #[tokio::test]
    async fn connect_emits_open_and_forwards_inbound_events() {
        let (transport, mut remotes) = pair();
        let client = LiveClient::new(Box::new(transport));
        let mut rx = client.subscribe();

        client.connect(&voice_config()).expect("connect");
        assert!(client.connected());
        assert!(matches!(recv_event(&mut rx).await, LiveEvent::Open));

        let remote = remotes.recv().await.expect("remote end");
        remote
            .to_client
            .send(ServerEvent::OutputTranscription {
                text: "Once".into(),
                is_final: false,
            })
            .await
            .expect("inject event");

        match recv_event(&mut rx).await {
            LiveEvent::OutputTranscription { text, is_final } => {
                assert_eq!(text, "Once");
                assert!(!is_final);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn audio_sent_while_disconnected_is_dropped() {
        let (transport, _remotes) = pair();
        let client = LiveClient::new(Box::new(transport));
        // Must not panic or error — the chunk is simply discarded.
        client.send_realtime_audio("audio/pcm;rate=16000", "AAAA".into());
    }

    #[tokio::test]
    async fn audio_reaches_the_remote_end_once_connected() {
        let (transport, mut remotes) = pair();
        let client = LiveClient::new(Box::new(transport));
        client.connect(&voice_config()).expect("connect");
        let mut remote = remotes.recv().await.expect("remote end");

        client.send_realtime_audio("audio/pcm;rate=16000", "AAAA".into());

        let message = timeout(Duration::from_secs(1), remote.from_client.recv())
            .await
            .expect("timed out")
            .expect("message");
        let ClientMessage::RealtimeInput { mime_type, data } = message;
        assert_eq!(mime_type, "audio/pcm;rate=16000");
        assert_eq!(data, "AAAA");
    }

    #[tokio::test]
    async fn reconnect_tears_down_the_prior_session_first() {
        let (transport, mut remotes) = pair();
        let client = LiveClient::new(Box::new(transport));
        let mut rx = client.subscribe();

        client.connect(&voice_config()).expect("first connect");
        let remote1 = remotes.recv().await.expect("first remote");
        assert!(matches!(recv_event(&mut rx).await, LiveEvent::Open));

        client.connect(&voice_config()).expect("second connect");
        let remote2 = remotes.recv().await.expect("second remote");

        // Close for the old session strictly precedes Open for the new one.
        assert!(matches!(recv_event(&mut rx).await, LiveEvent::Close { .. }));
        assert!(matches!(recv_event(&mut rx).await, LiveEvent::Open));

        // A stale event from the first session must not surface.
        let _ = remote1
            .to_client
            .send(ServerEvent::TurnComplete)
            .await;
        remote2
            .to_client
            .send(ServerEvent::OutputTranscription {
                text: "fresh".into(),
                is_final: false,
            })
            .await
            .expect("second session event");

        match recv_event(&mut rx).await {
            LiveEvent::OutputTranscription { text, .. } => assert_eq!(text, "fresh"),
            other => panic!("stale session leaked an event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_emits_close_and_stops_forwarding() {
        let (transport, mut remotes) = pair();
        let client = LiveClient::new(Box::new(transport));
        let mut rx = client.subscribe();

        client.connect(&voice_config()).expect("connect");
        let remote = remotes.recv().await.expect("remote end");
        assert!(matches!(recv_event(&mut rx).await, LiveEvent::Open));

        client.disconnect();
        assert!(matches!(recv_event(&mut rx).await, LiveEvent::Close { .. }));
        assert!(!client.connected());

        let _ = remote.to_client.send(ServerEvent::TurnComplete).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "no events after disconnect");
    }

    #[tokio::test]
    async fn remote_close_surfaces_as_close_event() {
        let (transport, mut remotes) = pair();
        let client = LiveClient::new(Box::new(transport));
        let mut rx = client.subscribe();

        client.connect(&voice_config()).expect("connect");
        let remote = remotes.recv().await.expect("remote end");
        assert!(matches!(recv_event(&mut rx).await, LiveEvent::Open));

        remote
            .to_client
            .send(ServerEvent::Closed {
                reason: "quota".into(),
            })
            .await
            .expect("close event");

        match recv_event(&mut rx).await {
            LiveEvent::Close { reason } => assert_eq!(reason, "quota"),
            other => panic!("unexpected event: {other:?}"),
        }
        // Connected flag settles once the pump processes the close.
        timeout(Duration::from_secs(1), async {
            while client.connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client should report disconnected");
    }
}
