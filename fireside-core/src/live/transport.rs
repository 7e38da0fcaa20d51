//! Transport seam for the live session.
//!
//! `LiveTransport` is the extensibility point between the connection client
//! and whatever carries the session remotely, in the same way the speech
//! backends in comparable engines sit behind a trait. In-repo backends:
//!
//! - [`PairTransport`] — an in-memory duplex whose remote half is handed to
//!   the embedder; used by the integration tests and anything that wants to
//!   script the remote side.
//! - [`StubStoryteller`](super::stub::StubStoryteller) — a scripted offline
//!   session so the whole pipeline runs end-to-end without the service.

use tokio::sync::mpsc;

use super::config::SessionConfig;
use super::events::{ClientMessage, ServerEvent};
use crate::error::{FiresideError, Result};

/// Channel capacity for each direction of a session.
pub const SESSION_CHANNEL_CAP: usize = 256;

/// The two ends of an open session, client side.
pub struct TransportPipes {
    /// Client → remote messages.
    pub outbound: mpsc::Sender<ClientMessage>,
    /// Remote → client events. Channel closure means the session ended.
    pub inbound: mpsc::Receiver<ServerEvent>,
}

/// A factory for live sessions. `open` is called once per connect; the
/// returned pipes belong to that session alone.
pub trait LiveTransport: Send + 'static {
    /// Establish one session with the given configuration.
    ///
    /// # Errors
    /// Connection-establishment failures. Later failures surface by closing
    /// the inbound channel (optionally after a `ServerEvent::Closed`).
    fn open(&mut self, config: &SessionConfig) -> Result<TransportPipes>;
}

/// The remote half of a [`PairTransport`] session.
pub struct RemoteEnd {
    /// Messages the client sent upstream.
    pub from_client: mpsc::Receiver<ClientMessage>,
    /// Inject events toward the client.
    pub to_client: mpsc::Sender<ServerEvent>,
    /// The config the session was opened with.
    pub config: SessionConfig,
}

/// In-memory duplex transport. Every `open` creates a fresh pipe pair and
/// delivers the remote half to the receiver returned by [`pair`].
pub struct PairTransport {
    remote_tx: mpsc::UnboundedSender<RemoteEnd>,
}

/// Create a pair transport and the stream of remote ends, one per session.
pub fn pair() -> (PairTransport, mpsc::UnboundedReceiver<RemoteEnd>) {
    let (remote_tx, remote_rx) = mpsc::unbounded_channel();
    (PairTransport { remote_tx }, remote_rx)
}

impl LiveTransport for PairTransport {
    fn open(&mut self, config: &SessionConfig) -> Result<TransportPipes> {
        let (out_tx, out_rx) = mpsc::channel(SESSION_CHANNEL_CAP);
        let (in_tx, in_rx) = mpsc::channel(SESSION_CHANNEL_CAP);

        self.remote_tx
            .send(RemoteEnd {
                from_client: out_rx,
                to_client: in_tx,
                config: config.clone(),
            })
            .map_err(|_| FiresideError::Transport("pair transport peer dropped".into()))?;

        Ok(TransportPipes {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
