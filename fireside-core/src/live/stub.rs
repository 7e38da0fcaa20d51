//! `StubStoryteller` — scripted offline session backend.
//!
//! Used when no remote service is reachable (or wanted): it answers incoming
//! microphone chunks with a canned storytelling exchange — input
//! transcription, output transcription deltas, a synthesized tone in place of
//! speech audio, and a turn-complete signal — so the full capture → live →
//! reconciler → playback pipeline can be exercised end-to-end.

use std::f32::consts::TAU;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::config::SessionConfig;
use super::events::{ClientMessage, ServerEvent};
use super::transport::{LiveTransport, TransportPipes, SESSION_CHANNEL_CAP};
use crate::error::Result;
use crate::pcm::{self, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};

/// Canned agent lines, cycled per turn. Every other line ends with a
/// question so the response-window countdown gets exercised too.
const STORY_LINES: &[&[&str]] = &[
    &[
        "Once upon a time, a small fox ",
        "found a glowing lantern in the woods.",
        " What do you think the fox did next?",
    ],
    &[
        "The fox carried the lantern ",
        "all the way to the sleepy river.",
    ],
    &[
        "At the river, a turtle waved hello ",
        "and asked to share the light.",
        " Should the fox say yes?",
    ],
];

/// Scripted offline session backend.
pub struct StubStoryteller {
    /// Microphone chunks accumulated before the storyteller answers.
    pub chunks_per_turn: usize,
}

impl Default for StubStoryteller {
    fn default() -> Self {
        Self {
            chunks_per_turn: 20,
        }
    }
}

impl LiveTransport for StubStoryteller {
    fn open(&mut self, config: &SessionConfig) -> Result<TransportPipes> {
        let (out_tx, out_rx) = mpsc::channel(SESSION_CHANNEL_CAP);
        let (in_tx, in_rx) = mpsc::channel(SESSION_CHANNEL_CAP);

        info!(
            voice = %config.speech_config.voice_config.prebuilt_voice_config.voice_name,
            "offline storyteller session opened"
        );

        tokio::spawn(run_session(out_rx, in_tx, self.chunks_per_turn));

        Ok(TransportPipes {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

async fn run_session(
    mut from_client: mpsc::Receiver<ClientMessage>,
    to_client: mpsc::Sender<ServerEvent>,
    chunks_per_turn: usize,
) {
    let mut turn = 0usize;
    let mut chunk_count = 0usize;
    let mut heard_samples = 0usize;

    while let Some(message) = from_client.recv().await {
        let ClientMessage::RealtimeInput { data, .. } = message;
        chunk_count += 1;
        if let Some(decoded) = pcm::decode_pcm16_base64(&data, CAPTURE_SAMPLE_RATE) {
            heard_samples += decoded.samples.len();
        }

        if chunk_count < chunks_per_turn.max(1) {
            continue;
        }

        let heard_ms = heard_samples * 1000 / CAPTURE_SAMPLE_RATE as usize;
        if !respond(&to_client, turn, heard_ms).await {
            break; // client went away
        }
        turn += 1;
        chunk_count = 0;
        heard_samples = 0;
    }

    debug!("offline storyteller session ended");
}

/// Emit one scripted exchange. Returns `false` once the client is gone.
async fn respond(to_client: &mpsc::Sender<ServerEvent>, turn: usize, heard_ms: usize) -> bool {
    let script = STORY_LINES[turn % STORY_LINES.len()];

    let user_events = [
        ServerEvent::InputTranscription {
            text: format!("(a young voice, about {heard_ms} ms)"),
            is_final: false,
        },
        ServerEvent::InputTranscription {
            text: String::new(),
            is_final: true,
        },
    ];
    for event in user_events {
        if to_client.send(event).await.is_err() {
            return false;
        }
    }

    for piece in script {
        let event = ServerEvent::OutputTranscription {
            text: (*piece).to_string(),
            is_final: false,
        };
        if to_client.send(event).await.is_err() {
            return false;
        }
    }

    // A short tone stands in for synthesized speech; pitch varies per turn
    // so consecutive answers are audibly distinct.
    let audio = tone_pcm16(330.0 + 55.0 * (turn % 4) as f32, 300);
    if to_client.send(ServerEvent::Audio(audio)).await.is_err() {
        return false;
    }

    to_client.send(ServerEvent::TurnComplete).await.is_ok()
}

/// Mono PCM16 sine tone at the playback rate.
fn tone_pcm16(frequency: f32, duration_ms: usize) -> Vec<u8> {
    let total = PLAYBACK_SAMPLE_RATE as usize * duration_ms / 1000;
    let samples: Vec<f32> = (0..total)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            0.3 * (TAU * frequency * t).sin()
        })
        .collect();
    pcm::encode_pcm16(&samples)
}
