//! Message and event types for the live conversation session.

use serde::{Deserialize, Serialize};

/// Outbound messages from the client to the remote session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// One realtime microphone chunk.
    #[serde(rename_all = "camelCase")]
    RealtimeInput {
        /// e.g. `"audio/pcm;rate=16000"`.
        mime_type: String,
        /// Base64-encoded PCM16 payload.
        data: String,
    },
}

/// Inbound events as produced by a transport backend.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Raw PCM16 synthesized speech at 24 kHz.
    Audio(Vec<u8>),
    /// Incremental transcription of the user's microphone audio.
    InputTranscription { text: String, is_final: bool },
    /// Incremental transcription of the agent's synthesized speech.
    OutputTranscription { text: String, is_final: bool },
    /// Non-transcription payload (tool calls, grounding, …).
    Content(serde_json::Value),
    /// The current model turn is complete.
    TurnComplete,
    /// The remote side closed the session.
    Closed { reason: String },
}

/// Events fanned out locally by [`LiveClient`](super::LiveClient), adding the
/// connection lifecycle to the transport surface.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Open,
    Close { reason: String },
    Audio(Vec<u8>),
    InputTranscription { text: String, is_final: bool },
    OutputTranscription { text: String, is_final: bool },
    Content(serde_json::Value),
    TurnComplete,
}

impl LiveEvent {
    pub(crate) fn from_server(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Audio(bytes) => LiveEvent::Audio(bytes),
            ServerEvent::InputTranscription { text, is_final } => {
                LiveEvent::InputTranscription { text, is_final }
            }
            ServerEvent::OutputTranscription { text, is_final } => {
                LiveEvent::OutputTranscription { text, is_final }
            }
            ServerEvent::Content(payload) => LiveEvent::Content(payload),
            ServerEvent::TurnComplete => LiveEvent::TurnComplete,
            ServerEvent::Closed { reason } => LiveEvent::Close { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_input_serializes_with_wire_field_names() {
        let msg = ClientMessage::RealtimeInput {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAAA".into(),
        };
        let json = serde_json::to_value(&msg).expect("serialize client message");
        assert_eq!(json["realtimeInput"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["realtimeInput"]["data"], "AAAA");
    }
}
