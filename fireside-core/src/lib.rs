//! # fireside-core
//!
//! Reusable engine for a voice-driven storytelling assistant.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → InputStream → SPSC ring → CaptureRecorder ─┐ (base64 PCM16 @16 kHz)
//!                                                         ▼
//!                      StoryDirector::forward_capture (speaking gate)
//!                                                         ▼
//!                                    LiveClient ⇄ LiveTransport ⇄ remote session
//!                                                         │
//!                      ┌──── LiveEvent broadcast ─────────┤
//!                      ▼                                  ▼
//!              StoryDirector                      PCM16 audio @24 kHz
//!       (turn reconciler, timer,                          ▼
//!        illustration requests)              PlaybackScheduler → AudioSink
//!                      │                                  │
//!                      ▼                                  └─► MeterTap (volume)
//!            TurnEvent broadcast
//! ```
//!
//! Audio callbacks are zero-alloc; all heap work happens on the capture
//! emission task and the playback control thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod error;
pub mod illustration;
pub mod live;
pub mod pcm;
pub mod playback;
pub mod story;

// Convenience re-exports for downstream crates
pub use capture::{CaptureChunk, CaptureRecorder, RecorderConfig, REALTIME_AUDIO_MIME};
pub use error::FiresideError;
pub use illustration::{IllustrationConfig, IllustrationEvent, Illustrator};
pub use live::{LiveClient, LiveEvent, SessionConfig};
pub use pcm::{DecodedBuffer, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
pub use playback::{MeterTap, PlaybackEvent, PlaybackScheduler, VolumeEvent};
pub use story::{
    ConversationTurn, DirectorConfig, ResponseTimer, Role, SpeakingState, StoryDirector,
    TurnEvent,
};
