use thiserror::Error;

/// All errors produced by fireside-core.
#[derive(Debug, Error)]
pub enum FiresideError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("invalid session config: {0}")]
    Precondition(String),

    #[error("live transport error: {0}")]
    Transport(String),

    #[error("session is not connected")]
    NotConnected,

    #[error("illustration error: {0}")]
    Illustration(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FiresideError>;
