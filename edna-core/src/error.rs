use thiserror::Error;

/// All errors produced by edna-core.
#[derive(Debug, Error)]
pub enum EdnaError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no usable input device found")]
    NoInputDevice,

    #[error("voice activity detector error: {0}")]
    Vad(String),

    #[error("transcription error: {0}")]
    Asr(String),

    #[error("language model error: {0}")]
    Brain(String),

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EdnaError>;
