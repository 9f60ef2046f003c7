use thiserror::Error;

/// All errors produced by revoice-core.
#[derive(Debug, Error)]
pub enum RevoiceError {
    #[error("invalid capture mode {0} (expected 0 = manual or 1 = automatic)")]
    InvalidMode(u8),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no output device found")]
    NoOutputDevice,

    #[error("conversion service error: {0}")]
    Conversion(String),

    #[error("conversion service returned no audio")]
    NoAudioProduced,

    #[error("playback error: {0}")]
    Playback(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("a segment is still being converted")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RevoiceError>;
