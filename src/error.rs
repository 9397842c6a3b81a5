//! Error types for Navi

use thiserror::Error;

/// Result type alias for Navi operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Navi
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, invalid value)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or format error
    #[error("audio error: {0}")]
    Audio(String),

    /// Capture device failed while running
    #[error("device fault: {0}")]
    DeviceFault(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Transcription produced no usable text
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Utterance buffer grew past its sanity cap
    #[error("buffer overrun: {samples} samples exceeds cap of {cap}")]
    BufferOverrun {
        /// Samples held when the cap was hit
        samples: usize,
        /// Configured cap
        cap: usize,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}
