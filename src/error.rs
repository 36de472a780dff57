//! Error types for the barista call client

use thiserror::Error;

/// Result type alias for barista operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the call client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote endpoint unreachable, or closed beyond the retry budget
    #[error("connection error: {0}")]
    Connection(String),

    /// Send attempted while the channel is not open
    #[error("not connected")]
    NotConnected,

    /// The environment lacks a speech capability
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Speech recognition engine failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis or playback failure
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Blank query text submitted
    #[error("query text cannot be empty")]
    EmptyQuery,

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text API error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech API error
    #[error("TTS error: {0}")]
    Tts(String),

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
}
