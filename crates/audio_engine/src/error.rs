//! Audio engine error types

use thiserror::Error;

/// Errors produced by the audio engine
#[derive(Error, Debug)]
pub enum AudioError {
    /// Backend has not been initialized
    #[error("audio backend not initialized")]
    BackendNotInitialized,

    /// Backend initialization failed
    #[error("backend initialization failed: {0}")]
    BackendInitFailed(String),

    /// No audio output device is available on this machine
    #[error("no audio output device available")]
    NoOutputDevice,

    /// An asset file could not be opened or probed
    #[error("failed to open audio asset `{path}`: {reason}")]
    AssetUnavailable {
        /// Path of the asset that failed to open
        path: String,
        /// Underlying failure description
        reason: String,
    },

    /// The asset has a channel layout the engine does not support
    #[error("unsupported channel layout: {0} channels")]
    UnsupportedChannels(u16),

    /// The asset decoded to zero frames of audio
    #[error("audio asset `{0}` contains no frames")]
    EmptyAsset(String),

    /// The asset is too large to decode fully into memory
    #[error("audio asset `{0}` exceeds the full-decode limit")]
    AssetTooLarge(String),

    /// Decoding failed mid-stream
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// Playback could not be started or controlled
    #[error("playback failed: {0}")]
    PlaybackFailed(String),

    /// A source or buffer handle does not refer to a live object
    #[error("invalid source or buffer handle")]
    InvalidHandle,

    /// A name was used that was never successfully loaded
    #[error("unknown audio asset `{0}`")]
    UnknownName(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A setting holds a value outside its valid range
    #[error("Invalid setting: {0}")]
    Invalid(String),
}
