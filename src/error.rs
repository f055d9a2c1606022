//! Error types for voxscribe.

use crate::transport::ChannelId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxscribeError {
    // Frame decoding errors (contained: frame is dropped, stream continues)
    #[error("Failed to decode voice frame: {message}")]
    Decode { message: String },

    // Recognition engine errors (contained: recognizer is reset, session continues)
    #[error("Recognition engine failed: {message}")]
    Recognition { message: String },

    #[error("Failed to open recognizer: {message}")]
    RecognizerOpen { message: String },

    // Session state machine precondition violations
    #[error("Failed to join channel {channel}: {message}")]
    Join { channel: ChannelId, message: String },

    #[error("Not joined to a voice channel")]
    NotJoined,

    #[error("Already active in channel {channel}")]
    AlreadyActive { channel: ChannelId },

    // Transport-level failure (forces session teardown)
    #[error("Voice transport disconnected")]
    TransportDisconnected,

    // Text-output sink errors
    #[error("Transcript sink error: {message}")]
    Sink { message: String },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxscribeError>;
