//! Error types for voxloop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxloopError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // Capability errors
    #[error("Audio clip could not be decoded: {message}")]
    AudioDecode { message: String },

    #[error("Frame classification failed: {message}")]
    Classification { message: String },

    #[error("Transcription model not found at {path}")]
    TranscriptionModelNotFound { path: String },

    #[error("Transcription error: {message}")]
    Transcription { message: String },

    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure class, deciding who handles an error.
///
/// `Config` is fatal at construction, `Device` ends the owning session and is
/// reported to the caller, `Capability` is recovered locally per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Device,
    Capability,
    Other,
}

impl VoxloopError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoxloopError::ConfigFileNotFound { .. }
            | VoxloopError::ConfigParse { .. }
            | VoxloopError::ConfigInvalidValue { .. }
            | VoxloopError::Config(_) => ErrorKind::Config,
            VoxloopError::AudioDeviceNotFound { .. }
            | VoxloopError::AudioCapture { .. }
            | VoxloopError::AudioPlayback { .. } => ErrorKind::Device,
            VoxloopError::AudioDecode { .. }
            | VoxloopError::Classification { .. }
            | VoxloopError::TranscriptionModelNotFound { .. }
            | VoxloopError::Transcription { .. }
            | VoxloopError::Synthesis { .. } => ErrorKind::Capability,
            VoxloopError::Io(_) | VoxloopError::Other(_) => ErrorKind::Other,
        }
    }

    /// Shorthand for a `ConfigInvalidValue` error.
    pub fn invalid(key: &str, message: impl Into<String>) -> Self {
        VoxloopError::ConfigInvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VoxloopError>;
