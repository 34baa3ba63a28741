//! Output device error types

use thiserror::Error;

/// Errors that can occur during output device operations
#[derive(Error, Debug)]
pub enum AudioError {
    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Device could not load the materialized buffer
    #[error("Failed to load audio into device: {0}")]
    LoadFailed(String),

    /// Playback command issued with nothing loaded
    #[error("Nothing loaded in the output device")]
    NothingLoaded,

    /// Device already closed
    #[error("Output device is closed")]
    Closed,
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
