//! Playback coordination
//!
//! The [`PlaybackCoordinator`] is the only owner of the output device. It
//! turns processed buffers into WAV artifacts, loads them, tracks position
//! with a fixed-period poller and reports status/progress to an observer.

mod artifacts;
mod coordinator;
mod observer;

pub use artifacts::{export_wav, write_wav, ArtifactError, ArtifactStore};
pub use coordinator::{PlaybackCoordinator, PlaybackSession, PlaybackState};
pub use observer::{ChannelObserver, NullObserver, PlaybackEvent, PlaybackObserver, PlaybackStatus};

use thiserror::Error;

use crate::audio::AudioError;

/// Errors from playback commands
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// The device rejected the materialized buffer
    #[error("Device load failed: {0}")]
    DeviceLoad(#[from] AudioError),

    /// The artifact could not be written
    #[error("Artifact write failed: {0}")]
    TransientIo(#[from] ArtifactError),
}

/// Result type for playback operations
pub type PlaybackResult<T> = Result<T, PlaybackError>;
