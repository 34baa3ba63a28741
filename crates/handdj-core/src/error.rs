//! Engine-level error taxonomy
//!
//! Subsystems keep their own error enums; `EngineError` is what the public
//! `AudioEngine` surface returns. Expected conditions such as "nothing loaded"
//! are variants here rather than panics.

use thiserror::Error;

use crate::audio::AudioError;
use crate::decode::DecodeError;
use crate::effect::RenderError;
use crate::params::ParamError;
use crate::playback::{ArtifactError, PlaybackError};

/// Errors returned by [`crate::AudioEngine`] operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Input could not be decoded (fatal to the load call)
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Output device rejected the materialized buffer; playback state unchanged
    #[error("Device load failed: {0}")]
    DeviceLoad(#[source] AudioError),

    /// A DSP stage failed
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    /// Writing a transient artifact failed; the operation was aborted
    #[error("Transient I/O failure: {0}")]
    TransientIo(#[source] ArtifactError),

    /// Operation needs a loaded track
    #[error("No audio loaded")]
    NoAudioLoaded,

    /// Parameter value rejected (non-finite, unknown name, out-of-range seek)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<PlaybackError> for EngineError {
    fn from(err: PlaybackError) -> Self {
        match err {
            PlaybackError::DeviceLoad(e) => EngineError::DeviceLoad(e),
            PlaybackError::TransientIo(e) => EngineError::TransientIo(e),
        }
    }
}

impl From<ParamError> for EngineError {
    fn from(err: ParamError) -> Self {
        EngineError::InvalidParameter(err.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamName;

    #[test]
    fn test_playback_error_maps_to_taxonomy() {
        let err: EngineError = PlaybackError::DeviceLoad(AudioError::NothingLoaded).into();
        assert!(matches!(err, EngineError::DeviceLoad(_)));

        let err: EngineError =
            PlaybackError::TransientIo(ArtifactError::Create(std::io::Error::other("disk full")))
                .into();
        assert!(matches!(err, EngineError::TransientIo(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_param_error_is_invalid_parameter() {
        let err: EngineError = ParamError::NonFinite {
            name: ParamName::Pitch,
            value: f32::NAN,
        }
        .into();
        assert!(matches!(err, EngineError::InvalidParameter(msg) if msg.contains("pitch")));
    }
}
