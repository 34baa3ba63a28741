//! Output device abstraction
//!
//! The device plays one fully materialized WAV file at a time, in the manner
//! of a simple "music channel": load, play from an offset, pause, unpause,
//! stop, and a busy flag. It has no clock the coordinator relies on; the
//! position is tracked by the poller instead.

use std::path::Path;

use super::error::AudioResult;

/// A single-buffer output device
///
/// Only the playback coordinator calls these methods.
pub trait OutputDevice: Send {
    /// Human-readable device name for logs
    fn name(&self) -> &str;

    /// Load a 16-bit PCM WAV file, replacing whatever was loaded
    fn load(&mut self, path: &Path) -> AudioResult<()>;

    /// Start the loaded audio at `start_secs`
    fn play(&mut self, start_secs: f64) -> AudioResult<()>;

    fn pause(&mut self);

    fn unpause(&mut self);

    /// Halt output; the loaded audio stays loaded
    fn stop(&mut self);

    /// Device-level gain (1.0 = unity)
    fn set_volume(&mut self, volume: f32);

    /// Whether the device is actively outputting audio
    fn is_busy(&self) -> bool;

    /// Release the device; later calls are no-ops or return `AudioError::Closed`
    fn close(&mut self);
}
