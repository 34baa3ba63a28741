//! Logarithmic gain stage

use crate::types::AudioBuffer;

/// Lowest applied gain in dB (also used for near-zero volumes)
pub const MIN_GAIN_DB: f32 = -60.0;
/// Highest applied gain in dB
pub const MAX_GAIN_DB: f32 = 12.0;
/// Volumes at or below this are treated as silent
pub const SILENCE_THRESHOLD: f32 = 0.001;

/// Gain in dB for a linear volume, or `None` when the stage is a no-op
pub fn volume_to_db(volume: f32) -> Option<f32> {
    if volume == 1.0 {
        return None;
    }
    if volume > SILENCE_THRESHOLD {
        Some((20.0 * volume.log10()).clamp(MIN_GAIN_DB, MAX_GAIN_DB))
    } else {
        Some(MIN_GAIN_DB)
    }
}

#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Apply `volume` as a dB gain; unity volume returns the input untouched
pub fn apply_volume(buffer: &AudioBuffer, volume: f32) -> AudioBuffer {
    match volume_to_db(volume) {
        None => buffer.clone(),
        Some(db) => {
            let gain = db_to_linear(db);
            buffer.map_samples(|s| s * gain)
        }
    }
}
