//! Treble shelf

use super::filter::SosFilter;
use crate::types::AudioBuffer;

/// Shelf corner frequency
pub const TREBLE_CORNER_HZ: f64 = 3000.0;

/// Boost or cut everything above 3 kHz by `treble_db`; 0 dB returns the input
pub fn apply_treble(buffer: &AudioBuffer, treble_db: f32) -> AudioBuffer {
    if treble_db == 0.0 || buffer.is_empty() {
        return buffer.clone();
    }
    let shelf = SosFilter::high_shelf(TREBLE_CORNER_HZ, treble_db as f64, buffer.sample_rate());
    let channels: Vec<Vec<f32>> = buffer
        .to_channels()
        .into_iter()
        .map(|ch| {
            let input: Vec<f64> = ch.into_iter().map(f64::from).collect();
            shelf.filter(&input).into_iter().map(|y| y as f32).collect()
        })
        .collect();
    AudioBuffer::from_channels(&channels, buffer.sample_rate())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_is_passthrough() {
        let input = AudioBuffer::silence(0.1, 44100, 2);
        assert!(apply_treble(&input, 0.0).shares_samples(&input));
    }

    #[test]
    fn test_cut_reduces_high_band() {
        let frames = 4410;
        let samples: Vec<f32> = (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * 12000.0 * i as f32 / 44100.0).sin() * 0.5)
            .collect();
        let input = AudioBuffer::new(samples, 44100, 1);
        let out = apply_treble(&input, -10.0);
        assert_eq!(out.frames(), frames);
        assert!(out.rms() < input.rms() * 0.5);
    }
}
