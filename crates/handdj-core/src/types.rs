//! Common types for HandDJ
//!
//! The fundamental audio buffer shared by decoding, the effect chain and the
//! playback coordinator.

use std::sync::Arc;

/// Default output sample rate (CD rate, what most consumer devices open at)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Audio sample type (32-bit float for processing, stored as 16-bit in WAV artifacts)
pub type Sample = f32;

/// Immutable interleaved PCM buffer
///
/// Samples are normalized floats in `[-1.0, 1.0]`, interleaved `[L, R, L, R, ...]`
/// for stereo. The sample data sits behind an `Arc`, so cloning a buffer is
/// cheap and every transform returns a new buffer instead of mutating in place.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[Sample]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Create a buffer from interleaved samples
    ///
    /// A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<Sample>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Create a silent buffer of the given duration
    pub fn silence(duration_secs: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; frames * channels.max(1) as usize], sample_rate, channels)
    }

    /// Create a buffer from 16-bit interleaved PCM
    pub fn from_i16_interleaved(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        let floats = samples.iter().map(|&s| s as Sample / 32768.0).collect();
        Self::new(floats, sample_rate, channels)
    }

    /// Create a buffer from planar channel data (all channels must match in length)
    pub fn from_channels(channels: &[Vec<Sample>], sample_rate: u32) -> Self {
        let count = channels.len().max(1);
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        let mut interleaved = Vec::with_capacity(frames * count);
        for frame in 0..frames {
            for channel in channels {
                interleaved.push(channel[frame]);
            }
        }
        Self::new(interleaved, sample_rate, count as u16)
    }

    /// Split into planar channel data
    pub fn to_channels(&self) -> Vec<Vec<Sample>> {
        let count = self.channels as usize;
        (0..count)
            .map(|ch| self.samples.iter().skip(ch).step_by(count).copied().collect())
            .collect()
    }

    /// Interleaved sample data
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Total duration in milliseconds
    pub fn duration_ms(&self) -> f64 {
        self.duration_secs() * 1000.0
    }

    /// Same samples, different nominal sample rate
    ///
    /// Playing the result back at the original rate changes speed and pitch
    /// together. No sample data is copied.
    pub fn with_sample_rate(&self, sample_rate: u32) -> Self {
        Self {
            samples: Arc::clone(&self.samples),
            sample_rate,
            channels: self.channels,
        }
    }

    /// New buffer with `f` applied to every sample
    pub fn map_samples(&self, f: impl Fn(Sample) -> Sample) -> Self {
        Self::new(
            self.samples.iter().map(|&s| f(s)).collect(),
            self.sample_rate,
            self.channels,
        )
    }

    /// Whether two buffers share the same sample storage
    pub fn shares_samples(&self, other: &AudioBuffer) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    /// Root-mean-square level over all channels
    pub fn rms(&self) -> f64 {
        rms(&self.samples)
    }

    /// Peak absolute sample value
    pub fn peak(&self) -> Sample {
        self.samples.iter().fold(0.0, |peak: Sample, s| peak.max(s.abs()))
    }
}

/// Root-mean-square of a sample slice, accumulated in f64
pub fn rms(samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_duration() {
        let buffer = AudioBuffer::silence(10.0, 44100, 2);
        assert_eq!(buffer.frames(), 441_000);
        assert_eq!(buffer.samples().len(), 882_000);
        assert!((buffer.duration_secs() - 10.0).abs() < 1e-9);
        assert!((buffer.duration_ms() - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_frame_dropped() {
        let buffer = AudioBuffer::new(vec![0.1, 0.2, 0.3], 8000, 2);
        assert_eq!(buffer.frames(), 1);
        assert_eq!(buffer.samples(), &[0.1, 0.2]);
    }

    #[test]
    fn test_channels_roundtrip_layout() {
        let buffer = AudioBuffer::new(vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 8000, 2);
        let planar = buffer.to_channels();
        assert_eq!(planar[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(planar[1], vec![-1.0, -2.0, -3.0]);

        let rebuilt = AudioBuffer::from_channels(&planar, 8000);
        assert_eq!(rebuilt.samples(), buffer.samples());
    }

    #[test]
    fn test_from_i16() {
        let buffer = AudioBuffer::from_i16_interleaved(&[i16::MIN, 0, 16384], 8000, 1);
        assert_eq!(buffer.samples()[0], -1.0);
        assert_eq!(buffer.samples()[1], 0.0);
        assert!((buffer.samples()[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_with_sample_rate_shares_data() {
        let buffer = AudioBuffer::silence(1.0, 44100, 1);
        let faster = buffer.with_sample_rate(88200);
        assert!(faster.shares_samples(&buffer));
        assert!((faster.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rms_and_peak() {
        let buffer = AudioBuffer::new(vec![0.5, -0.5, 0.5, -0.5], 8000, 1);
        assert!((buffer.rms() - 0.5).abs() < 1e-9);
        assert_eq!(buffer.peak(), 0.5);
        assert_eq!(rms(&[]), 0.0);
    }
}
