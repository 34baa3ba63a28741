//! Parameter smoothing for noisy control streams
//!
//! Gesture distances jitter from frame to frame. Each controlled parameter
//! keeps a short FIFO of raw readings; the smoothed value then moves a fixed
//! fraction towards the rolling mean on every update. Single-frame spikes are
//! averaged away while a sustained movement is tracked within 5-10 updates.

use std::collections::VecDeque;

/// Number of raw readings kept per parameter
pub const DEFAULT_HISTORY_LEN: usize = 5;

/// Default smoothing factor (fraction of the gap closed per update)
pub const DEFAULT_SMOOTHING_FACTOR: f32 = 0.2;

/// Bounded history of raw readings plus the current smoothed value
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    history: VecDeque<f32>,
    capacity: usize,
    value: f32,
    initial: f32,
}

impl SmoothingBuffer {
    /// Create a buffer starting at `initial` holding `capacity` readings
    pub fn new(initial: f32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity + 1),
            capacity,
            value: initial,
            initial,
        }
    }

    /// Current smoothed value
    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Raw readings currently held (oldest first)
    pub fn history(&self) -> impl Iterator<Item = f32> + '_ {
        self.history.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push a raw reading and update the smoothed value
    pub fn update(&mut self, raw: f32, factor: f32) -> f32 {
        self.value = smooth(raw, &mut self.history, self.capacity, self.value, factor);
        self.value
    }

    /// Drop the history and return to the initial value
    pub fn reset(&mut self) {
        self.history.clear();
        self.value = self.initial;
    }
}

/// One smoothing step over caller-owned state
///
/// Pushes `raw` into `history` (dropping the oldest beyond `capacity`) and
/// returns `current + factor * (mean(history) - current)`.
pub fn smooth(
    raw: f32,
    history: &mut VecDeque<f32>,
    capacity: usize,
    current: f32,
    factor: f32,
) -> f32 {
    history.push_back(raw);
    while history.len() > capacity.max(1) {
        history.pop_front();
    }
    let avg = history.iter().sum::<f32>() / history.len() as f32;
    current + factor * (avg - current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut buffer = SmoothingBuffer::new(0.0, DEFAULT_HISTORY_LEN);
        for i in 0..12 {
            buffer.update(i as f32, DEFAULT_SMOOTHING_FACTOR);
        }
        assert_eq!(buffer.len(), 5);
        let held: Vec<f32> = buffer.history().collect();
        assert_eq!(held, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_single_step_formula() {
        let mut history = VecDeque::new();
        history.extend([1.0, 2.0]);
        // mean(1, 2, 3) = 2, 0.5 + 0.2 * (2 - 0.5) = 0.8
        let next = smooth(3.0, &mut history, 5, 0.5, 0.2);
        assert!((next - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_converges_to_constant() {
        let mut buffer = SmoothingBuffer::new(0.0, DEFAULT_HISTORY_LEN);
        let mut calls = 0;
        while (buffer.value() - 1.0).abs() > 0.02 {
            buffer.update(1.0, DEFAULT_SMOOTHING_FACTOR);
            calls += 1;
            assert!(calls <= 20, "did not converge within 20 updates");
        }
    }

    #[test]
    fn test_rejects_single_frame_spike() {
        let mut buffer = SmoothingBuffer::new(1.0, DEFAULT_HISTORY_LEN);
        for _ in 0..5 {
            buffer.update(1.0, 0.2);
        }
        let after_spike = buffer.update(3.0, 0.2);
        // Spike of +2 moves the mean by 0.4 and the value by only 0.08
        assert!((after_spike - 1.08).abs() < 1e-5);
    }

    #[test]
    fn test_gentler_factor_moves_less() {
        let mut volume = SmoothingBuffer::new(1.0, DEFAULT_HISTORY_LEN);
        let mut pitch = SmoothingBuffer::new(1.0, DEFAULT_HISTORY_LEN);
        let v = volume.update(2.0, 0.1);
        let p = pitch.update(2.0, 0.2);
        assert!(v < p);
    }

    #[test]
    fn test_reset() {
        let mut buffer = SmoothingBuffer::new(1.0, 3);
        buffer.update(2.0, 0.5);
        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.value(), 1.0);
        assert_eq!(buffer.capacity(), 3);
    }
}
