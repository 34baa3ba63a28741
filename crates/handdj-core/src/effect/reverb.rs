//! Convolution reverb
//!
//! A synthetic impulse response (exponential noise tail plus a few early
//! reflections, tone-shaped and normalized) is convolved with the dry signal.
//! The result is blended with an equal-power crossfade, loudness matched so
//! it never exceeds the dry level, then soft clipped.
//!
//! Impulse responses are cached per `(sample rate, tail duration, type)`.
//! The noise generator is seeded with a constant, so a given key always
//! produces a bit-identical IR.

use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::{Arc, RwLock};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::convolve::SameConvolver;
use super::filter::{FilterKind, SosFilter};
use super::RenderError;
use crate::types::{rms, AudioBuffer};

/// Seed for the diffuse tail noise
const NOISE_SEED: u64 = 42;
/// Shortest and longest tail, reached at amount 0 and 2
const TAIL_RANGE_SECS: (f64, f64) = (0.1, 1.2);
/// Highest accepted amount
const MAX_AMOUNT: f64 = 2.0;
/// Width of an early-reflection pulse
const REFLECTION_WIDTH_SECS: f64 = 0.002;
/// Fade-in length at the start of the IR
const FADE_IN_SECS: f64 = 0.001;
/// IR level after L2 normalization
const IR_HEADROOM: f64 = 0.35;
/// Wet signal high-pass corner
const WET_HIGHPASS_HZ: f64 = 120.0;
/// Share of a channel's own convolution in its wet signal (rest is crossfeed)
const CROSSFEED_OWN: f64 = 0.8;
/// Peak ceiling after soft clipping
const PEAK_CEILING: f64 = 0.95;

/// Reverb character, picked from the amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReverbType {
    Room,
    Hall,
    Plate,
}

/// Fixed shape parameters of a reverb type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbPreset {
    /// Exponent reached at the end of the tail (`exp(-decay_rate)`)
    pub decay_rate: f64,
    /// Scale of the early reflections
    pub room_size: f64,
    /// Scale of the tail noise
    pub damping: f64,
    /// Early reflection taps as (delay seconds, gain)
    pub early_reflections: &'static [(f64, f64)],
}

impl ReverbType {
    /// amount < 0.7 room, < 1.4 hall, otherwise plate
    pub fn for_amount(amount: f32) -> Self {
        if amount < 0.7 {
            ReverbType::Room
        } else if amount < 1.4 {
            ReverbType::Hall
        } else {
            ReverbType::Plate
        }
    }

    pub fn preset(&self) -> ReverbPreset {
        match self {
            ReverbType::Room => ReverbPreset {
                decay_rate: 3.0,
                room_size: 0.3,
                damping: 0.7,
                early_reflections: &[(0.008, 0.18), (0.015, 0.14), (0.025, 0.10), (0.042, 0.06)],
            },
            ReverbType::Hall => ReverbPreset {
                decay_rate: 2.0,
                room_size: 0.7,
                damping: 0.5,
                early_reflections: &[(0.012, 0.15), (0.028, 0.12), (0.048, 0.08), (0.075, 0.05)],
            },
            ReverbType::Plate => ReverbPreset {
                decay_rate: 4.0,
                room_size: 0.4,
                damping: 0.8,
                early_reflections: &[(0.003, 0.20), (0.007, 0.16), (0.013, 0.12), (0.021, 0.08)],
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReverbType::Room => "room",
            ReverbType::Hall => "hall",
            ReverbType::Plate => "plate",
        }
    }
}

/// IR cache key: duration is held in whole milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct IrKey {
    sample_rate: u32,
    duration_ms: u32,
    kind: ReverbType,
}

/// Tail duration for an amount, linear over [0, 2] and clamped
pub fn tail_duration(amount: f32) -> f64 {
    let t = (amount as f64 / MAX_AMOUNT).clamp(0.0, 1.0);
    TAIL_RANGE_SECS.0 + t * (TAIL_RANGE_SECS.1 - TAIL_RANGE_SECS.0)
}

/// Equal-power (wet, dry) gains for an amount
pub fn wet_dry(amount: f32) -> (f64, f64) {
    let t = (amount as f64 / MAX_AMOUNT).clamp(0.0, 1.0);
    let angle = t * FRAC_PI_2;
    (angle.sin(), angle.cos())
}

/// Synthesize an impulse response
pub fn generate_ir(sample_rate: u32, duration_secs: f64, kind: ReverbType) -> Vec<f64> {
    let preset = kind.preset();
    let sr = sample_rate as f64;
    let length = ((sr * duration_secs) as usize).max(8);

    // Diffuse tail
    let mut rng = ChaCha8Rng::seed_from_u64(NOISE_SEED);
    let last = (length - 1) as f64;
    let mut ir: Vec<f64> = (0..length)
        .map(|i| {
            let decay = (-preset.decay_rate * i as f64 / last).exp();
            let noise = gaussian(&mut rng) * 0.02 * preset.damping;
            decay * (0.85 + noise)
        })
        .collect();

    // Early reflections
    let width = ((sr * REFLECTION_WIDTH_SECS) as usize).max(1);
    for &(delay, gain) in preset.early_reflections {
        let center = (delay * sr) as usize;
        if center >= length {
            continue;
        }
        let start = center.saturating_sub(width / 2);
        let end = (center + width / 2).min(length);
        if end <= start {
            continue;
        }
        for (slot, w) in ir[start..end].iter_mut().zip(hann(end - start)) {
            *slot += gain * w * preset.room_size;
        }
    }

    // Tone shaping
    let nyquist = sr / 2.0;
    ir = SosFilter::butterworth(2, FilterKind::HighPass, 80.0, sample_rate).filtfilt(&ir);
    ir = SosFilter::butterworth(3, FilterKind::LowPass, 12000.0f64.min(nyquist * 0.8), sample_rate)
        .filtfilt(&ir);
    let bright = SosFilter::butterworth(1, FilterKind::HighPass, 800.0, sample_rate).filtfilt(&ir);
    for (x, b) in ir.iter_mut().zip(&bright) {
        *x = *x * 0.7 + b * 0.3;
    }

    // Fade in (sin² ramp)
    let fade = (sr * FADE_IN_SECS) as usize;
    if length > fade && fade > 0 {
        let step = if fade > 1 { FRAC_PI_2 / (fade - 1) as f64 } else { 0.0 };
        for (i, x) in ir[..fade].iter_mut().enumerate() {
            let s = (step * i as f64).sin();
            *x *= s * s;
        }
    }

    // Remove DC and normalize
    let mean = ir.iter().sum::<f64>() / length as f64;
    ir.iter_mut().for_each(|x| *x -= mean);
    let l2 = ir.iter().map(|x| x * x).sum::<f64>().sqrt();
    if l2 > 1e-12 {
        ir.iter_mut().for_each(|x| *x /= l2);
    }
    ir.iter_mut().for_each(|x| *x *= IR_HEADROOM);
    ir
}

/// Standard normal sample (Box-Muller)
fn gaussian(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Symmetric Hann window
fn hann(len: usize) -> impl Iterator<Item = f64> {
    (0..len).map(move |n| {
        if len == 1 {
            1.0
        } else {
            0.5 - 0.5 * (2.0 * PI * n as f64 / (len - 1) as f64).cos()
        }
    })
}

/// Convolution reverb with a shared impulse response cache
///
/// Safe to share between threads. Cache entries are written once and never
/// modified afterwards.
#[derive(Debug, Default)]
pub struct ReverbEngine {
    cache: RwLock<HashMap<IrKey, Arc<[f64]>>>,
}

impl ReverbEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached (or freshly generated) impulse response
    ///
    /// The duration is rounded to milliseconds and the IR is generated from
    /// the rounded value, so everything sharing a key gets the same IR.
    pub fn impulse_response(
        &self,
        sample_rate: u32,
        duration_secs: f64,
        kind: ReverbType,
    ) -> Arc<[f64]> {
        let key = IrKey {
            sample_rate,
            duration_ms: (duration_secs * 1000.0).round().max(0.0) as u32,
            kind,
        };

        if let Ok(cache) = self.cache.read() {
            if let Some(ir) = cache.get(&key) {
                return Arc::clone(ir);
            }
        }

        log::debug!(
            "ReverbEngine: Generating {} IR ({} ms @ {} Hz)",
            kind.name(),
            key.duration_ms,
            sample_rate
        );
        let ir: Arc<[f64]> = generate_ir(sample_rate, key.duration_ms as f64 / 1000.0, kind).into();

        match self.cache.write() {
            // Another thread may have raced us here; keep the first entry
            Ok(mut cache) => Arc::clone(cache.entry(key).or_insert(ir)),
            Err(_) => ir,
        }
    }

    /// Number of cached impulse responses
    pub fn cached_len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Apply reverb at `amount` (0..=2)
    ///
    /// Amount 0 (or less) returns the input unchanged without convolving.
    pub fn apply(&self, buffer: &AudioBuffer, amount: f32) -> Result<AudioBuffer, RenderError> {
        if amount <= 0.0 || buffer.is_empty() {
            return Ok(buffer.clone());
        }
        let channels = buffer.channels();
        if channels > 2 {
            return Err(RenderError::InvalidBuffer(format!(
                "reverb supports mono or stereo, got {} channels",
                channels
            )));
        }

        let sample_rate = buffer.sample_rate();
        let kind = ReverbType::for_amount(amount);
        let ir = self.impulse_response(sample_rate, tail_duration(amount), kind);
        let (wet, dry) = wet_dry(amount);

        let dry_channels: Vec<Vec<f64>> = buffer
            .to_channels()
            .into_iter()
            .map(|ch| ch.into_iter().map(f64::from).collect())
            .collect();
        let frames = buffer.frames();

        let mut convolver = SameConvolver::new(&ir, frames)?;
        let convolved = dry_channels
            .iter()
            .map(|ch| convolver.convolve(ch))
            .collect::<Result<Vec<_>, _>>()?;

        let wet_hp = SosFilter::butterworth(2, FilterKind::HighPass, WET_HIGHPASS_HZ, sample_rate);
        let mut mixed: Vec<Vec<f64>> = Vec::with_capacity(dry_channels.len());
        for (ch, dry_signal) in dry_channels.iter().enumerate() {
            let wet_signal: Vec<f64> = if convolved.len() == 2 {
                let other = &convolved[1 - ch];
                convolved[ch]
                    .iter()
                    .zip(other)
                    .map(|(own, cross)| own * CROSSFEED_OWN + cross * (1.0 - CROSSFEED_OWN))
                    .collect()
            } else {
                convolved[ch].clone()
            };
            let wet_signal = wet_hp.filtfilt(&wet_signal);
            mixed.push(
                dry_signal
                    .iter()
                    .zip(&wet_signal)
                    .map(|(x, w)| x * dry + w * wet)
                    .collect(),
            );
        }

        // Never louder than the dry signal
        let dry_rms = rms(buffer.samples()) + 1e-12;
        let wet_rms = planar_rms(&mixed) + 1e-12;
        if wet_rms > dry_rms {
            let scale = dry_rms / wet_rms;
            mixed.iter_mut().flatten().for_each(|y| *y *= scale);
        }

        soft_clip(&mut mixed);

        let out: Vec<Vec<f32>> = mixed
            .into_iter()
            .map(|ch| ch.into_iter().map(|y| y as f32).collect())
            .collect();
        Ok(AudioBuffer::from_channels(&out, sample_rate))
    }
}

fn planar_rms(channels: &[Vec<f64>]) -> f64 {
    let count: usize = channels.iter().map(Vec::len).sum();
    if count == 0 {
        return 0.0;
    }
    let sum: f64 = channels.iter().flatten().map(|y| y * y).sum();
    (sum / count as f64).sqrt()
}

/// `tanh(0.95 y) * 0.92`, then cap the peak at 0.95
fn soft_clip(channels: &mut [Vec<f64>]) {
    let mut peak = 0.0f64;
    for y in channels.iter_mut().flatten() {
        *y = (*y * 0.95).tanh() * 0.92;
        peak = peak.max(y.abs());
    }
    if peak > PEAK_CEILING {
        let scale = PEAK_CEILING / peak;
        channels.iter_mut().flatten().for_each(|y| *y *= scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_buffer(seconds: f64, sample_rate: u32, channels: u16, level: f32) -> AudioBuffer {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let frames = (seconds * sample_rate as f64) as usize;
        let samples = (0..frames * channels as usize)
            .map(|_| (rng.random::<f32>() * 2.0 - 1.0) * level)
            .collect();
        AudioBuffer::new(samples, sample_rate, channels)
    }

    #[test]
    fn test_type_selection() {
        assert_eq!(ReverbType::for_amount(0.1), ReverbType::Room);
        assert_eq!(ReverbType::for_amount(0.69), ReverbType::Room);
        assert_eq!(ReverbType::for_amount(0.7), ReverbType::Hall);
        assert_eq!(ReverbType::for_amount(1.39), ReverbType::Hall);
        assert_eq!(ReverbType::for_amount(1.5), ReverbType::Plate);
        assert_eq!(ReverbType::for_amount(2.0), ReverbType::Plate);
    }

    #[test]
    fn test_tail_duration_mapping() {
        assert!((tail_duration(0.0) - 0.1).abs() < 1e-9);
        assert!((tail_duration(1.0) - 0.65).abs() < 1e-9);
        assert!((tail_duration(2.0) - 1.2).abs() < 1e-9);
        assert!((tail_duration(5.0) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_wet_dry_equal_power() {
        for amount in [0.0, 0.3, 1.0, 1.7, 2.0] {
            let (wet, dry) = wet_dry(amount);
            assert!((wet * wet + dry * dry - 1.0).abs() < 1e-12);
        }
        let (wet, dry) = wet_dry(2.0);
        assert!((wet - 1.0).abs() < 1e-12 && dry.abs() < 1e-12);
    }

    #[test]
    fn test_ir_is_deterministic() {
        let a = generate_ir(22050, 0.2, ReverbType::Hall);
        let b = generate_ir(22050, 0.2, ReverbType::Hall);
        assert_eq!(a.len(), 4410);
        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_ir_is_normalized() {
        let ir = generate_ir(16000, 0.3, ReverbType::Plate);
        let l2 = ir.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((l2 - IR_HEADROOM).abs() < 1e-9);
        let mean = ir.iter().sum::<f64>() / ir.len() as f64;
        assert!(mean.abs() < 1e-12);
    }

    #[test]
    fn test_ir_minimum_length() {
        let ir = generate_ir(100, 0.01, ReverbType::Room);
        assert_eq!(ir.len(), 8);
        assert!(ir.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_cache_reuses_entries() {
        let engine = ReverbEngine::new();
        let a = engine.impulse_response(8000, 0.4, ReverbType::Room);
        let b = engine.impulse_response(8000, 0.4001, ReverbType::Room);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.cached_len(), 1);

        engine.impulse_response(8000, 0.4, ReverbType::Hall);
        engine.impulse_response(16000, 0.4, ReverbType::Room);
        assert_eq!(engine.cached_len(), 3);
    }

    #[test]
    fn test_zero_amount_is_passthrough() {
        let engine = ReverbEngine::new();
        let input = noise_buffer(0.1, 8000, 2, 0.5);
        let out = engine.apply(&input, 0.0).unwrap();
        assert!(out.shares_samples(&input));
        assert_eq!(engine.cached_len(), 0);
    }

    #[test]
    fn test_never_louder_and_never_clips() {
        let engine = ReverbEngine::new();
        for channels in [1, 2] {
            let input = noise_buffer(0.5, 8000, channels, 1.0);
            for amount in [0.2, 0.9, 1.5, 2.0] {
                let out = engine.apply(&input, amount).unwrap();
                assert_eq!(out.frames(), input.frames());
                assert_eq!(out.channels(), channels);
                assert!(out.rms() <= input.rms() + 1e-6, "amount {}", amount);
                assert!(out.peak() <= 0.95 + 1e-6, "amount {}", amount);
            }
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        let engine = ReverbEngine::new();
        let input = AudioBuffer::silence(0.25, 8000, 2);
        let out = engine.apply(&input, 1.5).unwrap();
        assert_eq!(out.frames(), input.frames());
        assert!(out.samples().iter().all(|s| s.is_finite() && s.abs() < 1e-9));
    }

    #[test]
    fn test_reverb_adds_tail() {
        let engine = ReverbEngine::new();
        // Single click followed by silence
        let mut samples = vec![0.0f32; 4000];
        samples[100] = 0.8;
        let input = AudioBuffer::new(samples, 8000, 1);
        let out = engine.apply(&input, 2.0).unwrap();
        let tail_energy: f32 = out.samples()[1000..].iter().map(|s| s * s).sum();
        assert!(tail_energy > 0.0);
    }
}
