//! Speed and pitch through sample-rate reinterpretation
//!
//! Playing a buffer as if it had a different sample rate changes tempo and
//! pitch together. Each pass relabels the rate and then resamples back to
//! the output rate with a windowed-sinc resampler, so the result always
//! lands at the target rate. No independent time-stretching is attempted.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::RenderError;
use crate::types::AudioBuffer;

/// Rate factors to apply, in order
///
/// Speed is applied first; a second pass of `pitch / speed` follows only
/// when pitch is not neutral and differs from speed. `speed == pitch`
/// therefore needs a single pass.
pub fn resample_passes(speed: f32, pitch: f32) -> Vec<f32> {
    let mut passes = Vec::with_capacity(2);
    if speed != 1.0 {
        passes.push(speed);
    }
    if pitch != 1.0 && pitch != speed {
        passes.push(pitch / speed);
    }
    passes
}

/// Apply the speed/pitch passes, landing at `target_rate`
///
/// Both neutral returns the input untouched (even if its rate differs from
/// the target).
pub fn apply_speed_pitch(
    buffer: &AudioBuffer,
    speed: f32,
    pitch: f32,
    target_rate: u32,
) -> Result<AudioBuffer, RenderError> {
    let mut current = buffer.clone();
    for factor in resample_passes(speed, pitch) {
        let relabeled = (current.sample_rate() as f64 * factor as f64) as u32;
        if relabeled == 0 {
            return Err(RenderError::InvalidBuffer(format!(
                "rate factor {} gives a zero sample rate",
                factor
            )));
        }
        current = resample(&current.with_sample_rate(relabeled), target_rate)?;
    }
    Ok(current)
}

/// Convert a buffer to `target_rate`
///
/// Output length is `round(frames * target / source)`.
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer, RenderError> {
    let source_rate = buffer.sample_rate();
    if source_rate == target_rate {
        return Ok(buffer.clone());
    }
    if source_rate == 0 || target_rate == 0 {
        return Err(RenderError::InvalidBuffer("sample rate is zero".into()));
    }

    let frames = buffer.frames();
    let ratio = target_rate as f64 / source_rate as f64;
    let expected = (frames as f64 * ratio).round() as usize;
    if frames == 0 {
        return Ok(AudioBuffer::new(Vec::new(), target_rate, buffer.channels()));
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let channels = buffer.channels() as usize;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, frames, channels)
        .map_err(|e| RenderError::Resampler(e.to_string()))?;
    let delay = resampler.output_delay();

    let waves_in = buffer.to_channels();
    let mut waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| RenderError::Resampler(e.to_string()))?;

    // Push the remaining (delayed) samples out
    let tail = resampler
        .process_partial(None::<&[Vec<f32>]>, None)
        .map_err(|e| RenderError::Resampler(e.to_string()))?;
    for (out, rest) in waves_out.iter_mut().zip(tail) {
        out.extend(rest);
    }

    for out in waves_out.iter_mut() {
        let skip = delay.min(out.len());
        out.drain(..skip);
        out.resize(expected, 0.0);
    }

    log::debug!(
        "resample: {} frames @ {} Hz -> {} frames @ {} Hz",
        frames,
        source_rate,
        expected,
        target_rate
    );
    Ok(AudioBuffer::from_channels(&waves_out, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(seconds: f64, sample_rate: u32, channels: u16) -> AudioBuffer {
        let frames = (seconds * sample_rate as f64) as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            let s = (2.0 * std::f64::consts::PI * 440.0 * i as f64 / sample_rate as f64).sin();
            for _ in 0..channels {
                samples.push(s as f32 * 0.5);
            }
        }
        AudioBuffer::new(samples, sample_rate, channels)
    }

    #[test]
    fn test_pass_plan() {
        assert!(resample_passes(1.0, 1.0).is_empty());
        assert_eq!(resample_passes(2.0, 2.0), vec![2.0]);
        assert_eq!(resample_passes(1.0, 1.5), vec![1.5]);
        // Neutral pitch keeps only the speed pass
        assert_eq!(resample_passes(2.0, 1.0), vec![2.0]);
        assert_eq!(resample_passes(2.0, 1.5), vec![2.0, 0.75]);
        assert_eq!(resample_passes(0.5, 2.0), vec![0.5, 4.0]);
    }

    #[test]
    fn test_neutral_is_passthrough() {
        let input = sine(0.1, 22050, 2);
        let out = apply_speed_pitch(&input, 1.0, 1.0, 44100).unwrap();
        assert!(out.shares_samples(&input));
        assert_eq!(out.sample_rate(), 22050);
    }

    #[test]
    fn test_double_speed_halves_duration() {
        let input = sine(0.5, 8000, 2);
        let out = apply_speed_pitch(&input, 2.0, 2.0, 8000).unwrap();
        assert_eq!(out.sample_rate(), 8000);
        assert_eq!(out.channels(), 2);
        assert_eq!(out.frames(), input.frames() / 2);
    }

    #[test]
    fn test_resample_length_and_level() {
        let input = sine(0.25, 8000, 1);
        let out = resample(&input, 16000).unwrap();
        assert_eq!(out.frames(), 4000);
        assert_eq!(out.sample_rate(), 16000);
        // Level survives away from the edges
        let mid = &out.samples()[1000..3000];
        let peak = mid.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {}", peak);
    }

    #[test]
    fn test_empty_buffer() {
        let input = AudioBuffer::new(Vec::new(), 8000, 2);
        let out = resample(&input, 16000).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.sample_rate(), 16000);
    }
}
