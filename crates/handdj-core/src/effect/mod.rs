//! Effect chain - offline rendering of the processed buffer
//!
//! Stages run in a fixed order over an immutable source buffer:
//! - Volume (dB gain)
//! - Speed / pitch (rate reinterpretation + resampling)
//! - Treble (high shelf)
//! - Reverb (convolution)
//!
//! Gain runs before resampling so level changes and resampling artifacts do
//! not interact. Every stage at its neutral value is skipped and hands its
//! input through without copying.

pub mod convolve;
pub mod filter;
pub mod gain;
pub mod rate;
pub mod reverb;
pub mod tone;

pub use gain::apply_volume;
pub use rate::{apply_speed_pitch, resample, resample_passes};
pub use reverb::{ReverbEngine, ReverbType};
pub use tone::apply_treble;

use thiserror::Error;

use crate::params::EffectParameters;
use crate::types::{AudioBuffer, DEFAULT_SAMPLE_RATE};

/// Errors raised while rendering
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// Resampler construction or processing failed
    #[error("Resampler error: {0}")]
    Resampler(String),

    /// FFT planning or processing failed
    #[error("FFT error: {0}")]
    Fft(String),

    /// Buffer shape not supported by a stage
    #[error("Invalid buffer: {0}")]
    InvalidBuffer(String),
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Ordered effect stages plus the shared reverb IR cache
#[derive(Debug)]
pub struct EffectChain {
    reverb: ReverbEngine,
    output_sample_rate: u32,
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl EffectChain {
    /// Chain whose speed/pitch stage lands at `output_sample_rate`
    pub fn new(output_sample_rate: u32) -> Self {
        Self {
            reverb: ReverbEngine::new(),
            output_sample_rate,
        }
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output_sample_rate
    }

    pub fn reverb(&self) -> &ReverbEngine {
        &self.reverb
    }

    /// Render `source` with `params`
    ///
    /// All-neutral parameters return a buffer sharing the source samples.
    pub fn apply(&self, source: &AudioBuffer, params: &EffectParameters) -> RenderResult<AudioBuffer> {
        if source.channels() > 2 {
            return Err(RenderError::InvalidBuffer(format!(
                "expected mono or stereo, got {} channels",
                source.channels()
            )));
        }

        let processed = apply_volume(source, params.volume);
        let processed = apply_speed_pitch(
            &processed,
            params.speed,
            params.pitch,
            self.output_sample_rate,
        )?;
        let processed = apply_treble(&processed, params.treble_db);
        let processed = self.reverb.apply(&processed, params.reverb_amount)?;

        log::debug!(
            "EffectChain: Rendered v{} ({:.2}s -> {:.2}s, vol={:.2} speed={:.2} pitch={:.2} reverb={:.2} treble={:.1}dB)",
            params.version,
            source.duration_secs(),
            processed.duration_secs(),
            params.volume,
            params.speed,
            params.pitch,
            params.reverb_amount,
            params.treble_db
        );
        Ok(processed)
    }
}
