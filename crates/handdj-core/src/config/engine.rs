//! Engine configuration sections

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::smoothing::DEFAULT_HISTORY_LEN;
use crate::types::DEFAULT_SAMPLE_RATE;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioSettings,
    pub playback: PlaybackConfig,
    pub controls: ControlsConfig,
}

/// Format of rendered audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Rate the speed/pitch stage resamples to
    pub output_sample_rate: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            output_sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Playback coordinator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Progress poller period; the position advances by this much per tick
    pub poll_interval_ms: u64,
    /// Transient WAV files kept at once
    pub max_artifacts: usize,
    /// File name prefix of transient WAV files
    pub artifact_prefix: String,
    /// Where transient WAV files go (system temp dir when unset)
    pub artifact_dir: Option<PathBuf>,
    /// Run the poller on its own thread; when false, `tick()` drives it
    pub spawn_poller: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_artifacts: 2,
            artifact_prefix: "handdj_".to_string(),
            artifact_dir: None,
            spawn_poller: true,
        }
    }
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Linear raw-input to parameter mapping, clamped at both ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlMapping {
    pub input_min: f32,
    pub input_max: f32,
    pub output_min: f32,
    pub output_max: f32,
}

impl ControlMapping {
    pub fn map(&self, raw: f32) -> f32 {
        let span = self.input_max - self.input_min;
        if span.abs() < f32::EPSILON {
            return if raw < self.input_min {
                self.output_min
            } else {
                self.output_max
            };
        }
        let t = ((raw - self.input_min) / span).clamp(0.0, 1.0);
        self.output_min + t * (self.output_max - self.output_min)
    }
}

/// Settings for one live control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Fraction of the gap to the rolling mean closed per update
    pub smoothing_factor: f32,
    /// Raw input mapping applied before smoothing
    pub mapping: Option<ControlMapping>,
}

impl ControlConfig {
    fn with_factor(smoothing_factor: f32) -> Self {
        Self {
            smoothing_factor,
            mapping: None,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self::with_factor(0.2)
    }
}

/// Live control layer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Raw readings kept per control
    pub history_len: usize,
    /// Minimum time between pitch/reverb pushes into the engine
    pub rerender_interval_ms: u64,
    pub volume: ControlConfig,
    pub pitch: ControlConfig,
    pub reverb: ControlConfig,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            history_len: DEFAULT_HISTORY_LEN,
            rerender_interval_ms: 500,
            volume: ControlConfig::with_factor(0.1),
            pitch: ControlConfig::with_factor(0.2),
            reverb: ControlConfig::with_factor(0.3),
        }
    }
}

impl ControlsConfig {
    pub fn rerender_interval(&self) -> Duration {
        Duration::from_millis(self.rerender_interval_ms)
    }
}
