//! Effect parameters - a typed, range-validated snapshot
//!
//! Live controls never mutate a parameter set that a render is reading.
//! Updates are merged into a copy under the engine's lock and the render
//! thread takes its own copy before starting, so a render never sees a
//! half-applied update.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Volume range (linear gain, 1.0 = unity)
pub const VOLUME_RANGE: (f32, f32) = (0.0, 2.0);
/// Playback speed range (1.0 = original tempo)
pub const SPEED_RANGE: (f32, f32) = (0.1, 3.0);
/// Pitch ratio range (1.0 = original pitch)
pub const PITCH_RANGE: (f32, f32) = (0.1, 3.0);
/// Reverb amount range (0.0 = dry)
pub const REVERB_RANGE: (f32, f32) = (0.0, 2.0);
/// Treble shelf gain range in dB
pub const TREBLE_DB_RANGE: (f32, f32) = (-10.0, 10.0);

/// Errors raised by parameter validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    /// Value is NaN or infinite
    #[error("Invalid value {value} for parameter '{name}'")]
    NonFinite { name: ParamName, value: f32 },

    /// Parameter name not recognised
    #[error("Unknown parameter: {0}")]
    Unknown(String),
}

/// Names of the controllable parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamName {
    Volume,
    Speed,
    Pitch,
    ReverbAmount,
    TrebleDb,
}

impl ParamName {
    pub const ALL: [ParamName; 5] = [
        ParamName::Volume,
        ParamName::Speed,
        ParamName::Pitch,
        ParamName::ReverbAmount,
        ParamName::TrebleDb,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParamName::Volume => "volume",
            ParamName::Speed => "speed",
            ParamName::Pitch => "pitch",
            ParamName::ReverbAmount => "reverb",
            ParamName::TrebleDb => "treble",
        }
    }

    /// Valid (min, max) range for this parameter
    pub fn range(&self) -> (f32, f32) {
        match self {
            ParamName::Volume => VOLUME_RANGE,
            ParamName::Speed => SPEED_RANGE,
            ParamName::Pitch => PITCH_RANGE,
            ParamName::ReverbAmount => REVERB_RANGE,
            ParamName::TrebleDb => TREBLE_DB_RANGE,
        }
    }

    /// Whether a change to this parameter needs the effect chain re-rendered
    ///
    /// Volume goes straight to the device gain instead.
    pub fn needs_render(&self) -> bool {
        !matches!(self, ParamName::Volume)
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamName {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volume" | "vol" => Ok(ParamName::Volume),
            "speed" => Ok(ParamName::Speed),
            "pitch" => Ok(ParamName::Pitch),
            "reverb" | "reverb_amount" | "reverbamount" => Ok(ParamName::ReverbAmount),
            "treble" | "treble_db" | "trebledb" => Ok(ParamName::TrebleDb),
            other => Err(ParamError::Unknown(other.to_string())),
        }
    }
}

/// Snapshot of every effect parameter
///
/// `version` increases on every accepted change so renders can tell which
/// snapshot they were built from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParameters {
    pub volume: f32,
    pub speed: f32,
    pub pitch: f32,
    pub reverb_amount: f32,
    pub treble_db: f32,
    #[serde(skip)]
    pub version: u64,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            volume: 1.0,
            speed: 1.0,
            pitch: 1.0,
            reverb_amount: 0.0,
            treble_db: 0.0,
            version: 0,
        }
    }
}

impl EffectParameters {
    /// Read a parameter by name
    pub fn get(&self, name: ParamName) -> f32 {
        match name {
            ParamName::Volume => self.volume,
            ParamName::Speed => self.speed,
            ParamName::Pitch => self.pitch,
            ParamName::ReverbAmount => self.reverb_amount,
            ParamName::TrebleDb => self.treble_db,
        }
    }

    /// Set a parameter, clamping into its range
    ///
    /// Returns the value actually stored.
    pub fn set(&mut self, name: ParamName, value: f32) -> Result<f32, ParamError> {
        if !value.is_finite() {
            return Err(ParamError::NonFinite { name, value });
        }
        let (min, max) = name.range();
        let clamped = value.clamp(min, max);
        let slot = match name {
            ParamName::Volume => &mut self.volume,
            ParamName::Speed => &mut self.speed,
            ParamName::Pitch => &mut self.pitch,
            ParamName::ReverbAmount => &mut self.reverb_amount,
            ParamName::TrebleDb => &mut self.treble_db,
        };
        *slot = clamped;
        self.version += 1;
        Ok(clamped)
    }

    /// Merge a partial update; all values are validated before any is applied
    pub fn merge(&mut self, update: &ParamUpdate) -> Result<(), ParamError> {
        for (name, value) in update.entries() {
            if !value.is_finite() {
                return Err(ParamError::NonFinite { name, value });
            }
        }
        for (name, value) in update.entries() {
            self.set(name, value)?;
        }
        Ok(())
    }

    /// Restore defaults while keeping the version moving forward
    pub fn reset(&mut self) {
        let version = self.version + 1;
        *self = Self {
            version,
            ..Self::default()
        };
    }
}

/// Partial parameter update (unset fields are left untouched)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamUpdate {
    pub volume: Option<f32>,
    pub speed: Option<f32>,
    pub pitch: Option<f32>,
    pub reverb_amount: Option<f32>,
    pub treble_db: Option<f32>,
}

impl ParamUpdate {
    /// Builder-style setter
    pub fn with(mut self, name: ParamName, value: f32) -> Self {
        let slot = match name {
            ParamName::Volume => &mut self.volume,
            ParamName::Speed => &mut self.speed,
            ParamName::Pitch => &mut self.pitch,
            ParamName::ReverbAmount => &mut self.reverb_amount,
            ParamName::TrebleDb => &mut self.treble_db,
        };
        *slot = Some(value);
        self
    }

    /// The set fields as (name, value) pairs
    pub fn entries(&self) -> impl Iterator<Item = (ParamName, f32)> + '_ {
        ParamName::ALL
            .into_iter()
            .filter_map(move |name| self.value(name).map(|v| (name, v)))
    }

    pub fn value(&self, name: ParamName) -> Option<f32> {
        match name {
            ParamName::Volume => self.volume,
            ParamName::Speed => self.speed,
            ParamName::Pitch => self.pitch,
            ParamName::ReverbAmount => self.reverb_amount,
            ParamName::TrebleDb => self.treble_db,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Whether applying this update requires a re-render
    pub fn needs_render(&self) -> bool {
        self.entries().any(|(name, _)| name.needs_render())
    }
}
