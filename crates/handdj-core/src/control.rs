//! Live control routing
//!
//! Raw readings from a control source (hand distances, MIDI knobs) are
//! mapped, smoothed per control, and turned into engine actions:
//!
//! - **Volume** goes out on every reading; it only touches the device gain
//! - **Pitch / Reverb** are pushed together, at most once per
//!   `rerender_interval`, since each push costs a full re-render

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::config::{ControlConfig, ControlMapping, ControlsConfig};
use crate::params::{EffectParameters, ParamError, ParamName, ParamUpdate};
use crate::smoothing::SmoothingBuffer;

/// Logical controls a control source can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Pitch,
    Reverb,
    Volume,
}

impl Control {
    pub const ALL: [Control; 3] = [Control::Pitch, Control::Reverb, Control::Volume];

    /// Parameter this control drives
    pub fn param(&self) -> ParamName {
        match self {
            Control::Pitch => ParamName::Pitch,
            Control::Reverb => ParamName::ReverbAmount,
            Control::Volume => ParamName::Volume,
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.param().name())
    }
}

impl FromStr for Control {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<ParamName>()? {
            ParamName::Pitch => Ok(Control::Pitch),
            ParamName::ReverbAmount => Ok(Control::Reverb),
            ParamName::Volume => Ok(Control::Volume),
            other => Err(ParamError::Unknown(other.name().to_string())),
        }
    }
}

/// What the engine should do after a reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    /// Apply this volume right away
    SetVolume(f32),
    /// Push these parameters (triggers a re-render)
    Push(ParamUpdate),
    /// Smoothed, but held back by the push interval
    Held,
}

#[derive(Debug, Clone)]
struct ControlChannel {
    buffer: SmoothingBuffer,
    factor: f32,
    mapping: Option<ControlMapping>,
}

impl ControlChannel {
    fn new(control: Control, config: &ControlConfig, history_len: usize) -> Self {
        let initial = EffectParameters::default().get(control.param());
        Self {
            buffer: SmoothingBuffer::new(initial, history_len),
            factor: config.smoothing_factor.clamp(0.0, 1.0),
            mapping: config.mapping,
        }
    }

    fn update(&mut self, raw: f32) -> f32 {
        let value = match &self.mapping {
            Some(mapping) => mapping.map(raw),
            None => raw,
        };
        self.buffer.update(value, self.factor)
    }
}

/// Smooths control readings and throttles re-render pushes
#[derive(Debug, Clone)]
pub struct ControlRouter {
    pitch: ControlChannel,
    reverb: ControlChannel,
    volume: ControlChannel,
    rerender_interval: Duration,
    last_push: Option<Instant>,
}

impl ControlRouter {
    pub fn new(config: &ControlsConfig) -> Self {
        let history = config.history_len;
        Self {
            pitch: ControlChannel::new(Control::Pitch, &config.pitch, history),
            reverb: ControlChannel::new(Control::Reverb, &config.reverb, history),
            volume: ControlChannel::new(Control::Volume, &config.volume, history),
            rerender_interval: config.rerender_interval(),
            last_push: None,
        }
    }

    fn channel_mut(&mut self, control: Control) -> &mut ControlChannel {
        match control {
            Control::Pitch => &mut self.pitch,
            Control::Reverb => &mut self.reverb,
            Control::Volume => &mut self.volume,
        }
    }

    /// Current smoothed value of a control
    pub fn value(&self, control: Control) -> f32 {
        match control {
            Control::Pitch => self.pitch.buffer.value(),
            Control::Reverb => self.reverb.buffer.value(),
            Control::Volume => self.volume.buffer.value(),
        }
    }

    /// Feed one raw reading at time `now`
    pub fn feed_at(&mut self, control: Control, raw: f32, now: Instant) -> ControlAction {
        let smoothed = self.channel_mut(control).update(raw);
        if control == Control::Volume {
            return ControlAction::SetVolume(smoothed);
        }

        let due = self
            .last_push
            .map_or(true, |last| now.duration_since(last) >= self.rerender_interval);
        if !due {
            return ControlAction::Held;
        }
        self.last_push = Some(now);
        ControlAction::Push(
            ParamUpdate::default()
                .with(ParamName::Pitch, self.pitch.buffer.value())
                .with(ParamName::ReverbAmount, self.reverb.buffer.value()),
        )
    }

    pub fn feed(&mut self, control: Control, raw: f32) -> ControlAction {
        self.feed_at(control, raw, Instant::now())
    }

    /// Clear every history and return to neutral values
    pub fn reset(&mut self) {
        for control in Control::ALL {
            self.channel_mut(control).buffer.reset();
        }
        self.last_push = None;
    }
}
