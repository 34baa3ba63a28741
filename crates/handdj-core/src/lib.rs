//! HandDJ Core - live-steered effects and playback engine
//!
//! A bounded control stream (hand-gesture distances, MIDI knobs, anything that
//! yields floats) continuously steers volume, pitch/speed and reverb of a
//! playing track. Effects are rendered off the command thread and swapped into
//! the output device without stopping playback.
//!
//! # Data Flow
//!
//! ```text
//! control source ──feed()──► smoothing ──► EffectParameters
//!                                              │
//!                       play / parameter change│
//!                                              ▼
//!  source AudioBuffer ──────────────────► EffectChain::apply
//!                                              │ processed buffer
//!                                              ▼
//!                                     PlaybackCoordinator ──► OutputDevice
//!                                              │
//!                                   poller ────┴──► status / progress observers
//! ```

pub mod audio;
pub mod config;
pub mod control;
pub mod decode;
pub mod effect;
pub mod engine;
pub mod error;
pub mod params;
pub mod playback;
pub mod render;
pub mod smoothing;
pub mod types;

pub use engine::AudioEngine;
pub use error::{EngineError, EngineResult};
pub use params::{EffectParameters, ParamName, ParamUpdate};
pub use types::AudioBuffer;
