//! Engine configuration
//!
//! YAML-backed settings for the audio format, playback coordinator and the
//! live control layer. Every section uses `#[serde(default)]`, so a partial
//! file only overrides what it names.
//!
//! ```ignore
//! use handdj_core::config::{default_config_path, load_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path());
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{
    AudioSettings, ControlConfig, ControlMapping, ControlsConfig, EngineConfig, PlaybackConfig,
};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
