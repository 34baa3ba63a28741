//! Output devices
//!
//! The playback coordinator drives a single [`OutputDevice`]:
//! - **SimulatedDevice**: in-memory, used by tests and headless runs
//! - **CpalDevice**: real audio output via CPAL (with the `cpal-backend` feature)

mod device;
mod error;
mod simulated;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;

pub use device::OutputDevice;
pub use error::{AudioError, AudioResult};
pub use simulated::{SimulatedDevice, SimulatedHandle};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalDevice;
