//! In-memory output device
//!
//! Accepts the same WAV artifacts as a real device and records what it was
//! asked to do. A cloned [`SimulatedHandle`] lets tests (and headless runs)
//! inspect the device and make the track "finish" on demand.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::device::OutputDevice;
use super::error::{AudioError, AudioResult};
use crate::types::AudioBuffer;

#[derive(Debug, Default)]
struct SimState {
    loaded: Option<AudioBuffer>,
    load_count: usize,
    play_count: usize,
    last_start_secs: Option<f64>,
    playing: bool,
    paused: bool,
    volume: f32,
    closed: bool,
    fail_loads: bool,
}

/// Shared view of a [`SimulatedDevice`]
#[derive(Debug, Clone, Default)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the device report idle, as if the loaded audio ran out
    pub fn finish(&self) {
        self.lock().playing = false;
    }

    /// Make subsequent loads fail
    pub fn set_fail_loads(&self, fail: bool) {
        self.lock().fail_loads = fail;
    }

    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    pub fn play_count(&self) -> usize {
        self.lock().play_count
    }

    pub fn last_start_secs(&self) -> Option<f64> {
        self.lock().last_start_secs
    }

    /// The audio decoded from the last loaded artifact
    pub fn loaded(&self) -> Option<AudioBuffer> {
        self.lock().loaded.clone()
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Output device that plays nothing
#[derive(Debug)]
pub struct SimulatedDevice {
    handle: SimulatedHandle,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        let handle = SimulatedHandle::default();
        handle.lock().volume = 1.0;
        Self { handle }
    }

    /// Device plus a handle for inspecting it
    pub fn with_handle() -> (Self, SimulatedHandle) {
        let device = Self::new();
        let handle = device.handle.clone();
        (device, handle)
    }
}

impl OutputDevice for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn load(&mut self, path: &Path) -> AudioResult<()> {
        let mut state = self.handle.lock();
        if state.closed {
            return Err(AudioError::Closed);
        }
        if state.fail_loads {
            return Err(AudioError::LoadFailed(format!("rejected {:?}", path)));
        }

        let mut reader =
            hound::WavReader::open(path).map_err(|e| AudioError::LoadFailed(e.to_string()))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit",
                spec.sample_format, spec.bits_per_sample
            )));
        }
        let samples = reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::LoadFailed(e.to_string()))?;

        state.loaded = Some(AudioBuffer::from_i16_interleaved(
            &samples,
            spec.sample_rate,
            spec.channels,
        ));
        state.load_count += 1;
        state.playing = false;
        state.paused = false;
        Ok(())
    }

    fn play(&mut self, start_secs: f64) -> AudioResult<()> {
        let mut state = self.handle.lock();
        if state.closed {
            return Err(AudioError::Closed);
        }
        if state.loaded.is_none() {
            return Err(AudioError::NothingLoaded);
        }
        state.play_count += 1;
        state.last_start_secs = Some(start_secs);
        state.playing = true;
        state.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.handle.lock().paused = true;
    }

    fn unpause(&mut self) {
        self.handle.lock().paused = false;
    }

    fn stop(&mut self) {
        let mut state = self.handle.lock();
        state.playing = false;
        state.paused = false;
    }

    fn set_volume(&mut self, volume: f32) {
        self.handle.lock().volume = volume;
    }

    fn is_busy(&self) -> bool {
        let state = self.handle.lock();
        state.playing && !state.paused && !state.closed
    }

    fn close(&mut self) {
        let mut state = self.handle.lock();
        state.closed = true;
        state.playing = false;
        state.loaded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(dir: &Path, frames: usize) -> std::path::PathBuf {
        let path = dir.join("sim.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..frames * 2 {
            writer.write_sample(1000i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_load_play_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 400);
        let (mut device, handle) = SimulatedDevice::with_handle();

        assert!(matches!(device.play(0.0), Err(AudioError::NothingLoaded)));
        device.load(&path).unwrap();
        assert_eq!(handle.loaded().unwrap().frames(), 400);
        assert!(!device.is_busy());

        device.play(0.5).unwrap();
        assert!(device.is_busy());
        assert_eq!(handle.last_start_secs(), Some(0.5));

        device.pause();
        assert!(!device.is_busy());
        device.unpause();
        assert!(device.is_busy());

        handle.finish();
        assert!(!device.is_busy());
    }

    #[test]
    fn test_rejects_loads_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 10);
        let (mut device, handle) = SimulatedDevice::with_handle();
        handle.set_fail_loads(true);
        assert!(matches!(device.load(&path), Err(AudioError::LoadFailed(_))));
        assert_eq!(handle.load_count(), 0);
    }

    #[test]
    fn test_close() {
        let (mut device, handle) = SimulatedDevice::with_handle();
        device.close();
        assert!(handle.is_closed());
        assert!(matches!(
            device.load(Path::new("missing.wav")),
            Err(AudioError::Closed)
        ));
    }
}
