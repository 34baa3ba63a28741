//! CPAL output device
//!
//! `cpal::Stream` is not `Send`, so the stream lives on its own named thread
//! for the lifetime of the device. The audio callback and the device methods
//! share a small playback state behind a mutex: the loaded PCM, a fractional
//! read position and the gain. Loaded audio is converted to the device rate
//! on the fly by linear interpolation.
//!
//! ```text
//! ┌──────────────────┐   load/play/pause    ┌──────────────────────┐
//! │ PlaybackCoordin. │─────────────────────►│  Arc<Mutex<Shared>>  │
//! └──────────────────┘                      └──────────┬───────────┘
//!                                                      │ read
//!                                           ┌──────────▼───────────┐
//!                                           │ "handdj-output" thr. │
//!                                           │  owns cpal::Stream   │
//!                                           └──────────────────────┘
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam::channel::{bounded, Sender};

use super::device::OutputDevice;
use super::error::{AudioError, AudioResult};

/// Playback state shared with the audio callback
#[derive(Debug)]
struct Shared {
    samples: Arc<[f32]>,
    channels: usize,
    sample_rate: u32,
    /// Read position in source frames
    position: f64,
    playing: bool,
    paused: bool,
    gain: f32,
}

impl Shared {
    fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    fn sample_at(&self, frame: usize, channel: usize) -> f32 {
        let ch = channel.min(self.channels - 1);
        self.samples
            .get(frame * self.channels + ch)
            .copied()
            .unwrap_or(0.0)
    }

    /// Fill one interleaved device buffer, advancing the read position
    fn render(&mut self, data: &mut [f32], out_channels: usize, device_rate: u32) {
        let frames = self.frames();
        if !self.playing || self.paused || frames == 0 || out_channels == 0 {
            data.iter_mut().for_each(|s| *s = 0.0);
            return;
        }

        let step = self.sample_rate as f64 / device_rate as f64;
        for frame in data.chunks_mut(out_channels) {
            if self.position >= frames as f64 {
                self.playing = false;
                frame.iter_mut().for_each(|s| *s = 0.0);
                continue;
            }
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            for (ch, out) in frame.iter_mut().enumerate() {
                if ch >= 2 {
                    *out = 0.0;
                    continue;
                }
                let a = self.sample_at(index, ch);
                let b = if index + 1 < frames {
                    self.sample_at(index + 1, ch)
                } else {
                    a
                };
                *out = (a + (b - a) * frac) * self.gain;
            }
            self.position += step;
        }
    }
}

/// Output device backed by the default CPAL host
pub struct CpalDevice {
    name: String,
    shared: Arc<Mutex<Shared>>,
    shutdown_tx: Option<Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
    device_rate: u32,
}

impl CpalDevice {
    /// Open the default output device and start its (silent) stream
    pub fn open_default() -> AudioResult<Self> {
        let shared = Arc::new(Mutex::new(Shared {
            samples: Arc::from(Vec::new()),
            channels: 2,
            sample_rate: 44100,
            position: 0.0,
            playing: false,
            paused: false,
            gain: 1.0,
        }));

        let (ready_tx, ready_rx) = bounded::<AudioResult<(String, u32)>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let stream_shared = Arc::clone(&shared);

        let stream_thread = thread::Builder::new()
            .name("handdj-output".to_string())
            .spawn(move || {
                let stream = match build_stream(stream_shared) {
                    Ok((stream, name, rate)) => {
                        let _ = ready_tx.send(Ok((name, rate)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the device is closed; dropping the stream stops it
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("CpalDevice: Stream thread exiting");
            })
            .expect("Failed to spawn output stream thread");

        let (name, device_rate) = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamBuildError("stream thread exited".into()))??;

        log::info!("CpalDevice: Using {} at {}Hz", name, device_rate);
        Ok(Self {
            name,
            shared,
            shutdown_tx: Some(shutdown_tx),
            stream_thread: Some(stream_thread),
            device_rate,
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_stream(shared: Arc<Mutex<Shared>>) -> AudioResult<(cpal::Stream, String, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("No default output device".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            supported.sample_format()
        )));
    }
    let config: StreamConfig = supported.config();
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                state.render(data, channels, rate);
            },
            move |err| {
                log::error!("CpalDevice: Stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    Ok((stream, name, rate))
}

impl OutputDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self, path: &Path) -> AudioResult<()> {
        if self.shutdown_tx.is_none() {
            return Err(AudioError::Closed);
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
        let samples: Vec<f32> = reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()
            .map_err(|e| AudioError::LoadFailed(e.to_string()))?;

        let mut state = self.lock();
        state.samples = samples.into();
        state.channels = spec.channels.max(1) as usize;
        state.sample_rate = spec.sample_rate;
        state.position = 0.0;
        state.playing = false;
        state.paused = false;
        Ok(())
    }

    fn play(&mut self, start_secs: f64) -> AudioResult<()> {
        if self.shutdown_tx.is_none() {
            return Err(AudioError::Closed);
        }
        let mut state = self.lock();
        if state.frames() == 0 {
            return Err(AudioError::NothingLoaded);
        }
        state.position = (start_secs.max(0.0) * state.sample_rate as f64).min(state.frames() as f64);
        state.playing = true;
        state.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.lock().paused = true;
    }

    fn unpause(&mut self) {
        self.lock().paused = false;
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.playing = false;
        state.paused = false;
        state.position = 0.0;
    }

    fn set_volume(&mut self, volume: f32) {
        self.lock().gain = volume.max(0.0);
    }

    fn is_busy(&self) -> bool {
        let state = self.lock();
        state.playing && !state.paused
    }

    fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.stream_thread.take() {
            if handle.join().is_err() {
                log::warn!("CpalDevice: Stream thread panicked");
            }
            log::info!("CpalDevice: Closed {}", self.name);
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}
