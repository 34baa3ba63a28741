//! AudioEngine - the public surface
//!
//! Owns the source track, the live parameter snapshot, the renderer and the
//! playback coordinator, and wires them together:
//!
//! ```text
//!  set_parameter ──► EffectParameters ──(render param)──► RenderWorker ──┐
//!        │                                                               │
//!        └──(volume)──► device gain = live / rendered                    ▼
//!                                                  Renderer::render(source, snapshot)
//!                                                               │
//!                                      PlaybackCoordinator::swap(buffer, params, generation)
//! ```
//!
//! Synchronous calls (`play`, `load_*`, `seek`) return errors to the caller.
//! Background renders never do: a failed render keeps the previous buffer
//! playing and is reported as an Error status.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use crate::audio::OutputDevice;
use crate::config::EngineConfig;
use crate::control::{Control, ControlAction, ControlRouter};
use crate::decode::{self, DecodeError};
use crate::effect::gain::SILENCE_THRESHOLD;
use crate::effect::EffectChain;
use crate::error::{EngineError, EngineResult};
use crate::params::{EffectParameters, ParamName, ParamUpdate};
use crate::playback::{self, PlaybackCoordinator, PlaybackObserver, PlaybackSession, PlaybackState, PlaybackStatus};
use crate::render::{RenderWorker, Renderer};
use crate::types::AudioBuffer;

/// Parameters that shape the rendered buffer (everything but volume)
fn render_key(params: &EffectParameters) -> [f32; 4] {
    [params.speed, params.pitch, params.reverb_amount, params.treble_db]
}

struct EngineInner {
    source: RwLock<Option<AudioBuffer>>,
    params: Mutex<EffectParameters>,
    renderer: Arc<dyn Renderer>,
    coordinator: PlaybackCoordinator,
    observer: Arc<dyn PlaybackObserver>,
}

impl EngineInner {
    fn source(&self) -> Option<AudioBuffer> {
        self.source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_params(&self) -> MutexGuard<'_, EffectParameters> {
        self.params.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> EffectParameters {
        *self.lock_params()
    }

    /// Render `source`, falling back to the unmodified source on failure
    ///
    /// Returns the buffer and the parameters it actually carries.
    fn render_or_passthrough(
        &self,
        source: &AudioBuffer,
        params: &EffectParameters,
    ) -> (AudioBuffer, EffectParameters) {
        let started = Instant::now();
        match self.renderer.render(source, params) {
            Ok(buffer) => {
                log::debug!("AudioEngine: Rendered in {:?}", started.elapsed());
                (buffer, *params)
            }
            Err(e) => {
                log::error!("AudioEngine: Render failed, playing unprocessed source: {}", e);
                self.observer.on_status(&PlaybackStatus::Error(e.to_string()));
                let neutral = EffectParameters {
                    version: params.version,
                    ..EffectParameters::default()
                };
                (source.clone(), neutral)
            }
        }
    }

    /// Hand the live volume to the coordinator, which derives the device gain
    ///
    /// Held under the parameter lock so concurrent setters reach the
    /// coordinator in order. Returns true when the loaded buffer was rendered
    /// silent and needs a re-render to get louder.
    fn apply_device_volume(&self) -> bool {
        let params = self.lock_params();
        self.coordinator.set_volume(params.volume)
    }

    /// Whether the loaded buffer is out of date with the live parameters
    fn is_stale(&self) -> bool {
        let live = self.snapshot();
        match self.coordinator.rendered() {
            Some(rendered) => {
                render_key(&rendered) != render_key(&live)
                    || (rendered.volume <= SILENCE_THRESHOLD && live.volume > SILENCE_THRESHOLD)
            }
            None => false,
        }
    }

    /// Background render job
    fn rerender(&self) {
        let generation = self.coordinator.generation();
        if self.coordinator.state() != PlaybackState::Playing {
            log::debug!("AudioEngine: Not playing, skipping re-render");
            return;
        }
        let Some(source) = self.source() else {
            return;
        };
        let params = self.snapshot();
        log::debug!(
            "AudioEngine: Re-rendering (params v{}, generation {})",
            params.version,
            generation
        );

        let started = Instant::now();
        let buffer = match self.renderer.render(&source, &params) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::error!("AudioEngine: Background render failed, keeping current buffer: {}", e);
                self.observer.on_status(&PlaybackStatus::Error(e.to_string()));
                return;
            }
        };
        let elapsed = started.elapsed();

        match self.coordinator.swap(&buffer, &params, generation) {
            Ok(true) => {
                log::info!("AudioEngine: Swapped in re-render (params v{}, {:?})", params.version, elapsed);
            }
            Ok(false) => {
                log::debug!("AudioEngine: Re-render superseded, discarded");
            }
            Err(e) => {
                // The coordinator already reported it; the old buffer keeps playing
                log::error!("AudioEngine: Swap failed, keeping current buffer: {}", e);
            }
        }
    }
}

/// Live-steered effects and playback engine
pub struct AudioEngine {
    inner: Arc<EngineInner>,
    worker: RenderWorker,
    controls: Mutex<ControlRouter>,
    closed: AtomicBool,
}

impl AudioEngine {
    /// Engine using the default effect chain at the configured output rate
    pub fn new(
        config: &EngineConfig,
        device: Box<dyn OutputDevice>,
        observer: Arc<dyn PlaybackObserver>,
    ) -> Self {
        let chain = EffectChain::new(config.audio.output_sample_rate);
        Self::with_renderer(config, device, observer, Arc::new(chain))
    }

    /// Engine with a custom renderer
    pub fn with_renderer(
        config: &EngineConfig,
        device: Box<dyn OutputDevice>,
        observer: Arc<dyn PlaybackObserver>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let coordinator = PlaybackCoordinator::new(device, &config.playback, Arc::clone(&observer));
        let inner = Arc::new(EngineInner {
            source: RwLock::new(None),
            params: Mutex::new(EffectParameters::default()),
            renderer,
            coordinator,
            observer,
        });

        let weak: Weak<EngineInner> = Arc::downgrade(&inner);
        let worker = RenderWorker::spawn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.rerender();
            }
        });

        log::info!(
            "AudioEngine: Ready (output {} Hz, rerender interval {} ms)",
            config.audio.output_sample_rate,
            config.controls.rerender_interval_ms
        );
        Self {
            inner,
            worker,
            controls: Mutex::new(ControlRouter::new(&config.controls)),
            closed: AtomicBool::new(false),
        }
    }

    fn lock_controls(&self) -> MutexGuard<'_, ControlRouter> {
        self.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_source(&self) -> EngineResult<AudioBuffer> {
        self.inner.source().ok_or(EngineError::NoAudioLoaded)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────

    /// Make `buffer` the current track, stopping whatever was playing
    pub fn load_buffer(&self, buffer: AudioBuffer) -> EngineResult<()> {
        if buffer.channels() > 2 {
            return Err(DecodeError::UnsupportedChannels(buffer.channels() as usize).into());
        }
        if buffer.is_empty() {
            return Err(DecodeError::Empty.into());
        }
        if buffer.sample_rate() == 0 {
            return Err(EngineError::InvalidParameter("sample rate must be positive".to_string()));
        }

        if self.inner.coordinator.state() != PlaybackState::Stopped {
            self.inner.coordinator.stop();
        }
        self.inner.coordinator.clear_session();

        log::info!(
            "AudioEngine: Loaded {:.2}s, {} Hz, {} ch",
            buffer.duration_secs(),
            buffer.sample_rate(),
            buffer.channels()
        );
        *self.inner.source.write().unwrap_or_else(PoisonError::into_inner) = Some(buffer);
        self.inner.observer.on_status(&PlaybackStatus::Loaded);
        Ok(())
    }

    /// Decode and load an audio file
    pub fn load_file(&self, path: &Path) -> EngineResult<()> {
        let buffer = decode::decode_file(path)?;
        self.load_buffer(buffer)
    }

    /// Decode and load audio held in memory
    pub fn load_bytes(&self, bytes: &[u8], extension_hint: Option<&str>) -> EngineResult<()> {
        let buffer = decode::decode_bytes(bytes, extension_hint)?;
        self.load_buffer(buffer)
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.source().is_some()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────────────

    /// Set one parameter (clamped into range); returns the stored value
    ///
    /// Volume goes straight to the device gain; every other parameter
    /// requests a background re-render while playing.
    pub fn set_parameter(&self, name: ParamName, value: f32) -> EngineResult<f32> {
        let stored = self.inner.lock_params().set(name, value)?;
        log::debug!("AudioEngine: {} = {:.3}", name, stored);
        if name.needs_render() {
            self.request_rerender();
        } else if self.inner.apply_device_volume() {
            self.request_rerender();
        }
        Ok(stored)
    }

    /// Apply a partial update atomically
    pub fn set_parameters(&self, update: &ParamUpdate) -> EngineResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.inner.lock_params().merge(update)?;
        let mut render = update.needs_render();
        if update.volume.is_some() {
            render |= self.inner.apply_device_volume();
        }
        if render {
            self.request_rerender();
        }
        Ok(())
    }

    /// Current parameter snapshot
    pub fn parameters(&self) -> EffectParameters {
        self.inner.snapshot()
    }

    /// Back to neutral parameters and fresh control histories
    pub fn reset_parameters(&self) {
        self.inner.lock_params().reset();
        self.lock_controls().reset();
        log::info!("AudioEngine: Parameters reset");
        let silent = self.inner.apply_device_volume();
        if silent || self.inner.is_stale() {
            self.request_rerender();
        }
    }

    /// Feed one raw control reading (see [`crate::control`])
    pub fn feed(&self, control: Control, raw: f32) -> EngineResult<ControlAction> {
        if !raw.is_finite() {
            return Err(EngineError::InvalidParameter(format!("{} reading {} is not finite", control, raw)));
        }
        let action = self.lock_controls().feed(control, raw);
        match action {
            ControlAction::SetVolume(volume) => {
                self.set_parameter(ParamName::Volume, volume)?;
            }
            ControlAction::Push(update) => self.set_parameters(&update)?,
            ControlAction::Held => {}
        }
        Ok(action)
    }

    /// Ask for a background re-render of the playing track
    ///
    /// Returns false when nothing is playing or a render was already in
    /// flight (it picks up the latest parameters when it reruns).
    pub fn request_rerender(&self) -> bool {
        if self.closed.load(Ordering::Acquire)
            || self.inner.coordinator.state() != PlaybackState::Playing
            || !self.is_loaded()
        {
            return false;
        }
        self.worker.request()
    }

    /// Block until no background render is in flight or `timeout` passes
    pub fn wait_for_render(&self, timeout: Duration) -> bool {
        self.worker.wait_idle(timeout)
    }

    pub fn is_rendering(&self) -> bool {
        self.worker.is_in_flight()
    }

    /// Background render runs completed so far
    pub fn renders_completed(&self) -> u64 {
        self.worker.completed()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────

    /// Render with the current parameters and play from `start_secs`
    ///
    /// A render failure falls back to the unprocessed source; device or
    /// artifact failures are returned and leave the playback state as it was.
    pub fn play(&self, start_secs: f64) -> EngineResult<()> {
        let source = self.require_source()?;
        if !start_secs.is_finite() || start_secs < 0.0 {
            return Err(EngineError::InvalidParameter(format!("start position {}", start_secs)));
        }
        let params = self.inner.snapshot();
        let (buffer, applied) = self.inner.render_or_passthrough(&source, &params);
        self.inner.coordinator.play(&buffer, &applied, start_secs)?;
        Ok(())
    }

    pub fn pause(&self) -> bool {
        self.inner.coordinator.pause()
    }

    /// Resume from Paused; catches up on parameter changes made while paused
    pub fn resume(&self) -> bool {
        let resumed = self.inner.coordinator.resume();
        if resumed && self.inner.is_stale() {
            self.request_rerender();
        }
        resumed
    }

    pub fn stop(&self) {
        self.inner.coordinator.stop();
    }

    /// Jump to `position_secs`
    ///
    /// While playing the track is re-rendered and restarted there; otherwise
    /// only the position moves.
    pub fn seek(&self, position_secs: f64) -> EngineResult<()> {
        let source = self.require_source()?;
        let duration = self.get_duration();
        if !position_secs.is_finite() || position_secs < 0.0 || position_secs > duration {
            return Err(EngineError::InvalidParameter(format!(
                "seek position {:.2}s outside 0..{:.2}s",
                position_secs, duration
            )));
        }

        if self.inner.coordinator.state() == PlaybackState::Playing {
            let params = self.inner.snapshot();
            let (buffer, applied) = self.inner.render_or_passthrough(&source, &params);
            self.inner.coordinator.play(&buffer, &applied, position_secs)?;
        } else {
            self.inner.coordinator.set_position(position_secs);
        }
        log::info!("AudioEngine: Seek to {:.2}s", position_secs);
        Ok(())
    }

    /// Advance the poller by one step by hand (for `spawn_poller = false`)
    pub fn tick(&self) -> bool {
        self.inner.coordinator.tick()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Position in seconds (poll-interval resolution)
    pub fn get_position(&self) -> f64 {
        self.inner.coordinator.position_secs()
    }

    /// Duration of the playing buffer, or of the source before first play
    pub fn get_duration(&self) -> f64 {
        if self.inner.coordinator.rendered().is_some() {
            return self.inner.coordinator.length_secs();
        }
        self.inner.source().map_or(0.0, |s| s.duration_secs())
    }

    /// Position as a percentage of the duration (0 when nothing is loaded)
    pub fn progress(&self) -> f64 {
        if !self.is_loaded() {
            return 0.0;
        }
        self.inner.coordinator.session().progress_percent()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.coordinator.state()
    }

    pub fn session(&self) -> PlaybackSession {
        self.inner.coordinator.session()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Gain currently applied at the device
    pub fn device_volume(&self) -> f32 {
        self.inner.coordinator.device_gain()
    }

    /// Paths of the transient WAV files currently retained
    pub fn artifact_paths(&self) -> Vec<std::path::PathBuf> {
        self.inner.coordinator.artifact_paths()
    }

    /// Render the loaded track with the current parameters into a WAV file
    pub fn export_wav(&self, path: &Path) -> EngineResult<()> {
        let source = self.require_source()?;
        let params = self.inner.snapshot();
        let buffer = self.inner.renderer.render(&source, &params)?;
        playback::export_wav(&buffer, path).map_err(EngineError::TransientIo)?;
        log::info!("AudioEngine: Exported {:.2}s to {:?}", buffer.duration_secs(), path);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────

    /// Finish any in-flight render, release the device and delete artifacts
    ///
    /// Idempotent; also runs on drop.
    pub fn cleanup(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.worker.shutdown();
        self.inner.coordinator.shutdown();
        log::info!("AudioEngine: Cleaned up");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.cleanup();
    }
}
