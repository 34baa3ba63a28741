//! Output device state machine
//!
//! ```text
//!            play()              pause()
//!  Stopped ──────────► Playing ──────────► Paused
//!     ▲                 │   ▲                 │
//!     │  stop()/finish  │   └──── resume() ───┘
//!     └─────────────────┴──────── stop() ─────┘
//! ```
//!
//! All commands are serialized under one state lock. Observers are notified
//! after the lock is released, so a callback may call back into the
//! coordinator.
//!
//! Every transition bumps a generation counter. A background render records
//! the generation when it starts and its result is only swapped in if nothing
//! happened in between (no stop, pause, play or finish).
//!
//! The parameters a loaded buffer was rendered with are stored next to it,
//! under the same lock, and the device gain is derived from them: volume is
//! baked into every render, so the device applies `live / rendered`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::artifacts::ArtifactStore;
use super::observer::{PlaybackObserver, PlaybackStatus};
use super::{PlaybackError, PlaybackResult};
use crate::audio::{AudioError, OutputDevice};
use crate::config::PlaybackConfig;
use crate::effect::gain::SILENCE_THRESHOLD;
use crate::params::EffectParameters;
use crate::types::AudioBuffer;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Position bookkeeping for the loaded buffer
///
/// `position_ms` is advanced by the poller, so it is only as precise as the
/// poll interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSession {
    pub state: PlaybackState,
    pub position_ms: f64,
    pub length_ms: f64,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            position_ms: 0.0,
            length_ms: 0.0,
        }
    }
}

impl PlaybackSession {
    /// Position as a percentage of the length (0 when nothing is loaded)
    pub fn progress_percent(&self) -> f64 {
        if self.length_ms > 0.0 {
            (self.position_ms / self.length_ms * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

/// A notification queued while the state lock is held
enum Notice {
    Status(PlaybackStatus),
    Progress(f64, f64),
}

struct CoordinatorState {
    device: Box<dyn OutputDevice>,
    session: PlaybackSession,
    generation: u64,
    /// Live volume
    volume: f32,
    /// Parameters behind the buffer loaded in the device
    rendered: Option<EffectParameters>,
    /// Position was moved while paused; resume must restart the device there
    seek_pending: bool,
    closed: bool,
}

impl CoordinatorState {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Gain the device needs so the loaded buffer plays at the live volume
    fn device_gain(&self) -> f32 {
        match self.rendered {
            Some(rendered) if rendered.volume > SILENCE_THRESHOLD => self.volume / rendered.volume,
            Some(_) => 1.0,
            None => self.volume,
        }
    }

    /// The loaded buffer was rendered silent and cannot be turned up
    fn needs_louder_render(&self) -> bool {
        matches!(self.rendered, Some(r) if r.volume <= SILENCE_THRESHOLD) && self.volume > SILENCE_THRESHOLD
    }

    fn apply_gain(&mut self) {
        let gain = self.device_gain();
        self.device.set_volume(gain);
    }

    /// Track ended: back to Stopped at position 0
    fn finish(&mut self, notices: &mut Vec<Notice>) {
        self.device.stop();
        self.session.state = PlaybackState::Stopped;
        self.session.position_ms = 0.0;
        self.seek_pending = false;
        self.bump();
        notices.push(Notice::Status(PlaybackStatus::Finished));
    }
}

struct Inner {
    state: Mutex<CoordinatorState>,
    artifacts: Mutex<ArtifactStore>,
    observer: Arc<dyn PlaybackObserver>,
    poller_active: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
    spawn_poller: bool,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_artifacts(&self) -> MutexGuard<'_, ArtifactStore> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Status(status) => self.observer.on_status(&status),
                Notice::Progress(position, duration) => self.observer.on_progress(position, duration),
            }
        }
    }

    fn poll_interval_ms(&self) -> f64 {
        self.poll_interval.as_secs_f64() * 1000.0
    }

    /// Spawn the poller unless one is alive. Called with the state lock held.
    fn ensure_poller(self: &Arc<Self>) {
        if !self.spawn_poller || self.poller_active.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("handdj-poller".to_string())
            .spawn(move || {
                log::debug!("PlaybackCoordinator: Poller started");
                loop {
                    thread::sleep(inner.poll_interval);
                    if !inner.poll(true) {
                        break;
                    }
                }
                log::debug!("PlaybackCoordinator: Poller exited");
            })
            .expect("Failed to spawn poller thread");

        // The previous poller (if any) has already decided to exit
        if let Ok(mut slot) = self.poller.lock() {
            *slot = Some(handle);
        }
    }

    /// One poll step; returns whether the poller should keep running
    fn poll(&self, from_poller: bool) -> bool {
        let mut notices = Vec::new();
        let keep_running = {
            let mut st = self.lock_state();
            if st.closed || st.session.state != PlaybackState::Playing {
                if from_poller {
                    // Cleared under the lock so a concurrent play() spawns a fresh poller
                    self.poller_active.store(false, Ordering::Release);
                }
                false
            } else if !st.device.is_busy() {
                log::info!("PlaybackCoordinator: Device idle, track finished");
                st.finish(&mut notices);
                if from_poller {
                    self.poller_active.store(false, Ordering::Release);
                }
                false
            } else {
                st.session.position_ms += self.poll_interval_ms();
                let length_ms = st.session.length_ms;
                if st.session.position_ms >= length_ms {
                    st.session.position_ms = length_ms;
                    notices.push(Notice::Progress(length_ms / 1000.0, length_ms / 1000.0));
                    log::info!("PlaybackCoordinator: Reached end of track");
                    st.finish(&mut notices);
                    if from_poller {
                        self.poller_active.store(false, Ordering::Release);
                    }
                    false
                } else {
                    notices.push(Notice::Progress(
                        st.session.position_ms / 1000.0,
                        length_ms / 1000.0,
                    ));
                    true
                }
            }
        };
        self.notify(notices);
        keep_running
    }

    /// Materialize, load and start `buffer`
    ///
    /// `expected_generation` turns this into a conditional swap: the buffer is
    /// discarded (Ok(false)) unless the coordinator is still Playing in that
    /// generation, and playback resumes at the current position.
    fn start(
        self: &Arc<Self>,
        buffer: &AudioBuffer,
        rendered: &EffectParameters,
        start_secs: Option<f64>,
        expected_generation: Option<u64>,
    ) -> PlaybackResult<bool> {
        // Held across load so eviction never removes a file being loaded
        let mut artifacts = self.lock_artifacts();

        {
            let st = self.lock_state();
            if st.closed {
                return Err(PlaybackError::DeviceLoad(AudioError::Closed));
            }
            if let Some(generation) = expected_generation {
                if !self.swap_allowed(&st, generation) {
                    log::info!(
                        "PlaybackCoordinator: Discarding stale render (generation {})",
                        generation
                    );
                    return Ok(false);
                }
            }
        }

        let path = match artifacts.materialize(buffer) {
            Ok(path) => path,
            Err(e) => {
                drop(artifacts);
                log::error!("PlaybackCoordinator: Failed to write artifact: {}", e);
                self.notify(vec![Notice::Status(PlaybackStatus::Error(e.to_string()))]);
                return Err(PlaybackError::TransientIo(e));
            }
        };

        let mut notices = Vec::new();
        let result = {
            let mut st = self.lock_state();
            self.load_and_play(
                &mut st,
                buffer,
                rendered,
                path,
                start_secs,
                expected_generation,
                &mut notices,
            )
        };
        drop(artifacts);
        self.notify(notices);
        result
    }

    fn swap_allowed(&self, st: &CoordinatorState, generation: u64) -> bool {
        !st.closed && st.session.state == PlaybackState::Playing && st.generation == generation
    }

    fn load_and_play(
        self: &Arc<Self>,
        st: &mut CoordinatorState,
        buffer: &AudioBuffer,
        rendered: &EffectParameters,
        path: PathBuf,
        start_secs: Option<f64>,
        expected_generation: Option<u64>,
        notices: &mut Vec<Notice>,
    ) -> PlaybackResult<bool> {
        if let Some(generation) = expected_generation {
            if !self.swap_allowed(st, generation) {
                log::info!("PlaybackCoordinator: Discarding stale render (generation {})", generation);
                return Ok(false);
            }
        }
        if st.closed {
            return Err(PlaybackError::DeviceLoad(AudioError::Closed));
        }

        let duration_secs = buffer.duration_secs();
        let start = match start_secs {
            Some(secs) => secs,
            // Swap: carry on from the current position
            None => st.session.position_ms / 1000.0,
        }
        .clamp(0.0, duration_secs);

        if let Err(e) = st.device.load(&path).and_then(|_| st.device.play(start)) {
            log::error!("PlaybackCoordinator: {} rejected {:?}: {}", st.device.name(), path, e);
            notices.push(Notice::Status(PlaybackStatus::Error(e.to_string())));
            return Err(PlaybackError::DeviceLoad(e));
        }
        st.rendered = Some(*rendered);
        st.apply_gain();

        st.session = PlaybackSession {
            state: PlaybackState::Playing,
            position_ms: start * 1000.0,
            length_ms: buffer.duration_ms(),
        };
        st.seek_pending = false;
        let generation = st.bump();
        log::info!(
            "PlaybackCoordinator: Playing {:.2}s from {:.2}s (generation {})",
            duration_secs,
            start,
            generation
        );
        notices.push(Notice::Status(PlaybackStatus::Playing));
        self.ensure_poller();
        Ok(true)
    }
}

/// Owns the output device and the playback session
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl PlaybackCoordinator {
    pub fn new(
        device: Box<dyn OutputDevice>,
        config: &PlaybackConfig,
        observer: Arc<dyn PlaybackObserver>,
    ) -> Self {
        log::info!(
            "PlaybackCoordinator: Using device '{}' (poll {} ms, {} artifacts)",
            device.name(),
            config.poll_interval_ms,
            config.max_artifacts
        );
        let artifacts = ArtifactStore::new(
            config.artifact_prefix.clone(),
            config.max_artifacts,
            config.artifact_dir.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CoordinatorState {
                    device,
                    session: PlaybackSession::default(),
                    generation: 0,
                    volume: 1.0,
                    rendered: None,
                    seek_pending: false,
                    closed: false,
                }),
                artifacts: Mutex::new(artifacts),
                observer,
                poller_active: AtomicBool::new(false),
                poller: Mutex::new(None),
                poll_interval: config.poll_interval(),
                spawn_poller: config.spawn_poller,
            }),
        }
    }

    /// Load `buffer` (rendered with `rendered`) and play it from `start_secs`
    ///
    /// On failure the session is left as it was and an Error status is sent.
    pub fn play(
        &self,
        buffer: &AudioBuffer,
        rendered: &EffectParameters,
        start_secs: f64,
    ) -> PlaybackResult<()> {
        self.inner.start(buffer, rendered, Some(start_secs), None).map(|_| ())
    }

    /// Replace the playing buffer with a re-rendered one
    ///
    /// Only acts if the coordinator is still Playing in `expected_generation`;
    /// returns Ok(false) when the render was discarded. Playback carries on
    /// from the current position, clamped to the new buffer's length.
    pub fn swap(
        &self,
        buffer: &AudioBuffer,
        rendered: &EffectParameters,
        expected_generation: u64,
    ) -> PlaybackResult<bool> {
        self.inner.start(buffer, rendered, None, Some(expected_generation))
    }

    /// Playing -> Paused; no-op otherwise
    pub fn pause(&self) -> bool {
        let changed = {
            let mut st = self.inner.lock_state();
            if st.session.state != PlaybackState::Playing {
                false
            } else {
                st.device.pause();
                st.session.state = PlaybackState::Paused;
                st.bump();
                true
            }
        };
        if changed {
            log::info!("PlaybackCoordinator: Paused");
            self.inner.notify(vec![Notice::Status(PlaybackStatus::Paused)]);
        }
        changed
    }

    /// Paused -> Playing; no-op unless paused with a loaded track
    pub fn resume(&self) -> bool {
        let mut notices = Vec::new();
        let changed = {
            let mut st = self.inner.lock_state();
            if st.session.state != PlaybackState::Paused || st.session.length_ms <= 0.0 {
                false
            } else {
                if st.seek_pending {
                    let start = st.session.position_ms / 1000.0;
                    if let Err(e) = st.device.play(start) {
                        log::error!("PlaybackCoordinator: Failed to restart at {:.2}s: {}", start, e);
                        notices.push(Notice::Status(PlaybackStatus::Error(e.to_string())));
                    }
                    st.seek_pending = false;
                } else {
                    st.device.unpause();
                }
                st.apply_gain();
                st.session.state = PlaybackState::Playing;
                st.bump();
                notices.push(Notice::Status(PlaybackStatus::Resumed));
                self.inner.ensure_poller();
                true
            }
        };
        if changed {
            log::info!("PlaybackCoordinator: Resumed");
        }
        self.inner.notify(notices);
        changed
    }

    /// Any state -> Stopped at position 0
    pub fn stop(&self) {
        {
            let mut st = self.inner.lock_state();
            if !st.closed {
                st.device.stop();
            }
            st.session.state = PlaybackState::Stopped;
            st.session.position_ms = 0.0;
            st.seek_pending = false;
            st.bump();
        }
        log::info!("PlaybackCoordinator: Stopped");
        self.inner.notify(vec![Notice::Status(PlaybackStatus::Stopped)]);
    }

    /// Set the live volume
    ///
    /// The device gain follows immediately while Playing, otherwise on the
    /// next play or resume. Returns true when the loaded buffer was rendered
    /// silent and a re-render is needed to make it louder.
    pub fn set_volume(&self, volume: f32) -> bool {
        let mut st = self.inner.lock_state();
        st.volume = volume.max(0.0);
        if st.session.state == PlaybackState::Playing && !st.closed {
            st.apply_gain();
        }
        st.needs_louder_render()
    }

    /// Move the position without touching the device (Paused/Stopped only)
    ///
    /// While paused, the next resume restarts the device at the new position.
    /// Returns false while Playing; a playing seek goes through `play`.
    pub fn set_position(&self, position_secs: f64) -> bool {
        let mut st = self.inner.lock_state();
        if st.session.state == PlaybackState::Playing {
            return false;
        }
        // Nothing played yet: no length to clamp against
        let max_ms = if st.session.length_ms > 0.0 {
            st.session.length_ms
        } else {
            f64::MAX
        };
        st.session.position_ms = (position_secs * 1000.0).clamp(0.0, max_ms);
        st.seek_pending = st.session.state == PlaybackState::Paused;
        true
    }

    /// Forget the previous track's position and length (Stopped only)
    pub fn clear_session(&self) -> bool {
        let mut st = self.inner.lock_state();
        if st.session.state != PlaybackState::Stopped {
            return false;
        }
        st.session = PlaybackSession::default();
        st.rendered = None;
        st.seek_pending = false;
        st.bump();
        true
    }

    /// Run one poll step by hand (for `spawn_poller = false`)
    ///
    /// Returns whether playback is still running.
    pub fn tick(&self) -> bool {
        self.inner.poll(false)
    }

    pub fn session(&self) -> PlaybackSession {
        self.inner.lock_state().session
    }

    pub fn state(&self) -> PlaybackState {
        self.session().state
    }

    pub fn position_secs(&self) -> f64 {
        self.session().position_ms / 1000.0
    }

    pub fn length_secs(&self) -> f64 {
        self.session().length_ms / 1000.0
    }

    /// Current transition generation (see module docs)
    pub fn generation(&self) -> u64 {
        self.inner.lock_state().generation
    }

    /// Live volume
    pub fn volume(&self) -> f32 {
        self.inner.lock_state().volume
    }

    /// Gain currently derived for the device
    pub fn device_gain(&self) -> f32 {
        self.inner.lock_state().device_gain()
    }

    /// Parameters of the buffer loaded in the device, if any
    pub fn rendered(&self) -> Option<EffectParameters> {
        self.inner.lock_state().rendered
    }

    pub fn is_poller_active(&self) -> bool {
        self.inner.poller_active.load(Ordering::Acquire)
    }

    /// Paths of the retained WAV artifacts
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        self.inner.lock_artifacts().paths()
    }

    /// Stop, release the device and delete all artifacts. Idempotent.
    pub fn shutdown(&self) {
        let was_open = {
            let mut st = self.inner.lock_state();
            if st.closed {
                false
            } else {
                st.device.stop();
                st.device.close();
                st.closed = true;
                st.session.state = PlaybackState::Stopped;
                st.session.position_ms = 0.0;
                st.bump();
                true
            }
        };

        let poller = self.inner.poller.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = poller {
            if handle.join().is_err() {
                log::warn!("PlaybackCoordinator: Poller thread panicked");
            }
        }

        self.inner.lock_artifacts().cleanup();
        if was_open {
            log::info!("PlaybackCoordinator: Shut down");
        }
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{SimulatedDevice, SimulatedHandle};
    use crate::playback::{ChannelObserver, PlaybackEvent};
    use crossbeam::channel::Receiver;

    fn coordinator(dir: &std::path::Path) -> (PlaybackCoordinator, SimulatedHandle, Receiver<PlaybackEvent>) {
        let (device, handle) = SimulatedDevice::with_handle();
        let (observer, rx) = ChannelObserver::new();
        let config = PlaybackConfig {
            artifact_dir: Some(dir.to_path_buf()),
            spawn_poller: false,
            ..PlaybackConfig::default()
        };
        (
            PlaybackCoordinator::new(Box::new(device), &config, Arc::new(observer)),
            handle,
            rx,
        )
    }

    fn statuses(rx: &Receiver<PlaybackEvent>) -> Vec<PlaybackStatus> {
        rx.try_iter()
            .filter_map(|e| match e {
                PlaybackEvent::Status(s) => Some(s),
                PlaybackEvent::Progress { .. } => None,
            })
            .collect()
    }

    fn track(seconds: f64) -> AudioBuffer {
        AudioBuffer::silence(seconds, 8000, 2)
    }

    fn neutral() -> EffectParameters {
        EffectParameters::default()
    }

    #[test]
    fn test_pause_from_stopped_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, _handle, rx) = coordinator(dir.path());
        let generation = coord.generation();
        assert!(!coord.pause());
        assert_eq!(coord.state(), PlaybackState::Stopped);
        assert_eq!(coord.generation(), generation);
        assert!(statuses(&rx).is_empty());
    }

    #[test]
    fn test_resume_without_play_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, _handle, rx) = coordinator(dir.path());
        assert!(!coord.resume());
        assert_eq!(coord.state(), PlaybackState::Stopped);
        assert!(statuses(&rx).is_empty());
    }

    #[test]
    fn test_play_pause_resume_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, rx) = coordinator(dir.path());

        coord.play(&track(2.0), &neutral(), 0.5).unwrap();
        assert_eq!(coord.state(), PlaybackState::Playing);
        assert!((coord.position_secs() - 0.5).abs() < 1e-9);
        assert!((coord.length_secs() - 2.0).abs() < 1e-9);
        assert_eq!(handle.last_start_secs(), Some(0.5));

        assert!(coord.pause());
        assert!(handle.is_paused());
        assert!(!coord.tick());
        assert!((coord.position_secs() - 0.5).abs() < 1e-9);

        assert!(coord.resume());
        assert!(coord.tick());
        assert!((coord.position_secs() - 0.6).abs() < 1e-9);

        coord.stop();
        assert_eq!(coord.state(), PlaybackState::Stopped);
        assert_eq!(coord.position_secs(), 0.0);

        assert_eq!(
            statuses(&rx),
            vec![
                PlaybackStatus::Playing,
                PlaybackStatus::Paused,
                PlaybackStatus::Resumed,
                PlaybackStatus::Stopped
            ]
        );
    }

    #[test]
    fn test_stop_from_any_state() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, _handle, _rx) = coordinator(dir.path());
        coord.stop();
        assert_eq!(coord.session().position_ms, 0.0);

        coord.play(&track(1.0), &neutral(), 0.2).unwrap();
        coord.pause();
        coord.stop();
        assert_eq!(coord.state(), PlaybackState::Stopped);
        assert_eq!(coord.session().position_ms, 0.0);
    }

    #[test]
    fn test_tick_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, _handle, rx) = coordinator(dir.path());
        coord.play(&track(5.0), &neutral(), 0.0).unwrap();
        for _ in 0..3 {
            assert!(coord.tick());
        }
        let progress: Vec<(f64, f64)> = rx
            .try_iter()
            .filter_map(|e| match e {
                PlaybackEvent::Progress {
                    position_secs,
                    duration_secs,
                } => Some((position_secs, duration_secs)),
                PlaybackEvent::Status(_) => None,
            })
            .collect();
        assert_eq!(progress.len(), 3);
        assert!((progress[2].0 - 0.3).abs() < 1e-9);
        assert!((progress[2].1 - 5.0).abs() < 1e-9);
        assert!((coord.session().progress_percent() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_device_idle_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, rx) = coordinator(dir.path());
        coord.play(&track(5.0), &neutral(), 0.0).unwrap();
        handle.finish();
        assert!(!coord.tick());
        assert_eq!(coord.state(), PlaybackState::Stopped);
        assert_eq!(coord.position_secs(), 0.0);
        assert_eq!(statuses(&rx), vec![PlaybackStatus::Playing, PlaybackStatus::Finished]);
    }

    #[test]
    fn test_reaching_length_finishes_even_if_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, _handle, rx) = coordinator(dir.path());
        coord.play(&track(0.25), &neutral(), 0.0).unwrap();
        assert!(coord.tick());
        assert!(coord.tick());
        assert!(!coord.tick());
        assert_eq!(coord.state(), PlaybackState::Stopped);

        let events: Vec<PlaybackEvent> = rx.try_iter().collect();
        assert_eq!(
            events[events.len() - 2],
            PlaybackEvent::Progress {
                position_secs: 0.25,
                duration_secs: 0.25
            }
        );
        assert_eq!(events[events.len() - 1], PlaybackEvent::Status(PlaybackStatus::Finished));
    }

    #[test]
    fn test_load_failure_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, rx) = coordinator(dir.path());
        coord.play(&track(1.0), &neutral(), 0.0).unwrap();
        coord.tick();
        let before = coord.session();

        handle.set_fail_loads(true);
        let err = coord.play(&track(3.0), &neutral(), 0.0).unwrap_err();
        assert!(matches!(err, PlaybackError::DeviceLoad(_)));
        assert_eq!(coord.session(), before);

        let last = statuses(&rx).pop().unwrap();
        assert!(matches!(last, PlaybackStatus::Error(_)));
    }

    #[test]
    fn test_swap_keeps_position_and_checks_generation() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, _rx) = coordinator(dir.path());
        coord.play(&track(4.0), &neutral(), 0.0).unwrap();
        for _ in 0..20 {
            coord.tick();
        }
        let generation = coord.generation();

        // A shorter buffer (e.g. faster speed) still restarts at 2.0 s
        assert!(coord.swap(&track(3.0), &neutral(), generation).unwrap());
        assert!((coord.position_secs() - 2.0).abs() < 1e-9);
        assert_eq!(handle.last_start_secs(), Some(2.0));

        let stale = generation;
        coord.stop();
        let loads = handle.load_count();
        assert!(!coord.swap(&track(2.0), &neutral(), stale).unwrap());
        assert_eq!(handle.load_count(), loads);
        assert_eq!(coord.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_swap_clamps_to_shorter_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, _rx) = coordinator(dir.path());
        coord.play(&track(4.0), &neutral(), 3.0).unwrap();
        let generation = coord.generation();

        assert!(coord.swap(&track(2.0), &neutral(), generation).unwrap());
        assert!((coord.position_secs() - 2.0).abs() < 1e-9);
        assert_eq!(handle.last_start_secs(), Some(2.0));
        // Already at the end: the next poll finishes the track
        assert!(!coord.tick());
        assert_eq!(coord.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_device_gain_follows_rendered_volume() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, _rx) = coordinator(dir.path());
        let half = EffectParameters {
            volume: 0.5,
            ..EffectParameters::default()
        };
        coord.set_volume(0.5);
        coord.play(&track(1.0), &half, 0.0).unwrap();
        assert_eq!(coord.rendered(), Some(half));
        assert!((handle.volume() - 1.0).abs() < 1e-6);

        assert!(!coord.set_volume(1.0));
        assert!((handle.volume() - 2.0).abs() < 1e-6);

        // A swap stores its parameters and the gain is re-derived with them
        assert!(coord.swap(&track(1.0), &neutral(), coord.generation()).unwrap());
        assert_eq!(coord.rendered(), Some(neutral()));
        assert!((handle.volume() - 1.0).abs() < 1e-6);
        assert!((coord.device_gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_silent_render_asks_for_louder_one() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, _handle, _rx) = coordinator(dir.path());
        let silent = EffectParameters {
            volume: 0.0,
            ..EffectParameters::default()
        };
        coord.set_volume(0.0);
        coord.play(&track(1.0), &silent, 0.0).unwrap();
        assert!(coord.set_volume(0.8));
        assert!((coord.device_gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_volume_applied_only_while_playing() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, _rx) = coordinator(dir.path());
        coord.set_volume(0.3);
        assert_eq!(handle.volume(), 1.0);

        coord.play(&track(1.0), &neutral(), 0.0).unwrap();
        assert_eq!(handle.volume(), 0.3);
        coord.set_volume(0.6);
        assert_eq!(handle.volume(), 0.6);
    }

    #[test]
    fn test_paused_seek_restarts_device() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, _rx) = coordinator(dir.path());
        coord.play(&track(4.0), &neutral(), 0.0).unwrap();
        assert!(!coord.set_position(2.0));
        coord.pause();
        assert!(coord.set_position(2.0));
        coord.resume();
        assert_eq!(handle.last_start_secs(), Some(2.0));
        assert!((coord.position_secs() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_shutdown_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, handle, _rx) = coordinator(dir.path());
        coord.play(&track(1.0), &neutral(), 0.0).unwrap();
        coord.play(&track(1.0), &neutral(), 0.0).unwrap();
        coord.play(&track(1.0), &neutral(), 0.0).unwrap();
        assert_eq!(coord.artifact_paths().len(), 2);
        let paths = coord.artifact_paths();

        coord.shutdown();
        coord.shutdown();
        assert!(handle.is_closed());
        assert!(coord.artifact_paths().is_empty());
        assert!(paths.iter().all(|p| !p.exists()));
        assert!(coord.play(&track(1.0), &neutral(), 0.0).is_err());
    }

    #[test]
    fn test_spawned_poller_advances_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let (device, _handle) = SimulatedDevice::with_handle();
        let config = PlaybackConfig {
            artifact_dir: Some(dir.path().to_path_buf()),
            poll_interval_ms: 10,
            ..PlaybackConfig::default()
        };
        let coord = PlaybackCoordinator::new(Box::new(device), &config, Arc::new(crate::playback::NullObserver));
        coord.play(&track(0.05), &neutral(), 0.0).unwrap();
        assert!(coord.is_poller_active());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while coord.state() == PlaybackState::Playing && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(coord.state(), PlaybackState::Stopped);
        while coord.is_poller_active() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!coord.is_poller_active());
    }
}
