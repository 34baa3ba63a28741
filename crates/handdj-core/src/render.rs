//! Background re-rendering
//!
//! One named worker thread runs render jobs. Requests coalesce instead of
//! queuing, through a single state word moved with compare-and-swap:
//!
//! ```text
//!         request()                request()
//!  IDLE ────────────► RUNNING ────────────► DIRTY
//!   ▲                  │  ▲                   │
//!   └── job done ──────┘  └──── job done ─────┘ (run again)
//! ```
//!
//! A burst of requests during one render therefore costs at most one extra
//! render, and the last one always sees the newest parameters. Requester and
//! worker never race on separate flags, so no request is left stranded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Sender};

use crate::effect::{EffectChain, RenderResult};
use crate::params::EffectParameters;
use crate::types::AudioBuffer;

/// Produces a processed buffer from a source buffer and a parameter snapshot
pub trait Renderer: Send + Sync {
    fn render(&self, source: &AudioBuffer, params: &EffectParameters) -> RenderResult<AudioBuffer>;
}

impl Renderer for EffectChain {
    fn render(&self, source: &AudioBuffer, params: &EffectParameters) -> RenderResult<AudioBuffer> {
        self.apply(source, params)
    }
}

enum WorkerMessage {
    Render,
    Shutdown,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
/// Running, and another request arrived since the job started
const DIRTY: u8 = 2;

/// State shared between requesters and the worker
#[derive(Debug, Default)]
struct WorkerFlags {
    state: AtomicU8,
    /// Completed job runs
    completed: AtomicU64,
}

impl WorkerFlags {
    fn is_in_flight(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    /// Move the state for a new request; returns true if a job must be started
    fn mark_requested(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => RUNNING,
                RUNNING => DIRTY,
                _ => return false,
            };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return current == IDLE,
                Err(actual) => current = actual,
            }
        }
    }

    /// Called after a job run; returns true if it must run again
    fn finish_run(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (next, again) = match current {
                DIRTY => (RUNNING, true),
                _ => (IDLE, false),
            };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return again,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Single-slot coalescing render worker
pub struct RenderWorker {
    flags: Arc<WorkerFlags>,
    tx: Sender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RenderWorker {
    /// Start the worker thread; `job` runs once per (coalesced) request
    pub fn spawn<F>(job: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let flags = Arc::new(WorkerFlags::default());
        let (tx, rx) = unbounded::<WorkerMessage>();
        let worker_flags = Arc::clone(&flags);

        let thread = thread::Builder::new()
            .name("handdj-render".to_string())
            .spawn(move || {
                log::debug!("RenderWorker: Started");
                while let Ok(WorkerMessage::Render) = rx.recv() {
                    run_coalesced(&worker_flags, &job);
                }
                log::debug!("RenderWorker: Exiting");
            })
            .expect("Failed to spawn render worker thread");

        Self {
            flags,
            tx,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Ask for a render
    ///
    /// Returns true if this call started one, false if a render was already
    /// in flight (it will run once more when it finishes).
    pub fn request(&self) -> bool {
        if !self.flags.mark_requested() {
            log::debug!("RenderWorker: Render in flight, coalescing request");
            return false;
        }
        if self.tx.send(WorkerMessage::Render).is_err() {
            self.flags.state.store(IDLE, Ordering::Release);
            log::warn!("RenderWorker: Worker gone, request dropped");
            return false;
        }
        true
    }

    pub fn is_in_flight(&self) -> bool {
        self.flags.is_in_flight()
    }

    /// Number of job runs completed so far
    pub fn completed(&self) -> u64 {
        self.flags.completed.load(Ordering::Acquire)
    }

    /// Block until no render is in flight or `timeout` passes
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_in_flight() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Let the current render finish, then stop the thread. Idempotent.
    pub fn shutdown(&self) {
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = self.tx.send(WorkerMessage::Shutdown);
            if handle.join().is_err() {
                log::warn!("RenderWorker: Worker thread panicked");
            }
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_coalesced<F: Fn()>(flags: &WorkerFlags, job: &F) {
    loop {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("RenderWorker: Render job panicked");
        }
        flags.completed.fetch_add(1, Ordering::AcqRel);

        if !flags.finish_run() {
            break;
        }
        log::debug!("RenderWorker: Parameters changed during render, rendering again");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, Receiver};
    use std::sync::atomic::AtomicUsize;

    /// Job that blocks until released, counting its runs
    fn gated_job() -> (impl Fn() + Send + 'static, Sender<()>, Arc<AtomicUsize>, Receiver<()>) {
        let (gate_tx, gate_rx) = unbounded::<()>();
        let (started_tx, started_rx) = bounded::<()>(16);
        let runs = Arc::new(AtomicUsize::new(0));
        let job_runs = Arc::clone(&runs);
        let job = move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            job_runs.fetch_add(1, Ordering::SeqCst);
        };
        (job, gate_tx, runs, started_rx)
    }

    #[test]
    fn test_single_request_runs_once() {
        let (job, gate, runs, _started) = gated_job();
        let worker = RenderWorker::spawn(job);
        gate.send(()).unwrap();
        assert!(worker.request());
        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(worker.completed(), 1);
    }

    #[test]
    fn test_burst_coalesces_to_two_renders() {
        let (job, gate, runs, started) = gated_job();
        let worker = RenderWorker::spawn(job);

        assert!(worker.request());
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        for _ in 0..10 {
            assert!(!worker.request());
        }

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_requests_after_idle_start_new_render() {
        let (job, gate, runs, _started) = gated_job();
        let worker = RenderWorker::spawn(job);
        for _ in 0..3 {
            gate.send(()).unwrap();
            assert!(worker.request());
            assert!(worker.wait_idle(Duration::from_secs(5)));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_requests_never_strand_the_latest() {
        let requested = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(0));
        let job_requested = Arc::clone(&requested);
        let job_seen = Arc::clone(&seen);
        let worker = Arc::new(RenderWorker::spawn(move || {
            job_seen.store(job_requested.load(Ordering::SeqCst), Ordering::SeqCst);
        }));

        let requesters: Vec<_> = (0..4)
            .map(|_| {
                let worker = Arc::clone(&worker);
                let requested = Arc::clone(&requested);
                thread::spawn(move || {
                    for _ in 0..200 {
                        requested.fetch_add(1, Ordering::SeqCst);
                        worker.request();
                    }
                })
            })
            .collect();
        for handle in requesters {
            handle.join().unwrap();
        }

        assert!(worker.wait_idle(Duration::from_secs(10)));
        // The last run started after the last request
        assert_eq!(seen.load(Ordering::SeqCst), 800);
        assert!(worker.completed() >= 1);
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let calls = Arc::new(AtomicUsize::new(0));
        let job_calls = Arc::clone(&calls);
        let worker = RenderWorker::spawn(move || {
            if job_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
        });
        worker.request();
        assert!(worker.wait_idle(Duration::from_secs(5)));
        worker.request();
        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_effect_chain_is_a_renderer() {
        let chain = EffectChain::new(8000);
        let renderer: &dyn Renderer = &chain;
        let source = AudioBuffer::silence(0.1, 8000, 1);
        let out = renderer.render(&source, &EffectParameters::default()).unwrap();
        assert!(out.shares_samples(&source));
    }
}
