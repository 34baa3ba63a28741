//! Status and progress callbacks

use std::fmt;

use crossbeam::channel::{unbounded, Receiver, Sender};

/// Playback status reported to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    Loaded,
    Playing,
    Paused,
    Resumed,
    Stopped,
    Finished,
    Error(String),
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackStatus::Loaded => f.write_str("Loaded"),
            PlaybackStatus::Playing => f.write_str("Playing"),
            PlaybackStatus::Paused => f.write_str("Paused"),
            PlaybackStatus::Resumed => f.write_str("Resumed"),
            PlaybackStatus::Stopped => f.write_str("Stopped"),
            PlaybackStatus::Finished => f.write_str("Finished"),
            PlaybackStatus::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Receives playback notifications
///
/// Called from the command thread, the render worker and the poller, never
/// while the coordinator holds its state lock.
pub trait PlaybackObserver: Send + Sync {
    fn on_status(&self, status: &PlaybackStatus);

    /// Fired every poll interval while playing
    fn on_progress(&self, position_secs: f64, duration_secs: f64);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl PlaybackObserver for NullObserver {
    fn on_status(&self, _status: &PlaybackStatus) {}

    fn on_progress(&self, _position_secs: f64, _duration_secs: f64) {}
}

/// A notification as a value
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Status(PlaybackStatus),
    Progress { position_secs: f64, duration_secs: f64 },
}

/// Forwards notifications over a channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<PlaybackEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<PlaybackEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl PlaybackObserver for ChannelObserver {
    fn on_status(&self, status: &PlaybackStatus) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(PlaybackEvent::Status(status.clone()));
    }

    fn on_progress(&self, position_secs: f64, duration_secs: f64) {
        let _ = self.tx.send(PlaybackEvent::Progress {
            position_secs,
            duration_secs,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards() {
        let (observer, rx) = ChannelObserver::new();
        observer.on_status(&PlaybackStatus::Playing);
        observer.on_progress(0.1, 10.0);
        assert_eq!(rx.try_recv().unwrap(), PlaybackEvent::Status(PlaybackStatus::Playing));
        assert_eq!(
            rx.try_recv().unwrap(),
            PlaybackEvent::Progress {
                position_secs: 0.1,
                duration_secs: 10.0
            }
        );
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_status(&PlaybackStatus::Stopped);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(PlaybackStatus::Finished.to_string(), "Finished");
        assert_eq!(
            PlaybackStatus::Error("device gone".into()).to_string(),
            "Error: device gone"
        );
    }
}
