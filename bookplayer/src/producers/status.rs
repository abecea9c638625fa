//! Status poller
//!
//! Polls the playback backend on its own connection and turns what it sees
//! into events:
//! - a state different from the previous poll → `PlayerStateChanged`
//! - Playing → Stopped at the end of the assigned book's last track →
//!   `BookFinished` instead of the state change
//! - every poll while Playing → `ProgressTick`
//!
//! The poller never touches the dispatcher's session. It learns which book is
//! assigned from a watch channel the dispatcher writes.

use super::backoff::Backoff;
use crate::bus::BusSender;
use crate::hardware::{PlaybackBackend, PlaybackStatus};
use bookplayer_common::{BookId, Event, PlayerState};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decides which events a status sample produces
#[derive(Debug, Clone)]
pub struct StatusTracker {
    finish_threshold_secs: f64,
    last: PlaybackStatus,
}

impl StatusTracker {
    /// The backend is assumed stopped until the first poll says otherwise
    pub fn new(finish_threshold_secs: f64) -> Self {
        Self {
            finish_threshold_secs,
            last: PlaybackStatus::default(),
        }
    }

    /// Whether the transition from the previous sample to `now` is the end of
    /// the book rather than a plain stop
    fn finished(&self, now: &PlaybackStatus) -> bool {
        let prev = &self.last;
        if prev.state != PlayerState::Playing || now.state != PlayerState::Stopped {
            return false;
        }

        let track_count = prev.track_count.max(now.track_count);
        let on_last_track = track_count > 0 && prev.track == Some(track_count - 1);
        if !on_last_track {
            return false;
        }

        match prev.duration_secs {
            Some(duration) => {
                duration - prev.position_secs < self.finish_threshold_secs
                    || now.position_secs >= duration
            }
            None => false,
        }
    }

    /// Feed one successful status sample
    pub fn observe(&mut self, now: PlaybackStatus, assigned: Option<&BookId>) -> Vec<Event> {
        let mut events = Vec::new();

        if now.state != self.last.state {
            match assigned {
                Some(book_id) if self.finished(&now) => {
                    info!("Book {} finished", book_id);
                    events.push(Event::BookFinished {
                        book_id: book_id.clone(),
                    });
                }
                _ => {
                    debug!("Player state {} -> {}", self.last.state, now.state);
                    events.push(Event::PlayerStateChanged {
                        state: now.state,
                        position_secs: now.position_secs,
                        track: now.track,
                    });
                }
            }
        }

        if now.state == PlayerState::Playing {
            events.push(Event::ProgressTick {
                book_id: assigned.cloned(),
                track: now.track.unwrap_or(0),
                position_secs: now.position_secs,
            });
        }

        self.last = now;
        events
    }
}

/// Task polling the backend for status
pub struct StatusPoller {
    backend: Box<dyn PlaybackBackend>,
    assigned: watch::Receiver<Option<BookId>>,
    tracker: StatusTracker,
    poll_interval: Duration,
    backoff: Backoff,
}

impl StatusPoller {
    pub fn new(
        backend: Box<dyn PlaybackBackend>,
        assigned: watch::Receiver<Option<BookId>>,
        poll_interval: Duration,
        finish_threshold_secs: f64,
        backoff: Backoff,
    ) -> Self {
        Self {
            backend,
            assigned,
            tracker: StatusTracker::new(finish_threshold_secs),
            poll_interval,
            backoff,
        }
    }

    /// Poll until shutdown, then close the backend connection
    pub async fn run(mut self, bus: BusSender, shutdown: CancellationToken) {
        info!("Status poller started ({:?} interval)", self.poll_interval);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let status = tokio::select! {
                _ = shutdown.cancelled() => break,
                status = self.backend.status() => status,
            };

            match status {
                Ok(status) => {
                    self.backoff.reset();
                    let assigned = self.assigned.borrow().clone();
                    for event in self.tracker.observe(status, assigned.as_ref()) {
                        bus.publish(event);
                    }
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!("Status poll failed: {} (retry in {:?})", e, delay);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    ticker.reset();
                }
            }
        }

        if let Err(e) = self.backend.close().await {
            warn!("Error closing status connection: {}", e);
        }
        info!("Status poller stopped");
    }
}
