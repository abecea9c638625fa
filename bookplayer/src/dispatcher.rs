//! Dispatcher
//!
//! The single consumer of the event bus and sole owner of the [`Session`].
//! Events are handled one at a time in arrival order.
//!
//! # State machine
//!
//! ```text
//! Stopped --card--> Playing --toggle--> Paused --toggle--> Playing
//!    ^                 |                  |
//!    +--finish/card----+------card--------+
//! ```
//!
//! Handlers compute the whole transition first and commit it to the session
//! only after every backend and store call succeeded. A failure is logged and
//! leaves the session as it was, except that a book the backend has already
//! stopped is recorded as stopped.

use crate::bus::{Delivery, EventBus};
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::db::ProgressStore;
use crate::hardware::PlaybackBackend;
use crate::led::{LedController, LedState};
use crate::progress::ProgressTracker;
use crate::session::{PendingToggle, Session};
use bookplayer_common::{BookId, ButtonAction, CardId, Error, Event, PlayerState, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Behaviour knobs of the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub initial_volume: u8,
    pub volume_step: u8,
    /// Below this position a rewind goes to the previous track
    pub rewind_threshold_secs: f64,
    pub rewind_step_secs: f64,
    pub toggle_confirm_timeout: Duration,
    pub shutdown_flush_timeout: Duration,
    pub led_overlay: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            initial_volume: 100,
            volume_step: 10,
            rewind_threshold_secs: 20.0,
            rewind_step_secs: 20.0,
            toggle_confirm_timeout: Duration::from_secs(3),
            shutdown_flush_timeout: Duration::from_secs(2),
            led_overlay: Duration::from_millis(600),
        }
    }
}

impl From<&Config> for DispatcherSettings {
    fn from(config: &Config) -> Self {
        let playback = &config.settings.playback;
        Self {
            initial_volume: playback.initial_volume,
            volume_step: playback.volume_step,
            rewind_threshold_secs: playback.rewind_threshold_secs,
            rewind_step_secs: playback.rewind_step_secs,
            toggle_confirm_timeout: config.toggle_confirm_timeout(),
            shutdown_flush_timeout: config.shutdown_flush_timeout(),
            led_overlay: config.led_overlay(),
        }
    }
}

/// Where a rewind lands, before the previous track's length is known
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RewindPlan {
    /// Same track, new position
    Within { track: u32, position_secs: f64 },
    /// Near the end of the previous track
    PreviousTrack { track: u32 },
    /// Start of the book
    Start,
}

/// Plan a rewind from `position_secs` in `track`
pub fn plan_rewind(track: u32, position_secs: f64, threshold_secs: f64, step_secs: f64) -> RewindPlan {
    if position_secs >= threshold_secs {
        RewindPlan::Within {
            track,
            position_secs: (position_secs - step_secs).max(0.0),
        }
    } else if track > 0 {
        RewindPlan::PreviousTrack { track: track - 1 }
    } else {
        RewindPlan::Start
    }
}

/// Position to land on in the previous track
///
/// Short or unmeasurable tracks restart from the beginning.
fn previous_track_position(duration_secs: Option<f64>, step_secs: f64) -> f64 {
    match duration_secs {
        Some(duration) if duration > step_secs => duration - step_secs,
        _ => 0.0,
    }
}

pub struct Dispatcher {
    session: Session,
    backend: Box<dyn PlaybackBackend>,
    catalog: Arc<dyn CatalogStore>,
    progress: Arc<dyn ProgressStore>,
    tracker: ProgressTracker,
    led: LedController,
    assigned: watch::Sender<Option<BookId>>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        backend: Box<dyn PlaybackBackend>,
        catalog: Arc<dyn CatalogStore>,
        progress: Arc<dyn ProgressStore>,
        settings: DispatcherSettings,
    ) -> Self {
        let (assigned, _) = watch::channel(None);
        Self {
            session: Session::new(settings.initial_volume),
            backend,
            catalog,
            progress,
            tracker: ProgressTracker::new(),
            led: LedController::new(settings.led_overlay),
            assigned,
            settings,
        }
    }

    /// Book the status poller should attribute ticks to
    pub fn assigned_book(&self) -> watch::Receiver<Option<BookId>> {
        self.assigned.subscribe()
    }

    /// Pattern selection for the LED ticker
    pub fn led_state(&self) -> watch::Receiver<LedState> {
        self.led.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Put the backend into a known state: library rescanned, nothing
    /// playing, initial volume
    ///
    /// Failures are logged only; the backend may come up later and every
    /// command reconnects.
    pub async fn startup(&mut self) {
        if let Err(e) = self.backend.update_library().await {
            warn!("Could not update music library: {}", e);
        }
        if let Err(e) = self.backend.stop().await {
            warn!("Could not reset player at startup: {}", e);
        }
        match self.backend.set_volume(self.session.volume_percent).await {
            Ok(()) => info!("Volume set to {}", self.session.volume_percent),
            Err(e) => warn!("Could not set initial volume: {}", e),
        }
        self.led.follow(PlayerState::Stopped);
    }

    /// Consume events until shutdown, then flush and release the backend
    ///
    /// Returns the final session.
    pub async fn run(mut self, mut bus: EventBus) -> Session {
        info!("Dispatcher started");

        loop {
            match bus.consume().await {
                Delivery::Event(event) => self.handle(event).await,
                Delivery::Shutdown => break,
            }
        }

        if bus.dropped_ticks() > 0 {
            info!("{} progress ticks dropped under load", bus.dropped_ticks());
        }
        self.shutdown().await;
        self.session
    }

    /// Handle one event; failures are logged and leave the session unchanged
    pub async fn handle(&mut self, event: Event) {
        let kind = event.kind();
        debug!("Handling {}", kind);

        let result = match event {
            Event::ButtonPressed { pin, action } => self.handle_button(pin, action).await,
            Event::CardScanned { card_id } => self.handle_card(card_id).await,
            Event::PlayerStateChanged {
                state,
                position_secs,
                track,
            } => self.handle_state_changed(state, position_secs, track).await,
            Event::BookFinished { book_id } => self.handle_book_finished(book_id).await,
            Event::ProgressTick {
                book_id,
                track,
                position_secs,
            } => self.handle_tick(book_id, track, position_secs).await,
        };

        if let Err(e) = result {
            match e {
                Error::UnresolvedReference(_) => info!("{} ignored: {}", kind, e),
                _ => warn!("{} failed: {}", kind, e),
            }
        }
    }

    async fn handle_button(&mut self, pin: u32, action: ButtonAction) -> Result<()> {
        debug!("Button {} on pin {}", action, pin);
        match action {
            ButtonAction::TogglePause => self.toggle_pause().await,
            ButtonAction::Rewind => self.rewind().await,
            ButtonAction::VolumeUp => self.change_volume(i16::from(self.settings.volume_step)).await,
            ButtonAction::VolumeDown => {
                self.change_volume(-i16::from(self.settings.volume_step)).await
            }
        }
    }

    async fn handle_card(&mut self, card_id: CardId) -> Result<()> {
        let book = self
            .catalog
            .resolve_by_card(&card_id)
            .ok_or_else(|| Error::UnresolvedReference(format!("Unknown card {}", card_id)))?;

        if self.session.current_book_id() == Some(&book.id) {
            match self.session.player_state {
                PlayerState::Paused => {
                    self.backend.resume().await?;
                    info!("Resuming {}", book.title);
                    self.session.player_state = PlayerState::Playing;
                    self.session.pending_toggle = None;
                    self.led.follow(PlayerState::Playing);
                    return Ok(());
                }
                PlayerState::Playing => {
                    debug!("{} is already playing", book.title);
                    return Ok(());
                }
                // Queue may be gone; load it again
                PlayerState::Stopped => {}
            }
        }

        // Read before touching the player so a store failure changes nothing
        let saved = self.progress.get(&book.id).await?;

        if self.session.current_book.is_some() {
            self.flush_progress().await;
            self.backend.stop().await?;
            // Nothing plays from here on, even if the new book fails to load
            self.session.player_state = PlayerState::Stopped;
            self.session.pending_toggle = None;
            self.led.follow(PlayerState::Stopped);
        }

        let track_count = self.backend.load(&book.audio_path).await?;
        let (track, position_secs) = match saved {
            Some(record) if record.track < track_count => (record.track, record.position_secs),
            Some(record) => {
                warn!(
                    "Saved track {} of {} is beyond its {} tracks, starting over",
                    record.track, book.id, track_count
                );
                (0, 0.0)
            }
            None => (0, 0.0),
        };

        if track > 0 || position_secs > 0.0 {
            self.backend.seek(track, position_secs).await?;
        }
        self.backend.play().await?;

        info!(
            "Playing {} ({}) from track {} at {:.1}s",
            book.title, book.id, track, position_secs
        );
        let book_id = book.id.clone();
        self.session.start_book(book, track, position_secs);
        self.assigned.send_replace(Some(book_id));
        self.led.follow(PlayerState::Playing);
        Ok(())
    }

    async fn toggle_pause(&mut self) -> Result<()> {
        if self.session.current_book.is_none() {
            info!("No book loaded, ignoring play/pause");
            return Ok(());
        }

        let now = Instant::now();
        if self
            .session
            .toggle_pending(now, self.settings.toggle_confirm_timeout)
        {
            debug!("Previous play/pause not confirmed yet, ignoring");
            return Ok(());
        }

        let target = match self.session.player_state {
            PlayerState::Playing => {
                self.backend.pause().await?;
                PlayerState::Paused
            }
            PlayerState::Paused => {
                self.backend.resume().await?;
                PlayerState::Playing
            }
            PlayerState::Stopped => return Ok(()),
        };

        info!("State: {}", target);
        self.session.player_state = target;
        self.session.pending_toggle = Some(PendingToggle {
            expected: target,
            issued_at: now,
        });
        self.led.follow(target);
        Ok(())
    }

    async fn rewind(&mut self) -> Result<()> {
        self.led.acknowledge();

        if self.session.current_book.is_none()
            || self.session.player_state == PlayerState::Stopped
        {
            debug!("Nothing playing, ignoring rewind");
            return Ok(());
        }

        let (track, position_secs) = match plan_rewind(
            self.session.track,
            self.session.position_secs,
            self.settings.rewind_threshold_secs,
            self.settings.rewind_step_secs,
        ) {
            RewindPlan::Within {
                track,
                position_secs,
            } => (track, position_secs),
            RewindPlan::PreviousTrack { track } => {
                let duration = self.backend.track_duration(track).await?;
                (
                    track,
                    previous_track_position(duration, self.settings.rewind_step_secs),
                )
            }
            RewindPlan::Start => (0, 0.0),
        };

        self.backend.seek(track, position_secs).await?;
        info!("Rewind to track {} at {:.1}s", track, position_secs);
        self.session.track = track;
        self.session.position_secs = position_secs;
        Ok(())
    }

    async fn change_volume(&mut self, delta: i16) -> Result<()> {
        self.led.acknowledge();

        let current = self.session.volume_percent;
        let target = (i16::from(current) + delta).clamp(0, 100) as u8;
        if target == current {
            debug!("Volume already at {}", current);
            return Ok(());
        }

        self.backend.set_volume(target).await?;
        info!("Volume set to {}", target);
        self.session.volume_percent = target;
        Ok(())
    }

    async fn handle_state_changed(
        &mut self,
        state: PlayerState,
        position_secs: f64,
        track: Option<u32>,
    ) -> Result<()> {
        let mut next = self.session.clone();
        if let Some(pending) = next.pending_toggle.take() {
            if pending.expected != state {
                debug!("Toggle to {} superseded by reported {}", pending.expected, state);
            }
        }
        next.player_state = state;
        // A stopped backend reports position zero; keep the last known place
        if state != PlayerState::Stopped {
            if let Some(track) = track {
                next.track = track;
            }
            next.position_secs = position_secs;
        }

        if let Some(record) = self.tracker.on_state_changed(&next, state) {
            self.progress.upsert(&record).await?;
        }

        if self.session.player_state != state {
            info!("Player {} -> {}", self.session.player_state, state);
        }
        self.session = next;
        self.led.follow(state);
        Ok(())
    }

    async fn handle_book_finished(&mut self, book_id: BookId) -> Result<()> {
        self.progress.delete(&book_id).await?;
        info!("Finished {}, progress cleared", book_id);

        if self.session.current_book_id() == Some(&book_id) {
            self.session.finish_book();
            self.assigned.send_replace(None);
            self.led.follow(PlayerState::Stopped);
        }
        Ok(())
    }

    async fn handle_tick(
        &mut self,
        book_id: Option<BookId>,
        track: u32,
        position_secs: f64,
    ) -> Result<()> {
        let Some(record) = self
            .tracker
            .on_tick(&self.session, book_id.as_ref(), track, position_secs)
        else {
            return Ok(());
        };

        self.progress.upsert(&record).await?;
        self.session.track = track;
        self.session.position_secs = position_secs;
        Ok(())
    }

    /// Best-effort save of the current book's position
    async fn flush_progress(&mut self) {
        if let Some(record) = self.tracker.snapshot(&self.session) {
            match self.progress.upsert(&record).await {
                Ok(()) => debug!(
                    "Saved {} at track {} {:.1}s",
                    record.book_id, record.track, record.position_secs
                ),
                Err(e) => warn!("Could not save progress of {}: {}", record.book_id, e),
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Dispatcher shutting down");

        let flush_timeout = self.settings.shutdown_flush_timeout;
        if tokio::time::timeout(flush_timeout, self.flush_progress())
            .await
            .is_err()
        {
            warn!("Progress flush timed out after {:?}", flush_timeout);
        }

        if let Err(e) = self.backend.stop().await {
            warn!("Error stopping player: {}", e);
        }
        if let Err(e) = self.backend.close().await {
            warn!("Error closing player connection: {}", e);
        }
        self.led.follow(PlayerState::Stopped);
        info!("Dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rewind() {
        assert_eq!(
            plan_rewind(1, 40.0, 20.0, 20.0),
            RewindPlan::Within {
                track: 1,
                position_secs: 20.0
            }
        );
        assert_eq!(
            plan_rewind(0, 25.0, 20.0, 20.0),
            RewindPlan::Within {
                track: 0,
                position_secs: 5.0
            }
        );
        assert_eq!(
            plan_rewind(3, 5.0, 20.0, 20.0),
            RewindPlan::PreviousTrack { track: 2 }
        );
        assert_eq!(plan_rewind(0, 5.0, 20.0, 20.0), RewindPlan::Start);
    }

    #[test]
    fn test_previous_track_position() {
        assert_eq!(previous_track_position(Some(300.0), 20.0), 280.0);
        assert_eq!(previous_track_position(Some(15.0), 20.0), 0.0);
        assert_eq!(previous_track_position(None, 20.0), 0.0);
    }
}
