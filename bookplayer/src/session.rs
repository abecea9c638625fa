//! Playback session
//!
//! The single mutable record of what the appliance is doing. Owned by the
//! dispatcher; nothing else reads or writes it.

use bookplayer_common::{Book, BookId, PlayerState};
use std::time::Duration;
use tokio::time::Instant;

/// A play/pause toggle issued locally but not yet confirmed by a status poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingToggle {
    pub expected: PlayerState,
    pub issued_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub current_book: Option<Book>,
    pub player_state: PlayerState,
    /// Playlist index of the current part
    pub track: u32,
    /// Elapsed seconds within `track`
    pub position_secs: f64,
    pub volume_percent: u8,
    pub pending_toggle: Option<PendingToggle>,
}

impl Session {
    pub fn new(volume_percent: u8) -> Self {
        Self {
            current_book: None,
            player_state: PlayerState::Stopped,
            track: 0,
            position_secs: 0.0,
            volume_percent: volume_percent.min(100),
            pending_toggle: None,
        }
    }

    pub fn current_book_id(&self) -> Option<&BookId> {
        self.current_book.as_ref().map(|b| &b.id)
    }

    /// Whether a toggle is still waiting for confirmation at `now`
    pub fn toggle_pending(&self, now: Instant, confirm_timeout: Duration) -> bool {
        self.pending_toggle
            .is_some_and(|p| now.saturating_duration_since(p.issued_at) < confirm_timeout)
    }

    /// Commit a newly started book
    pub fn start_book(&mut self, book: Book, track: u32, position_secs: f64) {
        self.current_book = Some(book);
        self.player_state = PlayerState::Playing;
        self.track = track;
        self.position_secs = position_secs;
        self.pending_toggle = None;
    }

    /// Forget the current book after it played to the end
    pub fn finish_book(&mut self) {
        self.current_book = None;
        self.player_state = PlayerState::Stopped;
        self.track = 0;
        self.position_secs = 0.0;
        self.pending_toggle = None;
    }
}
