//! Progress tracker
//!
//! Decides when a position is worth persisting and what record to write:
//! - every progress tick for the current book
//! - a confirmed pause
//! - the outgoing book when another card is scanned, and at shutdown
//!
//! A stop reported by the backend is not persisted: the backend resets the
//! position to zero on stop, which would throw the saved place away.

use crate::session::Session;
use bookplayer_common::{BookId, PlayerState, ProgressRecord};
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct ProgressTracker;

impl ProgressTracker {
    pub fn new() -> Self {
        Self
    }

    /// Record for a tick, or `None` when the tick is stale
    ///
    /// A tick is stale when it was observed for a different book than the
    /// one current when the dispatcher handles it.
    pub fn on_tick(
        &self,
        session: &Session,
        tick_book: Option<&BookId>,
        track: u32,
        position_secs: f64,
    ) -> Option<ProgressRecord> {
        let current = session.current_book_id()?;
        if tick_book != Some(current) {
            debug!("Discarding stale progress tick for {:?}", tick_book);
            return None;
        }
        Some(ProgressRecord::new(current.clone(), track, position_secs))
    }

    /// Record to write after a confirmed state change, if any
    pub fn on_state_changed(&self, session: &Session, state: PlayerState) -> Option<ProgressRecord> {
        match state {
            PlayerState::Paused => self.snapshot(session),
            PlayerState::Playing | PlayerState::Stopped => None,
        }
    }

    /// Current position of the session's book
    pub fn snapshot(&self, session: &Session) -> Option<ProgressRecord> {
        session
            .current_book_id()
            .map(|id| ProgressRecord::new(id.clone(), session.track, session.position_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookplayer_common::{Book, CardId};

    fn session_with(book: &str) -> Session {
        let mut session = Session::new(100);
        session.start_book(
            Book {
                id: BookId::new(book),
                title: book.to_string(),
                card_id: CardId::new("1"),
                audio_path: book.to_string(),
            },
            1,
            42.0,
        );
        session
    }

    #[test]
    fn test_tick_for_current_book() {
        let tracker = ProgressTracker::new();
        let session = session_with("a");
        let record = tracker
            .on_tick(&session, Some(&BookId::new("a")), 2, 10.0)
            .unwrap();
        assert_eq!(record.book_id, BookId::new("a"));
        assert_eq!(record.track, 2);
        assert_eq!(record.position_secs, 10.0);
    }

    #[test]
    fn test_stale_ticks_discarded() {
        let tracker = ProgressTracker::new();
        let session = session_with("b");
        assert!(tracker.on_tick(&session, Some(&BookId::new("a")), 0, 1.0).is_none());
        assert!(tracker.on_tick(&session, None, 0, 1.0).is_none());
        assert!(tracker
            .on_tick(&Session::new(100), Some(&BookId::new("a")), 0, 1.0)
            .is_none());
    }

    #[test]
    fn test_pause_persists_stop_does_not() {
        let tracker = ProgressTracker::new();
        let session = session_with("a");
        let record = tracker.on_state_changed(&session, PlayerState::Paused).unwrap();
        assert_eq!((record.track, record.position_secs), (1, 42.0));
        assert!(tracker.on_state_changed(&session, PlayerState::Stopped).is_none());
    }
}
