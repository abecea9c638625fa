//! Test helpers for book player integration tests
//!
//! Provides a dispatcher wired to in-memory collaborators:
//! - two books, "book-a" (card A1, three 300s tracks) and "book-b"
//!   (card B2, a 15s track then a 600s track)
//! - a [`MemoryBackend`] shared with the test for scripting and inspection
//! - a [`MemoryProgressStore`] shared with the test

#![allow(dead_code)]

use bookplayer::catalog::BookCatalog;
use bookplayer::dispatcher::{Dispatcher, DispatcherSettings};
use bookplayer::hardware::MemoryBackend;
use bookplayer::db::MemoryProgressStore;
use bookplayer_common::{Book, BookId, CardId, Event, ProgressRecord};
use std::sync::Arc;

pub const CARD_A: &str = "1001";
pub const CARD_B: &str = "2002";

pub fn book(id: &str, card: &str) -> Book {
    Book {
        id: BookId::new(id),
        title: format!("Title of {}", id),
        card_id: CardId::new(card),
        audio_path: id.to_string(),
    }
}

pub fn catalog() -> BookCatalog {
    BookCatalog::from_books(vec![book("book-a", CARD_A), book("book-b", CARD_B)])
}

pub fn backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.add_book("book-a", &[300.0, 300.0, 300.0]);
    backend.add_book("book-b", &[15.0, 600.0]);
    backend
}

pub fn scan(card: &str) -> Event {
    Event::CardScanned {
        card_id: CardId::new(card),
    }
}

pub struct Fixture {
    pub dispatcher: Dispatcher,
    pub backend: MemoryBackend,
    pub progress: MemoryProgressStore,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(DispatcherSettings::default())
    }

    pub fn with_settings(settings: DispatcherSettings) -> Self {
        let backend = backend();
        let progress = MemoryProgressStore::new();
        let dispatcher = Dispatcher::new(
            Box::new(backend.clone()),
            Arc::new(catalog()),
            Arc::new(progress.clone()),
            settings,
        );
        Self {
            dispatcher,
            backend,
            progress,
        }
    }

    /// Store a saved position for `book`
    pub async fn save(&self, book: &str, track: u32, position_secs: f64) {
        use bookplayer::db::ProgressStore;
        self.progress
            .upsert(&ProgressRecord::new(BookId::new(book), track, position_secs))
            .await
            .unwrap();
    }

    pub async fn handle(&mut self, event: Event) {
        self.dispatcher.handle(event).await;
    }
}
