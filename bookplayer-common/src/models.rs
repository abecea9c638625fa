//! Data model shared by the player and its stores

use crate::events::{BookId, ButtonAction, CardId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A book from the catalog
///
/// Loaded once at startup and read-only for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub card_id: CardId,
    /// Backend path of the book's audio (a directory of parts for MPD)
    pub audio_path: String,
}

/// Last known playback position of a book
///
/// One record per book. The record exists only while the book has
/// unfinished progress; finishing the book deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub book_id: BookId,
    /// Zero-based playlist index of the part being played
    pub track: u32,
    /// Elapsed seconds within `track`
    pub position_secs: f64,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(book_id: BookId, track: u32, position_secs: f64) -> Self {
        Self {
            book_id,
            track,
            position_secs: position_secs.max(0.0),
            updated_at: Utc::now(),
        }
    }
}

/// Static configuration of one physical button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonBinding {
    /// GPIO line offset
    pub pin: u32,
    pub action: ButtonAction,
    /// Minimum interval between accepted presses on this pin
    #[serde(default = "default_debounce_ms", alias = "bounce_time")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    1000
}

impl ButtonBinding {
    /// Reference appliance wiring
    ///
    /// rewind on 9, play/pause on 11, volume down on 22, volume up on 10.
    pub fn defaults() -> Vec<ButtonBinding> {
        vec![
            ButtonBinding {
                pin: 9,
                action: ButtonAction::Rewind,
                debounce_ms: 2000,
            },
            ButtonBinding {
                pin: 11,
                action: ButtonAction::TogglePause,
                debounce_ms: 2000,
            },
            ButtonBinding {
                pin: 22,
                action: ButtonAction::VolumeDown,
                debounce_ms: 1000,
            },
            ButtonBinding {
                pin: 10,
                action: ButtonAction::VolumeUp,
                debounce_ms: 1000,
            },
        ]
    }
}
