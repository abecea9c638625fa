//! Event types for the book player event system
//!
//! Every hardware condition the appliance reacts to is converted by a producer
//! into one [`Event`] and published on the event bus. The dispatcher matches on
//! the closed enum exhaustively; there is no open-ended handler registry.
//!
//! Events carry value data only (identifiers, positions, pin numbers), never
//! handles to hardware, so they can cross task boundaries freely.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a book in the catalog
///
/// For the MPD backend this is also the default music-directory path of the
/// book's audio files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub String);

impl BookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of an RFID card
///
/// Book lists store the card UID as a decimal integer, so readers normalise
/// raw UID bytes through [`CardId::from_uid`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub String);

impl CardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    /// Render a tag UID as the decimal value of its big-endian bytes
    ///
    /// UIDs longer than 16 bytes do not fit the decimal form and are rendered
    /// as upper-case hex instead.
    pub fn from_uid(uid: &[u8]) -> Self {
        if uid.len() <= 16 {
            let value = uid.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b));
            Self(value.to_string())
        } else {
            Self(uid.iter().map(|b| format!("{:02X}", b)).collect())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Player state as reported by the playback backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerState::Stopped => write!(f, "stopped"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Paused => write!(f, "paused"),
        }
    }
}

/// Action bound to a physical button
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ButtonAction {
    #[serde(alias = "toggle_pause")]
    TogglePause,
    Rewind,
    #[serde(alias = "volume_up")]
    VolumeUp,
    #[serde(alias = "volume_down")]
    VolumeDown,
}

impl fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonAction::TogglePause => write!(f, "togglePause"),
            ButtonAction::Rewind => write!(f, "rewind"),
            ButtonAction::VolumeUp => write!(f, "volumeUp"),
            ButtonAction::VolumeDown => write!(f, "volumeDown"),
        }
    }
}

/// Application events carried on the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A debounced button press
    ButtonPressed {
        /// GPIO line offset of the button
        pin: u32,
        /// Action configured for the pin
        action: ButtonAction,
    },

    /// A card was placed on the reader
    ///
    /// Emitted once per placement; a card left on the reader does not repeat.
    CardScanned { card_id: CardId },

    /// The backend reported a different player state than on the previous poll
    PlayerStateChanged {
        state: PlayerState,
        /// Elapsed seconds within the current track
        position_secs: f64,
        /// Playlist index of the current track, if any
        track: Option<u32>,
    },

    /// The last track of the assigned book played to its end
    BookFinished { book_id: BookId },

    /// Periodic position report while playing
    ///
    /// Lowest priority class: the bus may drop ticks under backpressure since
    /// each tick supersedes the previous one.
    ProgressTick {
        /// Book assigned when the tick was observed
        book_id: Option<BookId>,
        track: u32,
        position_secs: f64,
    },
}

impl Event {
    /// Short variant name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ButtonPressed { .. } => "ButtonPressed",
            Event::CardScanned { .. } => "CardScanned",
            Event::PlayerStateChanged { .. } => "PlayerStateChanged",
            Event::BookFinished { .. } => "BookFinished",
            Event::ProgressTick { .. } => "ProgressTick",
        }
    }

    /// Whether the bus may drop this event under backpressure
    pub fn is_lossy(&self) -> bool {
        matches!(self, Event::ProgressTick { .. })
    }
}
