//! Hardware adapters
//!
//! Each collaborator sits behind a narrow trait with a real adapter and an
//! in-memory substitute:
//! - [`PinInterface`]: Linux GPIO character device / [`MemoryPins`]
//! - [`CardReader`]: serial RFID reader / [`MemoryCardReader`]
//! - [`PlaybackBackend`]: Music Player Daemon / [`MemoryBackend`]

pub mod backend;
pub mod card_reader;
#[cfg(target_os = "linux")]
pub mod gpio;
pub mod mpd;
pub mod pins;
pub mod serial_reader;

pub use backend::{BackendCommand, MemoryBackend, PlaybackBackend, PlaybackStatus};
pub use card_reader::{CardReader, MemoryCardReader, ScriptedRead};
#[cfg(target_os = "linux")]
pub use gpio::GpioCdevPins;
pub use mpd::MpdBackend;
pub use pins::{EdgeKind, EdgeStream, MemoryPins, PinEdge, PinInterface};
pub use serial_reader::SerialCardReader;
