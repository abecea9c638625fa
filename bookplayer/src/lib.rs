//! # Book Player Library (bookplayer)
//!
//! Event coordination and playback-state engine of the RFID audiobook player.
//!
//! **Purpose:** Turn button edges, card scans and player status into an
//! ordered stream of events, and keep playback, saved progress and the status
//! LED consistent while handling them.
//!
//! **Architecture:** Producer tasks publish onto a single event bus; one
//! dispatcher consumes it and owns the session. Hardware and storage sit
//! behind traits with real adapters (GPIO character device, serial RFID
//! reader, MPD, CSV book list, SQLite) and in-memory substitutes.

pub mod app;
pub mod bus;
pub mod catalog;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod hardware;
pub mod led;
pub mod producers;
pub mod progress;
pub mod session;

pub use bookplayer_common::{Error, Result};
pub use bus::{BusSender, Delivery, EventBus};
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use session::Session;
