//! # Book Player Common Library
//!
//! Shared code for the RFID audiobook player:
//! - Event types carried on the event bus
//! - Data model (books, progress records, button bindings)
//! - Error taxonomy
//! - Config file discovery
//! - Progress database initialization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
pub use events::{BookId, ButtonAction, CardId, Event, PlayerState};
pub use models::{Book, ButtonBinding, ProgressRecord};
