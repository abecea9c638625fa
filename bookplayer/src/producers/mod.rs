//! Event producers
//!
//! One task per hardware source, each publishing onto the event bus:
//! - buttons: interrupt driven edge streams, debounced per pin
//! - card reader: bounded reads with placement deduplication
//! - status poller: periodic backend status

pub mod backoff;
pub mod buttons;
pub mod card;
pub mod status;

pub use backoff::Backoff;
pub use buttons::{ButtonProducer, Debouncer};
pub use card::{run_card_producer, CardDeduplicator};
pub use status::{StatusPoller, StatusTracker};
