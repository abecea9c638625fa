//! Card producer
//!
//! Reads the card reader in bounded slices and publishes `CardScanned` once
//! per placement. A card left on the reader keeps being read back, so an id
//! is only published when the previous read was empty or a different card.

use super::backoff::Backoff;
use crate::bus::BusSender;
use crate::hardware::CardReader;
use bookplayer_common::{CardId, Event};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Placement tracking for the card on the reader
#[derive(Debug, Default)]
pub struct CardDeduplicator {
    last: Option<CardId>,
}

impl CardDeduplicator {
    /// Feed the outcome of a successful read; returns the id to publish, if any
    pub fn on_read(&mut self, read: Option<CardId>) -> Option<CardId> {
        let fresh = match (&read, &self.last) {
            (Some(id), Some(last)) => id != last,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let publish = if fresh { read.clone() } else { None };
        self.last = read;
        publish
    }
}

/// Run the card producer until shutdown
///
/// Read errors never end the loop: they are logged and retried with
/// exponential backoff.
pub async fn run_card_producer(
    mut reader: Box<dyn CardReader>,
    bus: BusSender,
    read_timeout: Duration,
    mut backoff: Backoff,
    shutdown: CancellationToken,
) {
    info!("Card producer started");
    let mut dedup = CardDeduplicator::default();

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read_once(read_timeout) => read,
        };

        match read {
            Ok(card) => {
                backoff.reset();
                if let Some(card_id) = dedup.on_read(card) {
                    info!("Card scanned: {}", card_id);
                    bus.publish(Event::CardScanned { card_id });
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                if e.is_transient() {
                    debug!("Card read failed: {} (retry in {:?})", e, delay);
                } else {
                    warn!("Card read failed: {} (retry in {:?})", e, delay);
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    info!("Card producer stopped");
}
