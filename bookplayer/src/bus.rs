//! Event bus connecting the producers to the dispatcher
//!
//! # Architecture
//!
//! - N producers hold cloned [`BusSender`]s, one consumer owns the [`EventBus`]
//! - Single unbounded tokio mpsc queue: FIFO at the bus boundary, so events from
//!   one producer arrive in publish order
//! - `publish` never blocks; button and card producers cannot be stalled by a
//!   slow dispatcher
//! - Progress ticks are the only lossy class: at most `max_pending_ticks` may
//!   wait in the queue, further ticks are dropped and counted
//! - Shutdown is observed through a [`CancellationToken`]; `consume` then returns
//!   [`Delivery::Shutdown`] instead of blocking forever

use bookplayer_common::Event;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of waiting on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Event),
    /// Shutdown was requested (or every sender is gone)
    Shutdown,
}

#[derive(Debug)]
struct TickAccounting {
    /// Ticks published but not yet consumed
    pending: AtomicUsize,
    max_pending: usize,
    dropped: AtomicU64,
}

/// Producer-side handle, cheap to clone
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::UnboundedSender<Event>,
    ticks: Arc<TickAccounting>,
}

impl BusSender {
    /// Publish an event without blocking
    ///
    /// Returns `false` when the event was not enqueued: a tick dropped under
    /// backpressure, or the dispatcher already gone during shutdown.
    pub fn publish(&self, event: Event) -> bool {
        if event.is_lossy() {
            let pending = self.ticks.pending.fetch_add(1, Ordering::AcqRel);
            if pending >= self.ticks.max_pending {
                self.ticks.pending.fetch_sub(1, Ordering::AcqRel);
                self.ticks.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped progress tick ({} pending)", pending);
                return false;
            }
        }

        let lossy = event.is_lossy();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                if lossy {
                    self.ticks.pending.fetch_sub(1, Ordering::AcqRel);
                } else {
                    warn!("Event bus closed, discarding {}", event.kind());
                }
                false
            }
        }
    }
}

/// Consumer side of the event bus
#[derive(Debug)]
pub struct EventBus {
    rx: mpsc::UnboundedReceiver<Event>,
    sender: BusSender,
    shutdown: CancellationToken,
}

impl EventBus {
    /// Create a bus that stops delivering once `shutdown` is cancelled
    ///
    /// # Arguments
    ///
    /// * `max_pending_ticks` - progress ticks allowed in the queue at once
    ///   (at least 1)
    pub fn new(max_pending_ticks: usize, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let ticks = Arc::new(TickAccounting {
            pending: AtomicUsize::new(0),
            max_pending: max_pending_ticks.max(1),
            dropped: AtomicU64::new(0),
        });
        Self {
            rx,
            sender: BusSender { tx, ticks },
            shutdown,
        }
    }

    /// New producer handle
    pub fn sender(&self) -> BusSender {
        self.sender.clone()
    }

    /// Wait for the next event or shutdown
    ///
    /// Shutdown wins over queued events: once the token is cancelled the
    /// dispatcher stops handling input and flushes.
    pub async fn consume(&mut self) -> Delivery {
        let event = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Delivery::Shutdown,
            event = self.rx.recv() => event,
        };

        match event {
            Some(event) => {
                if event.is_lossy() {
                    self.sender.ticks.pending.fetch_sub(1, Ordering::AcqRel);
                }
                Delivery::Event(event)
            }
            // Unreachable while the bus holds its own sender; kept for clarity
            None => Delivery::Shutdown,
        }
    }

    /// Number of progress ticks dropped under backpressure so far
    pub fn dropped_ticks(&self) -> u64 {
        self.sender.ticks.dropped.load(Ordering::Relaxed)
    }

    /// Number of progress ticks currently queued
    pub fn pending_ticks(&self) -> usize {
        self.sender.ticks.pending.load(Ordering::Acquire)
    }
}
