//! Pin interface: button edges in, LED level out
//!
//! The button producer consumes an [`EdgeStream`] per configured pin and
//! applies its own per-pin debounce; adapters report every transition they see.

use bookplayer_common::Result;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Logical direction of a button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Pressed,
    Released,
}

/// One transition observed on an input pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEdge {
    pub pin: u32,
    pub kind: EdgeKind,
    pub at: Instant,
}

/// Stream of transitions for one pin
pub type EdgeStream = BoxStream<'static, Result<PinEdge>>;

/// Access to the appliance's GPIO lines
pub trait PinInterface: Send + Sync {
    /// Start watching `pin` for transitions
    ///
    /// The stream ends when the pin interface is released.
    fn subscribe_edges(&self, pin: u32) -> Result<EdgeStream>;

    /// Drive an output pin
    fn set_output(&self, pin: u32, level: bool) -> Result<()>;

    /// Release every requested line
    fn release(&self);
}

/// In-memory pins for tests and dry runs
///
/// Edges are injected with [`MemoryPins::inject`]; output levels are recorded.
#[derive(Debug, Default)]
pub struct MemoryPins {
    inputs: Mutex<HashMap<u32, mpsc::UnboundedSender<Result<PinEdge>>>>,
    outputs: Mutex<Vec<(u32, bool)>>,
}

impl MemoryPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a transition on a subscribed pin
    ///
    /// Returns `false` if nobody is subscribed to the pin.
    pub fn inject(&self, pin: u32, kind: EdgeKind, at: Instant) -> bool {
        let inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
        match inputs.get(&pin) {
            Some(tx) => tx.send(Ok(PinEdge { pin, kind, at })).is_ok(),
            None => false,
        }
    }

    /// Every level written so far, oldest first
    pub fn output_history(&self) -> Vec<(u32, bool)> {
        self.outputs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Last level written to `pin`
    pub fn output_level(&self, pin: u32) -> Option<bool> {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
    }

    pub fn subscribed_pins(&self) -> Vec<u32> {
        let mut pins: Vec<u32> = self
            .inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        pins.sort_unstable();
        pins
    }
}

impl PinInterface for MemoryPins {
    fn subscribe_edges(&self, pin: u32) -> Result<EdgeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pin, tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn set_output(&self, pin: u32, level: bool) -> Result<()> {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pin, level));
        Ok(())
    }

    fn release(&self) {
        self.inputs.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
