//! Linux GPIO character device pins
//!
//! Input lines are requested with both-edge event detection and wrapped in
//! tokio-driven streams, so the button producer sleeps until the kernel
//! reports an edge. Output lines are requested lazily on first write.

use super::pins::{EdgeKind, EdgeStream, PinEdge, PinInterface};
use bookplayer_common::{Error, Result};
use futures::StreamExt;
use gpio_cdev::{AsyncLineEventHandle, Chip, EventRequestFlags, EventType, LineHandle, LineRequestFlags};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONSUMER: &str = "bookplayer";

fn gpio_err(e: gpio_cdev::Error) -> Error {
    Error::HardwareTransient(format!("GPIO: {}", e))
}

/// Map a kernel edge to a button transition
fn edge_kind(event: EventType, active_low: bool) -> EdgeKind {
    match (event, active_low) {
        (EventType::FallingEdge, true) | (EventType::RisingEdge, false) => EdgeKind::Pressed,
        (EventType::RisingEdge, true) | (EventType::FallingEdge, false) => EdgeKind::Released,
    }
}

/// Pins backed by `/dev/gpiochipN`
pub struct GpioCdevPins {
    chip: Mutex<Chip>,
    outputs: Mutex<HashMap<u32, LineHandle>>,
    active_low: bool,
    released: CancellationToken,
}

impl std::fmt::Debug for GpioCdevPins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioCdevPins")
            .field("active_low", &self.active_low)
            .finish_non_exhaustive()
    }
}

impl GpioCdevPins {
    /// Open the GPIO chip
    ///
    /// Failure here is fatal: without the chip there are no buttons and no LED.
    pub fn open(chip_path: &Path, active_low: bool) -> Result<Self> {
        let chip = Chip::new(chip_path)
            .map_err(|e| Error::Fatal(format!("Cannot open GPIO chip {:?}: {}", chip_path, e)))?;
        info!("Opened GPIO chip {:?} ({} lines)", chip_path, chip.num_lines());

        Ok(Self {
            chip: Mutex::new(chip),
            outputs: Mutex::new(HashMap::new()),
            active_low,
            released: CancellationToken::new(),
        })
    }
}

impl PinInterface for GpioCdevPins {
    fn subscribe_edges(&self, pin: u32) -> Result<EdgeStream> {
        let line = self
            .chip
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_line(pin)
            .map_err(gpio_err)?;
        let handle = line
            .events(LineRequestFlags::INPUT, EventRequestFlags::BOTH_EDGES, CONSUMER)
            .map_err(gpio_err)?;
        let events = AsyncLineEventHandle::new(handle).map_err(gpio_err)?;
        debug!("Watching GPIO line {} for edges", pin);

        let active_low = self.active_low;
        let stream = events
            .map(move |res| {
                res.map(|event| PinEdge {
                    pin,
                    kind: edge_kind(event.event_type(), active_low),
                    at: Instant::now(),
                })
                .map_err(gpio_err)
            })
            .take_until(self.released.clone().cancelled_owned());

        Ok(Box::pin(stream))
    }

    fn set_output(&self, pin: u32, level: bool) -> Result<()> {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        if !outputs.contains_key(&pin) {
            let line = self
                .chip
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_line(pin)
                .map_err(gpio_err)?;
            let handle = line
                .request(LineRequestFlags::OUTPUT, 0, CONSUMER)
                .map_err(gpio_err)?;
            outputs.insert(pin, handle);
        }

        match outputs.get(&pin) {
            Some(handle) => handle.set_value(u8::from(level)).map_err(gpio_err),
            None => Err(Error::HardwareTransient(format!("GPIO line {} not requested", pin))),
        }
    }

    fn release(&self) {
        self.released.cancel();
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        for (pin, handle) in outputs.drain() {
            // Leave the LED dark when the process exits
            if let Err(e) = handle.set_value(0) {
                warn!("Failed to drive GPIO line {} low on release: {}", pin, e);
            }
            debug!("Released GPIO line {}", pin);
        }
    }
}
