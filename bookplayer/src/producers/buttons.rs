//! Button producer
//!
//! Merges the edge streams of every configured pin and publishes one
//! `ButtonPressed` per accepted press. The pin interface wakes the task on
//! each edge; nothing is polled.

use crate::bus::BusSender;
use crate::hardware::{EdgeKind, PinEdge, PinInterface};
use bookplayer_common::{ButtonBinding, Event, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-pin press filter
///
/// A press is accepted when the button is not already held and the previous
/// accepted press is older than the debounce window. A release re-arms the
/// button, so holding it down never repeats.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    held: bool,
    last_fire: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            held: false,
            last_fire: None,
        }
    }

    /// Feed one edge; returns `true` when it is an accepted press
    pub fn on_edge(&mut self, kind: EdgeKind, at: Instant) -> bool {
        match kind {
            EdgeKind::Released => {
                self.held = false;
                false
            }
            EdgeKind::Pressed => {
                if self.held {
                    return false;
                }
                let settled = self
                    .last_fire
                    .map_or(true, |last| at.saturating_duration_since(last) >= self.window);
                if settled {
                    self.held = true;
                    self.last_fire = Some(at);
                }
                settled
            }
        }
    }
}

struct Button {
    binding: ButtonBinding,
    debouncer: Debouncer,
}

/// Task turning pin edges into button events
pub struct ButtonProducer {
    buttons: HashMap<u32, Button>,
    edges: stream::SelectAll<crate::hardware::EdgeStream>,
}

impl ButtonProducer {
    /// Subscribe to every bound pin
    ///
    /// Fails if any pin cannot be watched; a button that silently does nothing
    /// is worse than refusing to start.
    pub fn subscribe(pins: &dyn PinInterface, bindings: &[ButtonBinding]) -> Result<Self> {
        let mut buttons = HashMap::new();
        let mut streams = Vec::with_capacity(bindings.len());

        for binding in bindings {
            streams.push(pins.subscribe_edges(binding.pin)?);
            debug!(
                "Button {:?} on pin {} (debounce {}ms)",
                binding.action, binding.pin, binding.debounce_ms
            );
            buttons.insert(
                binding.pin,
                Button {
                    binding: binding.clone(),
                    debouncer: Debouncer::new(Duration::from_millis(binding.debounce_ms)),
                },
            );
        }

        Ok(Self {
            buttons,
            edges: stream::select_all(streams),
        })
    }

    fn on_edge(&mut self, edge: PinEdge) -> Option<Event> {
        let button = self.buttons.get_mut(&edge.pin)?;
        if !button.debouncer.on_edge(edge.kind, edge.at) {
            return None;
        }
        Some(Event::ButtonPressed {
            pin: edge.pin,
            action: button.binding.action,
        })
    }

    /// Run until shutdown or until every edge stream has ended
    pub async fn run(mut self, bus: BusSender, shutdown: CancellationToken) {
        info!("Button producer started ({} buttons)", self.buttons.len());

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.edges.next() => next,
            };

            match next {
                Some(Ok(edge)) => {
                    if let Some(event) = self.on_edge(edge) {
                        debug!("Button press on pin {}", edge.pin);
                        bus.publish(event);
                    }
                }
                Some(Err(e)) => warn!("Button edge error: {}", e),
                None => {
                    info!("All button edge streams closed");
                    break;
                }
            }
        }

        info!("Button producer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    #[test]
    fn test_bounce_within_window_fires_once() {
        let t = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(200));

        assert!(d.on_edge(EdgeKind::Pressed, ms(t, 0)));
        assert!(!d.on_edge(EdgeKind::Released, ms(t, 5)));
        assert!(!d.on_edge(EdgeKind::Pressed, ms(t, 10)));
        assert!(!d.on_edge(EdgeKind::Released, ms(t, 15)));
        assert!(!d.on_edge(EdgeKind::Pressed, ms(t, 150)));
    }

    #[test]
    fn test_press_after_window_fires_again() {
        let t = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(200));

        assert!(d.on_edge(EdgeKind::Pressed, ms(t, 0)));
        d.on_edge(EdgeKind::Released, ms(t, 50));
        assert!(d.on_edge(EdgeKind::Pressed, ms(t, 250)));
    }

    #[test]
    fn test_held_button_does_not_repeat() {
        let t = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(200));

        assert!(d.on_edge(EdgeKind::Pressed, ms(t, 0)));
        // Spurious second falling edge while still held
        assert!(!d.on_edge(EdgeKind::Pressed, ms(t, 5000)));
        d.on_edge(EdgeKind::Released, ms(t, 6000));
        assert!(d.on_edge(EdgeKind::Pressed, ms(t, 6100)));
    }

    #[tokio::test]
    async fn test_pins_are_independent() {
        use bookplayer_common::ButtonAction;
        use crate::hardware::MemoryPins;

        let pins = MemoryPins::new();
        let bindings = vec![
            ButtonBinding {
                pin: 9,
                action: ButtonAction::Rewind,
                debounce_ms: 1000,
            },
            ButtonBinding {
                pin: 10,
                action: ButtonAction::VolumeUp,
                debounce_ms: 1000,
            },
        ];
        let mut producer = ButtonProducer::subscribe(&pins, &bindings).unwrap();
        assert_eq!(pins.subscribed_pins(), vec![9, 10]);

        let t = Instant::now();
        let press = |pin| PinEdge {
            pin,
            kind: EdgeKind::Pressed,
            at: t,
        };
        assert_eq!(
            producer.on_edge(press(9)),
            Some(Event::ButtonPressed {
                pin: 9,
                action: ButtonAction::Rewind
            })
        );
        assert_eq!(
            producer.on_edge(press(10)),
            Some(Event::ButtonPressed {
                pin: 10,
                action: ButtonAction::VolumeUp
            })
        );
        assert_eq!(producer.on_edge(press(11)), None);
    }
}
