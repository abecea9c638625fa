//! Status LED
//!
//! The dispatcher selects a pattern through [`LedController`]; a separate
//! ticker task renders it onto the output pin. Patterns:
//!
//! | Player state | Pattern   | Rendering               |
//! |--------------|-----------|-------------------------|
//! | Stopped      | Off       | low                     |
//! | Playing      | SlowBlink | 500ms high / 500ms low  |
//! | Paused       | Solid     | high                    |
//!
//! Rewind and volume presses overlay a short double blink
//! (100ms high, 100ms low, 100ms high, then low) on whatever pattern is
//! selected, for the configured overlay duration.

use crate::hardware::PinInterface;
use bookplayer_common::PlayerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SLOW_BLINK_HALF_PERIOD_MS: u128 = 500;
const DOUBLE_BLINK_STEP_MS: u128 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Off,
    Solid,
    SlowBlink,
}

impl LedPattern {
    pub fn for_state(state: PlayerState) -> Self {
        match state {
            PlayerState::Stopped => LedPattern::Off,
            PlayerState::Playing => LedPattern::SlowBlink,
            PlayerState::Paused => LedPattern::Solid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Overlay {
    start: Instant,
    until: Instant,
}

/// Pattern selection shared with the ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedState {
    pub pattern: LedPattern,
    /// When the pattern was selected; blink phase is measured from here
    since: Instant,
    overlay: Option<Overlay>,
}

impl LedState {
    pub fn new(pattern: LedPattern, now: Instant) -> Self {
        Self {
            pattern,
            since: now,
            overlay: None,
        }
    }

    /// Whether an acknowledgement blink is showing at `now`
    pub fn overlay_active(&self, now: Instant) -> bool {
        self.overlay.is_some_and(|o| now < o.until)
    }

    /// Output level at `now`
    pub fn level_at(&self, now: Instant) -> bool {
        if let Some(overlay) = self.overlay.filter(|o| now < o.until) {
            let step = now.saturating_duration_since(overlay.start).as_millis() / DOUBLE_BLINK_STEP_MS;
            return step == 0 || step == 2;
        }

        match self.pattern {
            LedPattern::Off => false,
            LedPattern::Solid => true,
            LedPattern::SlowBlink => {
                let elapsed = now.saturating_duration_since(self.since).as_millis();
                (elapsed / SLOW_BLINK_HALF_PERIOD_MS) % 2 == 0
            }
        }
    }
}

/// Dispatcher side of the LED
#[derive(Debug)]
pub struct LedController {
    tx: watch::Sender<LedState>,
    overlay_duration: Duration,
}

impl LedController {
    pub fn new(overlay_duration: Duration) -> Self {
        let (tx, _rx) = watch::channel(LedState::new(LedPattern::Off, Instant::now()));
        Self {
            tx,
            overlay_duration,
        }
    }

    /// Receiver for the ticker task
    pub fn subscribe(&self) -> watch::Receiver<LedState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> LedState {
        *self.tx.borrow()
    }

    /// Select the pattern for `state`
    ///
    /// Re-selecting the current pattern keeps its blink phase.
    pub fn follow(&self, state: PlayerState) {
        let pattern = LedPattern::for_state(state);
        self.tx.send_if_modified(|led| {
            if led.pattern == pattern {
                return false;
            }
            debug!("LED pattern {:?} -> {:?}", led.pattern, pattern);
            led.pattern = pattern;
            led.since = Instant::now();
            true
        });
    }

    /// Show the acknowledgement double blink
    pub fn acknowledge(&self) {
        let now = Instant::now();
        let until = now + self.overlay_duration;
        self.tx.send_modify(|led| led.overlay = Some(Overlay { start: now, until }));
    }
}

/// Render the selected pattern onto `pin` until shutdown
///
/// The pin is only written when the level changes. On shutdown the LED is
/// driven low.
pub async fn run_led_ticker(
    pins: Arc<dyn PinInterface>,
    pin: u32,
    state: watch::Receiver<LedState>,
    tick: Duration,
    shutdown: CancellationToken,
) {
    info!("LED ticker started on pin {}", pin);

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<bool> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let level = state.borrow().level_at(Instant::now());
        if last != Some(level) {
            match pins.set_output(pin, level) {
                Ok(()) => last = Some(level),
                Err(e) => warn!("LED write failed: {}", e),
            }
        }
    }

    if let Err(e) = pins.set_output(pin, false) {
        warn!("Failed to switch LED off: {}", e);
    }
    info!("LED ticker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MemoryPins;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_pattern_for_state() {
        assert_eq!(LedPattern::for_state(PlayerState::Stopped), LedPattern::Off);
        assert_eq!(LedPattern::for_state(PlayerState::Playing), LedPattern::SlowBlink);
        assert_eq!(LedPattern::for_state(PlayerState::Paused), LedPattern::Solid);
    }

    #[test]
    fn test_slow_blink_levels() {
        let t = Instant::now();
        let led = LedState::new(LedPattern::SlowBlink, t);
        assert!(led.level_at(at(t, 0)));
        assert!(led.level_at(at(t, 499)));
        assert!(!led.level_at(at(t, 500)));
        assert!(led.level_at(at(t, 1000)));
    }

    #[test]
    fn test_double_blink_overlay() {
        let t = Instant::now();
        let mut led = LedState::new(LedPattern::Solid, t);
        led.overlay = Some(Overlay {
            start: t,
            until: at(t, 600),
        });

        let levels: Vec<bool> = [0, 150, 250, 350, 550]
            .iter()
            .map(|ms| led.level_at(at(t, *ms)))
            .collect();
        assert_eq!(levels, vec![true, false, true, false, false]);

        // Overlay over: back to the underlying pattern
        assert!(!led.overlay_active(at(t, 600)));
        assert!(led.level_at(at(t, 600)));
    }

    #[tokio::test]
    async fn test_follow_keeps_phase_for_same_pattern() {
        let led = LedController::new(Duration::from_millis(600));
        led.follow(PlayerState::Playing);
        let first = led.current();
        led.follow(PlayerState::Playing);
        assert_eq!(led.current(), first);

        led.follow(PlayerState::Paused);
        assert_eq!(led.current().pattern, LedPattern::Solid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_writes_changes_only_and_ends_low() {
        let pins = Arc::new(MemoryPins::new());
        let led = LedController::new(Duration::from_millis(600));
        led.follow(PlayerState::Paused);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_led_ticker(
            pins.clone(),
            23,
            led.subscribe(),
            Duration::from_millis(50),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pins.output_history(), vec![(23, true)]);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(pins.output_level(23), Some(false));
    }
}
