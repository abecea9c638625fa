//! Application runner
//!
//! Wires the producers, the event bus, the dispatcher and the LED ticker
//! together, runs them until the shutdown token is cancelled, and tears them
//! down in order:
//! 1. the bus reports shutdown and the dispatcher flushes progress, stops and
//!    closes its backend connection
//! 2. the producer tasks observe the token and return
//! 3. the online LED goes dark and the pins are released

use crate::bus::EventBus;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::db::ProgressStore;
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::hardware::{CardReader, PinInterface, PlaybackBackend};
use crate::led::run_led_ticker;
use crate::producers::{run_card_producer, Backoff, ButtonProducer, StatusPoller};
use crate::session::Session;
use bookplayer_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Hardware collaborators of one player instance
pub struct Hardware {
    pub pins: Arc<dyn PinInterface>,
    pub card_reader: Box<dyn CardReader>,
    /// Connection used by the dispatcher for commands
    pub command_backend: Box<dyn PlaybackBackend>,
    /// Separate connection used by the status poller
    pub status_backend: Box<dyn PlaybackBackend>,
}

/// Run the player until `shutdown` is cancelled
///
/// Returns the final session. Fails only when startup cannot complete (a
/// button pin that cannot be watched) or the dispatcher task panics.
pub async fn run(
    config: &Config,
    hardware: Hardware,
    catalog: Arc<dyn CatalogStore>,
    progress: Arc<dyn ProgressStore>,
    shutdown: CancellationToken,
) -> Result<Session> {
    let settings = &config.settings;
    let pins = hardware.pins;

    let buttons = match ButtonProducer::subscribe(pins.as_ref(), &settings.buttons) {
        Ok(buttons) => buttons,
        Err(e) => {
            pins.release();
            return Err(e);
        }
    };

    if settings.led.online_indicator {
        match pins.set_output(settings.led.online_pin, true) {
            Ok(()) => info!("Online LED on (pin {})", settings.led.online_pin),
            Err(e) => warn!("Could not light online LED: {}", e),
        }
    }

    let bus = EventBus::new(settings.playback.max_pending_ticks, shutdown.clone());
    let mut dispatcher = Dispatcher::new(
        hardware.command_backend,
        catalog,
        progress,
        DispatcherSettings::from(config),
    );
    dispatcher.startup().await;

    let reader_backoff = Backoff::new(
        Duration::from_millis(settings.card_reader.backoff_initial_ms),
        Duration::from_millis(settings.card_reader.backoff_max_ms),
    );
    let status_backoff = Backoff::new(config.poll_interval(), Duration::from_secs(30));

    let card_task = tokio::spawn(run_card_producer(
        hardware.card_reader,
        bus.sender(),
        config.read_timeout(),
        reader_backoff,
        shutdown.clone(),
    ));
    let status_task = tokio::spawn(
        StatusPoller::new(
            hardware.status_backend,
            dispatcher.assigned_book(),
            config.poll_interval(),
            settings.status.finish_threshold_secs,
            status_backoff,
        )
        .run(bus.sender(), shutdown.clone()),
    );
    let led_task = tokio::spawn(run_led_ticker(
        pins.clone(),
        settings.led.pin,
        dispatcher.led_state(),
        config.led_tick(),
        shutdown.clone(),
    ));
    let button_task = tokio::spawn(buttons.run(bus.sender(), shutdown.clone()));

    let producers: Vec<(&'static str, JoinHandle<()>)> = vec![
        ("buttons", button_task),
        ("card reader", card_task),
        ("status poller", status_task),
        ("led", led_task),
    ];

    info!("Player running");
    let dispatcher_result = tokio::spawn(dispatcher.run(bus)).await;

    // The dispatcher only returns on shutdown; make sure producers see it too
    shutdown.cancel();
    for (name, handle) in producers {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }
    if settings.led.online_indicator {
        if let Err(e) = pins.set_output(settings.led.online_pin, false) {
            warn!("Could not switch off online LED: {}", e);
        }
    }
    pins.release();
    info!("All tasks stopped");

    dispatcher_result.map_err(|e| Error::Fatal(format!("Dispatcher task failed: {}", e)))
}
