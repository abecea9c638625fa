//! End-to-end tests of the application runner
//!
//! Run the full task set (producers, bus, dispatcher, LED ticker) on in-memory
//! hardware with tokio's paused clock, then shut down and inspect the result.

mod helpers;

use bookplayer::app::{self, Hardware};
use bookplayer::bus::{Delivery, EventBus};
use bookplayer::config::{Config, ConfigOverrides};
use bookplayer::db::MemoryProgressStore;
use bookplayer::hardware::{
    BackendCommand, EdgeKind, MemoryCardReader, MemoryPins, PlaybackStatus, ScriptedRead,
};
use bookplayer::producers::ButtonProducer;
use bookplayer_common::{BookId, ButtonAction, ButtonBinding, CardId, Event, PlayerState};
use helpers::{backend, catalog, CARD_A};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn test_config() -> Config {
    let settings = Config::parse(
        r#"
        [led]
        pin = 23

        [[buttons]]
        pin = 11
        action = "togglePause"
        debounce_ms = 200

        [[buttons]]
        pin = 10
        action = "volumeUp"
        debounce_ms = 200
        "#,
    )
    .unwrap();
    Config::from_settings(settings, None, ConfigOverrides::default())
}

#[tokio::test(start_paused = true)]
async fn test_card_scan_plays_and_shutdown_flushes_progress() {
    let config = test_config();
    let pins = Arc::new(MemoryPins::new());
    let reader = MemoryCardReader::new(vec![
        ScriptedRead::Fault("reader not ready".into()),
        ScriptedRead::Card(CardId::new(CARD_A)),
        ScriptedRead::Card(CardId::new(CARD_A)),
    ]);
    let backend = backend();
    let progress = MemoryProgressStore::new();
    let shutdown = CancellationToken::new();

    let hardware = Hardware {
        pins: pins.clone(),
        card_reader: Box::new(reader.clone()),
        command_backend: Box::new(backend.clone()),
        status_backend: Box::new(backend.clone()),
    };
    let run = tokio::spawn({
        let config = config.clone();
        let progress = Arc::new(progress.clone());
        let shutdown = shutdown.clone();
        async move { app::run(&config, hardware, Arc::new(catalog()), progress, shutdown).await }
    });

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(backend.current_status().state, PlayerState::Playing);
    assert_eq!(pins.output_level(17), Some(true));

    // Player moves on by itself; the poller reports it
    backend.set_status(PlaybackStatus {
        state: PlayerState::Playing,
        position_secs: 42.0,
        track: Some(1),
        track_count: 3,
        duration_secs: Some(300.0),
        volume: Some(100),
    });
    tokio::time::sleep(Duration::from_secs(2)).await;

    shutdown.cancel();
    let session = run.await.unwrap().unwrap();

    assert_eq!(session.current_book_id(), Some(&BookId::new("book-a")));
    assert_eq!((session.track, session.position_secs), (1, 42.0));
    let saved = progress.snapshot(&BookId::new("book-a")).unwrap();
    assert_eq!((saved.track, saved.position_secs), (1, 42.0));

    // Card left on the reader loaded the book exactly once
    let loads = backend
        .commands()
        .into_iter()
        .filter(|c| matches!(c, BackendCommand::Load(_)))
        .count();
    assert_eq!(loads, 1);

    // Shutdown stops the player and leaves both LEDs dark
    assert_eq!(backend.current_status().state, PlayerState::Stopped);
    assert_eq!(pins.output_level(23), Some(false));
    assert_eq!(pins.output_level(17), Some(false));
    assert!(reader.read_count() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_button_press_reaches_backend() {
    let config = test_config();
    let pins = Arc::new(MemoryPins::new());
    let backend = backend();
    let shutdown = CancellationToken::new();

    let hardware = Hardware {
        pins: pins.clone(),
        card_reader: Box::new(MemoryCardReader::default()),
        command_backend: Box::new(backend.clone()),
        status_backend: Box::new(backend.clone()),
    };
    let run = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            app::run(
                &config,
                hardware,
                Arc::new(catalog()),
                Arc::new(MemoryProgressStore::new()),
                shutdown,
            )
            .await
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pins.subscribed_pins(), vec![10, 11]);

    // Startup sets the initial volume; a press from 100 stays at 100
    assert_eq!(backend.current_status().volume, Some(100));
    assert!(pins.inject(10, EdgeKind::Pressed, Instant::now()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown.cancel();
    let session = run.await.unwrap().unwrap();
    assert_eq!(session.volume_percent, 100);
    assert_eq!(
        backend
            .commands()
            .iter()
            .filter(|c| matches!(c, BackendCommand::SetVolume(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_bouncing_button_publishes_once() {
    let shutdown = CancellationToken::new();
    let mut bus = EventBus::new(2, shutdown.clone());
    let pins = MemoryPins::new();
    let bindings = vec![
        ButtonBinding {
            pin: 11,
            action: ButtonAction::TogglePause,
            debounce_ms: 500,
        },
        ButtonBinding {
            pin: 9,
            action: ButtonAction::Rewind,
            debounce_ms: 500,
        },
    ];
    let producer = ButtonProducer::subscribe(&pins, &bindings).unwrap();
    let task = tokio::spawn(producer.run(bus.sender(), shutdown.clone()));

    let t = Instant::now();
    for offset in [0u64, 3, 8, 15, 40] {
        let at = t + Duration::from_millis(offset);
        pins.inject(11, EdgeKind::Pressed, at);
        pins.inject(11, EdgeKind::Released, at + Duration::from_millis(1));
    }
    // A deliberate second press well after the bounce window
    pins.inject(11, EdgeKind::Pressed, t + Duration::from_millis(900));

    let toggle = Delivery::Event(Event::ButtonPressed {
        pin: 11,
        action: ButtonAction::TogglePause,
    });
    assert_eq!(bus.consume().await, toggle);
    assert_eq!(bus.consume().await, toggle);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), bus.consume())
            .await
            .is_err()
    );

    pins.inject(9, EdgeKind::Pressed, t);
    assert_eq!(
        bus.consume().await,
        Delivery::Event(Event::ButtonPressed {
            pin: 9,
            action: ButtonAction::Rewind
        })
    );

    shutdown.cancel();
    assert_eq!(bus.consume().await, Delivery::Shutdown);
    task.await.unwrap();
}

#[tokio::test]
async fn test_unwatchable_pin_fails_startup_and_releases() {
    use bookplayer::hardware::{EdgeStream, PinInterface};
    use bookplayer_common::{Error, Result};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct BrokenPins {
        released: AtomicBool,
    }

    impl PinInterface for BrokenPins {
        fn subscribe_edges(&self, pin: u32) -> Result<EdgeStream> {
            Err(Error::HardwareTransient(format!("line {} busy", pin)))
        }
        fn set_output(&self, _pin: u32, _level: bool) -> Result<()> {
            Ok(())
        }
        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    let pins = Arc::new(BrokenPins::default());
    let backend = backend();
    let hardware = Hardware {
        pins: pins.clone(),
        card_reader: Box::new(MemoryCardReader::default()),
        command_backend: Box::new(backend.clone()),
        status_backend: Box::new(backend),
    };

    let result = app::run(
        &test_config(),
        hardware,
        Arc::new(catalog()),
        Arc::new(MemoryProgressStore::new()),
        CancellationToken::new(),
    )
    .await;

    assert!(result.is_err());
    assert!(pins.released.load(Ordering::SeqCst));
}
