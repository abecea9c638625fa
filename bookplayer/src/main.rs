//! Book Player (bookplayer) - Main entry point
//!
//! RFID audiobook player daemon: scanning a card plays its book from where it
//! was left, buttons control playback, and an LED shows the player state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bookplayer::app::{self, Hardware};
use bookplayer::catalog::BookCatalog;
use bookplayer::config::{Config, ConfigOverrides};
use bookplayer::db::SqliteProgressStore;
use bookplayer::hardware::{MpdBackend, PinInterface, SerialCardReader};
use bookplayer_common::db::init_database;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for bookplayer
#[derive(Parser, Debug)]
#[command(name = "bookplayer")]
#[command(about = "RFID audiobook player")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "BOOKPLAYER_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the progress database
    #[arg(long, env = "BOOKPLAYER_DATABASE")]
    database: Option<PathBuf>,

    /// Path to the book list CSV file
    #[arg(short, long, env = "BOOKPLAYER_BOOKLIST")]
    booklist: Option<PathBuf>,

    /// MPD host
    #[arg(long, env = "BOOKPLAYER_MPD_HOST")]
    mpd_host: Option<String>,

    /// MPD port
    #[arg(long, env = "BOOKPLAYER_MPD_PORT")]
    mpd_port: Option<u16>,

    /// Serial device of the RFID reader
    #[arg(long, env = "BOOKPLAYER_READER_DEVICE")]
    reader_device: Option<PathBuf>,

    /// Log level or filter directives (overridden by RUST_LOG)
    #[arg(long, env = "BOOKPLAYER_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database_path: self.database.clone(),
            booklist_path: self.booklist.clone(),
            mpd_host: self.mpd_host.clone(),
            mpd_port: self.mpd_port,
            reader_device: self.reader_device.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

/// Bare levels apply to the player crates only; anything else is used as-is
fn log_filter(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("bookplayer={0},bookplayer_common={0}", level)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let config = Config::load(args.config.as_deref(), args.overrides())
        .await
        .context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter(&config.settings.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting bookplayer v{} (git {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );
    match &config.source {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }
    info!("Progress database: {}", config.database_path.display());

    let pool = init_database(&config.database_path)
        .await
        .context("Failed to open progress database")?;
    let progress = Arc::new(SqliteProgressStore::new(pool));

    let catalog = match BookCatalog::load_csv(&config.settings.booklist_path) {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("{}; no card will resolve to a book", e);
            BookCatalog::default()
        }
    };

    let pins = open_pins(&config)?;
    let reader = &config.settings.card_reader;
    info!(
        "RFID reader on {} at {} baud",
        reader.device.display(),
        reader.baud_rate
    );
    let card_reader = SerialCardReader::new(&reader.device, reader.baud_rate);

    let mpd = &config.settings.mpd;
    info!("MPD at {}:{}", mpd.host, mpd.port);
    let hardware = Hardware {
        pins,
        card_reader: Box::new(card_reader),
        command_backend: Box::new(MpdBackend::new(
            &mpd.host,
            mpd.port,
            config.mpd_command_timeout(),
        )),
        status_backend: Box::new(MpdBackend::new(
            &mpd.host,
            mpd.port,
            config.mpd_command_timeout(),
        )),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let session = app::run(&config, hardware, Arc::new(catalog), progress, shutdown)
        .await
        .context("Player failed")?;

    if let Some(book) = &session.current_book {
        info!(
            "Last book: {} at track {} {:.1}s",
            book.title, session.track, session.position_secs
        );
    }
    info!("Shutdown complete");
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_pins(config: &Config) -> Result<Arc<dyn PinInterface>> {
    let gpio = &config.settings.gpio;
    let pins = bookplayer::hardware::GpioCdevPins::open(&gpio.chip, gpio.active_low)
        .context("Failed to open GPIO")?;
    Ok(Arc::new(pins))
}

#[cfg(not(target_os = "linux"))]
fn open_pins(_config: &Config) -> Result<Arc<dyn PinInterface>> {
    anyhow::bail!("GPIO access requires Linux")
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter("debug"), "bookplayer=debug,bookplayer_common=debug");
        assert_eq!(log_filter("bookplayer=trace,sqlx=warn"), "bookplayer=trace,sqlx=warn");
    }
}
