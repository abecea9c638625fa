//! Configuration management for the book player
//!
//! A single TOML bootstrap file describes the appliance: where the book list
//! and progress database live, how to reach MPD, which GPIO lines carry the
//! buttons and the LED, and the timing knobs of the producers.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--config, --database, --booklist, --mpd-host, ...)
//! 2. Environment variables (BOOKPLAYER_CONFIG, BOOKPLAYER_DATA_DIR, ...)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! A missing config file is not an error: the player starts with built-in
//! defaults matching the reference wiring and logs a warning.

use bookplayer_common::config::{default_database_path, resolve_config_path};
use bookplayer_common::{ButtonBinding, Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Bootstrap configuration loaded from TOML file
///
/// Read once at startup; the player must restart to pick up changes.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite progress database (default: data dir / state.db)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// CSV book list mapping card ids to books
    #[serde(default = "default_booklist_path")]
    pub booklist_path: PathBuf,

    #[serde(default)]
    pub mpd: MpdConfig,

    #[serde(default)]
    pub gpio: GpioConfig,

    /// Button wiring (default: the four standard buttons)
    #[serde(default = "ButtonBinding::defaults")]
    pub buttons: Vec<ButtonBinding>,

    #[serde(default)]
    pub led: LedConfig,

    #[serde(default)]
    pub card_reader: CardReaderConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            booklist_path: default_booklist_path(),
            mpd: MpdConfig::default(),
            gpio: GpioConfig::default(),
            buttons: ButtonBinding::defaults(),
            led: LedConfig::default(),
            card_reader: CardReaderConfig::default(),
            status: StatusConfig::default(),
            playback: PlaybackConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// MPD connection details
#[derive(Debug, Clone, Deserialize)]
pub struct MpdConfig {
    #[serde(default = "default_mpd_host")]
    pub host: String,

    #[serde(default = "default_mpd_port")]
    pub port: u16,

    /// Per-command timeout
    #[serde(default = "default_mpd_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: default_mpd_host(),
            port: default_mpd_port(),
            command_timeout_ms: default_mpd_timeout_ms(),
        }
    }
}

/// GPIO character device settings
#[derive(Debug, Clone, Deserialize)]
pub struct GpioConfig {
    #[serde(default = "default_gpio_chip")]
    pub chip: PathBuf,

    /// Buttons pull the line low when pressed (pull-up wiring)
    #[serde(default = "default_true")]
    pub active_low: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            chip: default_gpio_chip(),
            active_low: true,
        }
    }
}

/// Status LED settings
#[derive(Debug, Clone, Deserialize)]
pub struct LedConfig {
    #[serde(default = "default_led_pin")]
    pub pin: u32,

    /// Blink ticker resolution
    #[serde(default = "default_led_tick_ms")]
    pub tick_ms: u64,

    /// Length of the acknowledgement double-blink
    #[serde(default = "default_led_overlay_ms")]
    pub overlay_ms: u64,

    /// Light a second LED for as long as the player runs
    #[serde(default = "default_true")]
    pub online_indicator: bool,

    #[serde(default = "default_online_pin")]
    pub online_pin: u32,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            pin: default_led_pin(),
            tick_ms: default_led_tick_ms(),
            overlay_ms: default_led_overlay_ms(),
            online_indicator: true,
            online_pin: default_online_pin(),
        }
    }
}

/// Serial RFID reader settings
#[derive(Debug, Clone, Deserialize)]
pub struct CardReaderConfig {
    /// Serial device, already configured for the reader's baud rate
    #[serde(default = "default_reader_device")]
    pub device: PathBuf,

    #[serde(default = "default_reader_baud_rate")]
    pub baud_rate: u32,

    /// Bound on a single read attempt
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for CardReaderConfig {
    fn default() -> Self {
        Self {
            device: default_reader_device(),
            baud_rate: default_reader_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Player status polling
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// A stop closer than this to the end of the last track finishes the book
    #[serde(default = "default_finish_threshold_secs")]
    pub finish_threshold_secs: f64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            finish_threshold_secs: default_finish_threshold_secs(),
        }
    }
}

/// Dispatcher behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    /// Volume set on the backend at startup (percent)
    #[serde(default = "default_initial_volume")]
    pub initial_volume: u8,

    #[serde(default = "default_volume_step")]
    pub volume_step: u8,

    /// Rewinding below this position jumps to the previous track
    #[serde(default = "default_rewind_secs")]
    pub rewind_threshold_secs: f64,

    /// Distance of one rewind press
    #[serde(default = "default_rewind_secs")]
    pub rewind_step_secs: f64,

    /// How long an unconfirmed pause/resume blocks further toggles
    #[serde(default = "default_toggle_confirm_timeout_ms")]
    pub toggle_confirm_timeout_ms: u64,

    /// Bound on the progress flush at shutdown
    #[serde(default = "default_shutdown_flush_timeout_ms")]
    pub shutdown_flush_timeout_ms: u64,

    /// Progress ticks allowed to wait on the bus before new ones are dropped
    #[serde(default = "default_max_pending_ticks")]
    pub max_pending_ticks: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            initial_volume: default_initial_volume(),
            volume_step: default_volume_step(),
            rewind_threshold_secs: default_rewind_secs(),
            rewind_step_secs: default_rewind_secs(),
            toggle_confirm_timeout_ms: default_toggle_confirm_timeout_ms(),
            shutdown_flush_timeout_ms: default_shutdown_flush_timeout_ms(),
            max_pending_ticks: default_max_pending_ticks(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_booklist_path() -> PathBuf {
    PathBuf::from("/home/rpi/books/booklist.csv")
}

fn default_mpd_host() -> String {
    "localhost".to_string()
}

fn default_mpd_port() -> u16 {
    6600
}

fn default_mpd_timeout_ms() -> u64 {
    5000
}

fn default_gpio_chip() -> PathBuf {
    PathBuf::from("/dev/gpiochip0")
}

fn default_led_pin() -> u32 {
    23
}

fn default_online_pin() -> u32 {
    17
}

fn default_led_tick_ms() -> u64 {
    50
}

fn default_led_overlay_ms() -> u64 {
    600
}

fn default_reader_device() -> PathBuf {
    PathBuf::from("/dev/ttyAMA0")
}

fn default_reader_baud_rate() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_finish_threshold_secs() -> f64 {
    20.0
}

fn default_initial_volume() -> u8 {
    100
}

fn default_volume_step() -> u8 {
    10
}

fn default_rewind_secs() -> f64 {
    20.0
}

fn default_toggle_confirm_timeout_ms() -> u64 {
    3000
}

fn default_shutdown_flush_timeout_ms() -> u64 {
    2000
}

fn default_max_pending_ticks() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub booklist_path: Option<PathBuf>,
    pub mpd_host: Option<String>,
    pub mpd_port: Option<u16>,
    pub reader_device: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Resolved progress database path
    pub database_path: PathBuf,

    /// File the settings came from (None = built-in defaults)
    pub source: Option<PathBuf>,

    pub settings: TomlConfig,
}

impl Config {
    /// Load configuration from the resolved TOML file and apply overrides
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly requested file is missing, the file
    /// cannot be read or parsed, or the result fails validation.
    pub async fn load(toml_path: Option<&Path>, cli_overrides: ConfigOverrides) -> Result<Self> {
        let source = resolve_config_path(toml_path)?;

        let settings = match &source {
            Some(path) => {
                let toml_str = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!("Failed to read config file {:?}: {}", path, e))
                })?;
                let parsed = Self::parse(&toml_str)?;
                info!("Loaded TOML configuration from {:?}", path);
                parsed
            }
            None => {
                warn!("No config file found, using built-in defaults");
                TomlConfig::default()
            }
        };

        let config = Self::from_settings(settings, source, cli_overrides);
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text into settings
    pub fn parse(toml_str: &str) -> Result<TomlConfig> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Apply CLI overrides on top of file settings
    pub fn from_settings(
        mut settings: TomlConfig,
        source: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Self {
        if let Some(path) = overrides.booklist_path {
            settings.booklist_path = path;
        }
        if let Some(host) = overrides.mpd_host {
            settings.mpd.host = host;
        }
        if let Some(port) = overrides.mpd_port {
            settings.mpd.port = port;
        }
        if let Some(device) = overrides.reader_device {
            settings.card_reader.device = device;
        }
        if let Some(level) = overrides.log_level {
            settings.logging.level = level;
        }

        let database_path = overrides
            .database_path
            .or_else(|| settings.database_path.clone())
            .unwrap_or_else(default_database_path);

        Self {
            database_path,
            source,
            settings,
        }
    }

    /// Reject settings the player cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.settings;

        if s.playback.initial_volume > 100 {
            return Err(Error::Config(format!(
                "initial_volume must be 0-100, got {}",
                s.playback.initial_volume
            )));
        }
        if s.playback.volume_step == 0 || s.playback.volume_step > 100 {
            return Err(Error::Config(format!(
                "volume_step must be 1-100, got {}",
                s.playback.volume_step
            )));
        }
        if s.status.poll_interval_ms == 0 || s.led.tick_ms == 0 {
            return Err(Error::Config("poll and tick intervals must be non-zero".to_string()));
        }
        if s.card_reader.backoff_initial_ms == 0
            || s.card_reader.backoff_max_ms < s.card_reader.backoff_initial_ms
        {
            return Err(Error::Config(
                "backoff_max_ms must be >= backoff_initial_ms > 0".to_string(),
            ));
        }

        if s.card_reader.baud_rate == 0 || s.card_reader.read_timeout_ms == 0 {
            return Err(Error::Config(
                "card reader baud_rate and read_timeout_ms must be non-zero".to_string(),
            ));
        }

        let online_pin = s.led.online_indicator.then_some(s.led.online_pin);
        if online_pin == Some(s.led.pin) {
            return Err(Error::Config(format!(
                "pin {} used for both the status and the online LED",
                s.led.pin
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for binding in &s.buttons {
            if !seen.insert(binding.pin) {
                return Err(Error::Config(format!("pin {} bound twice", binding.pin)));
            }
            if binding.pin == s.led.pin || Some(binding.pin) == online_pin {
                return Err(Error::Config(format!(
                    "pin {} used for both a button and an LED",
                    binding.pin
                )));
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings.status.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.card_reader.read_timeout_ms)
    }

    pub fn mpd_command_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.mpd.command_timeout_ms)
    }

    pub fn led_tick(&self) -> Duration {
        Duration::from_millis(self.settings.led.tick_ms)
    }

    pub fn led_overlay(&self) -> Duration {
        Duration::from_millis(self.settings.led.overlay_ms)
    }

    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.playback.shutdown_flush_timeout_ms)
    }

    pub fn toggle_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.playback.toggle_confirm_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookplayer_common::ButtonAction;

    #[test]
    fn test_empty_file_yields_defaults() {
        let settings = Config::parse("").unwrap();
        assert_eq!(settings.mpd.port, 6600);
        assert_eq!(settings.led.pin, 23);
        assert_eq!(settings.buttons.len(), 4);
        assert_eq!(settings.playback.initial_volume, 100);
        assert_eq!(settings.status.finish_threshold_secs, 20.0);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.card_reader.baud_rate, 9600);
        assert!(settings.led.online_indicator);
        assert_eq!(settings.led.online_pin, 17);
    }

    #[test]
    fn test_partial_sections_keep_field_defaults() {
        let settings = Config::parse(
            r#"
            booklist_path = "/srv/books.csv"

            [mpd]
            host = "10.0.0.5"

            [[buttons]]
            pin = 5
            action = "rewind"
            "#,
        )
        .unwrap();

        assert_eq!(settings.booklist_path, PathBuf::from("/srv/books.csv"));
        assert_eq!(settings.mpd.host, "10.0.0.5");
        assert_eq!(settings.mpd.port, 6600);
        assert_eq!(settings.buttons.len(), 1);
        assert_eq!(settings.buttons[0].action, ButtonAction::Rewind);
        assert_eq!(settings.buttons[0].debounce_ms, 1000);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let settings = Config::parse("database_path = \"/tmp/file.db\"\n[mpd]\nport = 6601").unwrap();
        let config = Config::from_settings(
            settings,
            None,
            ConfigOverrides {
                database_path: Some(PathBuf::from("/tmp/cli.db")),
                mpd_port: Some(7000),
                ..Default::default()
            },
        );

        assert_eq!(config.database_path, PathBuf::from("/tmp/cli.db"));
        assert_eq!(config.settings.mpd.port, 7000);
    }

    #[test]
    fn test_file_database_path_used_without_override() {
        let settings = Config::parse("database_path = \"/tmp/file.db\"").unwrap();
        let config = Config::from_settings(settings, None, ConfigOverrides::default());
        assert_eq!(config.database_path, PathBuf::from("/tmp/file.db"));
    }

    #[test]
    fn test_validate_rejects_duplicate_pins() {
        let settings = Config::parse(
            r#"
            [[buttons]]
            pin = 9
            action = "rewind"

            [[buttons]]
            pin = 9
            action = "volumeUp"
            "#,
        )
        .unwrap();
        let config = Config::from_settings(settings, None, ConfigOverrides::default());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_led_button_clash() {
        let settings = Config::parse("[led]\npin = 9").unwrap();
        let config = Config::from_settings(settings, None, ConfigOverrides::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_online_led_clash() {
        let settings = Config::parse("[led]\nonline_pin = 23").unwrap();
        let config = Config::from_settings(settings, None, ConfigOverrides::default());
        assert!(config.validate().is_err());

        let settings = Config::parse("[led]\nonline_pin = 22").unwrap();
        let config = Config::from_settings(settings, None, ConfigOverrides::default());
        assert!(config.validate().is_err());

        let settings = Config::parse("[led]\nonline_indicator = false\nonline_pin = 22").unwrap();
        let config = Config::from_settings(settings, None, ConfigOverrides::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_baud_rate() {
        let settings = Config::parse("[card_reader]\nbaud_rate = 0").unwrap();
        let config = Config::from_settings(settings, None, ConfigOverrides::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_volume_over_100() {
        let settings = Config::parse("[playback]\ninitial_volume = 120").unwrap();
        let config = Config::from_settings(settings, None, ConfigOverrides::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_is_config_error() {
        assert!(matches!(Config::parse("[mpd\nport = "), Err(Error::Config(_))));
    }

    #[test]
    fn test_durations() {
        let config = Config::from_settings(TomlConfig::default(), None, ConfigOverrides::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.led_tick(), Duration::from_millis(50));
        assert_eq!(config.shutdown_flush_timeout(), Duration::from_secs(2));
    }
}
