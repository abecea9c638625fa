//! Configuration file discovery and data folder resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BOOKPLAYER_CONFIG";

/// Environment variable overriding the data folder
pub const DATA_DIR_ENV_VAR: &str = "BOOKPLAYER_DATA_DIR";

const APP_DIR: &str = "bookplayer";
const CONFIG_FILE: &str = "config.toml";

/// Config file resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. User config dir (`~/.config/bookplayer/config.toml`)
/// 4. System config (`/etc/bookplayer/config.toml`)
///
/// Returns `Ok(None)` when no file is found; callers fall back to built-in
/// defaults. An explicitly requested file that does not exist is an error.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_existing(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return require_existing(PathBuf::from(path));
        }
    }

    // Priority 3 and 4: well-known locations
    Ok(default_config_locations().into_iter().find(|p| p.exists()))
}

fn require_existing(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", path)))
    }
}

/// Candidate config file locations, most specific first
pub fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join(APP_DIR).join(CONFIG_FILE));
    }
    if cfg!(unix) {
        locations.push(PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE));
    }
    locations
}

/// Data folder holding the progress database
///
/// Environment override first, then the OS data dir
/// (`~/.local/share/bookplayer` on Linux), then `/var/lib/bookplayer`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(DATA_DIR_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    default_data_dir()
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/var/lib").join(APP_DIR))
}

/// Default location of the progress database
pub fn default_database_path() -> PathBuf {
    resolve_data_dir().join("state.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_data_dir_is_named_after_app() {
        let dir = default_data_dir();
        assert!(dir.ends_with(APP_DIR));
    }

    #[test]
    fn test_default_locations_end_with_config_file() {
        for location in default_config_locations() {
            assert!(location.ends_with(Path::new(APP_DIR).join(CONFIG_FILE)));
        }
    }
}
