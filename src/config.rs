//! Configuration loading.
//!
//! Config lives at `~/.dealdesk/config.json`. A missing file means
//! defaults; an unreadable one is logged and falls back to defaults rather
//! than refusing to start.

use std::path::{Path, PathBuf};

use crate::types::Config;

/// `~/.dealdesk/config.json`, when a home directory exists.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".dealdesk").join("config.json"))
}

/// Load configuration from the default location.
pub fn load_config() -> Config {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Config::default(),
    }
}

/// Load configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Config {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Config::default(), // No config yet
    };

    match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            log::warn!(
                "Config: failed to parse {}: {}, using defaults",
                path.display(),
                e
            );
            Config::default()
        }
    }
}
