use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from a TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// ffmpeg binary used for decoding (name on PATH or absolute path).
    pub ffmpeg_path: String,
    /// Width of one matcher offset bin in milliseconds.
    pub bin_size_ms: f64,
    /// Matches with confidence below this are flagged as dubious.
    pub confidence_threshold: u64,
    /// Reuse and write sidecar fingerprint caches.
    pub cache: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            bin_size_ms: 0.05,
            confidence_threshold: 5,
            cache: true,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/earmark/config.toml`.
    /// Returns default config if the file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
