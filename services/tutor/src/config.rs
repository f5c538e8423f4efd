use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Level, warn};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub lesson_path: Option<PathBuf>,
    pub lesson_metadata: Option<String>,
    pub log_level: Level,
    pub tick_interval: Duration,
    pub advance_delay: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let lesson_path = std::env::var("LESSON_PATH").ok().map(PathBuf::from);
        let lesson_metadata = std::env::var("LESSON_METADATA")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let tick_secs = parse_u64("TICK_INTERVAL_SECS", 5)?;
        if tick_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "TICK_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let advance_delay_ms = parse_u64("ADVANCE_DELAY_MS", 1500)?;

        Ok(Self {
            lesson_path,
            lesson_metadata,
            log_level,
            tick_interval: Duration::from_secs(tick_secs),
            advance_delay: Duration::from_millis(advance_delay_ms),
        })
    }

    /// Raw lesson metadata: the inline value if set, otherwise the contents
    /// of the lesson file.
    ///
    /// An unreadable file is logged and treated as missing metadata, so the
    /// session falls back to the default lesson.
    pub fn lesson_metadata(&self) -> Option<String> {
        if let Some(inline) = &self.lesson_metadata {
            return Some(inline.clone());
        }
        self.lesson_path.as_deref().and_then(read_lesson_file)
    }
}

fn read_lesson_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read lesson file");
            None
        }
    }
}

fn parse_u64(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
