//! Configuration loader

use std::path::Path;

use sessiond_utils::{config_file, Result, SessiondError};

use super::{parse_idle_timeout, AppConfig};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| SessiondError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| SessiondError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        parse_idle_timeout(&config.daemon.idle_timeout)?;

        if config.buffer.max_bytes == 0 {
            return Err(SessiondError::config("buffer.max_bytes must be positive"));
        }

        if config.transcript.trim_threshold < config.transcript.max_bytes {
            return Err(SessiondError::config(
                "transcript.trim_threshold must be at least transcript.max_bytes",
            ));
        }

        if config.terminal.cols < 2 || config.terminal.rows < 1 {
            return Err(SessiondError::config(
                "terminal size must be at least 2 columns by 1 row",
            ));
        }

        if config.stream.bootstrap_chunk_size == 0 {
            return Err(SessiondError::config(
                "stream.bootstrap_chunk_size must be positive",
            ));
        }

        if config.stream.queue_depth == 0 {
            return Err(SessiondError::config("stream.queue_depth must be positive"));
        }

        if config.stream.initial_credit < 0 {
            return Err(SessiondError::config(
                "stream.initial_credit must not be negative",
            ));
        }

        Ok(())
    }

    /// Load from `path` (or the default location) and validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<AppConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }
}
