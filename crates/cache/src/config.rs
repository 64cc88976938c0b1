//! Viewer configuration
//!
//! Tunables for the tile window: prefetch margin, fetch concurrency, retry
//! backoff and the soft memory budget. Configuration can be loaded from a
//! TOML file, environment variables, or created programmatically.

use crate::grid::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Configuration for a mosaic session
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    /// Prefetch margin around the viewport, in tiles
    pub buffer_tiles: u32,

    /// Number of fetch worker threads (0 = caller drives fetches)
    pub fetch_workers: usize,

    /// How long an idle worker waits for a job before re-checking shutdown
    pub poll_interval: Duration,

    /// Delay before re-fetching a failed tile (zero = next visibility pass)
    pub retry_backoff: Duration,

    /// Upper bound for the doubling retry delay
    pub max_retry_backoff: Duration,

    /// Zoom level selected after metadata loads (`None` = lowest index)
    pub default_zoom_index: Option<u32>,

    /// Soft memory budget for decoded tiles in bytes
    pub memory_budget: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            buffer_tiles: 1,
            fetch_workers: default_workers(),
            poll_interval: Duration::from_millis(25),
            retry_backoff: Duration::ZERO,
            max_retry_backoff: Duration::from_secs(30),
            default_zoom_index: None,
            memory_budget: 256 * 1024 * 1024, // 256 MB
        }
    }
}

/// On-disk form; every key is optional
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    buffer_tiles: Option<u32>,
    fetch_workers: Option<usize>,
    poll_interval_ms: Option<u64>,
    retry_backoff_ms: Option<u64>,
    max_retry_backoff_ms: Option<u64>,
    default_zoom_index: Option<u32>,
    memory_budget_mb: Option<usize>,
}

impl ViewerConfig {
    pub fn with_buffer_tiles(mut self, tiles: u32) -> Self {
        self.buffer_tiles = tiles;
        self
    }

    pub fn with_fetch_workers(mut self, workers: usize) -> Self {
        self.fetch_workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable exponential retry backoff starting at `backoff`
    pub fn with_retry_backoff(mut self, backoff: Duration, max: Duration) -> Self {
        self.retry_backoff = backoff;
        self.max_retry_backoff = max;
        self
    }

    pub fn with_default_zoom_index(mut self, index: u32) -> Self {
        self.default_zoom_index = Some(index);
        self
    }

    /// Sets the memory budget in megabytes.
    pub fn with_memory_budget_mb(mut self, mb: usize) -> Self {
        self.memory_budget = mb.saturating_mul(BYTES_PER_MB);
        self
    }

    /// Retry policy for failed tiles
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_backoff.is_zero() {
            RetryPolicy::immediate()
        } else {
            RetryPolicy::exponential(self.retry_backoff, self.max_retry_backoff)
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MOSAIC_BUFFER_TILES`: prefetch margin in tiles (default: 1)
    /// - `MOSAIC_FETCH_WORKERS`: fetch worker threads (default: CPU count)
    /// - `MOSAIC_RETRY_BACKOFF_MS`: base retry delay (default: 0)
    /// - `MOSAIC_MAX_RETRY_BACKOFF_MS`: retry delay cap (default: 30000)
    /// - `MOSAIC_DEFAULT_ZOOM`: zoom index selected on load
    /// - `MOSAIC_MEMORY_BUDGET_MB`: soft tile memory budget (default: 256)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(tiles) = env_value("MOSAIC_BUFFER_TILES")? {
            config.buffer_tiles = tiles;
        }
        if let Some(workers) = env_value("MOSAIC_FETCH_WORKERS")? {
            config.fetch_workers = workers;
        }
        if let Some(ms) = env_value("MOSAIC_RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value("MOSAIC_MAX_RETRY_BACKOFF_MS")? {
            config.max_retry_backoff = Duration::from_millis(ms);
        }
        if let Some(index) = env_value("MOSAIC_DEFAULT_ZOOM")? {
            config.default_zoom_index = Some(index);
        }
        if let Some(mb) = env_value::<usize>("MOSAIC_MEMORY_BUDGET_MB")? {
            config.memory_budget = megabytes_to_bytes(mb, "MOSAIC_MEMORY_BUDGET_MB")?;
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// buffer_tiles = 1
    /// fetch_workers = 4
    /// retry_backoff_ms = 500
    /// memory_budget_mb = 256
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string; missing keys keep their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();

        if let Some(tiles) = file.buffer_tiles {
            config.buffer_tiles = tiles;
        }
        if let Some(workers) = file.fetch_workers {
            config.fetch_workers = workers;
        }
        if let Some(ms) = file.poll_interval_ms {
            if ms == 0 {
                return Err(ConfigError::InvalidValue("poll_interval_ms".to_string()));
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.retry_backoff_ms {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = file.max_retry_backoff_ms {
            config.max_retry_backoff = Duration::from_millis(ms);
        }
        config.default_zoom_index = file.default_zoom_index;
        if let Some(mb) = file.memory_budget_mb {
            config.memory_budget = megabytes_to_bytes(mb, "memory_budget_mb")?;
        }

        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            buffer_tiles: Some(self.buffer_tiles),
            fetch_workers: Some(self.fetch_workers),
            poll_interval_ms: Some(interval_ms_rounded_up(self.poll_interval)),
            retry_backoff_ms: Some(self.retry_backoff.as_millis() as u64),
            max_retry_backoff_ms: Some(self.max_retry_backoff.as_millis() as u64),
            default_zoom_index: self.default_zoom_index,
            memory_budget_mb: Some(self.memory_budget / BYTES_PER_MB),
        };
        Ok(toml::to_string(&file)?)
    }
}

const BYTES_PER_MB: usize = 1024 * 1024;

fn megabytes_to_bytes(mb: usize, key: &str) -> Result<usize, ConfigError> {
    mb.checked_mul(BYTES_PER_MB).ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

/// Whole milliseconds, never zero; the file format rejects a zero interval
fn interval_ms_rounded_up(interval: Duration) -> u64 {
    interval.as_nanos().div_ceil(1_000_000).clamp(1, u128::from(u64::MAX)) as u64
}

fn env_value<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
