//! Engine and backend configuration.
//!
//! Both structs deserialize from JSON with every field optional, and can
//! be overridden from `PLOTCACHE_*` environment variables.

use crate::error::ConfigError;
use crate::types::{Pwe, PWE_MAX};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Tunables consumed by the cache, fetcher, scheduler and viewport controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlotterConfig {
    /// Lowest queryable time, in milliseconds
    pub query_low_ms: i64,
    /// Highest queryable time, in milliseconds
    pub query_high_ms: i64,
    /// Coarsest resolution ever requested
    pub pwe_high: Pwe,
    /// Delay between bracket polls while the view is near live data
    pub bracket_poll_interval_ms: u64,
    /// Eviction starts once total points exceed this, per selected stream
    pub memory_threshold_per_stream: usize,
    /// Eviction stops once total points drop to this, per selected stream
    pub memory_target_per_stream: usize,
    /// Debounce applied to requests deferred behind another resolution
    pub secondary_debounce_ms: u64,
    /// Keep polling while the view's right edge is within this many
    /// viewport widths of a stream's last known end
    pub poll_margin_widths: f64,
    /// Generation counter wraps back to zero past this value
    pub generation_wrap: u64,
    /// Prefetch neighbouring ranges and resolutions after each repaint
    pub prefetch: bool,
}

impl Default for PlotterConfig {
    fn default() -> Self {
        Self {
            query_low_ms: 0,
            query_high_ms: 3_458_764_513_820,
            pwe_high: 61,
            bracket_poll_interval_ms: 5000,
            memory_threshold_per_stream: 300_000,
            memory_target_per_stream: 150_000,
            secondary_debounce_ms: 1000,
            poll_margin_widths: 1.0,
            generation_wrap: 8_000_000,
            prefetch: true,
        }
    }
}

impl PlotterConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by any `PLOTCACHE_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_parse("PLOTCACHE_QUERY_LOW_MS")? {
            config.query_low_ms = v;
        }
        if let Some(v) = env_parse("PLOTCACHE_QUERY_HIGH_MS")? {
            config.query_high_ms = v;
        }
        if let Some(v) = env_parse("PLOTCACHE_PWE_HIGH")? {
            config.pwe_high = v;
        }
        if let Some(v) = env_parse("PLOTCACHE_BRACKET_POLL_MS")? {
            config.bracket_poll_interval_ms = v;
        }
        if let Some(v) = env_parse("PLOTCACHE_MEMORY_THRESHOLD")? {
            config.memory_threshold_per_stream = v;
        }
        if let Some(v) = env_parse("PLOTCACHE_MEMORY_TARGET")? {
            config.memory_target_per_stream = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_low_ms >= self.query_high_ms {
            return Err(ConfigError::Invalid(format!(
                "query_low_ms {} must be below query_high_ms {}",
                self.query_low_ms, self.query_high_ms
            )));
        }
        if self.pwe_high > PWE_MAX {
            return Err(ConfigError::Invalid(format!(
                "pwe_high {} exceeds {}",
                self.pwe_high, PWE_MAX
            )));
        }
        if self.memory_target_per_stream > self.memory_threshold_per_stream {
            return Err(ConfigError::Invalid(
                "memory target must not exceed memory threshold".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bracket_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bracket_poll_interval_ms)
    }

    pub fn secondary_debounce(&self) -> Duration {
        Duration::from_millis(self.secondary_debounce_ms)
    }

    /// (threshold, target) for the given number of selected streams.
    pub fn memory_limits(&self, stream_count: usize) -> (usize, usize) {
        (
            self.memory_threshold_per_stream * stream_count,
            self.memory_target_per_stream * stream_count,
        )
    }
}

/// Where and how to reach the time-series backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Session token appended to every request body, if logged in
    pub token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            request_timeout_ms: 30_000,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("PLOTCACHE_BACKEND_URL") {
            config.base_url = url;
        }
        if let Ok(token) = std::env::var("PLOTCACHE_TOKEN") {
            if !token.is_empty() {
                config.token = Some(token);
            }
        }
        if let Some(v) = env_parse("PLOTCACHE_REQUEST_TIMEOUT_MS")? {
            config.request_timeout_ms = v;
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
