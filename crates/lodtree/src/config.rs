//! Streaming configuration.
//!
//! Every field has a default, so a configuration file only needs to name
//! what it changes:
//!
//! ```json
//! { "strategy": { "kind": "group", "levels": [5, 10, 15] }, "cache_capacity": 256 }
//! ```

use std::sync::Arc;

use serde::Deserialize;

use crate::error::Result;
use crate::geometry_cache::DEFAULT_CAPACITY;
use crate::level::{LevelBounds, Strategy};
use crate::state::{Backoff, DEFAULT_BACKOFF_SECS};
use crate::view::DEFAULT_ERROR_THRESHOLD;

/// Tunables of a streamed layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub strategy: Strategy,
    pub levels: LevelBounds,
    /// Retry delays in seconds, indexed by consecutive error count.
    pub backoff_secs: Vec<f64>,
    /// Number of shared geometries kept findable.
    pub cache_capacity: usize,
    /// Screen-space error threshold in pixels.
    pub error_threshold: f64,
    /// Headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            levels: LevelBounds::default(),
            backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
            cache_capacity: DEFAULT_CAPACITY,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            headers: Vec::new(),
        }
    }
}

impl StreamConfig {
    /// Parse a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the document is not valid.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_levels(mut self, levels: LevelBounds) -> Self {
        self.levels = levels;
        self
    }

    #[must_use]
    pub fn with_backoff_secs(mut self, backoff_secs: Vec<f64>) -> Self {
        self.backoff_secs = backoff_secs;
        self
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    #[must_use]
    pub fn with_error_threshold(mut self, error_threshold: f64) -> Self {
        self.error_threshold = error_threshold;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Backoff table shared by every update state of a layer.
    #[must_use]
    pub fn backoff(&self) -> Arc<Backoff> {
        Arc::new(Backoff::from_secs(&self.backoff_secs))
    }
}
