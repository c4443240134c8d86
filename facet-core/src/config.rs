//! Content cache settings.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings for a [`ContentCache`](crate::cache::ContentCache).
///
/// Missing fields take their defaults, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How many of the most recently inserted features the cache keeps alive
    /// itself. `0` means the cache holds only weak references.
    pub keep_last_instances: usize,

    /// Run a sweep when a rebuild session finishes.
    pub sweep_on_finish: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_last_instances: 0,
            sweep_on_finish: true,
        }
    }
}

impl CacheConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_keep_last_instances(mut self, n: usize) -> Self {
        self.keep_last_instances = n;
        self
    }
}
