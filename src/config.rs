//! Registry configuration
//!
//! Defaults can be overridden by a TOML file and then by `KSTORE_*`
//! environment variables (`KSTORE_CACHE_BUCKETS=128`).

use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Tunables of a [`crate::Registry`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Initial child-slot count of every tree node
    pub default_width: usize,
    /// Whether the registry keeps a path cache
    pub cache_enabled: bool,
    pub cache_buckets: usize,
    /// Paths per bucket before the least recently used one is evicted
    pub cache_bucket_capacity: usize,
    /// Watchers an entry accepts
    pub watcher_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_width: 2,
            cache_enabled: true,
            cache_buckets: 64,
            cache_bucket_capacity: 8,
            watcher_capacity: 4,
        }
    }
}

impl RegistryConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, an optional file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&Self::default()).map_err(config_error)?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = file {
            debug!(path = %path.display(), "Loading registry configuration");
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(Environment::with_prefix("KSTORE").try_parsing(true))
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("default_width", self.default_width),
            ("cache_buckets", self.cache_buckets),
            ("cache_bucket_capacity", self.cache_bucket_capacity),
            ("watcher_capacity", self.watcher_capacity),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        if let Some((field, _)) = zero {
            return Err(Error::Config(format!("{} must be at least 1", field)));
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> Error {
    Error::Config(e.to_string())
}
