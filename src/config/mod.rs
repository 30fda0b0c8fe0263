//! Adapter configuration.
//!
//! Layered loading in priority order (highest first):
//! 1. Environment variables (`ONIX__<section>__<key>`)
//! 2. YAML configuration file (default: `config/onix.yaml`, override with
//!    `ONIX_CONFIG`)
//! 3. Defaults embedded in the structs
//!
//! `${VAR}` references inside the file are substituted from the environment
//! before deserialization, so secrets never need to live in the file itself.

mod models;
mod sources;
mod validation;

pub use models::{
    AppConfig, HandlerConfig, HttpClientConfig, HttpConfig, LogConfig, ModuleConfig,
    PluginBindings, PluginConfig,
};
pub use sources::expand_env;
pub use validation::ValidationError;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl AppConfig {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path. Useful for tests.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
