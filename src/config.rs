//! Configuration for the ledger driver

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub miner: MinerConfig,
    /// Default `env_logger` filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            miner: MinerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MinerConfig {
    /// Worker threads used for the nonce search
    pub threads: usize,
    /// Nonces tried between cancellation checks
    pub batch_size: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            batch_size: default_batch_size(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file
    ///
    /// Without a path the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_toml(&fs::read_to_string(path)?),
            None => Ok(Config::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies a command line thread count and checks the result
    pub fn with_threads(mut self, threads: Option<usize>) -> Result<Self, ConfigError> {
        if let Some(threads) = threads {
            self.miner.threads = threads;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.miner.threads == 0 {
            return Err(ConfigError::Invalid("miner.threads must be at least 1".to_string()));
        }

        if self.miner.batch_size == 0 {
            return Err(ConfigError::Invalid("miner.batch_size must be at least 1".to_string()));
        }

        Ok(())
    }
}

fn default_threads() -> usize {
    1
}

fn default_batch_size() -> u64 {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}
