//! Configuration for the per-connection stream registry
//!
//! The registry takes a single number, the cap on concurrently open streams.
//! It is derived from the protocol's per-connection stream limit times a
//! multiplier, which leaves headroom for streams the peer has closed but we
//! have not yet collected.

use crate::quic::error::{QuicError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum number of streams the peer may have open per connection
pub const DEFAULT_MAX_STREAMS_PER_CONNECTION: u32 = 100;

/// Slack applied on top of the protocol limit
pub const DEFAULT_MAX_STREAMS_MULTIPLIER: f32 = 1.1;

/// Prefix for environment overrides, e.g. `GQUIC_STREAMS_MAX_STREAMS_PER_CONNECTION`
pub const ENV_PREFIX: &str = "GQUIC_STREAMS";

/// Stream registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Per-connection stream limit advertised by the protocol
    pub max_streams_per_connection: u32,
    /// Multiplier applied to the limit to get the hard cap
    pub max_streams_multiplier: f32,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            max_streams_per_connection: DEFAULT_MAX_STREAMS_PER_CONNECTION,
            max_streams_multiplier: DEFAULT_MAX_STREAMS_MULTIPLIER,
        }
    }
}

impl StreamsConfig {
    /// Hard cap on concurrently open streams
    pub fn max_open_streams(&self) -> usize {
        (self.max_streams_per_connection as f32 * self.max_streams_multiplier) as usize
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_streams_per_connection == 0 {
            return Err(QuicError::Config("max_streams_per_connection must be greater than 0".to_string()));
        }

        if !self.max_streams_multiplier.is_finite() || self.max_streams_multiplier < 1.0 {
            return Err(QuicError::Config(format!(
                "max_streams_multiplier must be a finite value >= 1.0, got {}",
                self.max_streams_multiplier
            )));
        }

        Ok(())
    }

    /// Load configuration from a file; the format follows the extension
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `GQUIC_STREAMS_*` environment variables
    pub fn load_from_env() -> Result<Self> {
        Self::load_from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from_environment(env: Environment) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize the effective configuration
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| QuicError::Config(format!("Failed to serialize to JSON: {}", e)))
    }
}

/// Configuration builder for easier setup
pub struct ConfigBuilder {
    config: StreamsConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: StreamsConfig::default(),
        }
    }

    /// Set the per-connection stream limit
    pub fn max_streams_per_connection(mut self, max: u32) -> Self {
        self.config.max_streams_per_connection = max;
        self
    }

    /// Set the multiplier applied to the stream limit
    pub fn max_streams_multiplier(mut self, multiplier: f32) -> Self {
        self.config.max_streams_multiplier = multiplier;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<StreamsConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
