//! Maestro configuration structures to map the maestro.toml configuration.

#![deny(missing_docs)]

mod inference;
mod loader;
mod model;
mod server;

use std::path::Path;

pub use inference::{InferenceConfig, ReasoningLevel};
pub use model::{Backend, ModelConfig};
use serde::Deserialize;
pub use server::ServerConfig;

/// Main configuration structure for the Maestro gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Local model and backend settings.
    pub model: ModelConfig,
    /// Default inference parameters and Harmony prompt settings.
    pub inference: InferenceConfig,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment knobs.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        loader::load(path)
    }

    /// Load configuration from defaults plus environment knobs only.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        loader::apply_env(&mut config.inference)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        self.model.validate()?;
        self.inference.validate()?;
        Ok(())
    }
}
