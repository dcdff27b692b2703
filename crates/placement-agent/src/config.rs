//! Agent configuration

use anyhow::{bail, Context, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use placement_core::EngineConfig;
use serde::Deserialize;
use std::path::Path;

/// Agent settings: hosting parameters plus the engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Tag for structured log events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/stats
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between timer-driven pattern discovery passes
    #[serde(default = "default_adaptation_interval")]
    pub adaptation_interval_secs: u64,

    /// Outcomes buffered ahead of the ordered outcome worker
    #[serde(default = "default_outcome_queue_capacity")]
    pub outcome_queue_capacity: usize,

    pub engine: EngineConfig,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_adaptation_interval() -> u64 {
    60
}

fn default_outcome_queue_capacity() -> usize {
    1024
}

type Builder = ConfigBuilder<config::builder::DefaultState>;

impl AgentSettings {
    /// Load from an optional TOML file, then `PLACEMENT__*` environment
    /// overrides (e.g. `PLACEMENT__ENGINE__SEED=7`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        Self::build(builder)
            .with_context(|| format!("loading configuration (file: {:?})", path))
    }

    /// Parse settings from TOML text, still honoring environment overrides
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(raw, FileFormat::Toml)))
    }

    fn build(builder: Builder) -> Result<Self> {
        let settings: AgentSettings = builder
            .add_source(
                Environment::with_prefix("PLACEMENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.adaptation_interval_secs == 0 {
            bail!("adaptation_interval_secs must be positive");
        }
        if self.outcome_queue_capacity == 0 {
            bail!("outcome_queue_capacity must be positive");
        }
        self.engine.validate()?;
        Ok(())
    }
}
