use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::coordination::BarrierConfig;
use crate::orchestrator::SessionConfig;
use crate::penalty::PenaltyConfig;
use crate::persistence::CheckpointConfig;

/// Main configuration structure
///
/// Every tunable of the coordinator lives here; each component also accepts
/// its sub-config directly so the state machines stay testable without any
/// configuration parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub session: SessionConfig,
    #[serde(default)]
    pub penalty: PenaltyConfig,
    #[serde(default)]
    pub barrier: BarrierConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Directory for result/summary/report artifacts
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

fn default_artifact_dir() -> String {
    "./data/sessions".to_string()
}

impl AppConfig {
    /// Load configuration from a file with environment variable overrides.
    ///
    /// Environment variables use the `LOCKSTEP_` prefix with `__` separators,
    /// e.g. `LOCKSTEP_SESSION__CYCLE_BARS=500`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("LOCKSTEP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(
            Environment::with_prefix("LOCKSTEP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
