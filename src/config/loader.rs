//! Configuration Loader
//!
//! Environment-aware loading: one configuration file (TOML or YAML, chosen by
//! extension) layered with `CONDUIT__`-prefixed environment variables, e.g.
//! `CONDUIT__WORKFLOW__STRICT=false`.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::ConduitConfig;
use crate::error::{ConduitError, ConduitResult};

const ENV_PREFIX: &str = "CONDUIT";

/// Loaded, validated configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: ConduitConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from a file plus environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> ConduitResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConduitError::configuration(
                "config",
                format!("configuration file not found: {}", path.display()),
            ));
        }

        let environment = Self::detect_environment();
        debug!(
            path = %path.display(),
            environment = %environment,
            "Loading configuration"
        );

        let config: ConduitConfig = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            environment = %environment,
            connections = config.connections.len(),
            channels = config.channels.len(),
            strict = config.workflow.strict,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source: Some(path.to_path_buf()),
        }))
    }

    /// Wrap an already built configuration after validating it
    pub fn from_config(config: ConduitConfig) -> ConduitResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source: None,
        }))
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Detect the runtime environment from environment variables
    pub fn detect_environment() -> String {
        env::var("CONDUIT_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}
