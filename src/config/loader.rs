//! Configuration Loader
//!
//! Environment-aware configuration loading. Layers, lowest precedence first:
//! built-in defaults, an optional TOML file, `SEQUENCER_*` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::SequencerConfig;
use ::config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "SEQUENCER";
const DEFAULT_CONFIG_FILE: &str = "config/sequencer.toml";

/// Loaded configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: SequencerConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    ///
    /// Reads `config/sequencer.toml` when it exists; a missing default file is not an error.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        let source = default_path.is_file().then_some(default_path);
        Self::build(source, true)
    }

    /// Load configuration from an explicit TOML file, which must exist
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(ConfigurationError::ConfigFileNotFound { path });
        }
        Self::build(Some(path), true)
    }

    /// Load an explicit file without consulting the process environment.
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_file_without_env(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(ConfigurationError::ConfigFileNotFound { path });
        }
        Self::build(Some(path), false)
    }

    /// Wrap an already-built configuration (validated)
    pub fn from_config(config: SequencerConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source: None,
        }))
    }

    fn build(source: Option<PathBuf>, with_env: bool) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        debug!(
            environment = %environment,
            source = ?source,
            "Loading sequencer configuration"
        );

        let mut builder =
            Config::builder().add_source(Config::try_from(&SequencerConfig::default())?);
        if let Some(path) = &source {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: SequencerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            subscription = %config.stream.subscription,
            require_global_sequencer = config.engine.require_global_sequencer,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Configuration as JSON with secret-looking connector values masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or_default();
        Self::sanitize_json_recursive(&mut value);
        value
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value) {
        const SENSITIVE: [&str; 5] = ["password", "secret", "key", "token", "credential"];

        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    if SENSITIVE.iter().any(|pattern| key_lower.contains(pattern)) {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                items.iter_mut().for_each(Self::sanitize_json_recursive);
            }
            _ => {}
        }
    }

    /// Detect current environment from environment variables
    pub(crate) fn detect_environment() -> String {
        env::var("SEQUENCER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
