//! Configuration for atlas services.
//!
//! Layered: optional YAML file, then environment variables prefixed with
//! `ATLAS` (separator `__`, e.g. `ATLAS__SAGA__DEFAULT_TIMEOUT_MS=10000`).
//! Topic names additionally honour their own environment variables
//! (`COMMAND_TOPIC_SAGA`, ...), see [`crate::envelope::Topics`].

mod tenants;

pub use tenants::bootstrap_tenants;

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ATLAS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ATLAS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ATLAS_LOG";
/// Environment variable selecting log output format (`json` or plain).
pub const LOG_FORMAT_ENV_VAR: &str = "ATLAS_LOG_FORMAT";

use serde::Deserialize;

use crate::bus::MessagingConfig;
use crate::envelope::TopicsConfig;
use crate::jsonapi::ServicesConfig;
use crate::rates::RatesConfig;
use crate::saga::SagaConfig;
use crate::tenant::Tenant;
use crate::transport::TransportConfig;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Redis connection for registry-backed services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL; registries stay in memory when unset.
    pub url: Option<String>,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "atlas".to_string(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub messaging: MessagingConfig,
    /// Topic name overrides keyed by topic environment variable.
    pub topics: TopicsConfig,
    pub redis: RedisConfig,
    /// Peer JSON:API endpoints.
    pub services: ServicesConfig,
    pub saga: SagaConfig,
    pub transport: TransportConfig,
    pub rates: RatesConfig,
    /// Static tenant list, used when no tenants service is configured.
    pub tenants: Vec<Tenant>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }

    /// Construction-time checks of route and tier records.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.rates
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.redis.key_prefix, "atlas");
        assert!(config.redis.url.is_none());
        assert_eq!(config.saga.default_timeout_ms, 30_000);
        assert_eq!(config.transport.tick_interval_ms, 1_000);
        assert!(config.tenants.is_empty());
    }

    #[test]
    #[serial]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "saga:\n  default_timeout_ms: 5000\n  timeouts:\n    warp: 1000\n\
             redis:\n  url: redis://cache:6379\n\
             tenants:\n  - id: 083839c6-c47c-42a6-9585-76492795d123\n    region: GMS\n    majorVersion: 83\n    minorVersion: 1\n"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.saga.default_timeout_ms, 5_000);
        assert_eq!(config.saga.timeouts.get("warp"), Some(&1_000));
        assert_eq!(config.redis.url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.tenants.len(), 1);
        assert_eq!(config.tenants[0].region, "GMS");
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "saga:\n  default_timeout_ms: 5000\n").unwrap();

        std::env::set_var("ATLAS__SAGA__DEFAULT_TIMEOUT_MS", "7000");
        let config = Config::load(file.path().to_str());
        std::env::remove_var("ATLAS__SAGA__DEFAULT_TIMEOUT_MS");

        assert_eq!(config.unwrap().saga.default_timeout_ms, 7_000);
    }

    #[test]
    #[serial]
    fn test_invalid_route_rejected_at_load() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "transport:\n  routes:\n    - tenant_id: 083839c6-c47c-42a6-9585-76492795d123\n      routes:\n        - name: broken\n          start_map_id: 1\n          staging_map_id: 2\n          destination_map_id: 3\n          observation_map_id: 4\n          boarding_window_secs: 600\n          pre_departure_secs: 60\n          travel_secs: 600\n          cycle_interval_secs: 900\n"
        )
        .unwrap();

        let result = Config::load(file.path().to_str());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
