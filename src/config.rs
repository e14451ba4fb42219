//! Layered run configuration
//!
//! An optional `distributor.toml`, then `DISTRIBUTOR_*` environment variables
//! with `__` between nested keys. Command line flags are applied on top by the
//! binary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::distributor::DistributionConfig;
use crate::error::{DistributorError, Result};
use crate::gateway::GatewayConfig;
use crate::transaction::SenderConfig;

/// Configuration file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "distributor.toml";

/// Prefix of environment overrides, e.g. `DISTRIBUTOR_GATEWAY__RETRY_COUNT`
pub const ENV_PREFIX: &str = "DISTRIBUTOR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            sender: SenderConfig::default(),
            distribution: DistributionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Layer the config file and `DISTRIBUTOR_*` environment variables.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env file first
        dotenv::dotenv().ok();
        Self::load_with_env(path, None)
    }

    /// Like [`Config::load`], reading overrides from `env` instead of the
    /// process environment when given
    pub fn load_with_env(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config_builder = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("gateway.endpoints")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: Config = config_builder.try_deserialize()?;
        Ok(config)
    }

    /// Checks that must hold before dialing
    pub fn validate(&self) -> Result<()> {
        if self.gateway.endpoints.iter().all(|url| url.trim().is_empty()) {
            return Err(DistributorError::Config("must specify gateway URL".to_string()));
        }
        if self.distribution.input_file.is_none() {
            return Err(DistributorError::Config("must specify input file".to_string()));
        }
        Ok(())
    }
}
