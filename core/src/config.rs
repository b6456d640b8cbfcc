//! TOML configuration for registries
//!
//! ```toml
//! # defaults for every breaker / retry created by the registry
//! [circuit_breaker]
//! sliding_window_size = 10
//!
//! [retry]
//! max_attempts = 3
//! wait_duration_secs = 0.1
//!
//! # named instances inherit the defaults and override fields
//! [circuit_breakers.call-endpoint]
//! failure_rate_threshold = 25.0
//!
//! [retries.some-endpoint]
//! max_attempts = 5
//! ```
//!
//! Error predicates cannot be expressed in TOML; they are added in code
//! through [`Registry::circuit_breaker_with`](crate::Registry::circuit_breaker_with).

use crate::{circuit::Config, errors::ConfigError, retry::RetryConfig};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Parsed and validated registry configuration
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Configuration for breakers without a named entry
    pub circuit_breaker: Config,
    /// Configuration for retries without a named entry
    pub retry: RetryConfig,
    pub circuit_breakers: HashMap<String, Config>,
    pub retries: HashMap<String, RetryConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Document {
    circuit_breaker: toml::Table,
    retry: toml::Table,
    circuit_breakers: BTreeMap<String, toml::Table>,
    retries: BTreeMap<String, toml::Table>,
}

impl RegistryConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let document: Document = toml::from_str(source)?;
        let empty = toml::Table::new();

        let circuit_breaker: Config = merged(&document.circuit_breaker, &empty)?;
        circuit_breaker.validate()?;
        let retry: RetryConfig = merged(&document.retry, &empty)?;
        retry.validate()?;

        let mut circuit_breakers = HashMap::new();
        for (name, overrides) in &document.circuit_breakers {
            let config: Config = merged(&document.circuit_breaker, overrides)?;
            config.validate()?;
            circuit_breakers.insert(name.clone(), config);
        }

        let mut retries = HashMap::new();
        for (name, overrides) in &document.retries {
            let config: RetryConfig = merged(&document.retry, overrides)?;
            config.validate()?;
            retries.insert(name.clone(), config);
        }

        Ok(Self {
            circuit_breaker,
            retry,
            circuit_breakers,
            retries,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Breaker configuration for `name`, falling back to the defaults
    pub fn circuit_breaker_config(&self, name: &str) -> Config {
        self.circuit_breakers
            .get(name)
            .unwrap_or(&self.circuit_breaker)
            .clone()
    }

    /// Retry configuration for `name`, falling back to the defaults
    pub fn retry_config(&self, name: &str) -> RetryConfig {
        self.retries.get(name).unwrap_or(&self.retry).clone()
    }
}

/// Deserialize `overrides` layered over `defaults`
fn merged<T: DeserializeOwned>(
    defaults: &toml::Table,
    overrides: &toml::Table,
) -> Result<T, ConfigError> {
    let mut table = defaults.clone();
    for (key, value) in overrides {
        table.insert(key.clone(), value.clone());
    }
    Ok(toml::Value::Table(table).try_into::<T>()?)
}
