//! Named breaker and retry instances
//!
//! The first lookup of a name builds the instance; every later lookup returns
//! the same `Arc`, whatever configuration it passes. Entries are never removed.

use crate::{
    builder::CircuitBuilder,
    circuit::{CircuitBreaker, Config},
    config::RegistryConfig,
    retry::{Retry, RetryConfig},
};
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};

/// Registry of named circuit breakers and retries
#[derive(Debug, Default)]
pub struct Registry {
    config: RegistryConfig,
    circuit_breakers: DashMap<String, Arc<CircuitBreaker>>,
    retries: DashMap<String, Arc<Retry>>,
}

impl Registry {
    /// Registry using built-in default configurations
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose unnamed lookups use the given defaults
    pub fn with_defaults(circuit_breaker: Config, retry: RetryConfig) -> Self {
        Self::from_config(RegistryConfig {
            circuit_breaker,
            retry,
            ..Default::default()
        })
    }

    /// Registry using per-name configurations, e.g. loaded from TOML
    pub fn from_config(config: RegistryConfig) -> Self {
        Self {
            config,
            circuit_breakers: DashMap::new(),
            retries: DashMap::new(),
        }
    }

    /// Process-wide registry
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Breaker for `name`, built from the registry's configuration on first use
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuit_breaker_with(name, |builder| builder)
    }

    /// Breaker for `name`, built from `config` on first use
    pub fn circuit_breaker_with_config(&self, name: &str, config: Config) -> Arc<CircuitBreaker> {
        self.circuit_breaker_with(name, move |builder| builder.config(config))
    }

    /// Breaker for `name`; `customize` runs only when the breaker is created
    ///
    /// # Examples
    ///
    /// ```rust
    /// use resilience_machines::Registry;
    ///
    /// let registry = Registry::new();
    /// let first = registry.circuit_breaker_with("payments", |b| {
    ///     b.sliding_window_size(10).on_open(|name| eprintln!("{} opened", name))
    /// });
    /// let second = registry.circuit_breaker_with("payments", |b| b.sliding_window_size(99));
    ///
    /// assert!(std::sync::Arc::ptr_eq(&first, &second));
    /// assert_eq!(second.config().sliding_window_size, 10);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the resulting configuration is invalid.
    pub fn circuit_breaker_with<F>(&self, name: &str, customize: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce(CircuitBuilder) -> CircuitBuilder,
    {
        if let Some(existing) = self.circuit_breakers.get(name) {
            return Arc::clone(existing.value());
        }

        self.circuit_breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let builder = CircuitBreaker::builder(name)
                    .config(self.config.circuit_breaker_config(name));
                tracing::debug!(circuit = name, "creating circuit breaker");
                Arc::new(customize(builder).build())
            })
            .value()
            .clone()
    }

    /// Retry for `name`, built from the registry's configuration on first use
    pub fn retry(&self, name: &str) -> Arc<Retry> {
        self.retry_with_config(name, self.config.retry_config(name))
    }

    /// Retry for `name`, built from `config` on first use
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    pub fn retry_with_config(&self, name: &str, config: RetryConfig) -> Arc<Retry> {
        if let Some(existing) = self.retries.get(name) {
            return Arc::clone(existing.value());
        }

        self.retries
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(retry = name, "creating retry");
                Arc::new(Retry::builder(name).config(config).build())
            })
            .value()
            .clone()
    }

    /// Force the named breaker back to Closed with an empty window
    ///
    /// Returns `false` when no breaker exists under that name.
    pub fn reset_circuit_breaker(&self, name: &str) -> bool {
        match self.circuit_breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every breaker in the registry
    pub fn reset_all(&self) {
        for breaker in self.circuit_breakers.iter() {
            breaker.reset();
        }
    }

    pub fn circuit_breaker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuit_breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn retry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.retries.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}
