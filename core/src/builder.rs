//! Builder API for ergonomic circuit breaker and retry configuration

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext, Config},
    classifier::FailureContext,
    errors::ConfigError,
    retry::{Retry, RetryConfig, RetryPredicate},
};
use std::sync::Arc;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: Config,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration (keeps the name and callbacks)
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the number of calls kept in the sliding window
    pub fn sliding_window_size(mut self, size: usize) -> Self {
        self.config.sliding_window_size = size;
        self
    }

    /// Set the failure rate threshold in percent (0-100]
    /// Circuit opens when failures / calls * 100 >= this value
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Set minimum number of calls before rates are evaluated
    pub fn minimum_number_of_calls(mut self, calls: usize) -> Self {
        self.config.minimum_number_of_calls = Some(calls);
        self
    }

    /// Set how long the circuit stays open before trial calls
    pub fn wait_duration_in_open_state_secs(mut self, seconds: f64) -> Self {
        self.config.wait_duration_in_open_state_secs = seconds;
        self
    }

    /// Set the number of trial calls permitted in half-open
    pub fn permitted_calls_in_half_open_state(mut self, calls: usize) -> Self {
        self.config.permitted_calls_in_half_open_state = calls;
        self
    }

    /// Set the duration at which a call counts as slow
    pub fn slow_call_duration_threshold_secs(mut self, seconds: f64) -> Self {
        self.config.slow_call_duration_threshold_secs = seconds;
        self
    }

    /// Set the slow-call rate threshold in percent (0-100]
    pub fn slow_call_rate_threshold(mut self, percent: f64) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    /// Set the jitter factor for the open-state wait (0.0 = no jitter, 1.0 = full jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Errors matching the predicate are returned to the caller but never
    /// counted by the breaker
    ///
    /// # Examples
    ///
    /// ```rust
    /// use resilience_machines::CircuitBreaker;
    ///
    /// #[derive(Debug)]
    /// struct ClientError(u16);
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .sliding_window_size(10)
    ///     .ignore_errors(|ctx| ctx.downcast_ref::<ClientError>().is_some())
    ///     .build();
    ///
    /// for _ in 0..20 {
    ///     let _ = circuit.call(|| Err::<(), _>(ClientError(400)));
    /// }
    /// assert!(circuit.is_closed());
    /// ```
    pub fn ignore_errors<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.config.classifier = self.config.classifier.ignore_errors(predicate);
        self
    }

    /// Only errors matching the predicate count as failures
    pub fn record_errors<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.config.classifier = self.config.classifier.record_errors(predicate);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Set callback for rejected calls
    pub fn on_call_not_permitted<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_call_not_permitted = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the circuit breaker
    pub fn try_build(self) -> Result<CircuitBreaker, ConfigError> {
        self.config.validate()?;
        let context = CircuitContext::new(self.name, self.config);
        Ok(CircuitBreaker::with_context_and_callbacks(
            context,
            self.callbacks,
        ))
    }

    /// Build the circuit breaker
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid; use [`try_build`](Self::try_build)
    /// to handle that case.
    pub fn build(self) -> CircuitBreaker {
        match self.try_build() {
            Ok(circuit) => circuit,
            Err(e) => panic!("invalid circuit breaker configuration: {e}"),
        }
    }
}

/// Builder for creating retry policies with fluent API
pub struct RetryBuilder {
    name: String,
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: RetryConfig::default(),
        }
    }

    /// Replace the whole configuration (keeps the name)
    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set total attempts, including the first one
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the wait before the first retry
    pub fn wait_duration_secs(mut self, seconds: f64) -> Self {
        self.config.wait_duration_secs = seconds;
        self
    }

    /// Grow the wait by `multiplier` per retry, up to `max_secs`
    pub fn exponential_backoff(mut self, multiplier: f64, max_secs: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self.config.max_wait_duration_secs = max_secs;
        self
    }

    /// Set the jitter factor for waits (0.0 = no jitter, 1.0 = full jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Only errors matching the predicate are retried
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.config.retry_on = RetryPredicate::new(predicate);
        self
    }

    pub fn try_build(self) -> Result<Retry, ConfigError> {
        self.config.validate()?;
        Ok(Retry::new(self.name, self.config))
    }

    /// Build the retry policy
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn build(self) -> Retry {
        match self.try_build() {
            Ok(retry) => retry,
            Err(e) => panic!("invalid retry configuration: {e}"),
        }
    }
}
