//! Retry policy with bounded attempts and backoff
//!
//! A `Retry` holds only immutable configuration; every invocation tracks its
//! own attempt counter, so one instance can be shared freely across threads.

use crate::{
    backoff,
    circuit::{check_jitter, check_secs},
    classifier::FailureContext,
    errors::ConfigError,
};
use serde::Deserialize;
use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Decides whether an error is worth another attempt
#[derive(Clone)]
pub struct RetryPredicate(Option<Arc<dyn Fn(&FailureContext<'_>) -> bool + Send + Sync>>);

impl RetryPredicate {
    /// Retry every error
    pub fn all() -> Self {
        Self(None)
    }

    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self(Some(Arc::new(predicate)))
    }

    pub fn should_retry(&self, ctx: &FailureContext<'_>) -> bool {
        self.0.as_ref().is_none_or(|predicate| predicate(ctx))
    }
}

impl Default for RetryPredicate {
    fn default() -> Self {
        Self::all()
    }
}

impl std::fmt::Debug for RetryPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => f.write_str("RetryPredicate(<closure>)"),
            None => f.write_str("RetryPredicate(all)"),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: usize,

    /// Seconds to wait before the first retry
    pub wait_duration_secs: f64,

    /// Growth factor applied per retry (1.0 = fixed delay)
    pub backoff_multiplier: f64,

    /// Upper bound for the un-jittered wait
    pub max_wait_duration_secs: f64,

    /// Jitter factor for waits (0.0 = no jitter, 1.0 = full jitter)
    pub jitter_factor: f64,

    #[serde(skip)]
    pub retry_on: RetryPredicate,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_duration_secs: 0.5,
            backoff_multiplier: 1.0,
            max_wait_duration_secs: 60.0,
            jitter_factor: 0.0,
            retry_on: RetryPredicate::all(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        check_secs("wait_duration_secs", self.wait_duration_secs)?;
        check_secs("max_wait_duration_secs", self.max_wait_duration_secs)?;
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(ConfigError::InvalidMultiplier(self.backoff_multiplier));
        }
        check_jitter("jitter_factor", self.jitter_factor)
    }

    /// Wait before retry number `retry` (1-based), jitter included
    pub fn wait_for(&self, retry: usize) -> f64 {
        let delay = backoff::exponential_secs(
            self.wait_duration_secs,
            self.backoff_multiplier,
            self.max_wait_duration_secs,
            retry,
        );
        backoff::jittered_secs(delay, self.jitter_factor)
    }
}

/// Named retry policy
#[derive(Debug, Clone)]
pub struct Retry {
    name: String,
    config: RetryConfig,
}

impl Retry {
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Create a new retry builder
    pub fn builder(name: impl Into<String>) -> crate::builder::RetryBuilder {
        crate::builder::RetryBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f` until it succeeds, the error is not retryable, or attempts run out
    ///
    /// The last error is returned unchanged.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: 'static,
        F: FnMut() -> Result<T, E>,
    {
        self.call_counted(f).0
    }

    /// Like [`call`](Self::call), also returning how many attempts were made
    pub fn call_counted<T, E, F>(&self, mut f: F) -> (Result<T, E>, usize)
    where
        E: 'static,
        F: FnMut() -> Result<T, E>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = Instant::now();

            let error = match f() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(retry = %self.name, attempt, "succeeded after retry");
                    }
                    return (Ok(value), attempt);
                }
                Err(e) => e,
            };

            let ctx = FailureContext {
                circuit_name: &self.name,
                error: &error as &dyn Any,
                duration: start.elapsed().as_secs_f64(),
            };
            if !self.config.retry_on.should_retry(&ctx) {
                tracing::debug!(retry = %self.name, attempt, "error is not retryable");
                return (Err(error), attempt);
            }
            if attempt >= max_attempts {
                tracing::warn!(retry = %self.name, attempts = attempt, "retries exhausted");
                return (Err(error), attempt);
            }

            let wait = self.config.wait_for(attempt);
            tracing::debug!(retry = %self.name, attempt, wait_secs = wait, "retrying after failure");
            if wait > 0.0 {
                thread::sleep(Duration::from_secs_f64(wait));
            }
        }
    }

    /// Wrap an operation into a reusable retrying closure
    pub fn decorate<T, E, F>(self: &Arc<Self>, mut f: F) -> impl FnMut() -> Result<T, E> + use<T, E, F>
    where
        E: 'static,
        F: FnMut() -> Result<T, E>,
    {
        let retry = Arc::clone(self);
        move || retry.call(&mut f)
    }
}
