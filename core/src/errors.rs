//! Error types for circuit breaker and retry operations

use crate::State;
use std::error::Error as StdError;
use thiserror::Error;

/// Errors returned by a decorated call
#[derive(Debug, Error)]
pub enum CircuitError<E = Box<dyn StdError + Send + Sync>> {
    /// The breaker rejected the call without invoking the operation
    #[error("Circuit '{circuit}' does not permit further calls (state: {state})")]
    CallNotPermitted { circuit: String, state: State },
    /// The wrapped operation failed; the error is passed through untouched
    #[error("Circuit execution failed: {0}")]
    Execution(#[source] E),
}

impl<E> CircuitError<E> {
    /// True when the breaker rejected the call
    pub fn is_not_permitted(&self) -> bool {
        matches!(self, CircuitError::CallNotPermitted { .. })
    }

    /// Name of the breaker that rejected the call, if this is a rejection
    pub fn circuit_name(&self) -> Option<&str> {
        match self {
            CircuitError::CallNotPermitted { circuit, .. } => Some(circuit),
            CircuitError::Execution(_) => None,
        }
    }

    /// The operation's own error, if the operation ran
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::CallNotPermitted { .. } => None,
        }
    }
}

/// Invalid breaker or retry configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("sliding_window_size must be greater than 0")]
    EmptyWindow,
    #[error("{field} must be within (0, 100], got {value}")]
    ThresholdOutOfRange { field: &'static str, value: f64 },
    #[error("permitted_calls_in_half_open_state must be greater than 0")]
    NoHalfOpenCalls,
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("{field} must be a finite, non-negative number of seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("{field} must be within [0, 1], got {value}")]
    InvalidJitter { field: &'static str, value: f64 },
    #[error("backoff_multiplier must be at least 1.0, got {0}")]
    InvalidMultiplier(f64),
    #[error("invalid configuration document: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}
