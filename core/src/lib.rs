//! ResilienceMachines - circuit breaker and retry decorators
//!
//! This crate provides a call-protection layer with:
//! - A count-based sliding window tracking failure and slow-call rates
//! - State machine for circuit breaker lifecycle (Closed → Open → HalfOpen)
//! - Retry policy with fixed or exponential backoff and optional jitter
//! - Predicate-based classification of errors (ignored, recorded, retryable)
//! - A registry of named breakers and retries, created once per name
//!
//! # Example
//!
//! ```rust
//! use resilience_machines::{CircuitBreaker, CircuitError, Retry};
//!
//! let breaker = CircuitBreaker::builder("my_service")
//!     .sliding_window_size(10)
//!     .failure_rate_threshold(50.0)
//!     .wait_duration_in_open_state_secs(30.0)
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build();
//!
//! let retry = Retry::builder("my_service")
//!     .max_attempts(3)
//!     .wait_duration_secs(0.01)
//!     .build();
//!
//! // Execute with circuit protection, retrying transient errors
//! let result = breaker.call_with_retry(&retry, || Ok::<_, String>("success"));
//! assert_eq!(result.unwrap(), "success");
//!
//! // Rejections are distinguishable from operation errors
//! if let Err(CircuitError::CallNotPermitted { circuit, .. }) =
//!     breaker.call(|| Ok::<_, String>("again"))
//! {
//!     println!("{} is not accepting calls", circuit);
//! }
//! ```

pub mod backoff;
pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod registry;
pub mod retry;
pub mod window;

pub use builder::{CircuitBuilder, RetryBuilder};
pub use circuit::{CircuitBreaker, Config};
pub use classifier::{FailureContext, OutcomeClassifier};
pub use config::RegistryConfig;
pub use errors::{CircuitError, ConfigError};
pub use registry::Registry;
pub use retry::{Retry, RetryConfig, RetryPredicate};
pub use window::SlidingWindow;

/// Observable circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    pub(crate) fn from_name(name: &str) -> Self {
        match name {
            "Open" => State::Open,
            "HalfOpen" => State::HalfOpen,
            _ => State::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "Closed",
            State::Open => "Open",
            State::HalfOpen => "HalfOpen",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event type stored in the sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Success,
    Failure,
}

/// A single call recorded by the sliding window
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: f64,
    pub duration: f64,
    /// Whether the call ran at or above the slow-call duration threshold
    pub slow: bool,
}

/// Classified result of one decorated call
///
/// Durations are in seconds. A recorded failure carries its duration so the
/// window can also count it as slow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Call succeeded within the slow-call threshold
    Success(f64),
    /// Call failed with an error that counts toward the failure rate
    RecordedFailure(f64),
    /// Call failed with an error excluded from breaker accounting
    Ignored,
    /// Call succeeded but took at least the slow-call threshold
    Slow(f64),
}
