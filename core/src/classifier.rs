//! Outcome classification for breaker accounting
//!
//! Decides whether a finished call counts as a success, a recorded failure,
//! or an ignored failure. Errors are inspected through `&dyn Any`, so one
//! breaker can protect operations with different error types.

use crate::Outcome;
use std::any::Any;
use std::sync::Arc;

/// Context provided to error predicates
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// Duration of the failed call in seconds
    pub duration: f64,
}

impl FailureContext<'_> {
    /// Downcast the error to a concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.error.downcast_ref::<T>()
    }
}

/// Shared error predicate
pub type ErrorPredicate = Arc<dyn Fn(&FailureContext<'_>) -> bool + Send + Sync>;

/// Classifies call results using an ignore predicate and a record predicate
///
/// Rules, in order:
/// 1. success is `Success`, or `Slow` when it took at least the slow threshold
/// 2. an error matching `ignore_errors` is `Ignored`
/// 3. an error matching `record_errors` is `RecordedFailure`
/// 4. any other error counts as a success
///
/// # Examples
///
/// ```rust
/// use resilience_machines::{Outcome, OutcomeClassifier};
///
/// #[derive(Debug)]
/// enum HttpError {
///     Client(u16),
///     Server(u16),
/// }
///
/// // Client errors (4xx) say nothing about the health of the downstream
/// let classifier = OutcomeClassifier::new()
///     .ignore_errors(|ctx| matches!(ctx.downcast_ref::<HttpError>(), Some(HttpError::Client(_))));
///
/// let ignored = classifier.classify::<(), _>("api", &Err(HttpError::Client(404)), 0.1, 60.0);
/// let failed = classifier.classify::<(), _>("api", &Err(HttpError::Server(500)), 0.1, 60.0);
///
/// assert_eq!(ignored, Outcome::Ignored);
/// assert_eq!(failed, Outcome::RecordedFailure(0.1));
/// ```
#[derive(Clone)]
pub struct OutcomeClassifier {
    ignore: Option<ErrorPredicate>,
    record: Option<ErrorPredicate>,
}

impl OutcomeClassifier {
    /// Classifier that records every error
    pub fn new() -> Self {
        Self {
            ignore: None,
            record: None,
        }
    }

    /// Errors matching the predicate never count toward the failure rate
    pub fn ignore_errors<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.ignore = Some(Arc::new(predicate));
        self
    }

    /// Only errors matching the predicate count as failures
    pub fn record_errors<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.record = Some(Arc::new(predicate));
        self
    }

    /// Classify an error alone
    pub fn classify_error(&self, ctx: &FailureContext<'_>) -> Outcome {
        if let Some(ignore) = &self.ignore
            && ignore(ctx)
        {
            return Outcome::Ignored;
        }

        let recorded = self.record.as_ref().is_none_or(|record| record(ctx));
        if recorded {
            Outcome::RecordedFailure(ctx.duration)
        } else {
            Outcome::Success(ctx.duration)
        }
    }

    /// Classify a finished call
    pub fn classify<T, E: 'static>(
        &self,
        circuit_name: &str,
        result: &Result<T, E>,
        duration: f64,
        slow_threshold_secs: f64,
    ) -> Outcome {
        match result {
            Ok(_) if duration >= slow_threshold_secs => Outcome::Slow(duration),
            Ok(_) => Outcome::Success(duration),
            Err(e) => self.classify_error(&FailureContext {
                circuit_name,
                error: e as &dyn Any,
                duration,
            }),
        }
    }
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutcomeClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeClassifier")
            .field("ignore_errors", &self.ignore.as_ref().map(|_| "<closure>"))
            .field("record_errors", &self.record.as_ref().map(|_| "<closure>"))
            .finish()
    }
}
