//! Circuit breaker implementation using state machines
//!
//! This module provides the breaker state machine and the call decorator
//! that wraps operations with permission checks and outcome recording.

use crate::{
    Event, Outcome, backoff, callbacks::Callbacks, classifier::OutcomeClassifier,
    errors::{CircuitError, ConfigError},
    retry::Retry,
    window::SlidingWindow,
};
use parking_lot::Mutex;
use serde::Deserialize;
use state_machines::state_machine;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of most recent calls kept in the sliding window
    pub sliding_window_size: usize,

    /// Failure percentage (0-100] at or above which the circuit opens
    pub failure_rate_threshold: f64,

    /// Calls required before rates are evaluated; defaults to the window size
    pub minimum_number_of_calls: Option<usize>,

    /// Seconds to stay Open before permitting trial calls
    pub wait_duration_in_open_state_secs: f64,

    /// Number of trial calls permitted in HalfOpen
    pub permitted_calls_in_half_open_state: usize,

    /// Calls lasting at least this many seconds count as slow
    pub slow_call_duration_threshold_secs: f64,

    /// Slow-call percentage (0-100] at or above which the circuit opens
    pub slow_call_rate_threshold: f64,

    /// Jitter factor for the open-state wait (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: wait * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,

    /// Decides which errors are ignored and which are recorded
    #[serde(skip)]
    pub classifier: OutcomeClassifier,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sliding_window_size: 100,
            failure_rate_threshold: 50.0,
            minimum_number_of_calls: None,
            wait_duration_in_open_state_secs: 60.0,
            permitted_calls_in_half_open_state: 10,
            slow_call_duration_threshold_secs: 60.0,
            slow_call_rate_threshold: 100.0,
            jitter_factor: 0.0,
            classifier: OutcomeClassifier::default(),
        }
    }
}

impl Config {
    /// Effective minimum number of calls, capped at the window size
    pub fn minimum_calls(&self) -> usize {
        self.minimum_number_of_calls
            .unwrap_or(self.sliding_window_size)
            .min(self.sliding_window_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sliding_window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        check_percentage("failure_rate_threshold", self.failure_rate_threshold)?;
        check_percentage("slow_call_rate_threshold", self.slow_call_rate_threshold)?;
        if self.permitted_calls_in_half_open_state == 0 {
            return Err(ConfigError::NoHalfOpenCalls);
        }
        check_secs(
            "wait_duration_in_open_state_secs",
            self.wait_duration_in_open_state_secs,
        )?;
        check_secs(
            "slow_call_duration_threshold_secs",
            self.slow_call_duration_threshold_secs,
        )?;
        check_jitter("jitter_factor", self.jitter_factor)
    }

    /// True when either rate is measurable and at or above its threshold
    fn exceeded(&self, failure_rate: Option<f64>, slow_call_rate: Option<f64>) -> bool {
        failure_rate.is_some_and(|rate| rate >= self.failure_rate_threshold)
            || slow_call_rate.is_some_and(|rate| rate >= self.slow_call_rate_threshold)
    }
}

fn check_percentage(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 100.0 {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { field, value })
    }
}

pub(crate) fn check_secs(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDuration { field, value })
    }
}

pub(crate) fn check_jitter(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidJitter { field, value })
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Debug, Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub window: Arc<Mutex<SlidingWindow>>,
    /// Monotonic time anchor (prevents clock skew issues from NTP)
    start_time: Instant,
}

impl CircuitContext {
    pub fn new(name: String, config: Config) -> Self {
        let window = SlidingWindow::new(
            config.sliding_window_size,
            config.slow_call_duration_threshold_secs,
        );
        Self {
            name,
            config,
            window: Arc::new(Mutex::new(window)),
            start_time: Instant::now(),
        }
    }

    /// Seconds since the breaker was created
    pub fn monotonic_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self::new(String::new(), Config::default())
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: f64,
    /// Wait in effect for this opening, jitter included
    pub wait_secs: f64,
}

/// Data specific to the HalfOpen state: the trial batch
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    /// Trial calls handed out so far
    pub permitted: usize,
    /// Trial outcomes recorded so far
    pub calls: usize,
    pub failures: usize,
    pub slow_calls: usize,
}

impl HalfOpenData {
    fn record(&mut self, outcome: Outcome, slow_threshold_secs: f64) {
        match outcome {
            // Ignored trial calls give their slot back
            Outcome::Ignored => self.permitted = self.permitted.saturating_sub(1),
            Outcome::Success(_) => self.calls += 1,
            Outcome::Slow(_) => {
                self.calls += 1;
                self.slow_calls += 1;
            }
            Outcome::RecordedFailure(duration) => {
                self.calls += 1;
                self.failures += 1;
                if duration >= slow_threshold_secs {
                    self.slow_calls += 1;
                }
            }
        }
    }

    fn rate(&self, count: usize, config: &Config) -> Option<f64> {
        (self.calls > 0 && self.calls >= config.permitted_calls_in_half_open_state)
            .then(|| count as f64 / self.calls as f64 * 100.0)
    }

    fn failure_rate(&self, config: &Config) -> Option<f64> {
        self.rate(self.failures, config)
    }

    fn slow_call_rate(&self, config: &Config) -> Option<f64> {
        self.rate(self.slow_calls, config)
    }

    fn batch_complete(&self, config: &Config) -> bool {
        self.calls >= config.permitted_calls_in_half_open_state
    }
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,  // Enable dynamic mode for runtime state transitions

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

// Guards for dynamic mode - implemented on typestate machines
impl Circuit<Closed> {
    /// Check the sliding window against the failure and slow-call thresholds
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        let minimum = ctx.config.minimum_calls();
        let window = ctx.window.lock();
        ctx.config.exceeded(
            window.failure_rate(minimum),
            window.slow_call_rate(minimum),
        )
    }
}

impl Circuit<HalfOpen> {
    /// Trial batch complete and its rates exceed a threshold
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open().is_some_and(|data| {
            data.batch_complete(&ctx.config)
                && ctx.config.exceeded(
                    data.failure_rate(&ctx.config),
                    data.slow_call_rate(&ctx.config),
                )
        })
    }

    /// Trial batch complete and its rates stay below the thresholds
    fn should_close(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open().is_some_and(|data| {
            data.batch_complete(&ctx.config)
                && !ctx.config.exceeded(
                    data.failure_rate(&ctx.config),
                    data.slow_call_rate(&ctx.config),
                )
        })
    }
}

impl Circuit<Open> {
    /// Check if the open-state wait has elapsed for Open -> HalfOpen transition
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open()
            .is_some_and(|data| ctx.monotonic_time() - data.opened_at >= data.wait_secs)
    }
}

/// The state machine plus a counter bumped on every transition
///
/// A permit remembers the epoch it was issued in, so outcomes of calls that
/// started before a transition can be told apart from current ones.
struct Lifecycle {
    circuit: DynamicCircuit,
    epoch: u64,
}

impl Lifecycle {
    fn new(context: CircuitContext) -> Self {
        Self {
            circuit: DynamicCircuit::new(context),
            epoch: 0,
        }
    }
}

/// Transition made under the lock, announced after it is released
enum Transition {
    Opened { wait_secs: f64 },
    HalfOpened,
    Closed,
}

/// Circuit breaker public API
///
/// All bookkeeping (permission, recording, transitions) happens under one
/// mutex per breaker. The wrapped operation, callbacks and transition logs
/// all run outside of it.
pub struct CircuitBreaker {
    lifecycle: Mutex<Lifecycle>,
    context: CircuitContext,
    callbacks: Callbacks,
}

impl CircuitBreaker {
    /// Create a new circuit breaker (use builder() for more options)
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid; use
    /// [`CircuitBuilder::try_build`](crate::builder::CircuitBuilder::try_build)
    /// to handle that case.
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        Self::builder(name).config(config).build()
    }

    /// Create a circuit breaker with custom context and callbacks (used by builder)
    pub(crate) fn with_context_and_callbacks(
        context: CircuitContext,
        callbacks: Callbacks,
    ) -> Self {
        let lifecycle = Lifecycle::new(context.clone());

        Self {
            lifecycle: Mutex::new(lifecycle),
            context,
            callbacks,
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Rejected calls never invoke `f` and are not recorded. Otherwise the
    /// result is classified, recorded, and returned with the operation's
    /// error untouched inside `CircuitError::Execution`.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        E: 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let epoch = self.acquire_permission()?;

        let start = self.context.monotonic_time();
        let result = f();
        let duration = self.context.monotonic_time() - start;

        let outcome = self.context.config.classifier.classify(
            &self.context.name,
            &result,
            duration,
            self.context.config.slow_call_duration_threshold_secs,
        );
        self.record(Some(epoch), outcome);

        result.map_err(CircuitError::Execution)
    }

    /// Execute through `retry`, recording only the retry's final result
    pub fn call_with_retry<T, E, F>(&self, retry: &Retry, f: F) -> Result<T, CircuitError<E>>
    where
        E: 'static,
        F: FnMut() -> Result<T, E>,
    {
        self.call(move || retry.call(f))
    }

    /// Wrap an operation into a reusable protected closure
    pub fn decorate<T, E, F>(
        self: &Arc<Self>,
        mut f: F,
    ) -> impl FnMut() -> Result<T, CircuitError<E>> + use<T, E, F>
    where
        E: 'static,
        F: FnMut() -> Result<T, E>,
    {
        let breaker = Arc::clone(self);
        move || breaker.call(&mut f)
    }

    /// Wrap an operation with retry and circuit protection
    pub fn decorate_with_retry<T, E, F>(
        self: &Arc<Self>,
        retry: Arc<Retry>,
        mut f: F,
    ) -> impl FnMut() -> Result<T, CircuitError<E>> + use<T, E, F>
    where
        E: 'static,
        F: FnMut() -> Result<T, E>,
    {
        let breaker = Arc::clone(self);
        move || breaker.call_with_retry(&retry, &mut f)
    }

    /// Ask for permission to run one call
    ///
    /// Moves Open -> HalfOpen once the wait has elapsed. In HalfOpen a `true`
    /// answer reserves one trial slot, so the caller must report the call's
    /// result through [`record_outcome`](Self::record_outcome).
    pub fn is_call_permitted(&self) -> bool {
        self.try_permit().is_ok()
    }

    fn acquire_permission<E>(&self) -> Result<u64, CircuitError<E>> {
        self.try_permit()
            .map_err(|state| CircuitError::CallNotPermitted {
                circuit: self.context.name.clone(),
                state,
            })
    }

    /// Permit one call, returning the epoch it was permitted in
    fn try_permit(&self) -> Result<u64, crate::State> {
        let mut half_opened = false;
        let verdict = {
            let mut lifecycle = self.lifecycle.lock();

            // Check for timeout-based Open -> HalfOpen transition
            if lifecycle.circuit.current_state() == "Open"
                && lifecycle.circuit.handle(CircuitEvent::AttemptReset).is_ok()
            {
                lifecycle.epoch += 1;
                half_opened = true;
            }

            let epoch = lifecycle.epoch;
            match lifecycle.circuit.current_state() {
                "Closed" => Ok(epoch),
                "HalfOpen" => {
                    let limit = self.context.config.permitted_calls_in_half_open_state;
                    match lifecycle.circuit.half_open_data_mut() {
                        Some(data) if data.permitted < limit => {
                            data.permitted += 1;
                            Ok(epoch)
                        }
                        _ => Err(crate::State::HalfOpen),
                    }
                }
                _ => Err(crate::State::Open),
            }
        };

        if half_opened {
            self.announce(Transition::HalfOpened);
        }
        if let Err(state) = verdict {
            tracing::debug!(circuit = %self.context.name, %state, "call not permitted");
            self.callbacks.trigger_call_not_permitted(&self.context.name);
        }
        verdict
    }

    /// Record a classified outcome and evaluate transitions
    ///
    /// Used by callers that check permission through
    /// [`is_call_permitted`](Self::is_call_permitted) and execute on their
    /// own. The outcome is attributed to the current state.
    pub fn record_outcome(&self, outcome: Outcome) {
        self.record(None, outcome);
    }

    /// Record an outcome permitted in `permitted_in` (or now, when `None`)
    ///
    /// Outcomes permitted before the latest transition never count as
    /// half-open trials and never enter a window that was reset since.
    fn record(&self, permitted_in: Option<u64>, outcome: Outcome) {
        let transition = {
            let mut guard = self.lifecycle.lock();
            let lifecycle = &mut *guard;
            let current = permitted_in.is_none_or(|epoch| epoch == lifecycle.epoch);

            match lifecycle.circuit.current_state() {
                "HalfOpen" if current => {
                    let slow_threshold = self.context.config.slow_call_duration_threshold_secs;
                    if let Some(data) = lifecycle.circuit.half_open_data_mut() {
                        data.record(outcome, slow_threshold);
                    }

                    if lifecycle.circuit.handle(CircuitEvent::Trip).is_ok() {
                        Some(self.opened(lifecycle))
                    } else if lifecycle.circuit.handle(CircuitEvent::Close).is_ok() {
                        Some(self.closed(lifecycle))
                    } else {
                        None
                    }
                }
                "Closed" if current => {
                    self.context
                        .window
                        .lock()
                        .record(outcome, self.context.monotonic_time());

                    if outcome != Outcome::Ignored
                        && lifecycle.circuit.handle(CircuitEvent::Trip).is_ok()
                    {
                        Some(self.opened(lifecycle))
                    } else {
                        None
                    }
                }
                "Open" => {
                    // Calls permitted before the trip are kept for
                    // observability but never drive a transition
                    self.context
                        .window
                        .lock()
                        .record(outcome, self.context.monotonic_time());
                    None
                }
                _ => {
                    tracing::trace!(circuit = %self.context.name, "discarding outcome from an earlier state");
                    None
                }
            }
        };

        if let Some(transition) = transition {
            self.announce(transition);
        }
    }

    /// Open-state bookkeeping after a successful trip
    fn opened(&self, lifecycle: &mut Lifecycle) -> Transition {
        let config = &self.context.config;
        let wait_secs =
            backoff::jittered_secs(config.wait_duration_in_open_state_secs, config.jitter_factor);
        if let Some(data) = lifecycle.circuit.open_data_mut() {
            data.opened_at = self.context.monotonic_time();
            data.wait_secs = wait_secs;
        }
        lifecycle.epoch += 1;
        Transition::Opened { wait_secs }
    }

    /// Closed-state bookkeeping: stale history never survives a close
    fn closed(&self, lifecycle: &mut Lifecycle) -> Transition {
        self.context.window.lock().reset();
        lifecycle.epoch += 1;
        Transition::Closed
    }

    /// Log a transition and fire its callback; the lifecycle lock is not held
    fn announce(&self, transition: Transition) {
        let name = &self.context.name;
        match transition {
            Transition::Opened { wait_secs } => {
                tracing::warn!(circuit = %name, wait_secs, "circuit opened");
                self.callbacks.trigger_open(name);
            }
            Transition::HalfOpened => {
                tracing::info!(circuit = %name, "circuit half-open, permitting trial calls");
                self.callbacks.trigger_half_open(name);
            }
            Transition::Closed => {
                tracing::info!(circuit = %name, "circuit closed");
                self.callbacks.trigger_close(name);
            }
        }
    }

    /// Circuit name
    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Current state
    pub fn state(&self) -> crate::State {
        crate::State::from_name(self.state_name())
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.lifecycle.lock().circuit.current_state()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == crate::State::Open
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state() == crate::State::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == crate::State::HalfOpen
    }

    /// Current failure percentage, `None` while not yet measurable
    ///
    /// In HalfOpen this is the trial batch's rate once the batch is complete.
    pub fn failure_rate(&self) -> Option<f64> {
        let lifecycle = self.lifecycle.lock();
        if let Some(data) = lifecycle.circuit.half_open_data() {
            return data.failure_rate(&self.context.config);
        }
        self.context
            .window
            .lock()
            .failure_rate(self.context.config.minimum_calls())
    }

    /// Current slow-call percentage, `None` while not yet measurable
    pub fn slow_call_rate(&self) -> Option<f64> {
        let lifecycle = self.lifecycle.lock();
        if let Some(data) = lifecycle.circuit.half_open_data() {
            return data.slow_call_rate(&self.context.config);
        }
        self.context
            .window
            .lock()
            .slow_call_rate(self.context.config.minimum_calls())
    }

    /// Number of outcomes counted toward the current rates
    pub fn buffered_calls(&self) -> usize {
        let lifecycle = self.lifecycle.lock();
        if let Some(data) = lifecycle.circuit.half_open_data() {
            return data.calls;
        }
        self.context.window.lock().len()
    }

    /// Most recent calls in the sliding window, oldest first
    pub fn event_log(&self, limit: usize) -> Vec<Event> {
        self.context.window.lock().event_log(limit)
    }

    /// Clear all events and reset circuit to Closed state
    ///
    /// Calls still in flight when the reset happens are not recorded.
    pub fn reset(&self) {
        let mut lifecycle = self.lifecycle.lock();
        self.context.window.lock().reset();
        // Recreate machine in Closed state
        lifecycle.circuit = DynamicCircuit::new(self.context.clone());
        lifecycle.epoch += 1;
        drop(lifecycle);
        tracing::info!(circuit = %self.context.name, "circuit reset");
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state_name())
            .field("config", &self.context.config)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::FailureContext;
    use crate::registry::Registry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn window_of(size: usize) -> Config {
        Config {
            sliding_window_size: size,
            ..Default::default()
        }
    }

    /// Back-date the Open timestamp so the wait has already elapsed
    fn expire_open_wait(circuit: &CircuitBreaker) {
        let mut lifecycle = circuit.lifecycle.lock();
        let data = lifecycle
            .circuit
            .open_data_mut()
            .expect("Open data should be present");
        data.opened_at -= data.wait_secs + 1.0;
    }

    fn trip(circuit: &CircuitBreaker) {
        for _ in 0..circuit.config().sliding_window_size {
            let _ = circuit.call(|| Err::<(), _>("error"));
        }
        assert!(circuit.is_open());
    }

    #[test]
    fn test_circuit_breaker_creation() {
        let circuit = CircuitBreaker::new("test", Config::default());

        assert!(circuit.is_closed());
        assert!(!circuit.is_open());
        assert_eq!(circuit.state(), crate::State::Closed);
        assert_eq!(circuit.failure_rate(), None);
    }

    #[test]
    fn test_unfilled_window_never_trips() {
        let circuit = CircuitBreaker::new("test", window_of(10));

        for _ in 0..9 {
            let result = circuit.call(|| Err::<(), _>("500 Internal Server Error"));
            assert!(matches!(result, Err(CircuitError::Execution(_))));
        }

        assert!(circuit.is_closed());
        assert_eq!(circuit.failure_rate(), None);
        assert_eq!(circuit.buffered_calls(), 9);
    }

    #[test]
    fn test_opens_after_full_window_of_failures() {
        let circuit = CircuitBreaker::new("call-endpoint", window_of(10));

        for _ in 0..10 {
            let _ = circuit.call(|| Err::<(), _>("error"));
        }
        assert!(circuit.is_open());
        assert_eq!(circuit.failure_rate(), Some(100.0));

        let invoked = AtomicUsize::new(0);
        let result = circuit.call(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        });

        match result {
            Err(CircuitError::CallNotPermitted { circuit: name, state }) => {
                assert_eq!(name, "call-endpoint");
                assert_eq!(state, crate::State::Open);
            }
            other => panic!("Expected CallNotPermitted, got {:?}", other),
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        // Rejections are not outcomes
        assert_eq!(circuit.buffered_calls(), 10);
    }

    #[test]
    fn test_rate_based_threshold() {
        let circuit = CircuitBreaker::new("test", window_of(10));

        // 9 calls alternating success/failure - below minimum, stays closed
        for i in 0..9 {
            let _ = if i % 2 == 0 {
                circuit.call(|| Ok::<(), _>(()))
            } else {
                circuit.call(|| Err::<(), _>("error"))
            };
            assert!(circuit.is_closed(), "Circuit opened before minimum calls");
        }

        // 10th call makes 5 failures out of 10 = 50%
        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open(), "Circuit did not open at rate threshold");
    }

    #[test]
    fn test_below_threshold_stays_closed() {
        let circuit = CircuitBreaker::new("test", window_of(10));

        for i in 0..30 {
            let _ = if i % 3 == 0 {
                circuit.call(|| Err::<(), _>("error"))
            } else {
                circuit.call(|| Ok::<(), _>(()))
            };
        }

        assert!(circuit.is_closed());
        let rate = circuit.failure_rate().expect("window is full");
        assert!(rate < 50.0);
    }

    #[test]
    fn test_minimum_number_of_calls() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                sliding_window_size: 10,
                minimum_number_of_calls: Some(4),
                ..Default::default()
            },
        );

        for _ in 0..3 {
            let _ = circuit.call(|| Err::<(), _>("error"));
        }
        assert!(circuit.is_closed());

        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open());
    }

    #[test]
    fn test_ignored_errors_never_trip() {
        #[derive(Debug)]
        enum HttpError {
            Client(u16),
        }

        let config = Config {
            sliding_window_size: 10,
            classifier: OutcomeClassifier::new().ignore_errors(|ctx: &FailureContext<'_>| {
                ctx.downcast_ref::<HttpError>().is_some()
            }),
            ..Default::default()
        };
        let circuit = CircuitBreaker::new("call-endpoint", config);

        for _ in 0..10 {
            let result = circuit.call(|| Err::<(), _>(HttpError::Client(400)));
            match result {
                Err(CircuitError::Execution(HttpError::Client(code))) => assert_eq!(code, 400),
                other => panic!("Expected untouched client error, got {:?}", other),
            }
        }

        assert!(circuit.is_closed());
        assert_eq!(circuit.buffered_calls(), 0);

        // 11th call still reaches the operation
        let result = circuit.call(|| Ok::<_, HttpError>("reached"));
        assert_eq!(result.unwrap(), "reached");
    }

    #[test]
    fn test_slow_calls_trip() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                sliding_window_size: 2,
                slow_call_duration_threshold_secs: 0.0,
                slow_call_rate_threshold: 100.0,
                ..Default::default()
            },
        );

        // Every call is slow with a zero threshold
        let _ = circuit.call(|| Ok::<_, &str>(()));
        assert!(circuit.is_closed());
        let _ = circuit.call(|| Ok::<_, &str>(()));

        assert!(circuit.is_open());
        assert_eq!(circuit.slow_call_rate(), Some(100.0));
        assert_eq!(circuit.failure_rate(), Some(0.0));
    }

    #[test]
    fn test_open_to_half_open_after_wait() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                sliding_window_size: 2,
                wait_duration_in_open_state_secs: 0.02,
                ..Default::default()
            },
        );
        trip(&circuit);

        // No call permitted before the wait elapses
        assert!(!circuit.is_call_permitted());
        assert!(circuit.is_open());

        thread::sleep(Duration::from_millis(40));

        let result = circuit.call(|| Ok::<_, &str>("probe"));
        assert_eq!(result.unwrap(), "probe");
        assert!(circuit.is_half_open());
        assert_eq!(circuit.buffered_calls(), 1);
    }

    #[test]
    fn test_half_open_limits_trial_calls() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                sliding_window_size: 4,
                permitted_calls_in_half_open_state: 2,
                ..Default::default()
            },
        );
        trip(&circuit);
        expire_open_wait(&circuit);

        assert!(circuit.is_call_permitted());
        assert!(circuit.is_half_open());
        assert!(circuit.is_call_permitted());
        assert!(!circuit.is_call_permitted());

        let rejected = circuit.call(|| Ok::<_, &str>(()));
        match rejected {
            Err(CircuitError::CallNotPermitted { state, .. }) => assert_eq!(state, crate::State::HalfOpen),
            other => panic!("Expected CallNotPermitted, got {:?}", other),
        }

        circuit.record_outcome(Outcome::Success(0.0));
        assert!(circuit.is_half_open());
        circuit.record_outcome(Outcome::Success(0.0));
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_half_open_failures_reopen() {
        let opened = Arc::new(AtomicUsize::new(0));
        let opened_clone = Arc::clone(&opened);

        let circuit = CircuitBreaker::builder("test")
            .sliding_window_size(4)
            .permitted_calls_in_half_open_state(2)
            .on_open(move |_| {
                opened_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        trip(&circuit);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        expire_open_wait(&circuit);

        let _ = circuit.call(|| Ok::<(), &str>(()));
        assert!(circuit.is_half_open());
        let _ = circuit.call(|| Err::<(), _>("still down"));

        // 1 of 2 trial calls failed = 50%
        assert!(circuit.is_open());
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert!(!circuit.is_call_permitted());
    }

    #[test]
    fn test_half_open_ignored_errors_release_slot() {
        let config = Config {
            sliding_window_size: 2,
            permitted_calls_in_half_open_state: 1,
            classifier: OutcomeClassifier::new()
                .ignore_errors(|ctx| ctx.downcast_ref::<&str>() == Some(&"bad request")),
            ..Default::default()
        };
        let circuit = CircuitBreaker::new("test", config);
        trip(&circuit);
        expire_open_wait(&circuit);

        let _ = circuit.call(|| Err::<(), _>("bad request"));
        assert!(circuit.is_half_open());

        // The slot was released, so another trial call is permitted
        let result = circuit.call(|| Ok::<_, &str>("ok"));
        assert!(result.is_ok());
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_close_resets_window() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                sliding_window_size: 4,
                permitted_calls_in_half_open_state: 1,
                ..Default::default()
            },
        );
        trip(&circuit);
        expire_open_wait(&circuit);

        let _ = circuit.call(|| Ok::<(), &str>(()));
        assert!(circuit.is_closed());
        assert_eq!(circuit.buffered_calls(), 0);
        assert_eq!(circuit.failure_rate(), None);

        // A single failure alone does not reopen the circuit
        let _ = circuit.call(|| Err::<(), _>("blip"));
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_reset_clears_state() {
        let circuit = CircuitBreaker::new("test", window_of(2));
        trip(&circuit);

        circuit.reset();
        assert!(circuit.is_closed());
        assert_eq!(circuit.buffered_calls(), 0);
        assert!(circuit.call(|| Ok::<_, &str>(())).is_ok());
    }

    #[test]
    fn test_jittered_wait_is_bounded() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                sliding_window_size: 1,
                wait_duration_in_open_state_secs: 1.0,
                jitter_factor: 0.25,
                ..Default::default()
            },
        );
        trip(&circuit);

        let wait = circuit
            .lifecycle
            .lock()
            .circuit
            .open_data()
            .expect("Open data should be present")
            .wait_secs;
        assert!((0.75 - 0.01..=1.0 + 0.01).contains(&wait), "wait {} out of bounds", wait);
    }

    #[test]
    fn test_reported_wait_is_the_stored_wait() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                sliding_window_size: 1,
                wait_duration_in_open_state_secs: 1.0,
                jitter_factor: 0.5,
                ..Default::default()
            },
        );
        trip(&circuit);

        let mut lifecycle = circuit.lifecycle.lock();
        let Transition::Opened { wait_secs } = circuit.opened(&mut lifecycle) else {
            panic!("Expected an Opened transition");
        };
        let stored = lifecycle
            .circuit
            .open_data()
            .expect("Open data should be present")
            .wait_secs;
        assert_eq!(wait_secs, stored);
    }

    #[test]
    fn test_decorate_reuses_operation() {
        let breaker = Arc::new(CircuitBreaker::new("test", window_of(3)));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut decorated = breaker.decorate(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("down")
        });

        for _ in 0..5 {
            let _ = decorated();
        }

        // Three calls trip the breaker, the remaining two are rejected
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(breaker.is_open());
    }

    #[test]
    fn test_call_with_retry_records_once() {
        let breaker = CircuitBreaker::new("test", window_of(10));
        let retry = Retry::builder("test")
            .max_attempts(3)
            .wait_duration_secs(0.0)
            .build();
        let attempts = AtomicUsize::new(0);

        let result = breaker.call_with_retry(&retry, || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("timeout")
            } else {
                Ok("hello")
            }
        });

        assert_eq!(result.unwrap(), "hello");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.buffered_calls(), 1);
        assert_eq!(breaker.event_log(10)[0].kind, crate::EventKind::Success);
    }

    #[test]
    fn test_concurrent_recording_is_consistent() {
        let breaker = Arc::new(CircuitBreaker::new("test", window_of(1000)));
        let mut handles = vec![];

        for t in 0..8 {
            let breaker = Arc::clone(&breaker);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let _ = if (t + i) % 4 == 0 {
                        breaker.call(|| Err::<(), _>("error"))
                    } else {
                        breaker.call(|| Ok::<(), &str>(()))
                    };
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(breaker.buffered_calls(), 400);
        let failures = breaker
            .event_log(1000)
            .iter()
            .filter(|e| e.kind == crate::EventKind::Failure)
            .count();
        assert_eq!(failures, 100);
        assert!(breaker.is_closed());
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());
        assert!(matches!(window_of(0).validate(), Err(ConfigError::EmptyWindow)));
        assert!(matches!(
            Config {
                failure_rate_threshold: 150.0,
                ..Default::default()
            }
            .validate(),
            Err(ConfigError::ThresholdOutOfRange { field: "failure_rate_threshold", .. })
        ));
        assert!(matches!(
            Config {
                wait_duration_in_open_state_secs: -1.0,
                ..Default::default()
            }
            .validate(),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "invalid circuit breaker configuration")]
    fn test_new_rejects_invalid_config() {
        let _ = CircuitBreaker::new(
            "test",
            Config {
                permitted_calls_in_half_open_state: 0,
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_callbacks_may_query_their_own_breaker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let open_seen = Arc::clone(&seen);
        let half_open_seen = Arc::clone(&seen);
        let rejected_seen = Arc::clone(&seen);
        let close_seen = Arc::clone(&seen);

        let breaker = Registry::global().circuit_breaker_with("reentrant-callbacks", |b| {
            b.sliding_window_size(1)
                .wait_duration_in_open_state_secs(0.0)
                .permitted_calls_in_half_open_state(1)
                .on_open(move |name| {
                    let state = Registry::global().circuit_breaker(name).state();
                    open_seen.lock().push(("open", state));
                })
                .on_half_open(move |name| {
                    let state = Registry::global().circuit_breaker(name).state();
                    half_open_seen.lock().push(("half_open", state));
                })
                .on_call_not_permitted(move |name| {
                    let state = Registry::global().circuit_breaker(name).state();
                    rejected_seen.lock().push(("rejected", state));
                })
                .on_close(move |name| {
                    let breaker = Registry::global().circuit_breaker(name);
                    close_seen.lock().push(("closed", breaker.state()));
                })
        });

        let _ = breaker.call(|| Err::<(), _>("down"));
        assert!(breaker.is_call_permitted());
        assert!(!breaker.is_call_permitted());
        breaker.record_outcome(Outcome::Success(0.0));

        assert_eq!(
            *seen.lock(),
            vec![
                ("open", crate::State::Open),
                ("half_open", crate::State::HalfOpen),
                ("rejected", crate::State::HalfOpen),
                ("closed", crate::State::Closed),
            ]
        );
    }

    #[test]
    fn test_late_outcomes_are_not_trial_calls() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                sliding_window_size: 2,
                permitted_calls_in_half_open_state: 2,
                wait_duration_in_open_state_secs: 0.0,
                ..Default::default()
            },
        );

        // Permitted while Closed, finishes only after the trip
        let late = circuit.try_permit().expect("Closed permits calls");
        let _ = circuit.call(|| Err::<(), _>("error"));
        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open());

        let trial = circuit.try_permit().expect("wait has elapsed");
        assert!(circuit.is_half_open());

        circuit.record(Some(late), Outcome::Success(0.0));
        assert!(circuit.is_half_open());
        assert_eq!(circuit.buffered_calls(), 0);

        circuit.record(Some(trial), Outcome::Success(0.0));
        assert!(circuit.is_half_open(), "closed after 1 of 2 trial calls");
        assert_eq!(circuit.buffered_calls(), 1);

        // Only the one remaining slot is available
        assert!(circuit.call(|| Ok::<_, &str>(())).is_ok());
        assert!(circuit.is_closed());

        // Nor does it reach the fresh window after closing
        circuit.record(Some(late), Outcome::RecordedFailure(0.1));
        assert_eq!(circuit.buffered_calls(), 0);
    }

    #[test]
    fn test_rejected_calls_are_not_retried() {
        let breaker = Arc::new(CircuitBreaker::new("test", window_of(1)));
        trip(&breaker);
        let retry = Arc::new(
            Retry::builder("test")
                .max_attempts(5)
                .wait_duration_secs(0.0)
                .build(),
        );
        let invoked = Arc::new(AtomicUsize::new(0));

        let result = breaker.call_with_retry(&retry, || {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        });
        match result {
            Err(CircuitError::CallNotPermitted { state, .. }) => assert_eq!(state, crate::State::Open),
            other => panic!("Expected CallNotPermitted, got {:?}", other),
        }

        let counter = Arc::clone(&invoked);
        let mut decorated = breaker.decorate_with_retry(Arc::clone(&retry), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("down")
        });
        assert!(decorated().unwrap_err().is_not_permitted());

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.buffered_calls(), 1);
    }
}
