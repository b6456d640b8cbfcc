//! Count-based sliding window of recent call outcomes
//!
//! The window keeps the last `capacity` non-ignored calls in a ring buffer and
//! maintains running failure and slow-call counts, so rates are O(1) to read.

use crate::{Event, EventKind, Outcome};
use std::collections::VecDeque;

/// Fixed-capacity ring buffer of recorded calls
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    events: VecDeque<Event>,
    capacity: usize,
    slow_threshold_secs: f64,
    failures: usize,
    slow_calls: usize,
}

impl SlidingWindow {
    /// Create a window holding at most `capacity` calls
    ///
    /// Failures lasting at least `slow_threshold_secs` also count as slow calls.
    pub fn new(capacity: usize, slow_threshold_secs: f64) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            slow_threshold_secs,
            failures: 0,
            slow_calls: 0,
        }
    }

    /// Record an outcome at monotonic time `now`
    ///
    /// Ignored outcomes leave the window untouched.
    pub fn record(&mut self, outcome: Outcome, now: f64) {
        let (kind, duration, slow) = match outcome {
            Outcome::Ignored => return,
            Outcome::Success(duration) => (EventKind::Success, duration, false),
            Outcome::Slow(duration) => (EventKind::Success, duration, true),
            Outcome::RecordedFailure(duration) => (
                EventKind::Failure,
                duration,
                duration >= self.slow_threshold_secs,
            ),
        };

        if self.capacity == 0 {
            return;
        }

        if self.events.len() == self.capacity
            && let Some(evicted) = self.events.pop_front()
        {
            self.forget(&evicted);
        }

        if kind == EventKind::Failure {
            self.failures += 1;
        }
        if slow {
            self.slow_calls += 1;
        }

        self.events.push_back(Event {
            kind,
            timestamp: now,
            duration,
            slow,
        });
    }

    fn forget(&mut self, event: &Event) {
        if event.kind == EventKind::Failure {
            self.failures -= 1;
        }
        if event.slow {
            self.slow_calls -= 1;
        }
    }

    /// Failure percentage, or `None` until enough calls are buffered
    ///
    /// `minimum_calls` is capped at the window capacity, so a full window is
    /// always measurable.
    pub fn failure_rate(&self, minimum_calls: usize) -> Option<f64> {
        self.rate(self.failures, minimum_calls)
    }

    /// Slow-call percentage, or `None` until enough calls are buffered
    pub fn slow_call_rate(&self, minimum_calls: usize) -> Option<f64> {
        self.rate(self.slow_calls, minimum_calls)
    }

    fn rate(&self, count: usize, minimum_calls: usize) -> Option<f64> {
        let calls = self.events.len();
        if calls == 0 || calls < minimum_calls.min(self.capacity) {
            return None;
        }
        Some(count as f64 / calls as f64 * 100.0)
    }

    /// Clear all buffered calls
    pub fn reset(&mut self) {
        self.events.clear();
        self.failures = 0;
        self.slow_calls = 0;
    }

    /// Number of buffered calls
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered failures
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Number of buffered slow calls
    pub fn slow_calls(&self) -> usize {
        self.slow_calls
    }

    /// Most recent events, oldest first, limited to `limit`
    pub fn event_log(&self, limit: usize) -> Vec<Event> {
        let start = self.events.len().saturating_sub(limit);
        self.events.iter().skip(start).cloned().collect()
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(100, 60.0)
    }
}
