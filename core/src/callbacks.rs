//! Callback system for circuit breaker events

use std::sync::Arc;

type CircuitCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for circuit breaker events
///
/// Callbacks run on the calling thread after the breaker's lock is released,
/// so they may query the breaker they belong to.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<CircuitCallback>,
    pub on_close: Option<CircuitCallback>,
    pub on_half_open: Option<CircuitCallback>,
    pub on_call_not_permitted: Option<CircuitCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger_open(&self, circuit: &str) {
        if let Some(ref callback) = self.on_open {
            callback(circuit);
        }
    }

    pub fn trigger_close(&self, circuit: &str) {
        if let Some(ref callback) = self.on_close {
            callback(circuit);
        }
    }

    pub fn trigger_half_open(&self, circuit: &str) {
        if let Some(ref callback) = self.on_half_open {
            callback(circuit);
        }
    }

    pub fn trigger_call_not_permitted(&self, circuit: &str) {
        if let Some(ref callback) = self.on_call_not_permitted {
            callback(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("on_call_not_permitted", &self.on_call_not_permitted.is_some())
            .finish()
    }
}
