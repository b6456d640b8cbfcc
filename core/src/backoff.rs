//! Delay computation for retry waits and the open-state timeout
//!
//! Jitter follows the chrono-machines formula:
//! `delay * (1 - jitter + rand * jitter)`.

/// Apply jitter to a delay in seconds
///
/// A `jitter_factor` of 0.0 returns the delay unchanged.
pub fn jittered_secs(delay_secs: f64, jitter_factor: f64) -> f64 {
    if jitter_factor <= 0.0 || delay_secs <= 0.0 {
        return delay_secs;
    }

    let delay_ms = (delay_secs * 1000.0) as u64;
    let policy = chrono_machines::Policy {
        max_attempts: 1,
        base_delay_ms: delay_ms,
        multiplier: 1.0,
        max_delay_ms: delay_ms,
    };
    let jittered_ms = policy.calculate_delay(1, jitter_factor);
    (jittered_ms as f64) / 1000.0
}

/// Un-jittered wait before retry number `retry` (1-based)
///
/// `base * multiplier^(retry - 1)`, capped at `max_secs`.
pub fn exponential_secs(base_secs: f64, multiplier: f64, max_secs: f64, retry: usize) -> f64 {
    let exponent = retry.saturating_sub(1).min(i32::MAX as usize) as i32;
    let delay = base_secs * multiplier.powi(exponent);
    if delay.is_finite() {
        delay.min(max_secs)
    } else {
        max_secs
    }
}
