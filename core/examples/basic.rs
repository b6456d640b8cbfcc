//! Basic circuit breaker and retry usage example

use resilience_machines::{CircuitError, Registry};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
enum HttpError {
    BadRequest,
    ServerError(u16),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest => write!(f, "400 Bad Request"),
            HttpError::ServerError(code) => write!(f, "{} Server Error", code),
        }
    }
}

fn main() {
    println!("=== Circuit Breaker Basic Example ===\n");

    let registry = Registry::new();
    let circuit = registry.circuit_breaker_with("payment_api", |builder| {
        builder
            .sliding_window_size(4)
            .wait_duration_in_open_state_secs(5.0)
            .ignore_errors(|ctx| matches!(ctx.downcast_ref::<HttpError>(), Some(HttpError::BadRequest)))
            .on_open(|name| println!("🔴 Circuit '{}' opened!", name))
            .on_close(|name| println!("🟢 Circuit '{}' closed!", name))
            .on_half_open(|name| println!("🟡 Circuit '{}' half-open, testing...", name))
    });

    println!("Initial state: {}\n", circuit.state_name());

    // Client errors are returned but never counted
    println!("--- Ignored client errors ---");
    for _ in 1..=3 {
        match circuit.call(|| Err::<String, _>(HttpError::BadRequest)) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {} ({} buffered calls)\n", circuit.state_name(), circuit.buffered_calls());

    // Server errors fill the window and trip the circuit
    println!("--- Triggering failures ---");
    for _ in 1..=4 {
        match circuit.call(|| Err::<String, _>(HttpError::ServerError(500))) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!(
        "State: {} (failure rate {:?}%)\n",
        circuit.state_name(),
        circuit.failure_rate()
    );

    // Try calling while open
    println!("--- Attempting call while open ---");
    match circuit.call(|| Ok::<_, HttpError>("Should be rejected")) {
        Err(CircuitError::CallNotPermitted { circuit, state }) => {
            println!("✗ rejected by '{}' in state {}", circuit, state)
        }
        other => println!("unexpected: {:?}", other),
    }
    println!();

    // Reset and retry a flaky call
    println!("--- Retrying after reset ---");
    registry.reset_circuit_breaker("payment_api");
    let retry = registry.retry_with_config(
        "payment_api",
        resilience_machines::RetryConfig {
            max_attempts: 3,
            wait_duration_secs: 0.1,
            ..Default::default()
        },
    );

    let attempts = AtomicUsize::new(0);
    let result = circuit.call_with_retry(&retry, || {
        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(HttpError::ServerError(503))
        } else {
            Ok("Payment successful")
        }
    });
    match result {
        Ok(message) => println!("✓ {} after {} attempts", message, attempts.load(Ordering::SeqCst)),
        Err(e) => println!("✗ {}", e),
    }
    println!("State: {}", circuit.state_name());
}
