//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a request is retryable (idempotent methods only)
//! - Enforce a retry budget (retries as a fraction of recent requests)
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Never retry a call the circuit breaker refused; the caller sees
//!   the rejection immediately
//! - Budget window rolls over so a past storm does not starve future retries

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use axum::http::{Method, StatusCode};
use tokio::time::Instant;

/// Whether a failed attempt may be retried.
///
/// `status` is the upstream status when a response arrived; `transport_error`
/// marks connection failures and timeouts.
pub fn is_retryable(method: &Method, status: Option<StatusCode>, transport_error: bool) -> bool {
    if !method.is_idempotent() {
        return false;
    }
    if transport_error {
        return true;
    }
    matches!(
        status,
        Some(StatusCode::BAD_GATEWAY)
            | Some(StatusCode::SERVICE_UNAVAILABLE)
            | Some(StatusCode::GATEWAY_TIMEOUT)
    )
}

#[derive(Debug)]
struct Window {
    started: Instant,
    requests: u64,
    retries: u64,
}

/// Limits retries to `ratio` of requests seen in the current window, with a
/// floor of `min_retries` so low traffic can still retry.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f32,
    min_retries: u64,
    window_len: Duration,
    window: Mutex<Window>,
}

impl RetryBudget {
    pub fn new(ratio: f32, min_retries: u64) -> Self {
        Self {
            ratio,
            min_retries,
            window_len: Duration::from_secs(10),
            window: Mutex::new(Window {
                started: Instant::now(),
                requests: 0,
                retries: 0,
            }),
        }
    }

    /// Count an original (non-retry) request.
    pub fn record_request(&self) {
        let mut window = self.current();
        window.requests += 1;
    }

    /// Consume one retry if the budget allows it.
    pub fn can_retry(&self) -> bool {
        let mut window = self.current();
        let allowed = ((window.requests as f64) * f64::from(self.ratio)) as u64;
        if window.retries < allowed.max(self.min_retries) {
            window.retries += 1;
            true
        } else {
            false
        }
    }

    fn current(&self) -> std::sync::MutexGuard<'_, Window> {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.started.elapsed() >= self.window_len {
            *window = Window {
                started: Instant::now(),
                requests: 0,
                retries: 0,
            };
        }
        window
    }
}
