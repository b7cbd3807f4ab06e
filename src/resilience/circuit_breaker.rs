//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a bounded number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive_failures >= max_failures
//! Open → Half-Open:   first call after open_timeout (evaluated lazily, no timer)
//! Half-Open → Closed: a probe succeeds
//! Half-Open → Open:   a probe fails (open_timeout clock restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency, one mutex per breaker
//! - The wrapped work runs outside the lock; only bookkeeping is serialized
//! - Rejection is immediate, never queued
//! - A single successful probe closes the circuit

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Time spent open before a probe is allowed.
    pub open_timeout: Duration,
    /// Concurrent probes allowed while half-open.
    pub max_half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_timeout: Duration::from_secs(30),
            max_half_open_requests: 1,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejected: u64,
    pub consecutive_failures: u32,
    pub state_transitions: u64,
    pub half_open_in_flight: u32,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was refused without running the work.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The work ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True when the work was never attempted.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The work's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

/// Callback fired after a call-driven state transition: `(name, from, to)`.
pub type StateListener = Arc<dyn Fn(&str, BreakerState, BreakerState) + Send + Sync>;

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    /// Bumped on every transition and reset; stale outcomes are ignored.
    epoch: u64,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
    total_rejected: u64,
    state_transitions: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_in_flight: 0,
            epoch: 0,
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
            total_rejected: 0,
            state_transitions: 0,
        }
    }

    fn transition(&mut self, to: BreakerState, now: Instant) -> (BreakerState, BreakerState) {
        let from = self.state;
        self.state = to;
        self.epoch += 1;
        self.state_transitions += 1;
        self.half_open_in_flight = 0;
        match to {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
            }
            BreakerState::Open => self.opened_at = Some(now),
            BreakerState::HalfOpen => self.opened_at = None,
        }
        (from, to)
    }
}

/// Admission ticket for one call. Releases its probe slot if dropped unfinished.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    probe: bool,
    finished: bool,
}

impl Admission<'_> {
    fn finish(mut self, success: bool) {
        self.finished = true;
        self.breaker.record(self.epoch, self.probe, success);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.finished && self.probe {
            let mut inner = self.breaker.lock();
            if inner.epoch == self.epoch {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

/// A per-dependency circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    listener: Option<StateListener>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
            listener: None,
        }
    }

    /// Attach a state-change listener.
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Run async `work` through the breaker.
    ///
    /// The work runs on the caller's task. If the returned future is dropped
    /// before the work completes, the call counts as neither success nor
    /// failure, and a half-open probe slot is released.
    pub async fn call<F, Fut, T, E>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(admission) = self.admit() else {
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        };
        let result = work().await;
        admission.finish(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    /// Run blocking `work` through the breaker.
    pub fn call_sync<F, T, E>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let Some(admission) = self.admit() else {
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        };
        let result = work();
        admission.finish(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    /// Current state. An elapsed open timeout is reported as `Open` until
    /// the next call probes.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock();
        BreakerMetrics {
            state: inner.state,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejected: inner.total_rejected,
            consecutive_failures: inner.consecutive_failures,
            state_transitions: inner.state_transitions,
            half_open_in_flight: inner.half_open_in_flight,
        }
    }

    /// Force the circuit closed and clear all counters.
    ///
    /// Counters are "since last reset". Calls still in flight from before the
    /// reset update nothing but the totals.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let epoch = inner.epoch + 1;
        *inner = Inner::new();
        inner.epoch = epoch;
        drop(inner);

        metrics::record_breaker_state(&self.name, BreakerState::Closed);
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Option<Admission<'_>> {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut changed = None;

        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(Duration::MAX);
            if elapsed >= self.config.open_timeout {
                changed = Some(inner.transition(BreakerState::HalfOpen, now));
            }
        }

        let admitted = match inner.state {
            BreakerState::Closed => Some(false),
            BreakerState::Open => None,
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight < self.config.max_half_open_requests {
                    inner.half_open_in_flight += 1;
                    Some(true)
                } else {
                    None
                }
            }
        };

        let admission = match admitted {
            Some(probe) => {
                inner.total_requests += 1;
                Some(Admission {
                    breaker: self,
                    epoch: inner.epoch,
                    probe,
                    finished: false,
                })
            }
            None => {
                inner.total_rejected += 1;
                None
            }
        };
        drop(inner);

        if let Some((from, to)) = changed {
            self.notify(from, to);
        }
        if admission.is_none() {
            metrics::record_breaker_rejected(&self.name);
            tracing::debug!(breaker = %self.name, "Call rejected, circuit open");
        }
        admission
    }

    fn record(&self, epoch: u64, probe: bool, success: bool) {
        let now = Instant::now();
        let mut inner = self.lock();

        if success {
            inner.total_successes += 1;
        } else {
            inner.total_failures += 1;
        }

        if inner.epoch != epoch {
            return;
        }

        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        let changed = match (inner.state, success) {
            (BreakerState::Closed, true) => {
                inner.consecutive_failures = 0;
                None
            }
            (BreakerState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.max_failures {
                    Some(inner.transition(BreakerState::Open, now))
                } else {
                    None
                }
            }
            (BreakerState::HalfOpen, true) => Some(inner.transition(BreakerState::Closed, now)),
            (BreakerState::HalfOpen, false) => {
                inner.consecutive_failures += 1;
                Some(inner.transition(BreakerState::Open, now))
            }
            (BreakerState::Open, _) => None,
        };
        drop(inner);

        if let Some((from, to)) = changed {
            self.notify(from, to);
        }
    }

    fn notify(&self, from: BreakerState, to: BreakerState) {
        match to {
            BreakerState::Open => {
                tracing::warn!(breaker = %self.name, from = %from, "Circuit opened")
            }
            _ => tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit state changed"),
        }
        metrics::record_breaker_state(&self.name, to);
        if let Some(listener) = &self.listener {
            listener(&self.name, from, to);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
