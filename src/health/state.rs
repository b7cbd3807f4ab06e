//! Backend health state machine.
//!
//! # States
//! - Unknown: not probed enough to decide; treated as healthy
//! - Healthy: probes are passing
//! - Unhealthy: probes are failing
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Each mark returns the transition it caused, so the caller can announce it once

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A state change caused by one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
}

/// Health of one backend.
#[derive(Debug)]
pub struct BackendHealth {
    name: String,
    healthy_threshold: usize,
    unhealthy_threshold: usize,
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

impl BackendHealth {
    pub fn new(name: impl Into<String>, healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            name: name.into(),
            healthy_threshold: healthy_threshold.max(1) as usize,
            unhealthy_threshold: unhealthy_threshold.max(1) as usize,
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Healthy or Unknown.
    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Record a passing probe.
    pub fn mark_success(&self) -> Option<Transition> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.state() == HealthState::Healthy {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= self.healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            return self.transition_to(HealthState::Healthy);
        }
        None
    }

    /// Record a failing probe.
    pub fn mark_failure(&self) -> Option<Transition> {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        if self.state() == HealthState::Unhealthy {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.unhealthy_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return self.transition_to(HealthState::Unhealthy);
        }
        None
    }

    fn transition_to(&self, to: HealthState) -> Option<Transition> {
        let from = HealthState::from(self.state.swap(to as u8, Ordering::Relaxed));
        (from != to).then_some(Transition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_consecutive_results_to_flip() {
        let health = BackendHealth::new("legacy", 2, 3);
        assert_eq!(health.state(), HealthState::Unknown);
        assert!(health.is_healthy());

        assert_eq!(health.mark_success(), None);
        assert_eq!(
            health.mark_success(),
            Some(Transition {
                from: HealthState::Unknown,
                to: HealthState::Healthy
            })
        );

        assert_eq!(health.mark_failure(), None);
        assert_eq!(health.mark_failure(), None);
        // a success in between restarts the failure count
        assert_eq!(health.mark_success(), None);
        assert_eq!(health.mark_failure(), None);
        assert_eq!(health.mark_failure(), None);
        assert_eq!(
            health.mark_failure(),
            Some(Transition {
                from: HealthState::Healthy,
                to: HealthState::Unhealthy
            })
        );
        assert!(!health.is_healthy());
        assert_eq!(health.mark_failure(), None);
    }
}
