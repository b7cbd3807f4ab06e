//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → registry.rs (breaker for the dependency name, created lazily)
//!     → circuit_breaker.rs (admit, short-circuit, or probe)
//!     → timeouts.rs (deadline inside the wrapped work)
//!     → On failure: retries.rs (idempotent only, budgeted, backoff.rs delay)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for idempotent requests and never past an open circuit
//! - Circuit breaker prevents cascading failures
//! - Breakers are owned by an explicit registry, not a global

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerConfig, BreakerError, BreakerMetrics, BreakerState, CircuitBreaker};
pub use registry::BreakerRegistry;
