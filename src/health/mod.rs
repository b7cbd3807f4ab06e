//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend's health path
//!     → Update state.rs
//!     → Transition? → hub `health.changed` + gauge
//!
//! State machine (state.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Health is reported, not enforced: traffic still flows through the
//!   backend's circuit breaker, which is what sheds load
//! - Health state is per-backend

pub mod active;
pub mod state;

pub use active::{HealthMonitor, HealthTarget};
pub use state::{BackendHealth, HealthState, Transition};
