//! Strangler-fig gateway library.
//!
//! Sits in front of a legacy service and its replacement, guards every
//! outbound call with a per-dependency circuit breaker, and pushes notable
//! events (orders, breaker changes, health changes) to dashboard subscribers
//! over WebSocket.

// Core subsystems
pub mod config;
pub mod http;
pub mod upstream;

// Resilience and real-time fan-out
pub mod hub;
pub mod resilience;

// Cross-cutting concerns
pub mod admin;
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use hub::FanoutHub;
pub use lifecycle::Shutdown;
pub use resilience::{BreakerRegistry, CircuitBreaker};
