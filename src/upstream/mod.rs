//! Outbound calls to the legacy and replacement backends.
//!
//! # Data Flow
//! ```text
//! proxy handler
//!     → client.rs (retry loop → circuit breaker → timeout → hyper client)
//!     → error.rs (failure → 502/503/504 or relayed 5xx)
//! ```

pub mod client;
pub mod error;

pub use client::{UpstreamClient, UpstreamRequest, UpstreamResponse};
pub use error::UpstreamError;
