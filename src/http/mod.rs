//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, timeout, trace layers)
//!     → /api/{backend}/*  → upstream client (through the backend's breaker)
//!     → /ws               → websocket.rs → hub subscriber
//!     → /admin/*          → admin handlers (bearer auth)
//!     → Send to client
//! ```

pub mod server;
pub mod tls;
pub mod websocket;

pub use server::{AppState, HttpServer, ServerError};
