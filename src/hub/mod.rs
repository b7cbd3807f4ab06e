//! Real-time fan-out subsystem.
//!
//! # Data Flow
//! ```text
//! Publishers (proxy handler, admin, breakers, health monitor)
//!     → fanout.rs (hub actor: membership + relay, one FIFO queue)
//!     → per-subscriber outbox (bounded)
//!     → connection.rs (delivery loop → websocket peer)
//! ```
//!
//! # Design Decisions
//! - Best-effort, at-most-once delivery per subscriber
//! - Slow subscribers are evicted, publishers never wait

pub mod connection;
pub mod fanout;
pub mod message;

pub use connection::{serve_subscriber, ConnectionError, ConnectionSettings};
pub use fanout::{FanoutHub, HubError, HubRunner, HubStats, SubscriberId, Subscription};
pub use message::{kinds, Message};
