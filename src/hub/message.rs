//! Wire envelope delivered to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type names published by the gateway.
pub mod kinds {
    pub const ORDER_CREATED: &str = "order.created";
    pub const BREAKER_RESET: &str = "breaker.reset";
    pub const BREAKER_STATE_CHANGED: &str = "breaker.state_changed";
    pub const HEALTH_CHANGED: &str = "health.changed";
}

/// One published event: `{"type", "data", "timestamp", "source"}`.
///
/// Immutable once built; shared between outboxes behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: String,
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
    source: String,
}

impl Message {
    /// Stamp a new message with the current UTC time.
    pub fn new(kind: impl Into<String>, data: serde_json::Value, source: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
