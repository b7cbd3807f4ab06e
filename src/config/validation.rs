//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds and timeouts > 0)
//! - Detect duplicate backend names and unparseable URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BreakerSettings, GatewayConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let mut seen = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        let field = format!("backends[{}]", i);
        if backend.name.is_empty() {
            errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
        } else if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate backend '{}'", backend.name),
            ));
        }
        match url::Url::parse(&backend.base_url) {
            Ok(url) if url.scheme() == "http" => {}
            Ok(url) => errors.push(ValidationError::new(
                format!("{field}.base_url"),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(format!("{field}.base_url"), e.to_string())),
        }
        if backend.timeout_secs == 0 {
            errors.push(ValidationError::new(format!("{field}.timeout_secs"), "must be > 0"));
        }
    }

    check_breaker("breakers.default", &config.breakers.default, &mut errors);
    for (name, settings) in &config.breakers.dependencies {
        check_breaker(&format!("breakers.dependencies.{name}"), settings, &mut errors);
    }

    if config.retries.enabled && config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be > 0"));
    }
    if !(0.0..=1.0).contains(&config.retries.budget_ratio) {
        errors.push(ValidationError::new("retries.budget_ratio", "must be within 0.0..=1.0"));
    }

    let hub = &config.hub;
    if hub.event_buffer == 0 {
        errors.push(ValidationError::new("hub.event_buffer", "must be > 0"));
    }
    if hub.outbox_capacity == 0 {
        errors.push(ValidationError::new("hub.outbox_capacity", "must be > 0"));
    }
    if hub.write_wait_secs == 0 {
        errors.push(ValidationError::new("hub.write_wait_secs", "must be > 0"));
    }
    if hub.ping_interval_secs == 0 || hub.ping_interval_secs >= hub.pong_wait_secs {
        errors.push(ValidationError::new(
            "hub.ping_interval_secs",
            "must be > 0 and shorter than hub.pong_wait_secs",
        ));
    }

    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(field: &str, settings: &BreakerSettings, errors: &mut Vec<ValidationError>) {
    if settings.max_failures == 0 {
        errors.push(ValidationError::new(format!("{field}.max_failures"), "must be > 0"));
    }
    if settings.max_half_open_requests == 0 {
        errors.push(ValidationError::new(
            format!("{field}.max_half_open_requests"),
            "must be > 0",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendConfig;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.backends.push(BackendConfig::new("legacy", "ftp://example"));
        config.breakers.default.max_failures = 0;
        config.hub.ping_interval_secs = 90;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"backends[2].name"));
        assert!(fields.contains(&"backends[2].base_url"));
        assert!(fields.contains(&"breakers.default.max_failures"));
        assert!(fields.contains(&"hub.ping_interval_secs"));
    }
}
