//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_breaker_overrides() {
        let config = parse_config(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [[backends]]
            name = "sap"
            base_url = "http://10.0.0.5:8000"

            [breakers.default]
            max_failures = 4

            [breakers.dependencies.sap]
            max_failures = 2
            open_timeout_secs = 10
            max_half_open_requests = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].timeout_secs, 10);
        assert_eq!(config.breakers.default.max_failures, 4);
        assert_eq!(config.breakers.default.open_timeout_secs, 30);
        let sap = config.breakers.dependencies["sap"].to_breaker_config();
        assert_eq!(sap.open_timeout, Duration::from_secs(10));
        assert_eq!(sap.max_half_open_requests, 2);
        assert_eq!(config.hub.outbox_capacity, 256);
    }

    #[test]
    fn reports_validation_failures() {
        let err = parse_config("[hub]\noutbox_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("hub.outbox_capacity"));
    }

    #[test]
    fn reports_parse_failures() {
        let err = parse_config("[hub\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
