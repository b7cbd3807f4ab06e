//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared by value/Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breakers keep the settings they were created with
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BackendConfig, BreakerSettings, BreakersConfig, GatewayConfig, HealthCheckConfig,
    HubConfig, ListenerConfig, LogFormat, ObservabilityConfig, RetryConfig, TimeoutConfig, TlsConfig,
};
