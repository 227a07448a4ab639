//! Configuration subsystem.
//!
//! Schema types deserialize from TOML with per-section defaults; semantic
//! validation runs before a config is accepted into the system.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, GatewayConfig, ListenerConfig, ObservabilityConfig, RateLimitConfig,
    UpstreamConfig,
};
