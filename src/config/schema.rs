//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream service endpoints.
    pub upstream: UpstreamConfig,

    /// Identity extraction settings.
    pub auth: AuthConfig,

    /// Rate limiting configuration.
    pub rate_limiting: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the work-tracking REST API.
    pub devops_base_url: String,

    /// Base URL of the LLM provider.
    pub ai_base_url: String,

    /// Total request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            devops_base_url: "http://localhost:9100".to_string(),
            ai_base_url: "http://localhost:11434".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Identity extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Reject requests that carry no identity header.
    pub required: bool,
}

/// Rate limiting configuration.
///
/// Limits are deliberately not validated; a zero limit degrades to
/// always-deny for that tier, which fails closed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Cap for ordinary traffic per window.
    pub default_max_requests: u32,

    /// Window length for ordinary traffic, in seconds.
    pub default_window_seconds: u64,

    /// Cap for LLM-backed endpoints per window.
    pub ai_max_requests: u32,

    /// Window length for LLM-backed endpoints, in seconds.
    pub ai_window_seconds: u64,

    /// Cap for admin traffic per window.
    pub admin_max_requests: u32,

    /// Window length for admin traffic, in seconds.
    pub admin_window_seconds: u64,

    /// Hard cap on declared request body size, in bytes.
    pub max_request_body_bytes: u64,

    /// Hard cap on raw query string length.
    pub max_query_string_length: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_max_requests: 100,
            default_window_seconds: 60,
            ai_max_requests: 10,
            ai_window_seconds: 60,
            admin_max_requests: 30,
            admin_window_seconds: 60,
            max_request_body_bytes: 5 * 1024 * 1024,
            max_query_string_length: 2048,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
