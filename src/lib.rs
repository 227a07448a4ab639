//! Backend-for-frontend gateway for work-tracking and LLM upstreams.
//!
//! Fronts two upstream services behind a versioned HTTP API, adding
//! identity extraction, tiered sliding-window rate limiting, audit logging,
//! and metrics.

pub mod config;
pub mod http;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use http::HttpServer;
