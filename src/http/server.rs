//! HTTP server setup and request forwarding.
//!
//! # Responsibilities
//! - Create the Axum Router with the versioned API surface
//! - Wire up middleware (request ID, tracing, identity, rate limiting, timeout)
//! - Forward admitted requests to the matching upstream
//! - Emit an audit line and metrics per proxied request
//! - Graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::observability::metrics;
use crate::security::access_control::{access_control_middleware, UserContext};
use crate::security::rate_limit::{
    is_ai_path, rate_limit_middleware, PartitionStore, RateLimiter, SystemClock,
};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub devops_base_url: String,
    pub ai_base_url: String,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limiting.clone(),
            PartitionStore::new(Arc::new(SystemClock)),
        ));
        Self::with_limiter(config, limiter)
    }

    /// Build the server around an externally owned limiter. Tests use this
    /// to inspect partition state after requests complete.
    pub fn with_limiter(config: GatewayConfig, limiter: Arc<RateLimiter>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let state = AppState {
            client,
            devops_base_url: trim_base(&config.upstream.devops_base_url),
            ai_base_url: trim_base(&config.upstream.ai_base_url),
        };

        let router = Self::build_router(&config, state, limiter);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// `ServiceBuilder` applies layers top-down: a request passes request-ID
    /// stamping, tracing, identity extraction, then rate limiting before it
    /// reaches the proxy handler.
    fn build_router(config: &GatewayConfig, state: AppState, limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/v1/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                    .layer(middleware::from_fn_with_state(
                        config.auth.clone(),
                        access_control_middleware,
                    ))
                    .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.upstream.request_timeout_secs,
                    ))),
            )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler. Selects the upstream and forwards the request.
async fn proxy_handler(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let subject = request
        .extensions()
        .get::<UserContext>()
        .map(|u| u.subject.clone());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();

    let (upstream, base) = if is_ai_path(&rest) {
        ("ai", &state.ai_base_url)
    } else {
        ("devops", &state.devops_base_url)
    };

    let target = format!("{base}/{rest}{query}");
    let uri: Uri = match target.parse() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, target = %target, error = %e, "Upstream URI rewrite failed");
            metrics::record_request(method.as_str(), 502, upstream, start);
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    let (mut parts, body) = request.into_parts();
    parts.uri = uri;
    let upstream_request = Request::from_parts(parts, body);

    match state.client.request(upstream_request).await {
        Ok(response) => {
            let status = response.status();
            metrics::record_request(method.as_str(), status.as_u16(), upstream, start);
            tracing::info!(
                request_id = %request_id,
                subject = subject.as_deref().unwrap_or("anonymous"),
                method = %method,
                path = %path,
                upstream = upstream,
                status = status.as_u16(),
                latency_ms = start.elapsed().as_millis() as u64,
                "request completed"
            );
            into_axum_response(response)
        }
        Err(e) => {
            metrics::record_request(method.as_str(), 502, upstream, start);
            tracing::error!(
                request_id = %request_id,
                upstream = upstream,
                error = %e,
                "Upstream request failed"
            );
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Adapt an upstream hyper response into an axum response.
fn into_axum_response(response: hyper::Response<hyper::body::Incoming>) -> Response {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(body))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}
