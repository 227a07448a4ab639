//! Rate limiting middleware with tiered sliding-window quotas.
//!
//! Every inbound request is checked against up to two counting partitions:
//! one keyed by the authenticated subject (when an identity is attached)
//! and one keyed by the client IP. Traffic is classified into a tier (AI,
//! admin, or default) that selects the limit and window; the user-partition
//! check runs first and a denial there short-circuits without touching the
//! IP partition. Partition entries live in a process-wide concurrent map
//! and are swept once they have been idle for twice their window, so
//! one-shot clients cannot grow the map without bound.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::security::access_control::UserContext;

const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Path segment marking LLM-backed endpoints.
const AI_SEGMENT: &str = "ai";

/// Path segment for repository-memory resources; DELETE on these counts as
/// admin traffic.
const PROTECTED_SEGMENT: &str = "memory";

/// Minimum interval between eviction sweeps of the partition map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Time source for the limiter. Injected so tests can drive window expiry
/// and sweep scheduling without real delays.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Production clock backed by `Instant::now`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock mutex poisoned");
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("manual clock mutex poisoned")
    }
}

/// Per-partition counting window.
#[derive(Debug)]
struct RateLimitInfo {
    last_reset: Instant,
    request_count: u32,
    limit: u32,
    window: Duration,
}

/// Outcome of a single partition check.
#[derive(Debug, Clone, Copy)]
pub struct PartitionDecision {
    pub admitted: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// Process-wide map of partition key to counting window.
///
/// `DashMap::entry` provides the atomic get-or-insert, so only one
/// `RateLimitInfo` is ever published per key. The value `Arc` is cloned out
/// and the shard guard released before the per-entry mutex is taken, so
/// distinct partitions never contend with each other. Sweeping may remove
/// an entry while another task still holds its `Arc`; the orphaned instance
/// is dropped once that request finishes and the key repopulates fresh.
pub struct PartitionStore {
    partitions: DashMap<String, Arc<Mutex<RateLimitInfo>>>,
    clock: Arc<dyn Clock>,
    started: Instant,
    /// Seconds since `started` at which the last sweep ran.
    last_sweep_secs: AtomicU64,
    sweep_gate: Mutex<()>,
}

impl PartitionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            partitions: DashMap::new(),
            clock,
            started,
            last_sweep_secs: AtomicU64::new(0),
            sweep_gate: Mutex::new(()),
        }
    }

    /// Admit or deny one request against the given partition, creating the
    /// partition on first sight.
    pub fn check(&self, key: String, limit: u32, window: Duration) -> PartitionDecision {
        let now = self.clock.now();
        let entry = self
            .partitions
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(RateLimitInfo {
                    last_reset: now,
                    request_count: 0,
                    limit,
                    window,
                }))
            })
            .clone();

        let mut info = entry.lock().expect("partition mutex poisoned");
        if now.duration_since(info.last_reset) > info.window {
            info.request_count = 0;
            info.last_reset = now;
        }

        let reset_secs = info
            .window
            .saturating_sub(now.duration_since(info.last_reset))
            .as_secs();

        if info.request_count >= info.limit {
            PartitionDecision {
                admitted: false,
                limit: info.limit,
                remaining: 0,
                reset_secs,
            }
        } else {
            info.request_count += 1;
            PartitionDecision {
                admitted: true,
                limit: info.limit,
                remaining: info.limit.saturating_sub(info.request_count),
                reset_secs,
            }
        }
    }

    /// Evict partitions idle for more than twice their window.
    ///
    /// Runs at most once per [`SWEEP_INTERVAL`]. The gate is held only for
    /// the decide-and-mark step; the map iteration runs after it is
    /// released, since individual entry removals are independently safe.
    pub fn maybe_sweep(&self) {
        let now = self.clock.now();
        let elapsed = now.duration_since(self.started).as_secs();
        if elapsed.saturating_sub(self.last_sweep_secs.load(Ordering::Relaxed))
            <= SWEEP_INTERVAL.as_secs()
        {
            return;
        }

        {
            let _gate = self.sweep_gate.lock().expect("sweep gate mutex poisoned");
            if elapsed.saturating_sub(self.last_sweep_secs.load(Ordering::Relaxed))
                <= SWEEP_INTERVAL.as_secs()
            {
                return;
            }
            self.last_sweep_secs.store(elapsed, Ordering::Relaxed);
        }

        self.partitions.retain(|_, entry| {
            let info = entry.lock().expect("partition mutex poisoned");
            now.duration_since(info.last_reset) <= info.window * 2
        });
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.partitions.contains_key(key)
    }
}

/// Traffic classification driving which limit and window apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Default,
    Ai,
    Admin,
}

impl Tier {
    fn as_str(self) -> &'static str {
        match self {
            Tier::Default => "default",
            Tier::Ai => "ai",
            Tier::Admin => "admin",
        }
    }

    fn user_quota(self, config: &RateLimitConfig) -> (u32, Duration) {
        match self {
            Tier::Default => (
                config.default_max_requests,
                Duration::from_secs(config.default_window_seconds),
            ),
            Tier::Ai => (
                config.ai_max_requests,
                Duration::from_secs(config.ai_window_seconds),
            ),
            Tier::Admin => (
                config.admin_max_requests,
                Duration::from_secs(config.admin_window_seconds),
            ),
        }
    }

    /// IP caps never drop below a small per-tier floor.
    fn ip_limit(self, user_limit: u32) -> u32 {
        match self {
            Tier::Ai => user_limit.max(5),
            Tier::Admin => user_limit.max(10),
            Tier::Default => user_limit,
        }
    }
}

fn has_segment(path: &str, segment: &str) -> bool {
    path.split('/').any(|s| s.eq_ignore_ascii_case(segment))
}

/// True when the path targets an LLM-backed endpoint. Shared with upstream
/// selection so routing and tiering agree.
pub fn is_ai_path(path: &str) -> bool {
    has_segment(path, AI_SEGMENT)
}

fn classify(path: &str, method: &Method, user: Option<&UserContext>) -> Tier {
    if has_segment(path, AI_SEGMENT) {
        Tier::Ai
    } else if user.is_some_and(UserContext::is_admin)
        || (has_segment(path, PROTECTED_SEGMENT) && method == Method::DELETE)
    {
        Tier::Admin
    } else {
        Tier::Default
    }
}

/// Shared state for the rate limiting middleware.
pub struct RateLimiter {
    store: PartitionStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: PartitionStore) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }
}

/// Middleware enforcing tiered per-user and per-IP quotas.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.config.enabled {
        return next.run(request).await;
    }

    limiter.store.maybe_sweep();

    // Shed oversized requests before any partition state is touched.
    let declared_len = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared_len.is_some_and(|len| len > limiter.config.max_request_body_bytes) {
        return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
    }
    if request.uri().query().map_or(0, str::len) > limiter.config.max_query_string_length {
        return plain_response(StatusCode::BAD_REQUEST, "Query string too long");
    }

    let user = request.extensions().get::<UserContext>().cloned();
    let tier = classify(request.uri().path(), request.method(), user.as_ref());
    let (user_limit, window) = tier.user_quota(&limiter.config);
    let window_secs = window.as_secs();

    let mut snapshots: Vec<PartitionDecision> = Vec::with_capacity(2);

    if let Some(user) = &user {
        let key = format!("user:{}:{}:{}", user.subject, tier.as_str(), window_secs);
        let decision = limiter.store.check(key, user_limit, window);
        snapshots.push(decision);
        if !decision.admitted {
            tracing::warn!(subject = %user.subject, tier = tier.as_str(), "Rate limit exceeded");
            metrics::record_rate_limited("user");
            return deny(decision, &snapshots);
        }
    }

    let ip = addr.ip();
    let key = format!("ip:{}:{}:{}", ip, tier.as_str(), window_secs);
    let decision = limiter.store.check(key, tier.ip_limit(user_limit), window);
    snapshots.push(decision);
    if !decision.admitted {
        tracing::warn!(client = %ip, tier = tier.as_str(), "Rate limit exceeded");
        metrics::record_rate_limited("ip");
        return deny(decision, &snapshots);
    }

    let mut response = next.run(request).await;
    publish_headers(response.headers_mut(), &snapshots);
    response
}

fn deny(decision: PartitionDecision, snapshots: &[PartitionDecision]) -> Response {
    let mut response = plain_response(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.reset_secs));
    headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    // Remaining on denial is computed from a used count of zero, so it
    // carries the full limit rather than 0.
    headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(decision.limit));
    publish_headers(response.headers_mut(), snapshots);
    response
}

/// Publish quota telemetry. Insert-if-absent, user partition first, so
/// user-partition values win when both partitions report.
fn publish_headers(headers: &mut HeaderMap, snapshots: &[PartitionDecision]) {
    for snapshot in snapshots {
        insert_if_absent(headers, &X_RATE_LIMIT_LIMIT, u64::from(snapshot.limit));
        insert_if_absent(headers, &X_RATE_LIMIT_REMAINING, u64::from(snapshot.remaining));
        insert_if_absent(headers, &X_RATE_LIMIT_RESET, snapshot.reset_secs);
    }
}

fn insert_if_absent(headers: &mut HeaderMap, name: &HeaderName, value: u64) {
    if !headers.contains_key(name) {
        headers.insert(name.clone(), HeaderValue::from(value));
    }
}

fn plain_response(status: StatusCode, body: &'static str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}
