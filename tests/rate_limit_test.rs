//! End-to-end rate limiting behavior over real HTTP.

mod common;

use common::{gateway_config, start_gateway, start_mock_upstream};

#[tokio::test]
async fn third_request_in_window_is_denied() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.default_max_requests = 2;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let res = client
            .get(gateway.url("/api/v1/workitems"))
            .header("X-User-Id", "alice")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }

    let res = client
        .get(gateway.url("/api/v1/workitems"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);

    let retry_after: u64 = res.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((55..=60).contains(&retry_after), "retry-after was {retry_after}");
    assert_eq!(res.headers()["x-ratelimit-limit"], "2");
    // Denied requests report the configured limit as remaining, not zero.
    assert_eq!(res.headers()["x-ratelimit-remaining"], "2");
    assert!(res.headers().contains_key("x-ratelimit-reset"));
    assert_eq!(res.text().await.unwrap(), "Rate limit exceeded");
}

#[tokio::test]
async fn admitted_responses_carry_quota_headers() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.default_max_requests = 10;
    let gateway = start_gateway(config).await;

    let res = reqwest::Client::new()
        .get(gateway.url("/api/v1/workitems"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-ratelimit-limit"], "10");
    assert_eq!(res.headers()["x-ratelimit-remaining"], "9");
    let reset: u64 = res.headers()["x-ratelimit-reset"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(reset <= 60);
}

#[tokio::test]
async fn users_on_one_ip_are_limited_independently() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    // The AI tier keeps an IP floor of 5, so alice exhausting her own
    // quota must not lock bob out.
    config.rate_limiting.ai_max_requests = 2;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let res = client
            .get(gateway.url("/api/v1/ai/models"))
            .header("X-User-Id", "alice")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }

    let res = client
        .get(gateway.url("/api/v1/ai/models"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);

    let res = client
        .get(gateway.url("/api/v1/ai/models"))
        .header("X-User-Id", "bob")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn ai_and_default_quotas_are_independent() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.ai_max_requests = 1;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    let res = client
        .get(gateway.url("/api/v1/ai/models"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client
        .get(gateway.url("/api/v1/ai/models"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);

    // The same user still has their full default quota.
    let res = client
        .get(gateway.url("/api/v1/workitems"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn oversized_body_is_rejected_before_counting() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.max_request_body_bytes = 64;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    let res = client
        .post(gateway.url("/api/v1/workitems"))
        .header("X-User-Id", "alice")
        .body(vec![b'x'; 128])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    assert_eq!(res.text().await.unwrap(), "Request body too large");

    // No partition state was touched by the rejected request.
    assert!(gateway.limiter.store().is_empty());
}

#[tokio::test]
async fn long_query_string_is_rejected_before_counting() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.max_query_string_length = 32;
    let gateway = start_gateway(config).await;

    let query = "x".repeat(64);
    let res = reqwest::Client::new()
        .get(gateway.url(&format!("/api/v1/workitems?filter={query}")))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.text().await.unwrap(), "Query string too long");

    assert!(gateway.limiter.store().is_empty());
}

#[tokio::test]
async fn anonymous_requests_count_against_the_ip() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.default_max_requests = 2;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let res = client
            .get(gateway.url("/api/v1/workitems"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }

    let res = client
        .get(gateway.url("/api/v1/workitems"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);
    assert_eq!(res.headers()["x-ratelimit-limit"], "2");
}

#[tokio::test]
async fn delete_on_memory_resource_uses_the_admin_quota() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.admin_max_requests = 1;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    let res = client
        .delete(gateway.url("/api/v1/memory/insights/3"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client
        .delete(gateway.url("/api/v1/memory/insights/4"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);
    assert_eq!(res.headers()["x-ratelimit-limit"], "1");

    // Ordinary traffic from the same user keeps its own counter.
    let res = client
        .get(gateway.url("/api/v1/workitems"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn admin_role_uses_the_admin_quota() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.admin_max_requests = 1;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    let res = client
        .get(gateway.url("/api/v1/workitems"))
        .header("X-User-Id", "alice")
        .header("X-User-Roles", "reader, admin")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-ratelimit-limit"], "1");

    let res = client
        .get(gateway.url("/api/v1/workitems"))
        .header("X-User-Id", "alice")
        .header("X-User-Roles", "reader, admin")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);
}

#[tokio::test]
async fn disabled_limiter_passes_everything() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.rate_limiting.enabled = false;
    config.rate_limiting.default_max_requests = 1;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    for _ in 0..5 {
        let res = client
            .get(gateway.url("/api/v1/workitems"))
            .header("X-User-Id", "alice")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.headers().get("x-ratelimit-limit").is_none());
    }

    assert!(gateway.limiter.store().is_empty());
}

#[tokio::test]
async fn missing_identity_is_rejected_when_auth_is_required() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = gateway_config(upstream, upstream);
    config.auth.required = true;
    let gateway = start_gateway(config).await;

    let client = reqwest::Client::new();
    let res = client
        .get(gateway.url("/api/v1/workitems"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(res.text().await.unwrap(), "Missing X-User-Id header");

    let res = client
        .get(gateway.url("/api/v1/workitems"))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}
