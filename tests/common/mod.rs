//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use devops_gateway::config::GatewayConfig;
use devops_gateway::http::HttpServer;
use devops_gateway::security::rate_limit::{PartitionStore, RateLimiter, SystemClock};

/// A gateway instance bound to an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub limiter: Arc<RateLimiter>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a simple mock upstream that answers every request with 200 and the
/// given body.
pub async fn start_mock_upstream(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Base gateway config pointed at the given upstreams, with metrics off.
pub fn gateway_config(devops: SocketAddr, ai: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.devops_base_url = format!("http://{devops}");
    config.upstream.ai_base_url = format!("http://{ai}");
    config.observability.metrics_enabled = false;
    config
}

/// Start the gateway on an ephemeral port and wait for it to accept.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limiting.clone(),
        PartitionStore::new(Arc::new(SystemClock)),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::with_limiter(config, limiter.clone());
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestGateway { addr, limiter }
}
