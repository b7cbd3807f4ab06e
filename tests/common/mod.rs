//! Shared utilities for integration tests.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode, Uri};
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;

use strangler_proxy::config::{BackendConfig, GatewayConfig};
use strangler_proxy::lifecycle::{self, Gateway, Shutdown};

pub const ADMIN_KEY: &str = "test-admin-key";

/// Start a programmable mock backend on an ephemeral port. `f` receives the
/// method and path and returns the status and body to answer with.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Method, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    let app = Router::new().fallback(move |method: Method, uri: Uri| {
        let f = f.clone();
        async move {
            let (status, body) = f(method, uri.path().to_string()).await;
            (StatusCode::from_u16(status).unwrap(), body)
        }
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a mock backend that always answers 200 with `response`.
#[allow(dead_code)]
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_, _| async move { (200, response.to_string()) }).await
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Gateway config on an ephemeral port with the admin API on, health checks
/// off and fast retries.
pub fn gateway_config(legacy: SocketAddr, modern: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.backends = vec![
        BackendConfig::new("legacy", format!("http://{legacy}")),
        BackendConfig::new("modern", format!("http://{modern}")),
    ];
    config.health_check.enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.retries.base_delay_ms = 1;
    config.retries.max_delay_ms = 10;
    config.retries.budget_ratio = 1.0;
    config
}

pub async fn start_gateway(config: GatewayConfig) -> (Gateway, Shutdown) {
    let shutdown = Shutdown::new();
    let gateway = lifecycle::start(config, &shutdown).await.unwrap();
    (gateway, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// GET an admin endpoint and decode the JSON body.
#[allow(dead_code)]
pub async fn admin_get(addr: SocketAddr, path: &str) -> Value {
    client()
        .get(format!("http://{addr}{path}"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Poll `/admin/hub` until the gateway reports `count` subscribers.
#[allow(dead_code)]
pub async fn wait_for_subscribers(addr: SocketAddr, count: u64) {
    for _ in 0..100 {
        let stats = admin_get(addr, "/admin/hub").await;
        if stats["subscribers"] == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("gateway never reported {count} subscribers");
}
