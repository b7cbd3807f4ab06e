//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe each backend's health path
//! - Update backend health state based on results
//! - Announce transitions on the hub as `health.changed`

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::state::{BackendHealth, Transition};
use crate::hub::{kinds, FanoutHub};
use crate::observability::metrics;

/// One backend to probe.
#[derive(Debug, Clone)]
pub struct HealthTarget {
    pub health: Arc<BackendHealth>,
    pub probe_url: String,
}

pub struct HealthMonitor {
    targets: Vec<HealthTarget>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
    hub: FanoutHub,
}

impl HealthMonitor {
    pub fn new(targets: Vec<HealthTarget>, config: HealthCheckConfig, hub: FanoutHub) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            targets,
            config,
            client,
            hub,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            backends = self.targets.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn check_all(&self) {
        for target in &self.targets {
            let healthy = self.probe(target).await;
            let transition = if healthy {
                target.health.mark_success()
            } else {
                target.health.mark_failure()
            };

            if let Some(transition) = transition {
                self.announce(&target.health, transition);
            }
            metrics::record_backend_health(target.health.name(), target.health.is_healthy());
        }
    }

    async fn probe(&self, target: &HealthTarget) -> bool {
        let backend = target.health.name();
        let request = match Request::builder()
            .method("GET")
            .uri(&target.probe_url)
            .header("user-agent", "strangler-proxy-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(backend, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(backend, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(backend, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend, "Health check failed: timeout");
                false
            }
        }
    }

    fn announce(&self, health: &BackendHealth, transition: Transition) {
        tracing::info!(
            backend = health.name(),
            from = ?transition.from,
            to = ?transition.to,
            "Backend health changed"
        );
        self.hub.broadcast(
            kinds::HEALTH_CHANGED,
            json!({
                "backend": health.name(),
                "from": transition.from,
                "to": transition.to,
            }),
            "health",
        );
    }
}
