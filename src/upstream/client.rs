//! Breaker-guarded HTTP client for one backend.
//!
//! # Responsibilities
//! - Forward a buffered request to the backend's base URL
//! - Run every attempt through the backend's circuit breaker, under a deadline
//! - Retry idempotent requests with backoff, within the retry budget
//!
//! # Design Decisions
//! - Transport errors, timeouts and 5xx answers are breaker failures;
//!   4xx answers are successes (the backend is up, the caller is wrong)
//! - Response bodies are read fully inside the attempt, so a connection
//!   that dies mid-body still counts as a failure
//! - A call the breaker refuses is returned at once, never retried. If an
//!   earlier attempt reached the backend, its error is returned instead

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::config::{BackendConfig, RetryConfig};
use crate::resilience::backoff::backoff_for;
use crate::resilience::retries::{is_retryable, RetryBudget};
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{BreakerError, CircuitBreaker};
use crate::upstream::error::UpstreamError;

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::HOST,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive" || name.as_str() == "proxy-connection"
}

/// A fully buffered request to forward.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path relative to the backend base URL, with the query string.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A fully buffered backend answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in self.headers.iter() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        response
    }
}

/// Client for one named backend.
pub struct UpstreamClient {
    name: String,
    base_url: Url,
    client: Client<HttpConnector, Body>,
    breaker: Arc<CircuitBreaker>,
    attempt_timeout: Duration,
    retries: RetryConfig,
    budget: Arc<RetryBudget>,
    max_body_bytes: usize,
}

impl UpstreamClient {
    pub fn new(
        backend: &BackendConfig,
        breaker: Arc<CircuitBreaker>,
        retries: RetryConfig,
        budget: Arc<RetryBudget>,
        max_body_bytes: usize,
    ) -> Result<Self, url::ParseError> {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            name: backend.name.clone(),
            base_url: Url::parse(&backend.base_url)?,
            client,
            breaker,
            attempt_timeout: Duration::from_secs(backend.timeout_secs),
            retries,
            budget,
            max_body_bytes,
        })
    }

    /// Override the per-attempt deadline.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Forward `request`, retrying where allowed.
    pub async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let uri = self.target(&request.path_and_query)?;
        let max_attempts = if self.retries.enabled {
            self.retries.max_attempts.max(1)
        } else {
            1
        };

        self.budget.record_request();
        let mut attempt = 0;
        let mut last_error: Option<UpstreamError> = None;
        loop {
            attempt += 1;
            let err = match self.breaker.call(|| self.attempt(&uri, &request)).await {
                Ok(response) => return Ok(response),
                // a refusal after real attempts reports what the backend did
                Err(BreakerError::Open { .. }) => {
                    return Err(last_error.unwrap_or_else(|| UpstreamError::CircuitOpen {
                        backend: self.name.clone(),
                    }))
                }
                Err(BreakerError::Inner(e)) => e,
            };

            let retryable = match &err {
                UpstreamError::Timeout { .. } | UpstreamError::Transport { .. } => {
                    is_retryable(&request.method, None, true)
                }
                UpstreamError::Status { response, .. } => {
                    is_retryable(&request.method, Some(response.status), false)
                }
                _ => false,
            };
            if attempt >= max_attempts || !retryable || !self.budget.can_retry() {
                return Err(err);
            }

            let delay = backoff_for(&self.retries, attempt);
            tracing::info!(
                backend = %self.name,
                attempt,
                delay = ?delay,
                error = %err,
                "Retrying upstream request"
            );
            last_error = Some(err);
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, uri: &Uri, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let mut builder = Request::builder().method(request.method.clone()).uri(uri.clone());
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in request.headers.iter() {
                if !is_hop_by_hop(name) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
        let outgoing = builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;

        let exchange = async {
            let response: hyper::Response<hyper::body::Incoming> = self
                .client
                .request(outgoing)
                .await
                .map_err(|e| self.transport(e))?;
            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(Body::new(body), self.max_body_bytes)
                .await
                .map_err(|e| self.transport(e))?;
            Ok::<_, UpstreamError>(UpstreamResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        let response = with_timeout(self.attempt_timeout, exchange)
            .await
            .map_err(|_| UpstreamError::Timeout {
                backend: self.name.clone(),
                timeout: self.attempt_timeout,
            })??;

        if response.status.is_server_error() {
            return Err(UpstreamError::Status {
                backend: self.name.clone(),
                response,
            });
        }
        Ok(response)
    }

    fn target(&self, path_and_query: &str) -> Result<Uri, UpstreamError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path_and_query.trim_start_matches('/');
        format!("{base}/{path}")
            .parse::<Uri>()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))
    }

    fn transport(&self, error: impl std::fmt::Display) -> UpstreamError {
        UpstreamError::Transport {
            backend: self.name.clone(),
            message: error.to_string(),
        }
    }
}
