//! Timeout enforcement.
//!
//! Every upstream attempt runs under a deadline. The deadline sits inside the
//! breaker-wrapped work, so a timeout counts as a dependency failure.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("operation timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Run `fut`, failing with [`Elapsed`] once `limit` passes.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Elapsed(limit))
}
