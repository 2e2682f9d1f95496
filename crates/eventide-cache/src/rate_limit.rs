//! Per-client rate limiting over the cache's atomic counters

use crate::Cache;
use eventide_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Window length for rate-limit counters.
const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window rate limiter keyed per client.
///
/// Counters live in the shared cache (`rate_limit:<client>` with a 60 s
/// TTL), so every process enforcing the limit sees the same window.
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    limit: u64,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, limit: u64) -> Self {
        Self { cache, limit }
    }

    /// Count one request against the client's window.
    ///
    /// Returns `Err(RateLimitExceeded)` once the window's budget is spent.
    /// A cache fault fails open: the request is allowed and a warning logged.
    pub async fn check(&self, client_id: &str) -> Result<()> {
        let key = format!("rate_limit:{}", client_id);

        let count = match self.cache.increment_by(&key, 1, Some(WINDOW)).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(client_id = client_id, error = %e, "Rate limit check failed open");
                return Ok(());
            }
        };

        if count as u64 > self.limit {
            tracing::debug!(
                client_id = client_id,
                count = count,
                limit = self.limit,
                "Rate limit exceeded"
            );
            return Err(Error::RateLimitExceeded {
                retry_after_secs: Some(WINDOW.as_secs()),
            });
        }

        Ok(())
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
