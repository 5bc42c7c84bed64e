//! Rate Limiter (C2, spec §4.2): a distributed fixed-window token bucket
//! keyed by a fixed namespace (the downstream identity), backed by Redis.
//! The increment-and-compare is one round trip (a Lua script evaluated via
//! `EVAL`, see `webhook_infra::cache::redis::RedisCache::incr_window`) so it
//! stays atomic across replicas without a client-side lock.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use webhook_infra::cache::redis::RedisCache;
use webhook_infra::InfraError;

#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("redis error: {0}")]
    Redis(#[from] InfraError),

    #[error("rate limited")]
    RateLimited,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Attempts to consume one token, retrying at window boundaries until
    /// `timeout` elapses (spec §4.2).
    async fn acquire(&self, timeout: Duration) -> Result<(), LimiterError>;
}

pub struct RedisTokenBucket {
    cache: RedisCache,
    namespace: String,
    capacity: u32,
}

impl RedisTokenBucket {
    pub fn new(cache: RedisCache, namespace: impl Into<String>, capacity: u32) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
            capacity,
        }
    }

    fn window_key(&self, window: i64) -> String {
        window_key(&self.namespace, window)
    }
}

fn window_key(namespace: &str, window: i64) -> String {
    format!("{}:{}", namespace, window)
}

#[async_trait]
impl RateLimiter for RedisTokenBucket {
    async fn acquire(&self, timeout: Duration) -> Result<(), LimiterError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let now = chrono::Utc::now();
            let window = now.timestamp();
            let key = self.window_key(window);

            // Window expires in 2s: long enough to outlive the window it
            // belongs to even under clock skew between replicas, short
            // enough not to leak keys.
            let count = self.cache.incr_window(&key, 2).await?;

            if (count as u32) <= self.capacity {
                debug!(window, count, capacity = self.capacity, "token acquired");
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(LimiterError::RateLimited);
            }

            let millis_into_window = now.timestamp_subsec_millis() as u64;
            let until_next_window = Duration::from_millis(1000u64.saturating_sub(millis_into_window));
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            tokio::time::sleep(until_next_window.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_key_includes_namespace_and_window() {
        assert_eq!(window_key("downstream", 42), "downstream:42");
    }
}
