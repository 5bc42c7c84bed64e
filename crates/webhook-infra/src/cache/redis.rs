//! Thin Redis client wrapper shared by the health checker and the rate
//! limiter. Holds a `ConnectionManager`, which multiplexes and reconnects
//! transparently, so it is cheap to clone and safe to share across tasks.

use crate::InfraError;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub url: String,
    pub key_prefix: String,
}

impl RedisCacheConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: "webhooks:".to_string(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// A one-increment-per-fixed-window Lua script: `INCR key; EXPIRE key ttl NX`
/// in a single round trip, so concurrent callers across replicas never race
/// between the increment and the expiry (spec §4.2 correctness floor).
const INCR_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
    config: RedisCacheConfig,
}

impl RedisCache {
    pub async fn new(config: RedisCacheConfig) -> Result<Self, InfraError> {
        info!(url = %config.url, "connecting to redis");
        let client = redis::Client::open(config.url.clone())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn, config })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Atomically increments the counter for `key` and, on the first
    /// increment within the window, sets it to expire after `window_secs`.
    /// Returns the post-increment value.
    pub async fn incr_window(&self, key: &str, window_secs: usize) -> Result<i64, InfraError> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(INCR_WINDOW_SCRIPT);
        let full_key = self.make_key(key);
        let count: i64 = script
            .key(full_key)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, InfraError> {
        let mut conn = self.conn.clone();
        let full_key = self.make_key(key);
        let ttl: i64 = conn.ttl(&full_key).await?;
        Ok(match ttl {
            -2 | -1 => None,
            secs if secs > 0 => Some(Duration::from_secs(secs as u64)),
            _ => None,
        })
    }

    pub async fn health_check(&self) -> Result<(), InfraError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_applies_default_prefix() {
        let config = RedisCacheConfig::new("redis://localhost");
        assert_eq!(config.key_prefix, "webhooks:");
    }

    #[test]
    fn with_key_prefix_overrides_default() {
        let config = RedisCacheConfig::new("redis://localhost").with_key_prefix("rl:");
        assert_eq!(config.key_prefix, "rl:");
    }
}
