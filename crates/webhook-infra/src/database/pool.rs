//! Postgres connection pool construction, shared by the event store and the
//! task queue (both live in `webhook-store`, which is handed a pool built
//! here rather than opening its own).

use crate::InfraError;
use sqlx::postgres::{PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PgPoolConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl PgPoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }
}

pub async fn create_pool(config: PgPoolConfig) -> Result<PgPool, InfraError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "connecting to postgres"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.url)
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_applies_pool_size() {
        let config = PgPoolConfig::new("postgres://localhost/webhooks").with_pool_size(3, 15);
        assert_eq!(config.min_connections, 3);
        assert_eq!(config.max_connections, 15);
    }
}
