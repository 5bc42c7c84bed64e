pub mod cache;
pub mod database;
pub mod health;
pub mod metrics;
pub mod resilience;

pub use cache::redis::{RedisCache, RedisCacheConfig};

pub use database::pool::{create_pool, PgPoolConfig};
pub use database::migrations::run_migrations;

pub use health::{CompositeHealthChecker, DatabaseHealthCheck, HealthStatus, RedisHealthCheck};

pub use resilience::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
    ExponentialBackoff, FixedDelay, RetryConfig, RetryPolicy, TimeoutError, TimeoutPolicy,
};

pub use metrics::{DeliveryMetrics, MetricsHandle};

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("health check failed: {0}")]
    HealthCheck(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, InfraError>;
