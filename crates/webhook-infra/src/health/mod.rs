//! Liveness is unconditional once the HTTP listener is bound; readiness
//! (spec §6.1 `/ready`) additionally requires the Postgres pool and the
//! Redis connection manager to answer a trivial round trip.

use crate::cache::redis::RedisCache;
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

pub struct DatabaseHealthCheck {
    pool: PgPool,
}

impl DatabaseHealthCheck {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn check(&self) -> HealthStatus {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "database health check failed");
                HealthStatus::Unhealthy
            }
        }
    }
}

pub struct RedisHealthCheck {
    cache: RedisCache,
}

impl RedisHealthCheck {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }

    pub async fn check(&self) -> HealthStatus {
        match self.cache.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "redis health check failed");
                HealthStatus::Unhealthy
            }
        }
    }
}

pub struct CompositeHealthChecker {
    database: DatabaseHealthCheck,
    redis: RedisHealthCheck,
}

#[derive(Debug, Serialize)]
pub struct ReadinessReport {
    pub database: HealthStatus,
    pub redis: HealthStatus,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.database == HealthStatus::Healthy && self.redis == HealthStatus::Healthy
    }
}

impl CompositeHealthChecker {
    pub fn new(database: DatabaseHealthCheck, redis: RedisHealthCheck) -> Self {
        Self { database, redis }
    }

    pub async fn check(&self) -> ReadinessReport {
        ReadinessReport {
            database: self.database.check().await,
            redis: self.redis.check().await,
        }
    }
}
