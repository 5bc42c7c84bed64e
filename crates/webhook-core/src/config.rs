//! Domain configuration (spec §6.3), loaded from the environment with typed
//! defaults. Process-level concerns (port, log level, environment name,
//! json-logs flag) live in the binary's `clap::Parser` CLI args instead —
//! this struct covers everything the delivery engine itself needs to run.

use crate::error::CoreError;
use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub hmac_secret: String,
    pub downstream_url: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_backoff_cap_seconds")]
    pub backoff_cap_seconds: u64,

    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_queue_visibility_seconds")]
    pub queue_visibility_seconds: u64,
    #[serde(default = "default_claim_stale_seconds")]
    pub claim_stale_seconds: u64,

    pub database_url: String,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_database_min_connections")]
    pub database_min_connections: u32,

    pub redis_url: String,
}

impl AppConfig {
    /// Load configuration from environment variables (prefix `APP`, `__`
    /// nesting separator), falling back to the typed defaults above.
    pub fn load() -> Result<Self, CoreError> {
        Self::load_from_env("APP")
    }

    pub fn load_from_env(prefix: &str) -> Result<Self, CoreError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("max_attempts", default_max_attempts())?
            .set_default("backoff_base_seconds", default_backoff_base_seconds())?
            .set_default("backoff_factor", default_backoff_factor())?
            .set_default("backoff_cap_seconds", default_backoff_cap_seconds())?
            .set_default("rate_limit_per_sec", default_rate_limit_per_sec())?
            .set_default("worker_concurrency", default_worker_concurrency() as i64)?
            .set_default("http_timeout_seconds", default_http_timeout_seconds())?
            .set_default("queue_visibility_seconds", default_queue_visibility_seconds())?
            .set_default("claim_stale_seconds", default_claim_stale_seconds())?
            .set_default("database_max_connections", default_database_max_connections())?
            .set_default("database_min_connections", default_database_min_connections())?;

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a TOML file with environment overrides, for
    /// local development.
    pub fn load_from_file(path: &str) -> Result<Self, CoreError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("APP").separator("__").try_parsing(true));

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn queue_visibility(&self) -> Duration {
        Duration::from_secs(self.queue_visibility_seconds)
    }

    pub fn claim_stale(&self) -> Duration {
        Duration::from_secs(self.claim_stale_seconds)
    }

    pub fn backoff_policy(&self) -> crate::backoff::BackoffPolicy {
        crate::backoff::BackoffPolicy::new(
            self.backoff_base_seconds,
            self.backoff_factor,
            self.backoff_cap_seconds,
        )
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_seconds() -> u64 {
    1
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_backoff_cap_seconds() -> u64 {
    16
}

fn default_rate_limit_per_sec() -> u32 {
    3
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_http_timeout_seconds() -> u64 {
    10
}

fn default_queue_visibility_seconds() -> u64 {
    60
}

fn default_claim_stale_seconds() -> u64 {
    120
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_database_min_connections() -> u32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    #[test]
    fn defaults_fill_in_unset_options() {
        set("APPTEST__HMAC_SECRET", "shh");
        set("APPTEST__DOWNSTREAM_URL", "http://localhost:9000");
        set("APPTEST__DATABASE_URL", "postgres://localhost/webhooks");
        set("APPTEST__REDIS_URL", "redis://localhost");

        let config = AppConfig::load_from_env("APPTEST").unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base_seconds, 1);
        assert_eq!(config.backoff_factor, 2.0);
        assert_eq!(config.backoff_cap_seconds, 16);
        assert_eq!(config.rate_limit_per_sec, 3);
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.http_timeout_seconds, 10);
        assert_eq!(config.queue_visibility_seconds, 60);
        assert_eq!(config.claim_stale_seconds, 120);
    }

    #[test]
    fn backoff_policy_matches_configured_schedule() {
        set("APPTEST2__HMAC_SECRET", "shh");
        set("APPTEST2__DOWNSTREAM_URL", "http://localhost:9000");
        set("APPTEST2__DATABASE_URL", "postgres://localhost/webhooks");
        set("APPTEST2__REDIS_URL", "redis://localhost");

        let config = AppConfig::load_from_env("APPTEST2").unwrap();
        let policy = config.backoff_policy();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(5), Duration::from_secs(16));
    }
}
