//! Application state and initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use webhook_core::AppConfig;
use webhook_delivery::worker::{Worker, WorkerConfig};
use webhook_infra::metrics::DeliveryMetrics;
use webhook_infra::{create_pool, run_migrations, CompositeHealthChecker, DatabaseHealthCheck, PgPoolConfig,
    RedisCache, RedisCacheConfig, RedisHealthCheck};
use webhook_limiter::{RateLimiter, RedisTokenBucket};
use webhook_store::event_store::EventStore;
use webhook_store::task_queue::TaskQueue;
use webhook_store::{PostgresEventStore, PostgresTaskQueue, MIGRATOR};

use crate::cli::Args;
use crate::server::Server;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn EventStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub health: Arc<CompositeHealthChecker>,
    pub metrics: Arc<DeliveryMetrics>,
}

impl AppState {
    /// Create a new application state with all dependencies
    pub async fn new() -> Result<Self> {
        info!("Initializing application components");

        let config = Arc::new(
            AppConfig::load()
                .map_err(|e| anyhow::anyhow!("failed to load configuration: {}", e))?,
        );

        let pool = create_pool(
            PgPoolConfig::new(config.database_url.clone())
                .with_pool_size(config.database_min_connections, config.database_max_connections),
        )
        .await
        .context("failed to connect to postgres")?;

        run_migrations(&MIGRATOR, &pool)
            .await
            .context("failed to run database migrations")?;

        let redis = RedisCache::new(RedisCacheConfig::new(config.redis_url.clone()))
            .await
            .context("failed to connect to redis")?;

        let store: Arc<dyn EventStore> = Arc::new(PostgresEventStore::new(pool.clone()));
        let queue_concrete = Arc::new(PostgresTaskQueue::new(pool.clone()));
        let queue: Arc<dyn TaskQueue> = queue_concrete.clone();
        let limiter: Arc<dyn RateLimiter> = Arc::new(RedisTokenBucket::new(
            redis.clone(),
            "downstream",
            config.rate_limit_per_sec,
        ));

        let health = Arc::new(CompositeHealthChecker::new(
            DatabaseHealthCheck::new(pool.clone()),
            RedisHealthCheck::new(redis.clone()),
        ));

        let metrics = Arc::new(DeliveryMetrics::new());

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("failed to build downstream http client")?;

        let worker = Arc::new(Worker::new(
            store.clone(),
            queue.clone(),
            limiter,
            http,
            metrics.clone(),
            WorkerConfig {
                max_attempts: config.max_attempts,
                claim_stale: config.claim_stale(),
                rate_limit_acquire_timeout: Duration::from_secs(5),
                http_timeout: config.http_timeout(),
                downstream_url: config.downstream_url.clone(),
                backoff: config.backoff_policy(),
            },
        ));

        let consume_queue = queue_concrete;
        let worker_handle = worker.clone();
        let concurrency = config.worker_concurrency;
        let visibility = config.queue_visibility();
        tokio::spawn(async move {
            consume_queue
                .consume(concurrency, visibility, Duration::from_millis(250), move |event_id| {
                    let worker_handle = worker_handle.clone();
                    async move { worker_handle.handle(event_id).await }
                })
                .await;
        });

        Ok(Self {
            config,
            store,
            queue,
            health,
            metrics,
        })
    }
}

/// Main application
pub struct App {
    args: Args,
    state: AppState,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("Invalid command line arguments")?;

        let state = AppState::new().await?;

        Ok(Self { args, state })
    }

    /// Run the application
    pub async fn run(self) -> Result<()> {
        info!("Starting server");
        info!("HTTP port: {}", self.args.port);

        let server = Server::new(self.args, self.state)?;
        server.run().await?;

        Ok(())
    }
}
