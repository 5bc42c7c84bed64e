//! Task Queue (spec §4.3): at-least-once "deliver event E" dispatch with
//! ETA-based delay. Backed by a Postgres table distinct from `events`,
//! reusing the same `FOR UPDATE SKIP LOCKED` claim idiom as the event store
//! so no second broker dependency is introduced (spec §4.3 design note).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::StoreError;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Records a work item visible to exactly one worker at `now >=
    /// not_before`.
    async fn enqueue(&self, event_id: &str, not_before: DateTime<Utc>) -> Result<(), StoreError>;
}

pub struct PostgresTaskQueue {
    pool: PgPool,
    worker_id: String,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            worker_id: format!("worker_{}", Uuid::new_v4()),
        }
    }

    /// Long-lived subscription (spec §4.3 `consume`). Claims up to
    /// `concurrency` visible items per tick and dispatches each to
    /// `handler` on its own task. A handler that panics or is aborted
    /// leaves its item locked until `visibility_timeout` elapses, at which
    /// point it becomes visible to any worker again — the sole mechanism
    /// for at-least-once redelivery on crash (spec §5).
    pub async fn consume<F, Fut>(
        &self,
        concurrency: usize,
        visibility_timeout: Duration,
        poll_interval: Duration,
        handler: F,
    ) where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        loop {
            match self.claim_batch(concurrency, visibility_timeout).await {
                Ok(items) => {
                    for (queue_id, event_id) in items {
                        let permit = semaphore
                            .clone()
                            .acquire_owned()
                            .await
                            .expect("semaphore never closed");
                        let pool = self.pool.clone();
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            handler(event_id).await;
                            if let Err(e) = sqlx::query("DELETE FROM queue_items WHERE id = $1")
                                .bind(queue_id)
                                .execute(&pool)
                                .await
                            {
                                error!(error = %e, queue_id, "failed to delete completed queue item");
                            }
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "queue poll failed");
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn claim_batch(
        &self,
        limit: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<(i64, String)>, StoreError> {
        let visible_before =
            Utc::now() - chrono::Duration::from_std(visibility_timeout).unwrap_or_default();

        let rows = sqlx::query(
            r#"
            UPDATE queue_items
            SET locked_by = $1, locked_at = now()
            WHERE id IN (
                SELECT id FROM queue_items
                WHERE not_before <= now()
                  AND (locked_by IS NULL OR locked_at < $2)
                ORDER BY not_before ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, event_id
            "#,
        )
        .bind(&self.worker_id)
        .bind(visible_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<i64, _>("id"), r.get::<String, _>("event_id")))
            .collect())
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn enqueue(&self, event_id: &str, not_before: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO queue_items (event_id, not_before) VALUES ($1, $2)")
            .bind(event_id)
            .bind(not_before)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
