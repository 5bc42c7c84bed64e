//! The Event Store (spec §4.1): `insert`, `claim`, `record_attempt`, `get`,
//! `search`, each a single atomic step against Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;
use webhook_core::model::{
    Attempt, ClaimOutcome, Event, EventStatus, HourlyBucket, InsertOutcome, RecordOutcome,
    SearchAggregates, SearchFilter, SearchPage,
};

use crate::error::StoreError;

/// Input to `insert`: everything about an event known at intake time, before
/// a server-assigned `id` exists.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub idempotency_key: Option<String>,
    pub event_type: Option<String>,
    pub payload: serde_json::Value,
    pub signature: String,
    pub received_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, new_event: NewEvent) -> Result<InsertOutcome, StoreError>;

    async fn claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError>;

    /// `claimed_at` is the fencing token returned by the `claim` call that
    /// produced this attempt: a stale claimant whose row has since been
    /// reclaimed by another worker (new `claimed_at`, same `DELIVERING`
    /// status) must not be able to record an attempt against the new
    /// claimant's work.
    async fn record_attempt(
        &self,
        id: &str,
        attempt: Attempt,
        terminal_status: Option<EventStatus>,
        next_attempt_at: Option<DateTime<Utc>>,
        claimed_at: DateTime<Utc>,
    ) -> Result<RecordOutcome, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Event>, StoreError>;

    async fn search(&self, filter: SearchFilter) -> Result<SearchPage, StoreError>;
}

#[derive(FromRow)]
struct EventRow {
    id: String,
    idempotency_key: Option<String>,
    event_type: Option<String>,
    payload: serde_json::Value,
    signature: String,
    status: String,
    received_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    attempts: serde_json::Value,
    attempt_count: i32,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl EventRow {
    fn into_event(self) -> Result<Event, StoreError> {
        let status = EventStatus::from_db_str(&self.status)
            .ok_or_else(|| StoreError::CorruptRow(format!("unknown status {}", self.status)))?;
        let attempts: Vec<Attempt> = serde_json::from_value(self.attempts)?;
        Ok(Event {
            id: self.id,
            idempotency_key: self.idempotency_key,
            event_type: self.event_type,
            payload: self.payload,
            signature: self.signature,
            status,
            received_at: self.received_at,
            claimed_at: self.claimed_at,
            attempts,
            attempt_count: self.attempt_count as u32,
            next_attempt_at: self.next_attempt_at,
        })
    }
}

pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn insert(&self, new_event: NewEvent) -> Result<InsertOutcome, StoreError> {
        let id = format!("evt_{}", Uuid::new_v4());

        let inserted: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO events
                (id, idempotency_key, event_type, payload, signature, status, received_at, attempts, attempt_count)
            VALUES
                ($1, $2, $3, $4, $5, 'RECEIVED', $6, '[]'::jsonb, 0)
            ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&id)
        .bind(&new_event.idempotency_key)
        .bind(&new_event.event_type)
        .bind(&new_event.payload)
        .bind(&new_event.signature)
        .bind(new_event.received_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some((id,)) => {
                info!(event_id = %id, "event inserted");
                Ok(InsertOutcome::Inserted(Event {
                    id,
                    idempotency_key: new_event.idempotency_key,
                    event_type: new_event.event_type,
                    payload: new_event.payload,
                    signature: new_event.signature,
                    status: EventStatus::Received,
                    received_at: new_event.received_at,
                    claimed_at: None,
                    attempts: Vec::new(),
                    attempt_count: 0,
                    next_attempt_at: None,
                }))
            }
            None => {
                let key = new_event
                    .idempotency_key
                    .as_deref()
                    .ok_or_else(|| StoreError::CorruptRow("conflict without idempotency_key".into()))?;
                let (existing_id,): (String,) =
                    sqlx::query_as("SELECT id FROM events WHERE idempotency_key = $1")
                        .bind(key)
                        .fetch_one(&self.pool)
                        .await?;
                Ok(InsertOutcome::Duplicate { existing_id })
            }
        }
    }

    async fn claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE events
            SET status = 'DELIVERING', claimed_at = $2
            WHERE id = (
                SELECT id FROM events
                WHERE id = $1
                  AND (status = 'RECEIVED' OR (status = 'DELIVERING' AND claimed_at < $3))
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, idempotency_key, event_type, payload, signature, status,
                      received_at, claimed_at, attempts, attempt_count, next_attempt_at
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let event = EventRow::from_row(&row)?.into_event()?;
                Ok(ClaimOutcome::Claimed(event))
            }
            None => Ok(ClaimOutcome::NotClaimable),
        }
    }

    async fn record_attempt(
        &self,
        id: &str,
        attempt: Attempt,
        terminal_status: Option<EventStatus>,
        next_attempt_at: Option<DateTime<Utc>>,
        claimed_at: DateTime<Utc>,
    ) -> Result<RecordOutcome, StoreError> {
        let attempt_json = serde_json::to_value(std::slice::from_ref(&attempt))?;
        let status = terminal_status.unwrap_or(EventStatus::Received);

        let row = sqlx::query(
            r#"
            UPDATE events
            SET attempts = attempts || $2::jsonb,
                attempt_count = attempt_count + 1,
                status = $3,
                next_attempt_at = $4
            WHERE id = $1 AND status = 'DELIVERING' AND claimed_at = $5
            RETURNING id, idempotency_key, event_type, payload, signature, status,
                      received_at, claimed_at, attempts, attempt_count, next_attempt_at
            "#,
        )
        .bind(id)
        .bind(attempt_json)
        .bind(status.as_db_str())
        .bind(next_attempt_at)
        .bind(claimed_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let event = EventRow::from_row(&row)?.into_event()?;
                Ok(RecordOutcome::Recorded(event))
            }
            None => {
                warn!(event_id = id, "record_attempt conflict: stale claim (reclaimed by another worker)");
                Ok(RecordOutcome::Conflict)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, event_type, payload, signature, status,
                   received_at, claimed_at, attempts, attempt_count, next_attempt_at
            FROM events WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| EventRow::from_row(&r)?.into_event())
            .transpose()
    }

    async fn search(&self, filter: SearchFilter) -> Result<SearchPage, StoreError> {
        let mut builder = sqlx::QueryBuilder::new(
            "SELECT id, idempotency_key, event_type, payload, signature, status, \
             received_at, claimed_at, attempts, attempt_count, next_attempt_at FROM events WHERE 1=1",
        );

        if let Some(statuses) = &filter.status {
            let codes: Vec<&str> = statuses.iter().map(|s| s.as_db_str()).collect();
            builder.push(" AND status = ANY(");
            builder.push_bind(codes);
            builder.push(")");
        }
        if let Some(event_type) = &filter.event_type {
            builder.push(" AND event_type = ");
            builder.push_bind(event_type);
        }
        if let Some(from) = filter.from {
            builder.push(" AND received_at >= ");
            builder.push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND received_at <= ");
            builder.push_bind(to);
        }

        builder.push(" ORDER BY received_at DESC, id DESC");
        builder.push(" OFFSET ");
        builder.push_bind(filter.skip.unwrap_or(0) as i64);
        builder.push(" LIMIT ");
        builder.push_bind(filter.limit.unwrap_or(50).min(500) as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(EventRow::from_row(row)?.into_event()?);
        }

        let aggregates = self.aggregates().await?;

        Ok(SearchPage { items, aggregates })
    }
}

impl PostgresEventStore {
    async fn aggregates(&self) -> Result<SearchAggregates, StoreError> {
        let mut aggregates = SearchAggregates::default();

        let by_status = sqlx::query("SELECT status, COUNT(*) AS n FROM events GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in by_status {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            aggregates.by_status.insert(status, n);
        }

        let by_type = sqlx::query(
            "SELECT COALESCE(event_type, '') AS event_type, COUNT(*) AS n FROM events GROUP BY event_type",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in by_type {
            let event_type: String = row.try_get("event_type")?;
            let n: i64 = row.try_get("n")?;
            aggregates.by_type.insert(event_type, n);
        }

        let hourly = sqlx::query(
            "SELECT date_trunc('hour', received_at) AS hour, COUNT(*) AS n \
             FROM events GROUP BY hour ORDER BY hour",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in hourly {
            let hour: DateTime<Utc> = row.try_get("hour")?;
            let n: i64 = row.try_get("n")?;
            aggregates.hourly.push(HourlyBucket { hour, count: n });
        }

        Ok(aggregates)
    }
}
