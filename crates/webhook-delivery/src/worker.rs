//! Worker path (spec §4.4.2): claim, rate-limit, deliver, classify, record —
//! the per-dequeued-event-id sequence a queue handler runs.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use webhook_core::backoff::BackoffPolicy;
use webhook_core::model::{Attempt, ClaimOutcome, EventStatus, RecordOutcome};
use webhook_infra::metrics::MetricsHandle;
use webhook_infra::resilience::timeout::timeout_result;
use webhook_infra::resilience::{CircuitBreaker, CircuitBreakerConfig, TimeoutPolicy};
use webhook_limiter::RateLimiter;
use webhook_store::event_store::EventStore;
use webhook_store::task_queue::TaskQueue;

pub struct WorkerConfig {
    pub max_attempts: u32,
    pub claim_stale: Duration,
    pub rate_limit_acquire_timeout: Duration,
    pub http_timeout: Duration,
    pub downstream_url: String,
    pub backoff: BackoffPolicy,
}

pub struct Worker {
    store: Arc<dyn EventStore>,
    queue: Arc<dyn TaskQueue>,
    limiter: Arc<dyn RateLimiter>,
    http: reqwest::Client,
    metrics: MetricsHandle,
    circuit_breaker: CircuitBreaker,
    timeout_policy: TimeoutPolicy,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn EventStore>,
        queue: Arc<dyn TaskQueue>,
        limiter: Arc<dyn RateLimiter>,
        http: reqwest::Client,
        metrics: MetricsHandle,
        config: WorkerConfig,
    ) -> Self {
        let circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig::new("downstream"));
        let timeout_policy = TimeoutPolicy::new(config.http_timeout);
        Self {
            store,
            queue,
            limiter,
            http,
            metrics,
            circuit_breaker,
            timeout_policy,
            config,
        }
    }

    /// Processes one dequeued `event_id` end to end (spec §4.4.2). Never
    /// returns an error to the caller: every failure mode here is either a
    /// recorded attempt or a silent abandonment, by design of the claim/
    /// classify outcomes (spec §9).
    pub async fn handle(&self, event_id: String) {
        self.metrics.workers_in_flight.inc();
        if let Err(e) = self.handle_inner(&event_id).await {
            warn!(event_id = %event_id, error = %e, "worker step failed");
        }
        self.metrics.workers_in_flight.dec();
    }

    async fn handle_inner(&self, event_id: &str) -> Result<(), webhook_store::error::StoreError> {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(self.config.claim_stale).unwrap_or(chrono::Duration::zero());

        let event = match self.store.claim(event_id, now, stale_before).await? {
            ClaimOutcome::Claimed(event) => event,
            ClaimOutcome::NotClaimable => {
                info!(event_id, "not claimable, skipping");
                return Ok(());
            }
        };

        if self
            .limiter
            .acquire(self.config.rate_limit_acquire_timeout)
            .await
            .is_err()
        {
            let delay = self.config.backoff.local_rate_limit_delay(event.attempt_count);
            info!(event_id, delay_ms = delay.as_millis() as u64, "rate limited, re-enqueueing without recording an attempt");
            self.queue
                .enqueue(event_id, Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
                .await?;
            return Ok(());
        }

        let attempt_n = event.attempt_count + 1;
        let timer = self.metrics.delivery_latency_seconds.start_timer();
        let (classification, http_status, error) = self.deliver(&event.payload, event_id).await;
        drop(timer);

        let attempt = match (classification, http_status) {
            (crate::classify::Classification::Success, Some(status)) => {
                Attempt::success(attempt_n, Utc::now(), status)
            }
            _ => Attempt::failure(
                attempt_n,
                Utc::now(),
                http_status,
                error.unwrap_or_else(|| "unknown".to_string()),
            ),
        };

        let (terminal_status, requeue_delay) = match classification {
            crate::classify::Classification::Success => {
                self.metrics.deliveries_succeeded_total.inc();
                (Some(EventStatus::Delivered), None)
            }
            crate::classify::Classification::Permanent => {
                self.metrics.deliveries_failed_total.inc();
                (Some(EventStatus::FailedPermanently), None)
            }
            crate::classify::Classification::Retryable => {
                self.metrics.retry_attempts_total.inc();
                if attempt_n >= self.config.max_attempts {
                    self.metrics.deliveries_failed_total.inc();
                    (Some(EventStatus::FailedPermanently), None)
                } else {
                    (None, Some(self.config.backoff.delay_after(attempt_n)))
                }
            }
        };

        let attempt_at = attempt.at;
        let next_attempt_at = requeue_delay
            .map(|delay| attempt_at + chrono::Duration::from_std(delay).unwrap_or_default());
        let claimed_at = event.claimed_at.unwrap_or(now);

        match self
            .store
            .record_attempt(event_id, attempt, terminal_status, next_attempt_at, claimed_at)
            .await?
        {
            RecordOutcome::Recorded(_) => {
                if let Some(delay) = requeue_delay {
                    self.queue
                        .enqueue(
                            event_id,
                            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default(),
                        )
                        .await?;
                }
            }
            RecordOutcome::Conflict => {
                self.metrics.stale_claim_reclaims_total.inc();
                warn!(event_id, "record_attempt conflict, abandoning without re-enqueue");
            }
        }

        Ok(())
    }

    async fn deliver(
        &self,
        payload: &serde_json::Value,
        event_id: &str,
    ) -> (crate::classify::Classification, Option<u16>, Option<String>) {
        if !self.circuit_breaker.allow_request().await {
            warn!(event_id, "circuit breaker open, skipping downstream call");
            let classification = crate::classify::Classification::from_transport_error();
            return (classification, None, Some("CIRCUIT_OPEN".to_string()));
        }

        let url = format!("{}/receive", self.config.downstream_url);
        let result = timeout_result(self.timeout_policy.default_timeout, "downstream_post", || {
            self.http
                .post(&url)
                .header("X-Event-Id", event_id)
                .json(payload)
                .send()
        })
        .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let classification = crate::classify::Classification::from_status(status);
                let error = classification.error_kind(Some(status));
                if classification == crate::classify::Classification::Success {
                    self.circuit_breaker.record_success().await;
                } else {
                    self.circuit_breaker.record_failure().await;
                }
                (classification, Some(status), error)
            }
            Err(webhook_infra::resilience::timeout::TimeoutOrError::Timeout(e)) => {
                self.circuit_breaker.record_failure().await;
                let classification = crate::classify::Classification::from_transport_error();
                (classification, None, Some(format!("TIMEOUT: {}", e)))
            }
            Err(webhook_infra::resilience::timeout::TimeoutOrError::Error(e)) => {
                self.circuit_breaker.record_failure().await;
                let classification = crate::classify::Classification::from_transport_error();
                (classification, None, Some(format!("TRANSPORT: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use webhook_core::model::{InsertOutcome, SearchFilter, SearchPage};
    use webhook_infra::metrics::DeliveryMetrics;
    use webhook_store::event_store::NewEvent;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeStore {
        events: Mutex<HashMap<String, webhook_core::model::Event>>,
    }

    impl FakeStore {
        fn with_received(id: &str) -> Self {
            let event = webhook_core::model::Event {
                id: id.to_string(),
                idempotency_key: None,
                event_type: None,
                payload: serde_json::json!({"hello": "world"}),
                signature: "sig".to_string(),
                status: EventStatus::Received,
                received_at: Utc::now(),
                claimed_at: None,
                attempts: Vec::new(),
                attempt_count: 0,
                next_attempt_at: None,
            };
            let mut events = HashMap::new();
            events.insert(id.to_string(), event);
            Self {
                events: Mutex::new(events),
            }
        }
    }

    #[async_trait]
    impl EventStore for FakeStore {
        async fn insert(&self, _new_event: NewEvent) -> Result<InsertOutcome, webhook_store::error::StoreError> {
            unimplemented!("not exercised by worker tests")
        }

        async fn claim(
            &self,
            id: &str,
            now: DateTime<Utc>,
            stale_before: DateTime<Utc>,
        ) -> Result<ClaimOutcome, webhook_store::error::StoreError> {
            let mut events = self.events.lock().unwrap();
            let Some(event) = events.get_mut(id) else {
                return Ok(ClaimOutcome::NotClaimable);
            };
            let claimable = event.status == EventStatus::Received
                || (event.status == EventStatus::Delivering
                    && event.claimed_at.map(|c| c < stale_before).unwrap_or(false));
            if !claimable {
                return Ok(ClaimOutcome::NotClaimable);
            }
            event.status = EventStatus::Delivering;
            event.claimed_at = Some(now);
            Ok(ClaimOutcome::Claimed(event.clone()))
        }

        async fn record_attempt(
            &self,
            id: &str,
            attempt: Attempt,
            terminal_status: Option<EventStatus>,
            next_attempt_at: Option<DateTime<Utc>>,
            claimed_at: DateTime<Utc>,
        ) -> Result<RecordOutcome, webhook_store::error::StoreError> {
            let mut events = self.events.lock().unwrap();
            let Some(event) = events.get_mut(id) else {
                return Ok(RecordOutcome::Conflict);
            };
            if event.status != EventStatus::Delivering || event.claimed_at != Some(claimed_at) {
                return Ok(RecordOutcome::Conflict);
            }
            event.attempts.push(attempt);
            event.attempt_count += 1;
            event.status = terminal_status.unwrap_or(EventStatus::Received);
            event.next_attempt_at = next_attempt_at;
            Ok(RecordOutcome::Recorded(event.clone()))
        }

        async fn get(&self, id: &str) -> Result<Option<webhook_core::model::Event>, webhook_store::error::StoreError> {
            Ok(self.events.lock().unwrap().get(id).cloned())
        }

        async fn search(&self, _filter: SearchFilter) -> Result<SearchPage, webhook_store::error::StoreError> {
            unimplemented!("not exercised by worker tests")
        }
    }

    struct FakeQueue {
        enqueued: Mutex<Vec<(String, DateTime<Utc>)>>,
    }

    impl FakeQueue {
        fn new() -> Self {
            Self {
                enqueued: Mutex::new(Vec::new()),
            }
        }

        fn enqueued_count(&self) -> usize {
            self.enqueued.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TaskQueue for FakeQueue {
        async fn enqueue(&self, event_id: &str, not_before: DateTime<Utc>) -> Result<(), webhook_store::error::StoreError> {
            self.enqueued.lock().unwrap().push((event_id.to_string(), not_before));
            Ok(())
        }
    }

    struct AllowAllLimiter;

    #[async_trait]
    impl RateLimiter for AllowAllLimiter {
        async fn acquire(&self, _timeout: Duration) -> Result<(), webhook_limiter::LimiterError> {
            Ok(())
        }
    }

    struct DenyingLimiter;

    #[async_trait]
    impl RateLimiter for DenyingLimiter {
        async fn acquire(&self, _timeout: Duration) -> Result<(), webhook_limiter::LimiterError> {
            Err(webhook_limiter::LimiterError::RateLimited)
        }
    }

    fn test_config(downstream_url: String, max_attempts: u32) -> WorkerConfig {
        WorkerConfig {
            max_attempts,
            claim_stale: Duration::from_secs(120),
            rate_limit_acquire_timeout: Duration::from_secs(1),
            http_timeout: Duration::from_secs(5),
            downstream_url,
            backoff: BackoffPolicy::new(0, 2.0, 0),
        }
    }

    #[tokio::test]
    async fn successful_delivery_marks_event_delivered() {
        let downstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/receive"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&downstream)
            .await;

        let store = Arc::new(FakeStore::with_received("evt_1"));
        let queue = Arc::new(FakeQueue::new());
        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            Arc::new(AllowAllLimiter),
            reqwest::Client::new(),
            Arc::new(DeliveryMetrics::new()),
            test_config(downstream.uri(), 5),
        );

        worker.handle("evt_1".to_string()).await;

        let event = store.get("evt_1").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Delivered);
        assert_eq!(event.attempt_count, 1);
        assert!(event.attempts[0].success);
        assert_eq!(queue.enqueued_count(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_marks_event_failed_after_one_attempt() {
        let downstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/receive"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&downstream)
            .await;

        let store = Arc::new(FakeStore::with_received("evt_2"));
        let queue = Arc::new(FakeQueue::new());
        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            Arc::new(AllowAllLimiter),
            reqwest::Client::new(),
            Arc::new(DeliveryMetrics::new()),
            test_config(downstream.uri(), 5),
        );

        worker.handle("evt_2".to_string()).await;

        let event = store.get("evt_2").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::FailedPermanently);
        assert_eq!(event.attempt_count, 1);
        assert!(!event.attempts[0].success);
        assert_eq!(queue.enqueued_count(), 0);
    }

    #[tokio::test]
    async fn retryable_failure_resets_to_received_and_requeues() {
        let downstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/receive"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&downstream)
            .await;

        let store = Arc::new(FakeStore::with_received("evt_3"));
        let queue = Arc::new(FakeQueue::new());
        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            Arc::new(AllowAllLimiter),
            reqwest::Client::new(),
            Arc::new(DeliveryMetrics::new()),
            test_config(downstream.uri(), 5),
        );

        worker.handle("evt_3".to_string()).await;

        let event = store.get("evt_3").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Received);
        assert_eq!(event.attempt_count, 1);
        assert!(!event.attempts[0].success);
        assert!(event.next_attempt_at.is_some());
        assert_eq!(queue.enqueued_count(), 1);
    }

    #[tokio::test]
    async fn exhausting_attempt_budget_marks_failed_permanently() {
        let downstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/receive"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&downstream)
            .await;

        let store = Arc::new(FakeStore::with_received("evt_4"));
        let queue = Arc::new(FakeQueue::new());
        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            Arc::new(AllowAllLimiter),
            reqwest::Client::new(),
            Arc::new(DeliveryMetrics::new()),
            test_config(downstream.uri(), 2),
        );

        worker.handle("evt_4".to_string()).await;
        worker.handle("evt_4".to_string()).await;

        let event = store.get("evt_4").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::FailedPermanently);
        assert_eq!(event.attempt_count, 2);
        assert_eq!(queue.enqueued_count(), 1);
    }

    #[tokio::test]
    async fn rate_limited_skips_attempt_and_requeues_without_recording() {
        let downstream = MockServer::start().await;

        let store = Arc::new(FakeStore::with_received("evt_5"));
        let queue = Arc::new(FakeQueue::new());
        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            Arc::new(DenyingLimiter),
            reqwest::Client::new(),
            Arc::new(DeliveryMetrics::new()),
            test_config(downstream.uri(), 5),
        );

        worker.handle("evt_5".to_string()).await;

        let event = store.get("evt_5").await.unwrap().unwrap();
        assert_eq!(event.attempt_count, 0);
        assert_eq!(queue.enqueued_count(), 1);
    }

    #[tokio::test]
    async fn not_claimable_event_is_a_silent_no_op() {
        let downstream = MockServer::start().await;

        let store = Arc::new(FakeStore::with_received("evt_6"));
        {
            let mut events = store.events.lock().unwrap();
            events.get_mut("evt_6").unwrap().status = EventStatus::Delivered;
        }
        let queue = Arc::new(FakeQueue::new());
        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            Arc::new(AllowAllLimiter),
            reqwest::Client::new(),
            Arc::new(DeliveryMetrics::new()),
            test_config(downstream.uri(), 5),
        );

        worker.handle("evt_6".to_string()).await;

        let event = store.get("evt_6").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Delivered);
        assert_eq!(event.attempt_count, 0);
        assert_eq!(queue.enqueued_count(), 0);
    }

    #[tokio::test]
    async fn stale_claimant_record_attempt_conflicts_after_reclaim() {
        let store = FakeStore::with_received("evt_7");

        let t0 = Utc::now();
        let stale_cutoff = t0 - chrono::Duration::seconds(120);
        let original = match store.claim("evt_7", t0, stale_cutoff).await.unwrap() {
            ClaimOutcome::Claimed(event) => event,
            ClaimOutcome::NotClaimable => panic!("expected claim to succeed"),
        };

        // A second worker reclaims the same row because the original claim is
        // now considered stale: status stays DELIVERING, only claimed_at moves.
        let t1 = t0 + chrono::Duration::seconds(200);
        let new_claimant = match store
            .claim("evt_7", t1, t0 + chrono::Duration::seconds(1))
            .await
            .unwrap()
        {
            ClaimOutcome::Claimed(event) => event,
            ClaimOutcome::NotClaimable => panic!("expected reclaim to succeed"),
        };
        assert_ne!(original.claimed_at, new_claimant.claimed_at);

        // The original (stale) claimant's attempt must not land: the row no
        // longer carries its claimed_at.
        let stale_attempt = Attempt::success(1, Utc::now(), 200);
        let outcome = store
            .record_attempt(
                "evt_7",
                stale_attempt,
                Some(EventStatus::Delivered),
                None,
                original.claimed_at.unwrap(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, RecordOutcome::Conflict));

        // The new claimant's attempt, fenced with its own claimed_at, succeeds.
        let fresh_attempt = Attempt::success(1, Utc::now(), 200);
        let outcome = store
            .record_attempt(
                "evt_7",
                fresh_attempt,
                Some(EventStatus::Delivered),
                None,
                new_claimant.claimed_at.unwrap(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, RecordOutcome::Recorded(_)));

        let event = store.get("evt_7").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Delivered);
        assert_eq!(event.attempt_count, 1);
    }

    #[tokio::test]
    async fn repeated_failures_open_circuit_breaker_and_stop_calling_downstream() {
        let downstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/receive"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&downstream)
            .await;

        let store = Arc::new(FakeStore::with_received("evt_8"));
        let queue = Arc::new(FakeQueue::new());
        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            Arc::new(AllowAllLimiter),
            reqwest::Client::new(),
            Arc::new(DeliveryMetrics::new()),
            test_config(downstream.uri(), 100),
        );

        // The default circuit breaker config opens after 5+ failures once at
        // least 10 requests have been observed. Drive past that threshold.
        for _ in 0..11 {
            worker.handle("evt_8".to_string()).await;
        }

        let requests = downstream.received_requests().await.unwrap();
        assert!(
            requests.len() < 11,
            "circuit breaker should have short-circuited at least one call, got {} requests",
            requests.len()
        );

        let event = store.get("evt_8").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Received);
        assert!(!event.attempts.last().unwrap().success);
    }
}
