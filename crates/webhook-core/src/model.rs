//! The event/attempt data model (spec §3) and the tagged outcomes used in
//! place of exceptions at the claim/insert/classify boundaries (spec §9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an [`Event`]. Transitions form the DAG in spec §3.3/§4.4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Received,
    Delivering,
    Delivered,
    FailedPermanently,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Delivered | EventStatus::FailedPermanently)
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            EventStatus::Received => "RECEIVED",
            EventStatus::Delivering => "DELIVERING",
            EventStatus::Delivered => "DELIVERED",
            EventStatus::FailedPermanently => "FAILED_PERMANENTLY",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "RECEIVED" => Some(EventStatus::Received),
            "DELIVERING" => Some(EventStatus::Delivering),
            "DELIVERED" => Some(EventStatus::Delivered),
            "FAILED_PERMANENTLY" => Some(EventStatus::FailedPermanently),
            _ => None,
        }
    }
}

/// A single, finalized record of one delivery try (spec §3.2). Never mutated
/// after it is appended to an [`Event`]'s `attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub n: u32,
    pub at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
}

impl Attempt {
    pub fn success(n: u32, at: DateTime<Utc>, http_status: u16) -> Self {
        Self {
            n,
            at,
            http_status: Some(http_status),
            success: true,
            error: None,
        }
    }

    pub fn failure(n: u32, at: DateTime<Utc>, http_status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            n,
            at,
            http_status,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Durable record of a producer-originated message (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub idempotency_key: Option<String>,
    pub event_type: Option<String>,
    pub payload: serde_json::Value,
    pub signature: String,
    pub status: EventStatus,
    pub received_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempts: Vec<Attempt>,
    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }
}

/// Outcome of [`crate::model`]'s `store.insert` primitive (spec §4.1).
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Event),
    Duplicate { existing_id: String },
}

/// Outcome of the `store.claim` primitive (spec §4.1).
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Event),
    NotClaimable,
}

/// Outcome of the `store.record_attempt` primitive (spec §4.1).
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Recorded(Event),
    Conflict,
}

/// Filter accepted by `store.search` (spec §4.1, §6.1).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilter {
    #[serde(default)]
    pub status: Option<Vec<EventStatus>>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// A page of search results plus the aggregates named in spec §4.1/§6.1.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub items: Vec<Event>,
    pub aggregates: SearchAggregates,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchAggregates {
    pub by_status: std::collections::BTreeMap<String, i64>,
    pub by_type: std::collections::BTreeMap<String, i64>,
    pub hourly: Vec<HourlyBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourlyBucket {
    pub hour: DateTime<Utc>,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_string() {
        for status in [
            EventStatus::Received,
            EventStatus::Delivering,
            EventStatus::Delivered,
            EventStatus::FailedPermanently,
        ] {
            let s = status.as_db_str();
            assert_eq!(EventStatus::from_db_str(s), Some(status));
        }
    }

    #[test]
    fn terminal_statuses_are_delivered_and_failed() {
        assert!(!EventStatus::Received.is_terminal());
        assert!(!EventStatus::Delivering.is_terminal());
        assert!(EventStatus::Delivered.is_terminal());
        assert!(EventStatus::FailedPermanently.is_terminal());
    }

    #[test]
    fn attempt_failure_carries_error_kind() {
        let at = Utc::now();
        let a = Attempt::failure(2, at, Some(503), "RETRYABLE");
        assert!(!a.success);
        assert_eq!(a.http_status, Some(503));
        assert_eq!(a.error.as_deref(), Some("RETRYABLE"));
    }
}
