//! Domain types shared by every crate in the delivery pipeline: the event/attempt
//! data model, the settings loaded from the environment, and the backoff schedule
//! that governs retries.

pub mod backoff;
pub mod config;
pub mod error;
pub mod model;

pub use backoff::BackoffPolicy;
pub use config::AppConfig;
pub use error::CoreError;
pub use model::{
    Attempt, ClaimOutcome, Event, EventStatus, InsertOutcome, RecordOutcome, SearchFilter,
    SearchPage,
};

pub type Result<T> = std::result::Result<T, CoreError>;
