//! Delivery Engine (C4, spec §4.4): intake validation, the worker path, and
//! the search projection, tying together the event store (C1), rate
//! limiter (C2), and task queue (C3).

pub mod classify;
pub mod intake;
pub mod search;
pub mod signature;
pub mod worker;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("malformed request body")]
    BadRequest,

    #[error("store error: {0}")]
    Store(#[from] webhook_store::error::StoreError),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
