//! Error taxonomy for the core domain types.
//!
//! Store, queue, limiter and engine crates each define their own richer error
//! enum; this one covers failures that can occur before any of those crates
//! are involved (config loading, signature parsing primitives shared across
//! crates).

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("invalid backoff configuration: {0}")]
    InvalidBackoff(String),
}
