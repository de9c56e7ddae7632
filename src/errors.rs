//! Error types shared across the configuration and persistence layers.

use thiserror::Error;

/// Errors surfaced by configuration loading and the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Convenience alias used throughout the store and config modules.
pub type StoreResult<T> = Result<T, StoreError>;
