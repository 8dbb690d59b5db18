//! Error types for the object store client.
//!
//! # Design
//! Entity and query operations report outcomes through return values and the
//! transport's last `Outcome`, so `StoreError` only appears at the two seams
//! that can genuinely fail before a response exists: executing the HTTP
//! round-trip and loading configuration.

use thiserror::Error;

/// Errors raised by executors and configuration loading.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The HTTP round-trip could not be completed (connection refused, timeout, ...).
    #[error("transport failed: {0}")]
    Transport(String),

    /// A configuration document was not valid JSON or had the wrong shape.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
