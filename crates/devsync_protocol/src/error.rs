//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding remote payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload is not valid JSON.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload parsed, but its top level is not an object.
    #[error("payload is not an object (found {found})")]
    NotAnObject {
        /// JSON kind found at the top level.
        found: &'static str,
    },
}
