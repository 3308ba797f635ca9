//! Error types for the sync engine.

use devsync_protocol::ProtocolError;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// The remote call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    /// Establishing the connection.
    Begin,
    /// Arming the stream on the command path.
    BeginStream,
    /// Reading one stream event.
    ReadStream,
    /// Writing a string node.
    Write,
    /// Deleting a node.
    Delete,
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOperation::Begin => "begin",
            RemoteOperation::BeginStream => "begin stream",
            RemoteOperation::ReadStream => "read stream",
            RemoteOperation::Write => "write",
            RemoteOperation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No network path: link down or internet unreachable.
    #[error("remote unavailable: no network path")]
    Unavailable,

    /// Backend handshake or stream arming did not succeed.
    #[error("backend not ready: {0}")]
    NotReady(String),

    /// Another remote operation holds the connection.
    #[error("another operation is in progress")]
    Contention,

    /// Remote operations are suspended until the connection is reset.
    #[error("remote operations suspended until the connection is reset")]
    Suspended,

    /// A remote call failed.
    #[error("{operation} failed: {reason}")]
    Remote {
        /// Which call failed.
        operation: RemoteOperation,
        /// Reason reported by the backend.
        reason: String,
    },

    /// Some log records could not be written.
    #[error("{failed} of {total} log records failed to publish")]
    PartialPublish {
        /// Records that failed and were re-buffered.
        failed: usize,
        /// Records in the batch.
        total: usize,
    },

    /// A payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result reported upward by [`SyncEngine`](crate::SyncEngine) entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The operation completed.
    Succeeded,
    /// The remote side is unreachable or the engine is waiting for a reset.
    NotReady,
    /// Another operation holds the connection; retry later.
    AnotherOperationInProgress,
    /// A remote call failed.
    Failed,
}

impl SyncOutcome {
    /// Returns true for [`SyncOutcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Succeeded)
    }
}

impl SyncError {
    /// Creates a remote failure.
    pub fn remote(operation: RemoteOperation, reason: impl Into<String>) -> Self {
        Self::Remote {
            operation,
            reason: reason.into(),
        }
    }

    /// Maps this error to the outcome reported to callers.
    pub fn outcome(&self) -> SyncOutcome {
        match self {
            SyncError::Unavailable | SyncError::NotReady(_) | SyncError::Suspended => {
                SyncOutcome::NotReady
            }
            SyncError::Contention => SyncOutcome::AnotherOperationInProgress,
            SyncError::Remote { .. }
            | SyncError::PartialPublish { .. }
            | SyncError::Protocol(_)
            | SyncError::InvalidConfig(_) => SyncOutcome::Failed,
        }
    }

    /// Returns true if this error must latch the dirty flag.
    pub fn marks_dirty(&self) -> bool {
        matches!(
            self,
            SyncError::NotReady(_)
                | SyncError::Remote { .. }
                | SyncError::PartialPublish { .. }
                | SyncError::Protocol(_)
        )
    }

    /// Returns true for conditions that are expected in normal operation and
    /// not worth more than a debug line.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            SyncError::Unavailable | SyncError::Contention | SyncError::Suspended
        )
    }
}
