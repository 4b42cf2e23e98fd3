use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TransferId, TransferState};

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

/// Classification of a failed remote or local I/O step.
///
/// The coordinator decides between retrying a block and failing the whole
/// transfer from this value alone, without looking at transport internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Timeout, connection reset, throttling. Retried with backoff.
    Transient,

    /// Expired or rejected credentials. Never retried automatically.
    Authentication,

    /// Byte count or checksum mismatch.
    Integrity,

    /// Anything else that will not succeed on retry (missing object, bad request).
    Permanent,

    /// The step observed a cancellation request and stopped.
    Cancelled,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Authentication => "authentication",
            Self::Integrity => "integrity",
            Self::Permanent => "permanent",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error reported by a [`crate::TransferClient`] or a block worker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a retryable error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    /// Create an integrity error
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    /// Create a permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::TimedOut
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::BrokenPipe
            | Io::Interrupted
            | Io::UnexpectedEof => Self::transient(err.to_string()),
            _ => Self::permanent(err.to_string()),
        }
    }
}

/// Errors surfaced by the transfer manager
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    #[error("Transfer not found: {0}")]
    NotFound(TransferId),

    #[error("Invalid transfer request: {message}")]
    InvalidRequest { message: String },

    #[error("Transfer {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransferId,
        from: TransferState,
        to: TransferState,
    },

    #[error("Transfer {0} is a block of another transfer and is managed by its parent")]
    BlockRecord(TransferId),

    #[error("No client registered for owner: {owner_id}")]
    OwnerUnavailable { owner_id: String },

    #[error("Owner {owner_id} is already registered with a different client configuration")]
    OwnerConflict { owner_id: String },

    #[error("Remote service error: {0}")]
    Service(ServiceError),

    #[error("Integrity check failed: {message}")]
    Integrity { message: String },

    #[error("Retry budget exhausted after {retries} retries: {last_error}")]
    RetriesExhausted { retries: u32, last_error: String },

    #[error("Transfer run was interrupted")]
    Interrupted,

    #[error("Persistence store error: {message}")]
    Store { message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl TransferError {
    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an integrity error
    pub fn integrity<S: Into<String>>(message: S) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    pub fn owner_unavailable<S: Into<String>>(owner_id: S) -> Self {
        Self::OwnerUnavailable {
            owner_id: owner_id.into(),
        }
    }

    /// Ownership problems are reported to the caller, never retried
    pub fn is_ownership(&self) -> bool {
        matches!(
            self,
            Self::OwnerUnavailable { .. } | Self::OwnerConflict { .. }
        ) || matches!(self, Self::Service(e) if e.kind == ErrorKind::Authentication)
    }
}

impl From<ServiceError> for TransferError {
    fn from(err: ServiceError) -> Self {
        match err.kind {
            ErrorKind::Integrity => Self::Integrity {
                message: err.message,
            },
            ErrorKind::Cancelled => Self::Interrupted,
            _ => Self::Service(err),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(ServiceError::from(reset).is_retryable());

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ServiceError::from(missing).kind, ErrorKind::Permanent);
    }

    #[test]
    fn integrity_service_errors_map_to_integrity() {
        let err: TransferError = ServiceError::integrity("short body").into();
        assert!(matches!(err, TransferError::Integrity { .. }));

        let err: TransferError = ServiceError::cancelled().into();
        assert!(matches!(err, TransferError::Interrupted));
    }

    #[test]
    fn auth_errors_count_as_ownership() {
        let err: TransferError = ServiceError::auth("token expired").into();
        assert!(err.is_ownership());
        assert!(TransferError::owner_unavailable("acct").is_ownership());
        assert!(!TransferError::invalid("bad range").is_ownership());
    }
}
