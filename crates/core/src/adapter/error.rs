//! Error types for agent adapters.

use thiserror::Error;

use crate::lead::{ErrorDetail, ErrorKind};

/// Failure reported by an adapter, already classified.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} adapter error: {message}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AdapterError {
    /// Network, timeout or rate limiting.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Invalid input or policy rejection.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<AdapterError> for ErrorDetail {
    fn from(e: AdapterError) -> Self {
        ErrorDetail::new(e.kind, e.message)
    }
}
