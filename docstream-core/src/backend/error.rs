//! Backend error types.

use std::fmt;

use thiserror::Error;

/// Broad category of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorCode {
    Cancelled,
    InvalidArgument,
    NotFound,
    PermissionDenied,
    ResourceExhausted,
    Unavailable,
    DataLoss,
    Internal,
}

impl BackendErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorCode::Cancelled => "cancelled",
            BackendErrorCode::InvalidArgument => "invalid-argument",
            BackendErrorCode::NotFound => "not-found",
            BackendErrorCode::PermissionDenied => "permission-denied",
            BackendErrorCode::ResourceExhausted => "resource-exhausted",
            BackendErrorCode::Unavailable => "unavailable",
            BackendErrorCode::DataLoss => "data-loss",
            BackendErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by the storage backend, passed through untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Backend error ({code}): {message}")]
pub struct BackendError {
    code: BackendErrorCode,
    message: String,
}

impl BackendError {
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> BackendErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Unavailable, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::InvalidArgument, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::PermissionDenied, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::DataLoss, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Internal, message)
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
