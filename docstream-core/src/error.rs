//! Crate-level error type.

use thiserror::Error;

use crate::backend::BackendError;
use crate::codec::{DecodeError, EncodeError};
use crate::path::PathError;

/// Any failure surfaced by a store operation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    /// The backend error, if this failure came from the backend.
    pub fn as_backend(&self) -> Option<&BackendError> {
        match self {
            StoreError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
