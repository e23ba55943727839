//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for appforge_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => appforge_core::Error::NotFound(msg),
            StoreError::Duplicate(msg) => appforge_core::Error::InvalidInput(msg),
            StoreError::Storage(msg) => appforge_core::Error::Internal(msg),
        }
    }
}
