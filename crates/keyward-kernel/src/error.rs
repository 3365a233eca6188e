//! Kernel error types.
//!
//! Every public operation on [`SecureStore`](crate::SecureStore) returns
//! [`StoreError`].  Backend failures are carried unchanged inside
//! [`StoreError::Backend`]; the remaining variants describe failures of the
//! serializer itself.

use keyward_vault::BackendError;

/// Unified error type for the keyward access serializer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    // -- Backend ------------------------------------------------------------
    /// The backend reported a failure for this operation.
    #[error(transparent)]
    Backend(#[from] BackendError),

    // -- Serializer ---------------------------------------------------------
    /// The worker has shut down and no longer accepts operations.
    #[error("secure store is shut down")]
    Closed,

    // -- Configuration ------------------------------------------------------
    /// The configuration is missing, malformed, or out of range.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// I/O error while reading a configuration file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    /// A blocking backend call panicked or was aborted.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// The backend error, if this failure came from the backend.
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("backend task failed: {err}"))
    }
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, StoreError>;
