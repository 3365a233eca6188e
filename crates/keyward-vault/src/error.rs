//! Backend error types.
//!
//! Every [`SecureStoreBackend`](crate::SecureStoreBackend) reports failures
//! through [`BackendError`].  The access serializer never translates these;
//! it wraps them and hands them back to whichever caller issued the failing
//! operation.

/// Errors reported by a secure store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    // -- Availability -------------------------------------------------------
    /// The backend cannot be reached or is unsupported on this platform.
    #[error("secure store unavailable: {reason}")]
    Unavailable { reason: String },

    // -- Authentication -----------------------------------------------------
    /// The user failed authentication for an auth-gated entry.
    #[error("authentication denied for key `{key}`")]
    AuthenticationDenied { key: String },

    /// The user dismissed the authentication prompt.
    #[error("authentication cancelled for key `{key}`")]
    AuthenticationCancelled { key: String },

    // -- Items --------------------------------------------------------------
    /// The entry does not exist.
    ///
    /// Plain reads report absence as `None`; this variant is only used where
    /// an operation requires the entry to exist.
    #[error("item not found: {key}")]
    ItemNotFound { key: String },

    /// A bulk removal failed part-way through.  `removed` lists the keys the
    /// backend confirms are gone.
    #[error("bulk removal failed after removing {} item(s): {reason}", .removed.len())]
    PartiallyRemoved { removed: Vec<String>, reason: String },

    // -- Generic ------------------------------------------------------------
    /// Opaque failure from the underlying store.
    #[error("secure store error: {0}")]
    Store(String),
}

impl BackendError {
    /// Whether this error is an authentication outcome rather than a store
    /// failure.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationDenied { .. } | Self::AuthenticationCancelled { .. }
        )
    }
}

/// Convenience alias used throughout the backend crate.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
