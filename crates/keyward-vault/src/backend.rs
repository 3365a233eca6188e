//! The secure store backend boundary.
//!
//! keyward never talks to a vault directly.  Everything goes through the
//! [`SecureStoreBackend`] trait, which mirrors the primitive operations a
//! platform credential vault offers: per-key get/set/delete plus a bulk
//! delete scoped to one service namespace.
//!
//! Backend methods are synchronous and may block for a long time, for
//! example while the operating system shows an authentication prompt.
//! Callers in async code are expected to move them onto a blocking thread.

use serde::{Deserialize, Serialize};

use crate::error::BackendResult;
use crate::options::ItemOptions;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The scope a backend operates in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Service namespace all entries are filed under.
    pub service: String,
    /// Optional shared access group for cross-app sharing.
    pub access_group: Option<String>,
}

impl ServiceIdentity {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            access_group: None,
        }
    }

    /// Builder: scope the identity to a shared access group.
    pub fn with_access_group(mut self, access_group: impl Into<String>) -> Self {
        self.access_group = Some(access_group.into());
        self
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.access_group {
            Some(group) => write!(f, "{}@{}", self.service, group),
            None => f.write_str(&self.service),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over a platform key/value vault.
///
/// Implementations must be `Send + Sync` so the access serializer can hand
/// them to the blocking thread pool.
pub trait SecureStoreBackend: Send + Sync {
    /// The scope this backend was opened with.
    fn identity(&self) -> &ServiceIdentity;

    /// Read the data stored for `key` in `options.partition`.
    ///
    /// Returns `Ok(None)` when the entry does not exist.  Reading an
    /// auth-gated entry may block until the user authenticates.
    fn get(&self, key: &str, options: &ItemOptions) -> BackendResult<Option<Vec<u8>>>;

    /// Insert or overwrite the entry for `key`, configured by `options`.
    fn set(&self, key: &str, data: &[u8], options: &ItemOptions) -> BackendResult<()>;

    /// Delete the entry for `key` from every partition.
    ///
    /// Deleting an absent entry is not an error.
    fn delete(&self, key: &str, ignoring_sync: bool) -> BackendResult<()>;

    /// Delete every entry in this backend's scope.
    fn delete_all(&self) -> BackendResult<()>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Returns the best available backend for the current platform.
///
/// - **macOS**: [`MacOsKeychain`](crate::keychain::MacOsKeychain)
/// - **Other platforms**: [`MemoryBackend`](crate::memory::MemoryBackend);
///   entries do not survive the process.
pub fn platform_backend(identity: ServiceIdentity) -> Box<dyn SecureStoreBackend> {
    #[cfg(target_os = "macos")]
    {
        tracing::info!(identity = %identity, "using macOS Keychain Services backend");
        Box::new(crate::keychain::MacOsKeychain::new(identity))
    }
    #[cfg(not(target_os = "macos"))]
    {
        tracing::warn!(
            identity = %identity,
            "no platform keychain available, falling back to in-memory backend"
        );
        Box::new(crate::memory::MemoryBackend::new(identity))
    }
}
