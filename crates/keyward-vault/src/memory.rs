//! In-process secure store backend.
//!
//! [`MemoryBackend`] keeps entries in a mutex-guarded map keyed by
//! `(partition, key)`.  It behaves like a platform keychain in the ways the
//! access serializer can observe:
//!
//! - the two partitions are independent key spaces;
//! - a query that does not ignore the sync flag only matches entries that
//!   are not synchronized;
//! - reading or overwriting an auth-gated entry first asks an
//!   [`Authenticator`], which may deny or cancel.
//!
//! Nothing is persisted.  It is the fallback backend on platforms without a
//! supported keychain and the backend used throughout the test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::attributes::Partition;
use crate::backend::{SecureStoreBackend, ServiceIdentity};
use crate::error::{BackendError, BackendResult};
use crate::options::ItemOptions;

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Decides whether the user may access an auth-gated entry.
///
/// `prompt` is the caller-supplied text shown to the user, if any.  Writes
/// carry no prompt.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, key: &str, prompt: Option<&str>) -> BackendResult<()>;
}

/// Approves every authentication request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl Authenticator for ApproveAll {
    fn authenticate(&self, _key: &str, _prompt: Option<&str>) -> BackendResult<()> {
        Ok(())
    }
}

impl<F> Authenticator for F
where
    F: Fn(&str, Option<&str>) -> BackendResult<()> + Send + Sync,
{
    fn authenticate(&self, key: &str, prompt: Option<&str>) -> BackendResult<()> {
        self(key, prompt)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredItem {
    data: Vec<u8>,
    options: ItemOptions,
}

impl StoredItem {
    fn is_synchronizable(&self) -> bool {
        self.options.synchronizable.unwrap_or(false)
    }
}

/// Mutex-guarded, non-persistent backend.
pub struct MemoryBackend {
    identity: ServiceIdentity,
    items: Mutex<HashMap<(Partition, String), StoredItem>>,
    authenticator: Arc<dyn Authenticator>,
}

impl MemoryBackend {
    /// Create an empty backend that approves every authentication request.
    pub fn new(identity: ServiceIdentity) -> Self {
        Self::with_authenticator(identity, Arc::new(ApproveAll))
    }

    /// Create an empty backend that consults `authenticator` for auth-gated
    /// entries.
    pub fn with_authenticator(
        identity: ServiceIdentity,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            identity,
            items: Mutex::new(HashMap::new()),
            authenticator,
        }
    }

    /// Number of stored entries across both partitions.
    pub fn len(&self) -> usize {
        self.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` exists in `partition`, regardless of its sync flag.
    pub fn contains(&self, key: &str, partition: Partition) -> bool {
        self.lock()
            .map(|items| items.contains_key(&(partition, key.to_string())))
            .unwrap_or(false)
    }

    /// The options an entry was last written with, without its prompt.
    pub fn stored_options(&self, key: &str, partition: Partition) -> Option<ItemOptions> {
        self.lock()
            .ok()?
            .get(&(partition, key.to_string()))
            .map(|item| item.options.clone())
    }

    fn lock(&self) -> BackendResult<MutexGuard<'_, HashMap<(Partition, String), StoredItem>>> {
        self.items
            .lock()
            .map_err(|e| BackendError::Store(format!("memory backend lock poisoned: {e}")))
    }
}

impl SecureStoreBackend for MemoryBackend {
    fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    fn get(&self, key: &str, options: &ItemOptions) -> BackendResult<Option<Vec<u8>>> {
        let item = {
            let items = self.lock()?;
            items
                .get(&(options.partition, key.to_string()))
                .filter(|item| options.ignoring_sync || !item.is_synchronizable())
                .cloned()
        };

        let Some(item) = item else {
            return Ok(None);
        };

        // Authenticate without holding the lock.
        if options.partition == Partition::RequiresAuth {
            self.authenticator
                .authenticate(key, options.authentication_prompt.as_deref())?;
        }

        Ok(Some(item.data))
    }

    fn set(&self, key: &str, data: &[u8], options: &ItemOptions) -> BackendResult<()> {
        let slot = (options.partition, key.to_string());

        let overwrites_gated = options.partition == Partition::RequiresAuth
            && self.lock()?.contains_key(&slot);
        if overwrites_gated {
            self.authenticator
                .authenticate(key, options.authentication_prompt.as_deref())?;
        }

        let mut stored = options.clone();
        stored.authentication_prompt = None;

        self.lock()?.insert(
            slot,
            StoredItem {
                data: data.to_vec(),
                options: stored,
            },
        );

        tracing::debug!(
            service = %self.identity,
            key = key,
            partition = %options.partition,
            len = data.len(),
            "memory backend stored item"
        );
        Ok(())
    }

    fn delete(&self, key: &str, ignoring_sync: bool) -> BackendResult<()> {
        let mut items = self.lock()?;
        let before = items.len();
        items.retain(|(_, k), item| {
            let matches = k == key && (ignoring_sync || !item.is_synchronizable());
            !matches
        });

        tracing::debug!(
            service = %self.identity,
            key = key,
            removed = before - items.len(),
            "memory backend deleted item"
        );
        Ok(())
    }

    fn delete_all(&self) -> BackendResult<()> {
        let mut items = self.lock()?;
        let removed = items.len();
        items.clear();

        tracing::debug!(service = %self.identity, removed, "memory backend cleared");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Accessibility, AttributesWithAuth, AuthenticationPolicy};

    fn backend() -> MemoryBackend {
        MemoryBackend::new(ServiceIdentity::new("memory-tests"))
    }

    fn auth_options() -> ItemOptions {
        ItemOptions::new().with_attributes(&AttributesWithAuth::new(
            Accessibility::WhenUnlockedThisDeviceOnly,
            AuthenticationPolicy::BIOMETRY_ANY,
        ))
    }

    #[test]
    fn get_missing_returns_none() {
        let backend = backend();
        assert_eq!(backend.get("nope", &ItemOptions::new()).unwrap(), None);
    }

    #[test]
    fn partitions_are_independent() {
        let backend = backend();
        backend.set("k", b"plain", &ItemOptions::new()).unwrap();
        backend.set("k", b"gated", &auth_options()).unwrap();

        assert_eq!(backend.len(), 2);
        assert_eq!(
            backend.get("k", &ItemOptions::new()).unwrap(),
            Some(b"plain".to_vec())
        );
        assert_eq!(
            backend
                .get("k", &ItemOptions::new().authentication_prompt("unlock"))
                .unwrap(),
            Some(b"gated".to_vec())
        );
    }

    #[test]
    fn sync_flag_hides_synchronized_items_unless_ignored() {
        let backend = backend();
        backend
            .set("synced", b"v", &ItemOptions::new().synchronizable(true))
            .unwrap();

        assert_eq!(backend.get("synced", &ItemOptions::new()).unwrap(), None);
        assert_eq!(
            backend
                .get("synced", &ItemOptions::new().ignoring_sync(true))
                .unwrap(),
            Some(b"v".to_vec())
        );

        // A sync-respecting delete leaves the synchronized item alone.
        backend.delete("synced", false).unwrap();
        assert!(backend.contains("synced", Partition::NoAuth));

        backend.delete("synced", true).unwrap();
        assert!(!backend.contains("synced", Partition::NoAuth));
    }

    #[test]
    fn delete_removes_both_partitions() {
        let backend = backend();
        backend.set("k", b"a", &ItemOptions::new()).unwrap();
        backend.set("k", b"b", &auth_options()).unwrap();

        backend.delete("k", true).unwrap();
        assert!(backend.is_empty());

        // Deleting again is not an error.
        backend.delete("k", true).unwrap();
    }

    #[test]
    fn denied_authentication_surfaces_error() {
        let deny = |key: &str, _prompt: Option<&str>| -> BackendResult<()> {
            Err(BackendError::AuthenticationDenied {
                key: key.to_string(),
            })
        };
        let backend =
            MemoryBackend::with_authenticator(ServiceIdentity::new("deny"), Arc::new(deny));

        // The first write creates the entry without asking.
        backend.set("seed", b"1", &auth_options()).unwrap();

        let read = backend.get("seed", &ItemOptions::new().authentication_prompt("why"));
        assert!(matches!(read, Err(BackendError::AuthenticationDenied { .. })));

        let overwrite = backend.set("seed", b"2", &auth_options());
        assert!(matches!(
            overwrite,
            Err(BackendError::AuthenticationDenied { .. })
        ));
    }

    #[test]
    fn prompt_is_forwarded_but_not_stored() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let recorder = {
            let seen = Arc::clone(&seen);
            move |_key: &str, prompt: Option<&str>| -> BackendResult<()> {
                seen.lock().unwrap().push(prompt.unwrap_or_default().to_string());
                Ok(())
            }
        };
        let backend =
            MemoryBackend::with_authenticator(ServiceIdentity::new("prompt"), Arc::new(recorder));

        backend
            .set("k", b"v", &auth_options().authentication_prompt("write"))
            .unwrap();
        backend
            .get("k", &ItemOptions::new().authentication_prompt("Read secret"))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["Read secret".to_string()]);
        let stored = backend.stored_options("k", Partition::RequiresAuth).unwrap();
        assert_eq!(stored.authentication_prompt, None);
        assert_eq!(
            stored.authentication_policy,
            Some(AuthenticationPolicy::BIOMETRY_ANY)
        );
    }

    #[test]
    fn delete_all_clears_everything() {
        let backend = backend();
        for key in ["a", "b", "c"] {
            backend.set(key, key.as_bytes(), &ItemOptions::new()).unwrap();
        }
        backend.delete_all().unwrap();
        assert!(backend.is_empty());
    }
}
