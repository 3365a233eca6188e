//! macOS Keychain Services backend.
//!
//! Entries are stored as generic passwords whose service is the identity's
//! service namespace and whose account is the entry key.  Auth-gated entries
//! are written with access-control flags derived from their
//! [`AuthenticationPolicy`]; the operating system then shows its own prompt
//! whenever such an entry is read.
//!
//! The keychain holds one item per account, so the two partitions share a
//! key space.  An item's partition is whether it carries access control:
//!
//! - no-auth reads skip protected items and never prompt;
//! - auth-gated reads report an unprotected item as absent;
//! - every write replaces the existing item, so writing `key` in one
//!   partition removes it from the other.
//!
//! The generic-password API does not expose labels, comments, or per-query
//! synchronization matching, so those options are accepted and logged but
//! not applied.

use crate::attributes::{AuthenticationPolicy, Partition};
use crate::options::ItemOptions;

#[cfg(target_os = "macos")]
pub use self::macos::MacOsKeychain;

/// How a read is matched against the keychain item for a key.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    /// Only items without access control; never prompts.
    Unprotected,
    /// Only items with access control; the system prompts.
    Protected,
}

/// What replaces the keychain item for a key on write.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Unprotected,
    Protected(AuthenticationPolicy),
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn read_mode(options: &ItemOptions) -> ReadMode {
    match options.partition {
        Partition::NoAuth => ReadMode::Unprotected,
        Partition::RequiresAuth => ReadMode::Protected,
    }
}

/// A gated write without a policy is protected by user presence.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn write_mode(options: &ItemOptions) -> WriteMode {
    match options.partition {
        Partition::NoAuth => WriteMode::Unprotected,
        Partition::RequiresAuth => WriteMode::Protected(
            options
                .authentication_policy
                .unwrap_or(AuthenticationPolicy::USER_PRESENCE),
        ),
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use security_framework::item::{ItemClass, ItemSearchOptions, Limit, SearchResult};
    use security_framework::passwords::{
        delete_generic_password, get_generic_password, set_generic_password,
        set_generic_password_options,
    };
    use security_framework::passwords_options::{AccessControlOptions, PasswordOptions};

    use super::{ReadMode, WriteMode, read_mode, write_mode};
    use crate::attributes::AuthenticationPolicy;
    use crate::backend::{SecureStoreBackend, ServiceIdentity};
    use crate::error::{BackendError, BackendResult};
    use crate::options::ItemOptions;

    /// `errSecItemNotFound`.
    const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;
    /// `errSecUserCanceled`.
    const ERR_SEC_USER_CANCELED: i32 = -128;
    /// `errSecAuthFailed`.
    const ERR_SEC_AUTH_FAILED: i32 = -25293;

    /// Keychain Services integration via the `security-framework` crate.
    pub struct MacOsKeychain {
        identity: ServiceIdentity,
    }

    impl MacOsKeychain {
        pub fn new(identity: ServiceIdentity) -> Self {
            if let Some(group) = &identity.access_group {
                tracing::debug!(
                    access_group = %group,
                    "access groups are not applied to generic passwords on macOS"
                );
            }
            Self { identity }
        }

        fn map_error(&self, key: &str, err: security_framework::base::Error) -> BackendError {
            match err.code() {
                ERR_SEC_USER_CANCELED => BackendError::AuthenticationCancelled {
                    key: key.to_string(),
                },
                ERR_SEC_AUTH_FAILED => BackendError::AuthenticationDenied {
                    key: key.to_string(),
                },
                ERR_SEC_ITEM_NOT_FOUND => BackendError::ItemNotFound {
                    key: key.to_string(),
                },
                _ => BackendError::Store(format!(
                    "keychain operation on `{key}` in {} failed: {err}",
                    self.identity
                )),
            }
        }

        /// The data of `key` if it is stored without access control.
        fn find_unprotected(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
            let results = ItemSearchOptions::new()
                .class(ItemClass::generic_password())
                .service(&self.identity.service)
                .account(key)
                .load_data(true)
                .skip_authenticated_items(true)
                .limit(Limit::Max(1))
                .search();

            match results {
                Ok(results) => Ok(results.into_iter().find_map(|result| match result {
                    SearchResult::Data(data) => Some(data),
                    _ => None,
                })),
                Err(e) if e.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(None),
                Err(e) => Err(self.map_error(key, e)),
            }
        }

        /// Delete the item for `key`, if any.
        fn remove_existing(&self, key: &str) -> BackendResult<()> {
            match delete_generic_password(&self.identity.service, key) {
                Ok(()) => Ok(()),
                Err(e) if e.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(()),
                Err(e) => Err(self.map_error(key, e)),
            }
        }

        /// Accounts of every generic password filed under our service.
        fn accounts(&self) -> BackendResult<Vec<String>> {
            let results = ItemSearchOptions::new()
                .class(ItemClass::generic_password())
                .service(&self.identity.service)
                .load_attributes(true)
                .limit(Limit::All)
                .search();

            match results {
                Ok(results) => Ok(results
                    .iter()
                    .filter_map(|result| result.simplify_dict())
                    .filter_map(|attrs| attrs.get("acct").cloned())
                    .collect()),
                Err(e) if e.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(Vec::new()),
                Err(e) => Err(BackendError::Unavailable {
                    reason: format!("keychain search failed: {e}"),
                }),
            }
        }
    }

    fn access_control(policy: AuthenticationPolicy) -> AccessControlOptions {
        AccessControlOptions::from_bits_truncate(policy.bits() as _)
    }

    impl SecureStoreBackend for MacOsKeychain {
        fn identity(&self) -> &ServiceIdentity {
            &self.identity
        }

        fn get(&self, key: &str, options: &ItemOptions) -> BackendResult<Option<Vec<u8>>> {
            match read_mode(options) {
                ReadMode::Unprotected => self.find_unprotected(key),
                ReadMode::Protected => {
                    // An unprotected item lives in the other partition.
                    if self.find_unprotected(key)?.is_some() {
                        return Ok(None);
                    }
                    if options.authentication_prompt.is_some() {
                        tracing::debug!(key = key, "macOS presents its own authentication prompt");
                    }
                    match get_generic_password(&self.identity.service, key) {
                        Ok(data) => Ok(Some(data.to_vec())),
                        Err(e) if e.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(None),
                        Err(e) => Err(self.map_error(key, e)),
                    }
                }
            }
        }

        fn set(&self, key: &str, data: &[u8], options: &ItemOptions) -> BackendResult<()> {
            if options.label.is_some() || options.comment.is_some() {
                tracing::debug!(key = key, "label and comment are not applied on macOS");
            }

            // Updating in place would keep the old item's access control.
            self.remove_existing(key)?;

            let result = match write_mode(options) {
                WriteMode::Protected(policy) => {
                    let mut password_options =
                        PasswordOptions::new_generic_password(&self.identity.service, key);
                    password_options.set_access_control_options(access_control(policy));
                    set_generic_password_options(data, password_options)
                }
                WriteMode::Unprotected => set_generic_password(&self.identity.service, key, data),
            };

            result.map_err(|e| self.map_error(key, e))?;

            tracing::debug!(
                service = %self.identity,
                key = key,
                partition = %options.partition,
                "stored item in macOS keychain"
            );
            Ok(())
        }

        fn delete(&self, key: &str, _ignoring_sync: bool) -> BackendResult<()> {
            self.remove_existing(key)?;
            tracing::debug!(service = %self.identity, key = key, "deleted keychain item");
            Ok(())
        }

        fn delete_all(&self) -> BackendResult<()> {
            let mut removed = Vec::new();
            for account in self.accounts()? {
                match self.remove_existing(&account) {
                    Ok(()) => removed.push(account),
                    Err(e) => {
                        return Err(BackendError::PartiallyRemoved {
                            reason: format!("deleting `{account}` failed: {e}"),
                            removed,
                        });
                    }
                }
            }

            tracing::info!(
                service = %self.identity,
                removed = removed.len(),
                "cleared macOS keychain service"
            );
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::attributes::{Accessibility, AttributesWithAuth};

        #[test]
        #[ignore = "writes to the login keychain and shows an authentication prompt"]
        fn gated_item_is_invisible_to_no_auth_reads() {
            let keychain = MacOsKeychain::new(ServiceIdentity::new("keyward-partition-test"));
            let gated = ItemOptions::new().with_attributes(&AttributesWithAuth::new(
                Accessibility::WhenUnlockedThisDeviceOnly,
                AuthenticationPolicy::USER_PRESENCE,
            ));

            keychain.set("seed", b"gated", &gated).unwrap();
            assert_eq!(keychain.get("seed", &ItemOptions::new()).unwrap(), None);

            // A plain write replaces the gated item.
            keychain.set("seed", b"plain", &ItemOptions::new()).unwrap();
            assert_eq!(
                keychain.get("seed", &ItemOptions::new()).unwrap(),
                Some(b"plain".to_vec())
            );
            assert_eq!(
                keychain
                    .get("seed", &ItemOptions::new().authentication_prompt("Unlock"))
                    .unwrap(),
                None
            );

            keychain.delete_all().unwrap();
        }
    }
}
