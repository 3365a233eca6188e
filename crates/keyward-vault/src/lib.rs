//! Secure store backends for keyward.
//!
//! This crate describes the boundary between keyward's access serializer and
//! the vault that actually holds the secrets.  The vault is treated as a
//! black-box key/value store split into two partitions: entries that require
//! user authentication before they can be read, and entries that do not.
//!
//! # Modules
//!
//! - [`attributes`] -- protection attributes (`WithAuth` / `WithoutAuth`).
//! - [`options`] -- the per-call configuration handed to a backend.
//! - [`backend`] -- the [`SecureStoreBackend`] trait and platform factory.
//! - [`memory`] -- in-process backend with pluggable authentication.
//! - [`keychain`] -- macOS Keychain Services backend.
//! - [`error`] -- backend error taxonomy.
//!
//! # Quick Start
//!
//! ```rust
//! use keyward_vault::{AttributesWithoutAuth, ItemOptions, MemoryBackend, SecureStoreBackend};
//! use keyward_vault::backend::ServiceIdentity;
//!
//! # fn example() -> keyward_vault::BackendResult<()> {
//! let backend = MemoryBackend::new(ServiceIdentity::new("com.example.app"));
//! let options = ItemOptions::new().with_attributes(&AttributesWithoutAuth::new());
//!
//! backend.set("token", b"s3cr3t", &options)?;
//! assert_eq!(backend.get("token", &options)?, Some(b"s3cr3t".to_vec()));
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod backend;
pub mod error;
pub mod keychain;
pub mod memory;
pub mod options;

// Re-export the most commonly used types at the crate root for convenience.
pub use attributes::{
    Accessibility, Attributes, AttributesWithAuth, AttributesWithoutAuth, AuthenticationPolicy,
    ItemAttributes, Partition,
};
pub use backend::{SecureStoreBackend, ServiceIdentity, platform_backend};
pub use error::{BackendError, BackendResult};
pub use memory::{ApproveAll, Authenticator, MemoryBackend};
pub use options::{ItemOptions, Modifier};
