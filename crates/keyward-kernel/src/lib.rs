//! keyward access serializer.
//!
//! This crate turns a synchronous, possibly blocking secure store backend
//! into a shared async service:
//!
//! - **[`store`]** -- [`SecureStore`], a cloneable handle to a single worker
//!   task that owns the backend and executes one command at a time.
//! - **[`bus`]** -- [`EventBus`], a non-blocking fan-out of change events to
//!   per-subscriber bounded channels registered in a [`dashmap::DashMap`].
//! - **[`event`]** -- the `Added` / `Removed` change events.
//! - **[`config`]** -- [`StoreConfig`], loadable from TOML, JSON and the
//!   environment.
//! - **[`error`]** -- [`StoreError`] via [`thiserror`].
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use keyward_kernel::{SecureStore, StoreConfig};
//! use keyward_vault::{AttributesWithoutAuth, MemoryBackend};
//!
//! # async fn example() -> keyward_kernel::Result<()> {
//! let config = StoreConfig::new("com.example.app");
//! let store = SecureStore::spawn(
//!     Arc::new(MemoryBackend::new(config.identity())),
//!     &config,
//! );
//!
//! let mut changes = store.subscribe(Some("token"));
//! store
//!     .set_no_auth("token", Some(b"s3cr3t".to_vec()), AttributesWithoutAuth::new(), true)
//!     .await?;
//!
//! assert!(changes.recv().await.unwrap().is_added());
//! assert_eq!(store.get_no_auth("token", true).await?, Some(b"s3cr3t".to_vec()));
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod store;

// Re-export the most commonly used types at the crate root for convenience.
pub use bus::{EventBus, SubscriberId, SubscriberInfo, Subscription};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use event::{AddedEvent, Event, RemovedEvent};
pub use store::{Obtained, SecureStore};
