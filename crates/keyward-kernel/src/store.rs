//! Serialized access to a secure store backend.
//!
//! A [`SecureStore`] is a handle to a single background worker that owns the
//! backend and the set of keys written through it.  Every operation is sent
//! to the worker as a command over a bounded [`tokio::sync::mpsc`] channel
//! and answered on a [`tokio::sync::oneshot`].  The worker executes commands
//! one at a time, in arrival order:
//!
//! ```text
//! caller --Command--> [ queue ] --> worker --spawn_blocking--> backend
//!   ^                                 |
//!   +------------ reply --------------+--> EventBus --> subscriptions
//! ```
//!
//! # Guarantees
//!
//! - At most one backend call runs at a time per store.
//! - Backend calls run on tokio's blocking pool, never on the caller's task,
//!   so an authentication prompt never stalls other async work.
//! - A successful write or delete emits exactly one [`Event`] before its
//!   reply is sent; a failed one emits nothing.
//! - A command whose caller has gone away before it reached the front of
//!   the queue is skipped.  A command that already started runs to
//!   completion.
//! - Get-or-create runs its read and conditional write as one unit, so
//!   concurrent callers observe exactly one creation.
//!
//! Handles are cheap to clone; every clone talks to the same worker.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;

use keyward_vault::{
    Attributes, AttributesWithAuth, AttributesWithoutAuth, BackendError, BackendResult,
    ItemOptions, Modifier, SecureStoreBackend, ServiceIdentity, platform_backend,
};
use tokio::sync::{mpsc, oneshot};

use crate::bus::{EventBus, Subscription};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::event::{AddedEvent, Event, RemovedEvent};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of a get-or-create call.
#[derive(Clone, PartialEq, Eq)]
pub struct Obtained {
    /// The stored value, or the fallback if it was just written.
    pub value: Vec<u8>,
    /// Whether this call wrote the fallback.
    pub created: bool,
}

impl Obtained {
    /// Split into `(value, created)`.
    pub fn into_parts(self) -> (Vec<u8>, bool) {
        (self.value, self.created)
    }
}

impl std::fmt::Debug for Obtained {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Obtained")
            .field("value_len", &self.value.len())
            .field("created", &self.created)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Get {
        key: String,
        options: ItemOptions,
        reply: Reply<Option<Vec<u8>>>,
    },
    Set {
        key: String,
        data: Vec<u8>,
        attributes: Attributes,
        ignoring_sync: bool,
        reply: Reply<()>,
    },
    Remove {
        key: String,
        ignoring_sync: bool,
        reply: Reply<()>,
    },
    RemoveAll {
        reply: Reply<()>,
    },
    GetOrCreate {
        key: String,
        attributes: Attributes,
        fallback: Vec<u8>,
        prompt: Option<String>,
        reply: Reply<Obtained>,
    },
    KnownKeys {
        reply: Reply<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Remove { .. } => "remove",
            Self::RemoveAll { .. } => "remove_all",
            Self::GetOrCreate { .. } => "get_or_create",
            Self::KnownKeys { .. } => "known_keys",
            Self::Shutdown { .. } => "shutdown",
        }
    }

    fn key(&self) -> Option<&str> {
        match self {
            Self::Get { key, .. }
            | Self::Set { key, .. }
            | Self::Remove { key, .. }
            | Self::GetOrCreate { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Whether the caller stopped waiting for the reply.
    fn is_abandoned(&self) -> bool {
        match self {
            Self::Get { reply, .. } => reply.is_closed(),
            Self::Set { reply, .. } => reply.is_closed(),
            Self::Remove { reply, .. } => reply.is_closed(),
            Self::RemoveAll { reply } => reply.is_closed(),
            Self::GetOrCreate { reply, .. } => reply.is_closed(),
            Self::KnownKeys { reply } => reply.is_closed(),
            Self::Shutdown { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a serialized secure store.
#[derive(Clone)]
pub struct SecureStore {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
    identity: Arc<ServiceIdentity>,
}

impl SecureStore {
    /// Validate `config` and start a store over the platform backend.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn SecureStoreBackend> = Arc::from(platform_backend(config.identity()));
        tracing::info!(service = %backend.identity(), "secure store opened");
        Ok(Self::spawn(backend, config))
    }

    /// Start a store over `backend`, sizing its queues from `config`.
    ///
    /// The backend's own identity is authoritative.  Must be called from
    /// within a tokio runtime.
    pub fn spawn(backend: Arc<dyn SecureStoreBackend>, config: &StoreConfig) -> Self {
        let identity = Arc::new(backend.identity().clone());
        if *identity != config.identity() {
            tracing::warn!(
                backend = %identity,
                configured = %config.identity(),
                "backend identity differs from configuration"
            );
        }

        let (commands, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let bus = EventBus::new(config.event_capacity);

        let worker = Worker {
            backend,
            keys: BTreeSet::new(),
            bus: bus.clone(),
            commands: receiver,
        };
        tokio::spawn(worker.run());

        Self {
            commands,
            bus,
            identity,
        }
    }

    /// The service namespace and access group of the backend.
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// The bus this store publishes its events on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // -- No-auth partition --------------------------------------------------

    /// Read `key` from the no-auth partition.
    pub async fn get_no_auth(
        &self,
        key: impl Into<String>,
        ignoring_sync: bool,
    ) -> Result<Option<Vec<u8>>> {
        let options = ItemOptions::new().ignoring_sync(ignoring_sync);
        self.get(key.into(), options).await
    }

    /// Write `data` under `key` in the no-auth partition.
    ///
    /// `None` removes the entry instead.
    pub async fn set_no_auth(
        &self,
        key: impl Into<String>,
        data: Option<Vec<u8>>,
        attributes: AttributesWithoutAuth,
        ignoring_sync: bool,
    ) -> Result<()> {
        self.set(key.into(), data, attributes.into(), ignoring_sync)
            .await
    }

    /// Return the value under `key`, writing `fallback` first if absent.
    pub async fn get_or_create_no_auth(
        &self,
        key: impl Into<String>,
        attributes: AttributesWithoutAuth,
        fallback: Vec<u8>,
    ) -> Result<Obtained> {
        self.get_or_create(key.into(), attributes.into(), fallback, None)
            .await
    }

    // -- Auth-gated partition -----------------------------------------------

    /// Read `key` from the auth-gated partition, showing `prompt` if the
    /// backend asks the user to authenticate.
    pub async fn get_auth(
        &self,
        key: impl Into<String>,
        prompt: impl Into<String>,
        ignoring_sync: bool,
    ) -> Result<Option<Vec<u8>>> {
        let options = ItemOptions::new()
            .authentication_prompt(prompt)
            .ignoring_sync(ignoring_sync);
        self.get(key.into(), options).await
    }

    /// Write `data` under `key` in the auth-gated partition.
    ///
    /// `None` removes the entry instead.
    pub async fn set_auth(
        &self,
        key: impl Into<String>,
        data: Option<Vec<u8>>,
        attributes: AttributesWithAuth,
        ignoring_sync: bool,
    ) -> Result<()> {
        self.set(key.into(), data, attributes.into(), ignoring_sync)
            .await
    }

    /// Auth-gated variant of [`get_or_create_no_auth`](Self::get_or_create_no_auth).
    pub async fn get_or_create_auth(
        &self,
        key: impl Into<String>,
        attributes: AttributesWithAuth,
        fallback: Vec<u8>,
        prompt: impl Into<String>,
    ) -> Result<Obtained> {
        self.get_or_create(key.into(), attributes.into(), fallback, Some(prompt.into()))
            .await
    }

    // -- Removal ------------------------------------------------------------

    /// Delete `key` from both partitions.
    pub async fn remove(&self, key: impl Into<String>, ignoring_sync: bool) -> Result<()> {
        let key = key.into();
        self.request(|reply| Command::Remove {
            key,
            ignoring_sync,
            reply,
        })
        .await
    }

    /// Delete every entry of the service.
    ///
    /// Emits one [`Event::Removed`] per key written through this store.
    pub async fn remove_all(&self) -> Result<()> {
        self.request(|reply| Command::RemoveAll { reply }).await
    }

    // -- Observation --------------------------------------------------------

    /// Subscribe to future events, restricted to `key` when one is given.
    pub fn subscribe(&self, key: Option<&str>) -> Subscription {
        self.bus.subscribe(key)
    }

    /// Keys written through this store and not removed since, sorted.
    pub async fn known_keys(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::KnownKeys { reply }).await
    }

    /// Stop the worker after the command in progress.
    ///
    /// Commands still queued fail with [`StoreError::Closed`], every
    /// subscription ends, and later calls on any handle return `Closed`.
    /// Shutting down a stopped store is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, acked) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_err() {
            return Ok(());
        }
        // A dropped ack means the worker stopped on its own.
        let _ = acked.await;
        Ok(())
    }

    /// Whether the worker has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    // -- Internals ----------------------------------------------------------

    async fn get(&self, key: String, options: ItemOptions) -> Result<Option<Vec<u8>>> {
        self.request(|reply| Command::Get {
            key,
            options,
            reply,
        })
        .await
    }

    async fn set(
        &self,
        key: String,
        data: Option<Vec<u8>>,
        attributes: Attributes,
        ignoring_sync: bool,
    ) -> Result<()> {
        let Some(data) = data else {
            return self.remove(key, ignoring_sync).await;
        };
        self.request(|reply| Command::Set {
            key,
            data,
            attributes,
            ignoring_sync,
            reply,
        })
        .await
    }

    async fn get_or_create(
        &self,
        key: String,
        attributes: Attributes,
        fallback: Vec<u8>,
        prompt: Option<String>,
    ) -> Result<Obtained> {
        self.request(|reply| Command::GetOrCreate {
            key,
            attributes,
            fallback,
            prompt,
            reply,
        })
        .await
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| StoreError::Closed)?
    }
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum Lookup {
    Existing(Vec<u8>),
    Created { key: String, fallback: Vec<u8> },
}

struct Worker {
    backend: Arc<dyn SecureStoreBackend>,
    keys: BTreeSet<String>,
    bus: EventBus,
    commands: mpsc::Receiver<Command>,
}

impl Worker {
    async fn run(mut self) {
        tracing::info!(service = %self.backend.identity(), "secure store worker started");

        while let Some(command) = self.commands.recv().await {
            if command.is_abandoned() {
                tracing::warn!(
                    command = command.name(),
                    key = command.key(),
                    "caller went away, command skipped"
                );
                continue;
            }

            tracing::debug!(command = command.name(), key = command.key(), "executing command");

            if self.execute(command).await.is_break() {
                break;
            }
        }

        self.bus.close();
        tracing::info!(
            service = %self.backend.identity(),
            tracked = self.keys.len(),
            "secure store worker stopped"
        );
    }

    /// Run one command; `Break` once the worker must stop.
    async fn execute(&mut self, command: Command) -> ControlFlow<()> {
        // Send failures mean the caller left mid-flight; the outcome stands.
        match command {
            Command::Get {
                key,
                options,
                reply,
            } => {
                let result = self.blocking(move |backend| backend.get(&key, &options)).await;
                let _ = reply.send(result);
            }
            Command::Set {
                key,
                data,
                attributes,
                ignoring_sync,
                reply,
            } => {
                let result = self.set(key, data, attributes, ignoring_sync).await;
                let _ = reply.send(result);
            }
            Command::Remove {
                key,
                ignoring_sync,
                reply,
            } => {
                let result = self.remove(key, ignoring_sync).await;
                let _ = reply.send(result);
            }
            Command::RemoveAll { reply } => {
                let result = self.remove_all().await;
                let _ = reply.send(result);
            }
            Command::GetOrCreate {
                key,
                attributes,
                fallback,
                prompt,
                reply,
            } => {
                let result = self.get_or_create(key, attributes, fallback, prompt).await;
                let _ = reply.send(result);
            }
            Command::KnownKeys { reply } => {
                let _ = reply.send(Ok(self.keys.iter().cloned().collect()));
            }
            Command::Shutdown { reply } => {
                self.commands.close();
                self.bus.close();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn set(
        &mut self,
        key: String,
        data: Vec<u8>,
        attributes: Attributes,
        ignoring_sync: bool,
    ) -> Result<()> {
        let options = ItemOptions::new()
            .modifier(Modifier::from_attributes(Some(attributes.clone())))
            .ignoring_sync(ignoring_sync);

        let (key, data) = self
            .blocking(move |backend| backend.set(&key, &data, &options).map(|()| (key, data)))
            .await?;

        self.added(AddedEvent {
            key,
            data,
            attributes,
            ignoring_sync,
        });
        Ok(())
    }

    async fn remove(&mut self, key: String, ignoring_sync: bool) -> Result<()> {
        let key = self
            .blocking(move |backend| backend.delete(&key, ignoring_sync).map(|()| key))
            .await?;
        self.removed(key, Some(ignoring_sync));
        Ok(())
    }

    async fn remove_all(&mut self) -> Result<()> {
        match self.blocking(|backend| backend.delete_all()).await {
            Ok(()) => {
                for key in std::mem::take(&mut self.keys) {
                    self.notify_removed(key, None);
                }
                Ok(())
            }
            Err(StoreError::Backend(BackendError::PartiallyRemoved { removed, reason })) => {
                tracing::warn!(
                    removed = removed.len(),
                    reason = %reason,
                    "bulk removal stopped part way"
                );
                for key in &removed {
                    if self.keys.contains(key) {
                        self.removed(key.clone(), None);
                    }
                }
                Err(BackendError::PartiallyRemoved { removed, reason }.into())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_or_create(
        &mut self,
        key: String,
        attributes: Attributes,
        fallback: Vec<u8>,
        prompt: Option<String>,
    ) -> Result<Obtained> {
        let read = ItemOptions {
            partition: attributes.partition(),
            ..ItemOptions::new()
        }
        .modifier(Modifier::from_prompt(prompt.clone()))
        .ignoring_sync(true);

        let write = ItemOptions::new()
            .modifier(Modifier::from_attributes(Some(attributes.clone())))
            .modifier(Modifier::from_prompt(prompt))
            .ignoring_sync(true);

        let lookup = self
            .blocking(move |backend| {
                if let Some(existing) = backend.get(&key, &read)? {
                    return Ok(Lookup::Existing(existing));
                }
                backend.set(&key, &fallback, &write)?;
                Ok(Lookup::Created { key, fallback })
            })
            .await?;

        match lookup {
            Lookup::Existing(value) => Ok(Obtained {
                value,
                created: false,
            }),
            Lookup::Created { key, fallback } => {
                self.added(AddedEvent {
                    key,
                    data: fallback.clone(),
                    attributes,
                    ignoring_sync: true,
                });
                Ok(Obtained {
                    value: fallback,
                    created: true,
                })
            }
        }
    }

    /// Run one backend call on the blocking pool and wait for it.
    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&dyn SecureStoreBackend) -> BackendResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let outcome = tokio::task::spawn_blocking(move || call(backend.as_ref())).await?;
        Ok(outcome?)
    }

    fn added(&mut self, event: AddedEvent) {
        self.keys.insert(event.key.clone());
        tracing::debug!(
            key = %event.key,
            partition = %event.partition(),
            len = event.data.len(),
            "entry added"
        );
        self.bus.emit(Event::Added(event));
    }

    fn removed(&mut self, key: String, ignoring_sync: Option<bool>) {
        self.keys.remove(&key);
        self.notify_removed(key, ignoring_sync);
    }

    fn notify_removed(&self, key: String, ignoring_sync: Option<bool>) {
        tracing::debug!(key = %key, "entry removed");
        self.bus.emit(Event::Removed(RemovedEvent { key, ignoring_sync }));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_vault::{Accessibility, AuthenticationPolicy, MemoryBackend, Partition};

    fn memory_store() -> (SecureStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new(ServiceIdentity::new("store-tests")));
        let store = SecureStore::spawn(
            Arc::clone(&backend) as Arc<dyn SecureStoreBackend>,
            &StoreConfig::new("store-tests"),
        );
        (store, backend)
    }

    fn gated() -> AttributesWithAuth {
        AttributesWithAuth::new(
            Accessibility::WhenPasscodeSetThisDeviceOnly,
            AuthenticationPolicy::USER_PRESENCE,
        )
    }

    #[tokio::test]
    async fn round_trip_no_auth() {
        let (store, _) = memory_store();

        store
            .set_no_auth("token", Some(b"abc".to_vec()), AttributesWithoutAuth::new(), true)
            .await
            .unwrap();
        assert_eq!(
            store.get_no_auth("token", true).await.unwrap(),
            Some(b"abc".to_vec())
        );

        store.remove("token", true).await.unwrap();
        assert_eq!(store.get_no_auth("token", true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn round_trip_auth_uses_the_gated_partition() {
        let (store, backend) = memory_store();

        store
            .set_auth("seed", Some(b"entropy".to_vec()), gated(), true)
            .await
            .unwrap();
        assert!(backend.contains("seed", Partition::RequiresAuth));
        assert!(!backend.contains("seed", Partition::NoAuth));

        assert_eq!(store.get_no_auth("seed", true).await.unwrap(), None);
        assert_eq!(
            store.get_auth("seed", "Unlock", true).await.unwrap(),
            Some(b"entropy".to_vec())
        );
    }

    #[tokio::test]
    async fn set_none_routes_to_remove() {
        let (store, backend) = memory_store();
        let mut events = store.subscribe(Some("k"));

        store
            .set_no_auth("k", Some(b"v".to_vec()), AttributesWithoutAuth::new(), false)
            .await
            .unwrap();
        store
            .set_no_auth("k", None, AttributesWithoutAuth::new(), false)
            .await
            .unwrap();

        assert!(backend.is_empty());
        assert!(events.recv().await.unwrap().is_added());
        assert_eq!(
            *events.recv().await.unwrap(),
            Event::Removed(RemovedEvent {
                key: "k".into(),
                ignoring_sync: Some(false),
            })
        );
    }

    #[tokio::test]
    async fn added_event_carries_attributes() {
        let (store, _) = memory_store();
        let mut events = store.subscribe(None);

        store
            .set_auth("seed", Some(vec![7; 4]), gated().with_label("Seed"), true)
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        let Event::Added(added) = &*event else {
            panic!("expected an added event, got {event:?}");
        };
        assert_eq!(added.key, "seed");
        assert_eq!(added.data, vec![7; 4]);
        assert!(added.requires_auth());
        assert!(added.ignoring_sync);
        assert_eq!(added.attributes, Attributes::from(gated().with_label("Seed")));
    }

    #[tokio::test]
    async fn get_or_create_writes_once() {
        let (store, _) = memory_store();
        let mut events = store.subscribe(None);

        let first = store
            .get_or_create_no_auth("id", AttributesWithoutAuth::new(), b"one".to_vec())
            .await
            .unwrap();
        let second = store
            .get_or_create_no_auth("id", AttributesWithoutAuth::new(), b"two".to_vec())
            .await
            .unwrap();

        assert_eq!(first.clone().into_parts(), (b"one".to_vec(), true));
        assert_eq!(second.into_parts(), (b"one".to_vec(), false));

        assert!(events.recv().await.unwrap().is_added());
        assert!(events.try_recv().is_none());
        assert!(!format!("{first:?}").contains("111"));
    }

    #[tokio::test]
    async fn get_or_create_auth_reads_the_gated_partition() {
        let (store, backend) = memory_store();

        let created = store
            .get_or_create_auth("seed", gated(), b"fresh".to_vec(), "Create seed")
            .await
            .unwrap();
        assert!(created.created);
        assert!(backend.contains("seed", Partition::RequiresAuth));

        let again = store
            .get_or_create_auth("seed", gated(), b"other".to_vec(), "Read seed")
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.value, b"fresh".to_vec());
    }

    #[tokio::test]
    async fn known_keys_follow_events() {
        let (store, _) = memory_store();

        for key in ["b", "a", "c"] {
            store
                .set_no_auth(key, Some(vec![1]), AttributesWithoutAuth::new(), true)
                .await
                .unwrap();
        }
        store.remove("b", true).await.unwrap();
        assert_eq!(store.known_keys().await.unwrap(), vec!["a", "c"]);

        store.remove_all().await.unwrap();
        assert!(store.known_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let (store, _) = memory_store();
        let mut events = store.subscribe(None);
        let other = store.clone();

        store.shutdown().await.unwrap();

        assert!(events.recv().await.is_none());
        assert!(matches!(
            other.get_no_auth("k", true).await,
            Err(StoreError::Closed)
        ));
        assert!(store.is_closed());
        // A second shutdown is harmless.
        other.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn open_validates_config() {
        let err = SecureStore::open(&StoreConfig::new("")).unwrap_err();
        assert!(matches!(err, StoreError::Config { .. }));
    }
}
