//! Change events published by the access serializer.
//!
//! One [`Event`] is emitted for every successful mutation of the backend:
//! [`Event::Added`] after a write, [`Event::Removed`] after a delete (one per
//! tracked key for a bulk clear).  Reads never produce events.

use keyward_vault::{Attributes, Partition};

/// A write that reached the backend.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AddedEvent {
    pub key: String,
    pub data: Vec<u8>,
    /// The attributes the entry was written with.
    pub attributes: Attributes,
    pub ignoring_sync: bool,
}

impl AddedEvent {
    /// Whether the entry landed in the auth-gated partition.
    pub fn requires_auth(&self) -> bool {
        self.attributes.requires_auth()
    }

    pub fn partition(&self) -> Partition {
        self.attributes.partition()
    }
}

// Secret bytes stay out of logs.
impl std::fmt::Debug for AddedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddedEvent")
            .field("key", &self.key)
            .field("data_len", &self.data.len())
            .field("attributes", &self.attributes)
            .field("ignoring_sync", &self.ignoring_sync)
            .finish()
    }
}

/// A delete that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemovedEvent {
    pub key: String,
    /// `None` when the removal came from a bulk clear.
    pub ignoring_sync: Option<bool>,
}

/// An event that flows through the [`EventBus`](crate::bus::EventBus).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    Added(AddedEvent),
    Removed(RemovedEvent),
}

impl Event {
    /// The key this event is about.
    pub fn key(&self) -> &str {
        match self {
            Self::Added(added) => &added.key,
            Self::Removed(removed) => &removed.key,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed(_))
    }

    /// Short machine-readable kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Removed(_) => "removed",
        }
    }
}
