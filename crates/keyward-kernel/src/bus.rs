//! Change-event fan-out.
//!
//! The bus keeps one bounded [`tokio::sync::mpsc`] channel per subscriber in
//! a [`DashMap`] registry.  Emitting walks the registry and uses `try_send`,
//! so the producer never waits:
//!
//! - a full channel drops the event for that subscriber only, and the drop is
//!   counted in [`SubscriberInfo::dropped`];
//! - a closed channel unregisters its subscriber;
//! - with no subscribers the event is discarded.
//!
//! Events emitted before a subscription was created are **not** replayed.
//! Events are wrapped in [`Arc`] so fan-out does not copy the payload.
//!
//! # Usage
//!
//! ```rust
//! # use keyward_kernel::bus::EventBus;
//! # use keyward_kernel::event::{Event, RemovedEvent};
//! # async fn example() {
//! let bus = EventBus::new(64);
//! let mut sub = bus.subscribe(Some("token"));
//!
//! bus.emit(Event::Removed(RemovedEvent { key: "token".into(), ignoring_sync: Some(true) }));
//!
//! let event = sub.recv().await.unwrap();
//! assert_eq!(event.key(), "token");
//! # }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::event::Event;

/// Unique, time-ordered subscriber identifier (UUID v7).
pub type SubscriberId = Uuid;

/// Snapshot of one registered subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    /// The key this subscriber is restricted to, if any.
    pub key: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    /// Events discarded because the subscriber's buffer was full.
    pub dropped: u64,
}

struct SubscriberSlot {
    filter: Option<String>,
    subscribed_at: DateTime<Utc>,
    sender: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

impl SubscriberSlot {
    fn wants(&self, event: &Event) -> bool {
        self.filter.as_deref().is_none_or(|key| key == event.key())
    }
}

struct BusInner {
    subscribers: DashMap<SubscriberId, SubscriberSlot>,
    capacity: usize,
    closed: AtomicBool,
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Non-blocking publish/subscribe bus for [`Event`]s.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Publish `event` to every interested subscriber.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn emit(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut gone = Vec::new();

        for slot in self.inner.subscribers.iter() {
            if !slot.wants(&event) {
                continue;
            }
            match slot.sender.try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    let dropped = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        subscriber = %slot.key(),
                        key = event.key(),
                        dropped,
                        "subscriber buffer full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => gone.push(*slot.key()),
            }
        }

        // Removal must wait until the iterator has released its shard locks.
        for id in gone {
            self.inner.subscribers.remove(&id);
            tracing::trace!(subscriber = %id, "removed closed subscriber");
        }

        tracing::trace!(
            kind = event.kind(),
            key = event.key(),
            receivers = delivered,
            "event emitted"
        );
        delivered
    }

    /// Create a subscription that receives every future event, restricted to
    /// `key` when one is given.
    ///
    /// Subscribing to a closed bus yields a subscription that ends
    /// immediately.
    pub fn subscribe(&self, key: Option<&str>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let id = Uuid::now_v7();

        let subscription = Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        };

        if self.is_closed() {
            return subscription;
        }

        self.inner.subscribers.insert(
            id,
            SubscriberSlot {
                filter: key.map(str::to_string),
                subscribed_at: Utc::now(),
                sender,
                dropped: AtomicU64::new(0),
            },
        );

        // `close` may have run between the check above and the insert.
        if self.is_closed() {
            self.inner.subscribers.remove(&id);
        }

        tracing::trace!(subscriber = %id, key = ?key, "new subscriber registered");
        subscription
    }

    /// Return the current number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Snapshot of every registered subscriber.
    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        let mut infos: Vec<SubscriberInfo> = self
            .inner
            .subscribers
            .iter()
            .map(|slot| SubscriberInfo {
                id: *slot.key(),
                key: slot.filter.clone(),
                subscribed_at: slot.subscribed_at,
                dropped: slot.dropped.load(Ordering::Relaxed),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Stop accepting subscribers and end every existing subscription once
    /// its buffered events are consumed.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let count = self.inner.subscribers.len();
        self.inner.subscribers.clear();
        tracing::debug!(subscribers = count, "event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A lazy, ordered sequence of [`Event`]s.
///
/// Implements [`Stream`]; the stream ends when the bus is closed.  Dropping
/// the subscription unregisters it.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<Event>>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event; `None` once the bus is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Arc<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AddedEvent, RemovedEvent};
    use futures::StreamExt;
    use keyward_vault::AttributesWithoutAuth;

    fn added(key: &str) -> Event {
        Event::Added(AddedEvent {
            key: key.into(),
            data: key.as_bytes().to_vec(),
            attributes: AttributesWithoutAuth::new().into(),
            ignoring_sync: true,
        })
    }

    fn removed(key: &str) -> Event {
        Event::Removed(RemovedEvent {
            key: key.into(),
            ignoring_sync: Some(true),
        })
    }

    #[tokio::test]
    async fn emit_and_receive_in_order() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(None);

        assert_eq!(bus.emit(added("a")), 1);
        assert_eq!(bus.emit(removed("a")), 1);

        assert_eq!(*sub.recv().await.unwrap(), added("a"));
        assert_eq!(*sub.recv().await.unwrap(), removed("a"));
    }

    #[tokio::test]
    async fn multiple_subscribers_share_the_event() {
        let bus = EventBus::new(16);
        let mut sub1 = bus.subscribe(None);
        let mut sub2 = bus.subscribe(None);

        bus.emit(added("shared"));

        let e1 = sub1.recv().await.unwrap();
        let e2 = sub2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_is_discarded() {
        let bus = EventBus::new(16);
        assert_eq!(bus.emit(added("lonely")), 0);

        // Late subscribers see nothing retroactively.
        let mut sub = bus.subscribe(None);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn key_filter_blocks_other_keys() {
        let bus = EventBus::new(16);
        let mut only_a = bus.subscribe(Some("a"));

        assert_eq!(bus.emit(added("b")), 0);
        assert_eq!(bus.emit(added("a")), 1);

        assert_eq!(only_a.recv().await.unwrap().key(), "a");
        assert!(only_a.try_recv().is_none());
    }

    #[tokio::test]
    async fn full_buffer_drops_without_blocking() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe(None);
        let mut fast = bus.subscribe(Some("k"));

        for _ in 0..5 {
            bus.emit(added("k"));
            // The fast subscriber keeps up.
            assert!(fast.recv().await.is_some());
        }

        let info = bus
            .subscribers()
            .into_iter()
            .find(|info| info.id == slow.id())
            .unwrap();
        assert_eq!(info.dropped, 3);
        assert_eq!(info.key, None);

        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters_it() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        let sub1 = bus.subscribe(None);
        let _sub2 = bus.subscribe(Some("x"));
        assert_eq!(bus.subscriber_count(), 2);

        drop(sub1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn close_ends_streams_after_buffered_events() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(None);

        bus.emit(added("last"));
        bus.close();

        assert_eq!(sub.next().await.unwrap().key(), "last");
        assert!(sub.next().await.is_none());
        assert_eq!(bus.subscriber_count(), 0);

        let mut late = bus.subscribe(None);
        assert!(late.next().await.is_none());
        assert_eq!(bus.emit(added("ignored")), 0);
    }
}
