//! Subscriber capability and the shared registry the stream fans out to.
//!
//! Membership can change at any time from any task (viewers connecting
//! and disconnecting) while the controller broadcasts. The member map is
//! behind a plain `std::sync::Mutex` that is never held across an
//! `.await`: a broadcast snapshots the members, then re-checks each one
//! right before delivering, so a subscriber removed mid-broadcast gets
//! nothing further.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::error::{MirrorError, Result};
use crate::stream::AccessUnit;

// ── Subscriber ───────────────────────────────────────────────────

/// A live consumer of the video stream.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Deliver one access unit as a binary message.
    async fn deliver(&self, unit: AccessUnit) -> Result<()>;

    /// Deliver a human-readable text message.
    async fn notify(&self, message: &str) -> Result<()>;

    /// Close the subscriber; later deliveries fail.
    async fn close(&self);
}

/// Handle returned by [`SubscriberRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ── SubscriberRegistry ───────────────────────────────────────────

#[derive(Default)]
struct Members {
    next_id: u64,
    // Ordered by id, so broadcasts visit subscribers in join order.
    by_id: BTreeMap<SubscriberId, Arc<dyn Subscriber>>,
}

/// Concurrently mutable set of subscribers.
///
/// Cloning yields another handle to the same set.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    members: Arc<Mutex<Members>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; it receives every unit broadcast from now on.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let mut members = self.lock();
        members.next_id += 1;
        let id = SubscriberId(members.next_id);
        members.by_id.insert(id, subscriber);
        debug!(subscriber = %id, total = members.by_id.len(), "subscriber added");
        id
    }

    /// Unregister a subscriber. Returns `false` if it was not a member.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut members = self.lock();
        let removed = members.by_id.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, total = members.by_id.len(), "subscriber removed");
        }
        removed
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_id.is_empty()
    }

    /// Deliver `unit` to every current member, in join order.
    ///
    /// A member whose delivery fails is removed and closed; the others
    /// still receive the unit. Returns the number of successful deliveries.
    pub async fn broadcast(&self, unit: &AccessUnit) -> usize {
        let mut delivered = 0;
        for (id, subscriber) in self.snapshot() {
            if !self.contains(id) {
                continue;
            }
            match subscriber.deliver(unit.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(subscriber = %id, error = %e, "delivery failed; dropping subscriber");
                    if self.remove(id) {
                        subscriber.close().await;
                    }
                }
            }
        }
        delivered
    }

    /// Send `message` to every member, close it, and empty the registry.
    pub async fn notify_and_close_all(&self, message: &str) {
        let drained = std::mem::take(&mut self.lock().by_id);
        info!(count = drained.len(), "closing all subscribers: {message}");
        for (id, subscriber) in drained {
            if let Err(e) = subscriber.notify(message).await {
                debug!(subscriber = %id, error = %e, "notify failed");
            }
            subscriber.close().await;
        }
    }

    fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        self.lock()
            .by_id
            .iter()
            .map(|(id, sub)| (*id, Arc::clone(sub)))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish()
    }
}

// ── ChannelSubscriber ────────────────────────────────────────────

/// Message queued for a [`ChannelSubscriber`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberMessage {
    Binary(AccessUnit),
    Text(String),
}

/// Subscriber backed by a bounded `mpsc` queue.
///
/// Delivery never waits: a full queue fails with
/// [`MirrorError::SubscriberLagging`], so one slow reader cannot hold
/// back the broadcast for everyone else.
#[derive(Debug)]
pub struct ChannelSubscriber {
    tx: Mutex<Option<mpsc::Sender<SubscriberMessage>>>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiver that drains it.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<SubscriberMessage>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.sender().as_ref().is_none_or(|tx| tx.is_closed())
    }

    fn push(&self, message: SubscriberMessage) -> Result<()> {
        let guard = self.sender();
        let tx = guard.as_ref().ok_or(MirrorError::SubscriberClosed)?;
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => MirrorError::SubscriberLagging,
            TrySendError::Closed(_) => MirrorError::SubscriberClosed,
        })
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<SubscriberMessage>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn deliver(&self, unit: AccessUnit) -> Result<()> {
        self.push(SubscriberMessage::Binary(unit))
    }

    async fn notify(&self, message: &str) -> Result<()> {
        self.push(SubscriberMessage::Text(message.to_string()))
    }

    async fn close(&self) {
        // Dropping the sender ends the receiver once it has drained.
        self.sender().take();
    }
}

// ── Tests ────────────────────────────────────────────────────────
