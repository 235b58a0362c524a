//! Shared state store for the Sequence lobby server.
//!
//! Sessions and lobbies never hold references to each other. Everything
//! they share goes through a store that offers two things:
//!
//! - **Keys with optional time-to-live.** Lobby and player snapshots live
//!   here. A departed player's snapshot gets a TTL so that a quick
//!   reconnect can restore it.
//! - **Topic publish/subscribe.** Sessions publish to a lobby's inbound
//!   topics; the lobby publishes responses that every session of the
//!   room receives.
//!
//! [`StateStore`] is the seam. [`MemoryStore`] is the in-process backend
//! the server ships with; a networked key/value server can implement the
//! same trait.
//!
//! # Ordering
//!
//! A subscription observes the messages of all of its topics in the
//! order they were published. A lobby consumes one subscription over its
//! three inbound topics, so it handles a room's events in publish order.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryStoreConfig, MemorySubscription};

use std::future::Future;
use std::time::Duration;

/// A message received from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMessage {
    /// The topic the message was published to.
    pub topic: String,
    /// The published bytes.
    pub payload: Vec<u8>,
}

/// Key/value storage with TTL plus topic pub/sub.
///
/// Implementations are cheap to clone; clones share the same data.
pub trait StateStore: Clone + Send + Sync + 'static {
    /// The subscription type returned by [`subscribe`](StateStore::subscribe).
    type Subscription: TopicSubscription;

    /// Stores `value` under `key`, replacing any previous value and
    /// clearing any TTL.
    fn set(&self, key: &str, value: Vec<u8>)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reads a key. Expired keys read as `None`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Reads several keys at once, in order.
    fn get_many(
        &self,
        keys: &[String],
    ) -> impl Future<Output = Result<Vec<Option<Vec<u8>>>, StoreError>> + Send;

    /// Removes a key. Returns whether it existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Sets a time-to-live on an existing key. Returns whether it existed.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Clears the time-to-live of an existing key. Returns whether it existed.
    fn persist(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Publishes to a topic. Returns how many subscriptions received it.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Subscribes to a set of topics.
    fn subscribe(
        &self,
        topics: &[String],
    ) -> impl Future<Output = Result<Self::Subscription, StoreError>> + Send;
}

/// A live subscription to one or more topics.
///
/// Dropping the subscription unsubscribes.
pub trait TopicSubscription: Send + Sync + 'static {
    /// Waits for the next message. `None` means the store dropped this
    /// subscription and no more messages will arrive.
    fn recv(&mut self) -> impl Future<Output = Option<StoreMessage>> + Send;

    /// Checks that the subscription is still attached to the store.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
