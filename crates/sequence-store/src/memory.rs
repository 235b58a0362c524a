//! In-process [`StateStore`] backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::{StateStore, StoreError, StoreMessage, TopicSubscription};

/// Configuration for a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Messages buffered per subscription. A subscription whose buffer is
    /// full when a message is published is disconnected.
    pub subscriber_capacity: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
        }
    }
}

/// A [`StateStore`] kept in process memory.
///
/// Expired keys are removed lazily, the next time they are touched.
/// Publishing fans out under the store lock, which is what gives every
/// subscription the same global publish order.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: MemoryStoreConfig,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    closed: bool,
    entries: HashMap<String, Entry>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscriber: u64,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct Subscriber {
    topics: HashSet<String>,
    tx: mpsc::Sender<StoreMessage>,
}

impl State {
    /// Returns the entry for `key` unless it has expired, in which case
    /// it is removed.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }
}

impl MemoryStore {
    /// Creates an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Creates an empty store.
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Shuts the store down. Every subscription ends and every later
    /// operation fails with [`StoreError::Closed`].
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
        tracing::info!("memory store shut down");
    }

    /// Remaining time-to-live of a key, or `None` if the key is missing
    /// or has no TTL.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.lock();
        let at = state.live(key)?.expires_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the state unless the store is closed.
    fn with_open<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T, StoreError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(f(&mut state))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    type Subscription = MemorySubscription;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.with_open(|state| {
            state.entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: None,
                },
            );
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_open(|state| state.live(key).map(|e| e.value.clone()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.with_open(|state| {
            keys.iter()
                .map(|key| state.live(key).map(|e| e.value.clone()))
                .collect()
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.with_open(|state| {
            let existed = state.live(key).is_some();
            state.entries.remove(key);
            existed
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_open(|state| match state.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn persist(&self, key: &str) -> Result<bool, StoreError> {
        self.with_open(|state| match state.live(key) {
            Some(entry) => {
                entry.expires_at = None;
                true
            }
            None => false,
        })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<usize, StoreError> {
        self.with_open(|state| {
            let message = StoreMessage {
                topic: topic.to_string(),
                payload,
            };
            let mut delivered = 0;
            let mut dropped = Vec::new();
            for (id, sub) in &state.subscribers {
                if !sub.topics.contains(topic) {
                    continue;
                }
                match sub.tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(subscriber = id, topic, "subscriber too slow, disconnecting");
                        dropped.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*id),
                }
            }
            for id in dropped {
                state.subscribers.remove(&id);
            }
            delivered
        })
    }

    async fn subscribe(&self, topics: &[String]) -> Result<MemorySubscription, StoreError> {
        let capacity = self.inner.config.subscriber_capacity.max(1);
        let (id, rx) = self.with_open(|state| {
            let (tx, rx) = mpsc::channel(capacity);
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.insert(
                id,
                Subscriber {
                    topics: topics.iter().cloned().collect(),
                    tx,
                },
            );
            (id, rx)
        })?;
        tracing::debug!(subscriber = id, ?topics, "subscribed");
        Ok(MemorySubscription {
            id,
            rx,
            store: self.clone(),
        })
    }
}

/// A subscription to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySubscription {
    id: u64,
    rx: mpsc::Receiver<StoreMessage>,
    store: MemoryStore,
}

impl TopicSubscription for MemorySubscription {
    async fn recv(&mut self) -> Option<StoreMessage> {
        self.rx.recv().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let state = self.store.lock();
        if state.closed {
            return Err(StoreError::Closed);
        }
        if !state.subscribers.contains_key(&self.id) {
            return Err(StoreError::SubscriptionClosed);
        }
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.store.lock().subscribers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_many_preserves_order() {
        let store = MemoryStore::new();
        store.set("a", b"1".to_vec()).await.unwrap();
        store.set("c", b"3".to_vec()).await.unwrap();
        let values = store.get_many(&topics(&["a", "b", "c"])).await.unwrap();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_removes_key_after_ttl() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec()).await.unwrap();
        assert!(store.expire("k", Duration::from_secs(30)).await.unwrap());
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.expire("k", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_clears_ttl() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec()).await.unwrap();
        store.expire("k", Duration::from_secs(5)).await.unwrap();
        assert!(store.persist("k").await.unwrap());
        assert_eq!(store.ttl("k"), None);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_clears_ttl() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec()).await.unwrap();
        store.expire("k", Duration::from_secs(5)).await.unwrap();
        store.set("k", b"w".to_vec()).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(b"w".to_vec()));
    }

    #[tokio::test]
    async fn test_publish_reaches_only_matching_subscribers() {
        let store = MemoryStore::new();
        let mut a = store.subscribe(&topics(&["t1"])).await.unwrap();
        let mut b = store.subscribe(&topics(&["t2"])).await.unwrap();

        assert_eq!(store.publish("t1", b"x".to_vec()).await.unwrap(), 1);
        assert_eq!(store.publish("nobody", b"y".to_vec()).await.unwrap(), 0);
        store.publish("t2", b"z".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap().payload, b"x");
        let msg = b.recv().await.unwrap();
        assert_eq!(msg.topic, "t2");
        assert_eq!(msg.payload, b"z");
    }

    #[tokio::test]
    async fn test_subscription_sees_publish_order_across_topics() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&topics(&["a", "b"])).await.unwrap();
        for (i, topic) in ["a", "b", "a", "b", "b"].into_iter().enumerate() {
            store.publish(topic, vec![i as u8]).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(sub.recv().await.unwrap().payload, vec![i]);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_disconnected() {
        let store = MemoryStore::with_config(MemoryStoreConfig {
            subscriber_capacity: 2,
        });
        let mut sub = store.subscribe(&topics(&["t"])).await.unwrap();
        store.publish("t", vec![1]).await.unwrap();
        store.publish("t", vec![2]).await.unwrap();
        assert_eq!(store.publish("t", vec![3]).await.unwrap(), 0);

        assert!(matches!(sub.ping().await, Err(StoreError::SubscriptionClosed)));
        // buffered messages still drain, then the stream ends
        assert_eq!(sub.recv().await.unwrap().payload, vec![1]);
        assert_eq!(sub.recv().await.unwrap().payload, vec![2]);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let store = MemoryStore::new();
        let sub = store.subscribe(&topics(&["t"])).await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(store.publish("t", vec![1]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_subscriptions_and_rejects_operations() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&topics(&["t"])).await.unwrap();
        store.shutdown();

        assert!(sub.recv().await.is_none());
        assert!(matches!(sub.ping().await, Err(StoreError::Closed)));
        assert!(matches!(store.get("k").await, Err(StoreError::Closed)));
        assert!(matches!(store.publish("t", vec![]).await, Err(StoreError::Closed)));
        assert!(matches!(
            store.subscribe(&topics(&["t"])).await,
            Err(StoreError::Closed)
        ));
    }
}
