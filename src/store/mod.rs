//! Store capability behind the queue engine.
//!
//! # Responsibilities
//! - Define the list + publish/subscribe contract the engine needs
//! - Provide an in-memory implementation for unit tests
//!
//! The engine is stateless logic over this capability: all coordination
//! between concurrent callers happens through the store, never through
//! in-process shared queue state.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{broadcast, Mutex};

use crate::error::StoreError;

pub mod redis;

pub use redis::RedisStore;

/// List + pub/sub operations over one key-addressed FIFO family.
///
/// `take_head` must be atomic at the store level: with many concurrent
/// callers, each stored item is observed non-empty by at most one of them.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append one encoded item to the tail of the key's list.
    async fn append(&self, key: &str, item: Vec<u8>) -> Result<(), StoreError>;

    /// Atomically remove and return the head of the key's list.
    /// An empty list is not an error; it yields `None`.
    async fn take_head(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Return up to `count` items from the head without removing them.
    async fn range_head(&self, key: &str, count: i64) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Publish one payload-less wake on the key's topic.
    async fn publish(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribe to the key's wake topic. The subscription is confirmed
    /// once this returns, so no wake published afterwards is missed.
    async fn subscribe(&self, key: &str) -> Result<Box<dyn WakeSubscription>, StoreError>;
}

/// An active wake subscription held by one blocked pop.
///
/// A wake is a hint, never proof that an item exists; the receiver must
/// always re-check the list.
#[async_trait]
pub trait WakeSubscription: Send {
    /// Resolve on the next wake notification.
    async fn next_wake(&mut self) -> Result<(), StoreError>;

    /// Probe the underlying connection; failure means the wait can no
    /// longer be trusted and must abort.
    async fn ping(&mut self) -> Result<(), StoreError>;

    /// Tear down the subscription. Mandatory on every exit path.
    async fn unsubscribe(&mut self) -> Result<(), StoreError>;
}

/// In-memory store for unit tests and embedded use.
///
/// Lists are per-key `VecDeque`s; wake topics are per-key broadcast
/// channels created on first use and kept for the store's lifetime.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    topics: Mutex<HashMap<String, broadcast::Sender<()>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn topic(&self, key: &str) -> broadcast::Sender<()> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn append(&self, key: &str, item: Vec<u8>) -> Result<(), StoreError> {
        let mut lists = self.lists.lock().await;
        lists.entry(key.to_string()).or_default().push_back(item);
        Ok(())
    }

    async fn take_head(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut lists = self.lists.lock().await;
        Ok(lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn range_head(&self, key: &str, count: i64) -> Result<Vec<Vec<u8>>, StoreError> {
        let lists = self.lists.lock().await;
        Ok(lists
            .get(key)
            .map(|list| list.iter().take(count.max(0) as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, key: &str) -> Result<(), StoreError> {
        // No receivers is fine; the wake is only a hint.
        let _ = self.topic(key).await.send(());
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<Box<dyn WakeSubscription>, StoreError> {
        let rx = self.topic(key).await.subscribe();
        Ok(Box::new(MemoryWake { rx }))
    }
}

struct MemoryWake {
    rx: broadcast::Receiver<()>,
}

#[async_trait]
impl WakeSubscription for MemoryWake {
    async fn next_wake(&mut self) -> Result<(), StoreError> {
        match self.rx.recv().await {
            Ok(()) => Ok(()),
            // A lagged receiver still learned that something happened;
            // the caller re-checks the list either way.
            Err(broadcast::error::RecvError::Lagged(_)) => Ok(()),
            Err(broadcast::error::RecvError::Closed) => Err(StoreError::SubscriptionClosed),
        }
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_head_is_fifo() {
        let store = MemoryStore::new();
        store.append("k", b"a".to_vec()).await.unwrap();
        store.append("k", b"b".to_vec()).await.unwrap();
        assert_eq!(store.take_head("k").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.take_head("k").await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.take_head("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn range_head_does_not_remove() {
        let store = MemoryStore::new();
        store.append("k", b"a".to_vec()).await.unwrap();
        let ranged = store.range_head("k", 10).await.unwrap();
        assert_eq!(ranged, vec![b"a".to_vec()]);
        assert_eq!(store.take_head("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn publish_wakes_existing_subscriber() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("k").await.unwrap();
        store.publish("k").await.unwrap();
        sub.next_wake().await.unwrap();
        sub.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let store = MemoryStore::new();
        store.publish("nobody").await.unwrap();
    }
}
