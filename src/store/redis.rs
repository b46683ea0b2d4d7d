//! Redis-backed queue store.
//!
//! One list and one pub/sub channel per `prefix:key`. Plain commands run
//! over a shared multiplexed connection; every outstanding subscription
//! gets its own dedicated connection, as the Redis protocol requires.
//!
//! A semaphore bounds concurrent store operations. Callers wait for a
//! permit instead of failing fast; a blocking pop legitimately holds its
//! permit for the whole wait, so the permit count is the explicit
//! backpressure control.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::StoreError;
use crate::store::{QueueStore, WakeSubscription};

pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    permits: Arc<Semaphore>,
}

impl RedisStore {
    /// Connect to Redis eagerly so a bad URL or unreachable server fails
    /// at startup rather than on the first webhook.
    pub async fn connect(url: &str, max_active: usize) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid redis url: {e}")))?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn,
            permits: Arc::new(Semaphore::new(max_active)),
        })
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit, StoreError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Connection("connection permits closed".into()))
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn append(&self, key: &str, item: Vec<u8>) -> Result<(), StoreError> {
        let _permit = self.permit().await?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(key, item).await?;
        Ok(())
    }

    async fn take_head(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let _permit = self.permit().await?;
        let mut conn = self.conn.clone();
        let item: Option<Vec<u8>> = conn.lpop(key, None).await?;
        Ok(item)
    }

    async fn range_head(&self, key: &str, count: i64) -> Result<Vec<Vec<u8>>, StoreError> {
        let _permit = self.permit().await?;
        let mut conn = self.conn.clone();
        let items: Vec<Vec<u8>> = conn.lrange(key, 0, count as isize - 1).await?;
        Ok(items)
    }

    async fn publish(&self, key: &str) -> Result<(), StoreError> {
        let _permit = self.permit().await?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(key, b"new".as_slice()).await?;
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<Box<dyn WakeSubscription>, StoreError> {
        // The permit is held for the whole subscription lifetime: a
        // blocked pop occupies one slot of the store's capacity.
        let permit = self.permit().await?;
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(key).await?;
        Ok(Box::new(RedisWake {
            pubsub,
            key: key.to_string(),
            _permit: permit,
        }))
    }
}

struct RedisWake {
    pubsub: redis::aio::PubSub,
    key: String,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl WakeSubscription for RedisWake {
    async fn next_wake(&mut self) -> Result<(), StoreError> {
        match self.pubsub.on_message().next().await {
            Some(_msg) => Ok(()),
            None => Err(StoreError::SubscriptionClosed),
        }
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        let _: () = self.pubsub.ping().await?;
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), StoreError> {
        self.pubsub.unsubscribe(&self.key).await?;
        Ok(())
    }
}
