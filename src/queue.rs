//! The queue engine: push / pop / peek over an injected store.
//!
//! # Responsibilities
//! - FIFO append and atomic head-removal per queue key
//! - Race-free blocking pop across many concurrent waiters
//! - Namespacing of queue keys under the deployment prefix
//!
//! The blocking pop subscribes to the key's wake channel *before* its
//! first removal attempt, so no wake published after subscription start is
//! ever missed. Every wake triggers another removal attempt; because head
//! removal is atomic in the store, at most one waiter observes a given
//! item. Extra empty removal attempts by the other waiters are expected
//! and harmless.

use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, Instant};

use crate::error::QueueError;
use crate::record::Record;
use crate::store::{QueueStore, WakeSubscription};

/// Peek count used when the caller passes zero.
pub const DEFAULT_PEEK_COUNT: i64 = 10;

/// How often a blocked pop probes its store connection for liveness.
const PROBE_PERIOD: Duration = Duration::from_secs(60);

/// Stateless queue logic over a store capability. All coordination
/// between concurrent callers goes through the store.
pub struct Queue {
    prefix: String,
    store: Arc<dyn QueueStore>,
}

impl Queue {
    /// Fails fast on an empty prefix; a queue with no namespace would
    /// collide with every other deployment sharing the store.
    pub fn new(prefix: impl Into<String>, store: Arc<dyn QueueStore>) -> Result<Self, QueueError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(QueueError::Configuration("prefix is empty"));
        }
        Ok(Self { prefix, store })
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// Append records to the tail of the key's list, publishing one wake
    /// per appended record.
    ///
    /// A mid-batch failure does not roll back records already appended.
    /// Delivery is at-least-once; callers that retry may duplicate.
    pub async fn push(&self, name: &str, records: &[Record]) -> Result<(), QueueError> {
        let key = self.key(name);
        for record in records {
            self.store.append(&key, record.encode()).await?;
            self.store.publish(&key).await?;
        }
        Ok(())
    }

    /// Remove and return the head record, blocking until one is available
    /// or `timeout` elapses. A zero timeout makes exactly one removal
    /// attempt and returns immediately. Timeout expiry is `Ok(None)`,
    /// never an error.
    pub async fn pop(&self, name: &str, timeout: Duration) -> Result<Option<Record>, QueueError> {
        self.pop_with_cancel(name, timeout, pending()).await
    }

    /// `pop`, unblocked early when `cancel` resolves. Cancellation yields
    /// `Ok(None)` promptly, after unsubscribing from the wake channel.
    pub async fn pop_with_cancel(
        &self,
        name: &str,
        timeout: Duration,
        cancel: impl Future<Output = ()> + Send,
    ) -> Result<Option<Record>, QueueError> {
        let key = self.key(name);
        if timeout.is_zero() {
            return decode_head(self.store.take_head(&key).await?);
        }

        // Subscribe first: an item pushed from here on will deliver a
        // wake we are guaranteed to see.
        let mut sub = self.store.subscribe(&key).await?;
        let outcome = self.await_head(&key, sub.as_mut(), timeout, cancel).await;
        // Unsubscription is mandatory on every exit path, so a satisfied
        // or abandoned wait never keeps subscriber state alive in the
        // store.
        if let Err(err) = sub.unsubscribe().await {
            tracing::debug!(key = %key, error = %err, "unsubscribe after pop failed");
        }
        outcome
    }

    async fn await_head(
        &self,
        key: &str,
        sub: &mut dyn WakeSubscription,
        timeout: Duration,
        cancel: impl Future<Output = ()> + Send,
    ) -> Result<Option<Record>, QueueError> {
        // Covers an item that was already present before the wait began.
        if let Some(item) = self.store.take_head(key).await? {
            return decode_head(Some(item));
        }

        let expired = sleep_until(Instant::now() + timeout);
        let mut probe = interval_at(Instant::now() + PROBE_PERIOD, PROBE_PERIOD);
        tokio::pin!(expired);
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                wake = sub.next_wake() => {
                    wake?;
                    // A wake is only a hint; the list may already have
                    // been drained by a sibling waiter.
                    if let Some(item) = self.store.take_head(key).await? {
                        return decode_head(Some(item));
                    }
                }
                _ = probe.tick() => {
                    sub.ping().await?;
                }
                () = &mut expired => return Ok(None),
                () = &mut cancel => return Ok(None),
            }
        }
    }

    /// Return up to `count` head records without removing them. Zero
    /// falls back to [`DEFAULT_PEEK_COUNT`]; negative counts are rejected.
    pub async fn peek(&self, name: &str, count: i64) -> Result<Vec<Record>, QueueError> {
        if count < 0 {
            return Err(QueueError::InvalidArgument("peek count is negative"));
        }
        let count = if count == 0 { DEFAULT_PEEK_COUNT } else { count };
        let items = self.store.range_head(&self.key(name), count).await?;
        items
            .iter()
            .map(|item| Record::decode(item).map_err(QueueError::from))
            .collect()
    }
}

fn decode_head(item: Option<Vec<u8>>) -> Result<Option<Record>, QueueError> {
    match item {
        Some(bytes) => Ok(Some(Record::decode(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(body: &str) -> Record {
        Record {
            received_at: 1,
            header: vec![],
            host: "h".into(),
            body: body.into(),
        }
    }

    fn queue() -> Queue {
        Queue::new("test", Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let result = Queue::new("", Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(QueueError::Configuration(_))));
    }

    #[tokio::test]
    async fn pops_return_pushed_records_in_fifo_order() {
        let q = queue();
        let records: Vec<Record> = (0..5).map(|i| record(&format!("r{i}"))).collect();
        q.push("k", &records).await.unwrap();
        for expected in &records {
            let popped = q.pop("k", Duration::ZERO).await.unwrap().unwrap();
            assert_eq!(&popped, expected);
        }
        assert_eq!(q.pop("k", Duration::ZERO).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_pop_then_timed_pop_scenario() {
        let q = queue();
        q.push("q1", &[record("hi")]).await.unwrap();

        let first = q.pop("q1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.body, "hi");

        let started = Instant::now();
        let second = q.pop("q1", Duration::from_millis(100)).await.unwrap();
        assert_eq!(second, None);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_only_after_the_timeout() {
        let q = queue();
        let started = Instant::now();
        let popped = q.pop("empty", Duration::from_secs(5)).await.unwrap();
        assert_eq!(popped, None);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_pop_wakes_on_push() {
        let q = Arc::new(queue());
        let popper = {
            let q = q.clone();
            tokio::spawn(async move { q.pop("k", Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        q.push("k", &[record("late")]).await.unwrap();
        let popped = popper.await.unwrap().unwrap().unwrap();
        assert_eq!(popped.body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn n_waiters_m_items_delivers_each_item_once() {
        let q = Arc::new(queue());
        let mut poppers = Vec::new();
        for _ in 0..5 {
            let q = q.clone();
            poppers.push(tokio::spawn(async move {
                q.pop("k", Duration::from_secs(1)).await.unwrap()
            }));
        }
        tokio::task::yield_now().await;
        let items: Vec<Record> = (0..3).map(|i| record(&format!("m{i}"))).collect();
        q.push("k", &items).await.unwrap();

        let mut delivered = Vec::new();
        for popper in poppers {
            if let Some(r) = popper.await.unwrap() {
                delivered.push(r.body);
            }
        }
        delivered.sort();
        assert_eq!(delivered, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_promptly() {
        let q = queue();
        let started = Instant::now();
        let popped = q
            .pop_with_cancel("k", Duration::from_secs(60), async {
                tokio::time::sleep(Duration::from_secs(1)).await;
            })
            .await
            .unwrap();
        assert_eq!(popped, None);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn peek_never_mutates_subsequent_pops() {
        let q = queue();
        q.push("k", &[record("a"), record("b")]).await.unwrap();
        let peeked = q.peek("k", 0).await.unwrap();
        assert_eq!(peeked.len(), 2);
        let popped = q.pop("k", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(popped, peeked[0]);
    }

    #[tokio::test]
    async fn peek_zero_count_defaults_to_ten() {
        let q = queue();
        let records: Vec<Record> = (0..12).map(|i| record(&format!("r{i}"))).collect();
        q.push("k", &records).await.unwrap();
        assert_eq!(q.peek("k", 0).await.unwrap().len(), 10);
        assert_eq!(q.peek("k", 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn peek_negative_count_is_an_input_error() {
        let q = queue();
        let result = q.peek("k", -1).await;
        assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
    }

    /// Store that fails every append after the first `allow` calls.
    struct FlakyStore {
        inner: MemoryStore,
        appends: AtomicUsize,
        allow: usize,
    }

    #[async_trait]
    impl QueueStore for FlakyStore {
        async fn append(&self, key: &str, item: Vec<u8>) -> Result<(), StoreError> {
            if self.appends.fetch_add(1, Ordering::SeqCst) >= self.allow {
                return Err(StoreError::Command("append refused".into()));
            }
            self.inner.append(key, item).await
        }
        async fn take_head(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.take_head(key).await
        }
        async fn range_head(&self, key: &str, count: i64) -> Result<Vec<Vec<u8>>, StoreError> {
            self.inner.range_head(key, count).await
        }
        async fn publish(&self, key: &str) -> Result<(), StoreError> {
            self.inner.publish(key).await
        }
        async fn subscribe(&self, key: &str) -> Result<Box<dyn WakeSubscription>, StoreError> {
            self.inner.subscribe(key).await
        }
    }

    #[tokio::test]
    async fn mid_batch_failure_keeps_already_appended_records() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            appends: AtomicUsize::new(0),
            allow: 1,
        });
        let q = Queue::new("test", store).unwrap();
        let result = q.push("k", &[record("kept"), record("lost")]).await;
        assert!(matches!(result, Err(QueueError::Store(_))));
        // The first record survived the failed batch.
        let popped = q.pop("k", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(popped.body, "kept");
    }

    /// Subscription whose liveness probe always fails.
    struct DeadProbeStore {
        inner: MemoryStore,
    }

    struct DeadProbeWake {
        inner: Box<dyn WakeSubscription>,
    }

    #[async_trait]
    impl QueueStore for DeadProbeStore {
        async fn append(&self, key: &str, item: Vec<u8>) -> Result<(), StoreError> {
            self.inner.append(key, item).await
        }
        async fn take_head(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.take_head(key).await
        }
        async fn range_head(&self, key: &str, count: i64) -> Result<Vec<Vec<u8>>, StoreError> {
            self.inner.range_head(key, count).await
        }
        async fn publish(&self, key: &str) -> Result<(), StoreError> {
            self.inner.publish(key).await
        }
        async fn subscribe(&self, key: &str) -> Result<Box<dyn WakeSubscription>, StoreError> {
            Ok(Box::new(DeadProbeWake {
                inner: self.inner.subscribe(key).await?,
            }))
        }
    }

    #[async_trait]
    impl WakeSubscription for DeadProbeWake {
        async fn next_wake(&mut self) -> Result<(), StoreError> {
            self.inner.next_wake().await
        }
        async fn ping(&mut self) -> Result<(), StoreError> {
            Err(StoreError::Connection("probe target gone".into()))
        }
        async fn unsubscribe(&mut self) -> Result<(), StoreError> {
            self.inner.unsubscribe().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_aborts_the_wait() {
        let q = Queue::new(
            "test",
            Arc::new(DeadProbeStore {
                inner: MemoryStore::new(),
            }),
        )
        .unwrap();
        // Timeout longer than the probe period, so the probe fires first.
        let result = q.pop("k", Duration::from_secs(120)).await;
        assert!(matches!(result, Err(QueueError::Store(_))));
    }
}
