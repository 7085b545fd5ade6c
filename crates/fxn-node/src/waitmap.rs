//! Correlation map from a key to a value that arrives later.
//!
//! Responses from remote peers land here with `put`; the task that sent the
//! request blocks on `wait` until the response shows up or its deadline
//! passes. Each key holds a single value that every waiter receives a clone
//! of. With a non-zero capacity the oldest stored values are evicted first.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("Timed out waiting for value")]
    Timeout,

    #[error("Wait cancelled")]
    Cancelled,
}

struct Inner<K, V> {
    slots: HashMap<K, watch::Sender<Option<V>>>,
    /// Keys holding a value, oldest first.
    order: VecDeque<K>,
}

pub struct WaitMap<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

impl<K, V> WaitMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a map holding at most `capacity` values. Zero means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Store a value and wake everyone waiting on `key`. A second put on the
    /// same key replaces the value without refreshing its age.
    pub fn put(&self, key: K, value: V) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let fresh = match inner.slots.get(&key) {
            Some(slot) => slot.send_replace(Some(value)).is_none(),
            None => {
                let (tx, _rx) = watch::channel(Some(value));
                inner.slots.insert(key.clone(), tx);
                true
            }
        };

        if fresh {
            inner.order.push_back(key);
            if self.capacity > 0 {
                while inner.order.len() > self.capacity {
                    if let Some(oldest) = inner.order.pop_front() {
                        inner.slots.remove(&oldest);
                    }
                }
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner
            .lock()
            .slots
            .get(key)
            .and_then(|slot| slot.borrow().clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout` for a value. `None` means nothing arrived in time.
    pub async fn wait(&self, key: &K, timeout: Duration) -> Option<V> {
        self.wait_until(key, Instant::now() + timeout, &CancellationToken::new())
            .await
            .ok()
    }

    /// Wait until `deadline` for a value, giving up early if `cancel` fires.
    pub async fn wait_until(
        &self,
        key: &K,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<V, WaitError> {
        let mut waiter = Waiter {
            map: self,
            key: key.clone(),
            rx: Some(self.subscribe(key)),
        };
        let Some(rx) = waiter.rx.as_mut() else {
            return Err(WaitError::Timeout);
        };

        let outcome = tokio::select! {
            biased;
            res = rx.wait_for(Option::is_some) => match res {
                Ok(value) => value.clone().ok_or(WaitError::Timeout),
                Err(_) => Err(WaitError::Timeout),
            },
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(WaitError::Timeout),
        };
        outcome
    }

    fn subscribe(&self, key: &K) -> watch::Receiver<Option<V>> {
        self.inner
            .lock()
            .slots
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Drop a slot nobody filled and nobody waits on.
    fn prune(&self, key: &K) {
        let mut inner = self.inner.lock();
        let idle = inner
            .slots
            .get(key)
            .is_some_and(|slot| slot.borrow().is_none() && slot.receiver_count() == 0);
        if idle {
            inner.slots.remove(key);
        }
    }
}

/// Releases a waiter's subscription, including when its future is dropped
/// part way through.
struct Waiter<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    map: &'a WaitMap<K, V>,
    key: K,
    rx: Option<watch::Receiver<Option<V>>>,
}

impl<K, V> Drop for Waiter<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        self.rx.take();
        self.map.prune(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_get_after_put() {
        let map = WaitMap::new(0);
        assert!(map.get(&"a").is_none());
        map.put("a", 1);
        assert_eq!(map.get(&"a"), Some(1));
        assert_eq!(map.wait(&"a", Duration::from_millis(1)).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_put() {
        let map = Arc::new(WaitMap::new(0));
        let waiter = {
            let map = map.clone();
            tokio::spawn(async move { map.wait(&"req/peer".to_string(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        map.put("req/peer".to_string(), "result");
        assert_eq!(waiter.await.unwrap(), Some("result"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_see_same_value() {
        let map = Arc::new(WaitMap::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let map = map.clone();
                tokio::spawn(async move { map.wait(&7u32, Duration::from_secs(10)).await })
            })
            .collect();
        tokio::task::yield_now().await;
        map.put(7u32, vec![1, 2, 3]);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Some(vec![1, 2, 3]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_times_out_no_earlier_than_deadline() {
        let map: WaitMap<&str, u8> = WaitMap::new(0);
        let started = Instant::now();
        assert!(map.wait(&"never", Duration::from_secs(3)).await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(3));
        // Abandoned slot is pruned.
        assert!(map.inner.lock().slots.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_distinct_from_timeout() {
        let map: Arc<WaitMap<&str, u8>> = Arc::new(WaitMap::new(0));
        let cancel = CancellationToken::new();
        let task = {
            let map = map.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                map.wait_until(&"k", Instant::now() + Duration::from_secs(60), &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), Err(WaitError::Cancelled));

        let timed_out = map
            .wait_until(&"k", Instant::now() + Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert_eq!(timed_out, Err(WaitError::Timeout));
    }

    #[test]
    fn test_bounded_map_evicts_oldest() {
        let map = WaitMap::new(2);
        map.put("a", 1);
        map.put("b", 2);
        map.put("a", 10);
        map.put("c", 3);

        assert!(map.get(&"a").is_none());
        assert_eq!(map.get(&"b"), Some(2));
        assert_eq!(map.get(&"c"), Some(3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let map = WaitMap::new(0);
        for i in 0..5000 {
            map.put(i, i);
        }
        assert_eq!(map.len(), 5000);
        assert_eq!(map.get(&0), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_releases_slot() {
        let map: WaitMap<&str, u8> = WaitMap::new(0);
        let _ = tokio::time::timeout(
            Duration::from_millis(10),
            map.wait(&"k", Duration::from_secs(60)),
        )
        .await;
        assert!(map.inner.lock().slots.is_empty());
    }
}
