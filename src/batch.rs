//! In-flight request deduplication
//!
//! Concurrent callers asking for the same cache key share one upstream call
//! instead of issuing duplicates. A short batch window in front of the
//! producer lets near-simultaneous callers coalesce onto the registration
//! before it fires.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default coalescing window before the producer runs.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(50);

type InFlight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Deduplicates concurrent requests by key.
///
/// At most one producer per key is in flight at a time; every caller sharing
/// a key observes the identical eventual result or identical eventual
/// failure (both `T` and `E` must be `Clone` for that reason). On settlement
/// the key is evicted unconditionally, so a later call executes fresh.
pub struct Batcher<T, E> {
    inflight: Arc<Mutex<HashMap<String, InFlight<T, E>>>>,
}

impl<T, E> Batcher<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the pending operation for `key`, or register a new one that runs
    /// `producer` once after `delay`.
    pub async fn batch<F, Fut>(&self, key: &str, producer: F, delay: Duration) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().unwrap();
            if let Some(existing) = inflight.get(key) {
                existing.clone()
            } else {
                let map = Arc::clone(&self.inflight);
                let owned_key = key.to_string();
                let fut = async move {
                    tokio::time::sleep(delay).await;
                    let result = producer().await;
                    // Evict on settlement, success or failure, so no stale
                    // registration outlives its result.
                    map.lock().unwrap().remove(&owned_key);
                    result
                }
                .boxed()
                .shared();
                inflight.insert(key.to_string(), fut.clone());
                fut
            }
        };

        shared.await
    }

    /// Number of registrations currently pending.
    pub fn pending(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }

    /// Discard all pending registrations. Callers already awaiting a shared
    /// handle still drive it to completion, but new calls will execute
    /// fresh. Teardown/testing only; this is not a cancellation primitive.
    pub fn clear(&self) {
        self.inflight.lock().unwrap().clear();
    }
}

impl<T, E> Default for Batcher<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_callers_share_one_producer_run() {
        let batcher = Arc::new(Batcher::<usize, String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let batcher = Arc::clone(&batcher);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                batcher
                    .batch(
                        "same-key",
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(42)
                        },
                        Duration::from_millis(20),
                    )
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_key_evicted() {
        let batcher = Arc::new(Batcher::<usize, String>::new());

        let first = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move {
                batcher
                    .batch(
                        "k",
                        || async { Err("boom".to_string()) },
                        Duration::from_millis(10),
                    )
                    .await
            })
        };
        let second = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move {
                batcher
                    .batch(
                        "k",
                        || async { Ok(1) },
                        Duration::from_millis(10),
                    )
                    .await
            })
        };

        let a = first.await.unwrap();
        let b = second.await.unwrap();
        // Both sharers see the same outcome, whichever producer registered
        // first; the other producer never ran.
        assert_eq!(a, b);
        assert_eq!(batcher.pending(), 0);

        // A fresh call after settlement executes fresh.
        let result = batcher
            .batch("k", || async { Ok(7) }, Duration::from_millis(1))
            .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let batcher = Batcher::<usize, String>::new();
        let a = batcher.batch("a", || async { Ok(1) }, Duration::from_millis(1));
        let b = batcher.batch("b", || async { Ok(2) }, Duration::from_millis(1));
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(2));
    }

    #[tokio::test]
    async fn test_clear_discards_registrations() {
        let batcher = Batcher::<usize, String>::new();
        // Register without awaiting by racing a long delay.
        let fut = batcher.batch("k", || async { Ok(1) }, Duration::from_secs(60));
        futures::pin_mut!(fut);
        assert!(futures::poll!(fut.as_mut()).is_pending());
        assert_eq!(batcher.pending(), 1);

        batcher.clear();
        assert_eq!(batcher.pending(), 0);
    }
}
