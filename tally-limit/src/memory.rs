use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::CounterStore;
use super::StoreError;

#[derive(Debug)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// An in-process [`CounterStore`].
///
/// Counters live in a map behind a single mutex, so every bump is trivially
/// atomic: the expired-or-absent check and the TTL arming happen under the
/// same lock as the increment. Suitable for tests and single-instance
/// deployments; sharing counters across processes needs a networked store.
///
/// Expiry is lazy. A bump against an elapsed window resets it in place, and
/// [`purge_expired`](MemoryCounterStore::purge_expired) evicts windows that
/// stopped receiving traffic, so long-running processes can bound memory by
/// sweeping periodically.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evicts every window whose TTL has elapsed and returns how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| window.expires_at > now);
        before - windows.len()
    }

    /// The number of live windows, counting expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    /// Whether the store holds no windows at all.
    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn bump(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        let window = windows
            .entry(key.to_owned())
            .and_modify(|window| {
                if window.expires_at <= now {
                    // Fresh window: the count restarts at zero and the TTL
                    // is re-armed, matching a networked store's expiry.
                    window.count = 0;
                    window.expires_at = now + ttl;
                }
            })
            .or_insert_with(|| Window {
                count: 0,
                expires_at: now + ttl,
            });

        window.count += 1;
        Ok(window.count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const TTL: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn counts_are_monotonic_within_a_window() {
        let store = MemoryCounterStore::new();

        for expected in 1..=5 {
            let count = store.bump("k", Duration::from_secs(60)).await.unwrap();
            assert_eq!(count, expected);
        }
    }

    #[tokio::test]
    async fn expiry_resets_to_exactly_one() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.bump("k", TTL).await.unwrap(), 1);
        assert_eq!(store.bump("k", TTL).await.unwrap(), 2);

        std::thread::sleep(TTL);

        // Never zero, never a continuation of the old count.
        assert_eq!(store.bump("k", TTL).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn keys_count_independently() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.bump("a", TTL).await.unwrap(), 1);
        assert_eq!(store.bump("b", TTL).await.unwrap(), 1);
        assert_eq!(store.bump("a", TTL).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn purge_evicts_only_elapsed_windows() {
        let store = MemoryCounterStore::new();

        store.bump("short", TTL).await.unwrap();
        store.bump("long", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len(), 2);

        std::thread::sleep(TTL);

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_bumps_are_linearized() {
        let store = Arc::new(MemoryCounterStore::new());
        let tasks = 100;

        let mut handles = vec![];
        for _ in 0..tasks {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.bump("shared", Duration::from_secs(60)).await.unwrap()
            }));
        }

        let results = futures::future::join_all(handles).await;
        let mut counts: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        counts.sort_unstable();

        // Every bump observed a distinct count and nothing was skipped.
        assert_eq!(counts, (1..=tasks).collect::<Vec<u64>>());
    }
}
