//! Persisted local-key counters.
//!
//! Each node owns a counter for its leased key space and the bootstrapper owns
//! one more for the free space. Counters live in the cluster metadata store and
//! advance by compare-and-swap, so a value handed out is never handed out again,
//! even when the operation that reserved it later fails.

use std::sync::Arc;
use std::time::Duration;

use sable_kv::KeyValueStore;
use sable_kv::KeyValueStoreError;
use sable_kv::ReadRequest;
use sable_kv::WriteRequest;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::warn;

use crate::cluster::NodeKey;
use crate::constants::CAS_RETRY_INITIAL_BACKOFF_MS;
use crate::constants::CAS_RETRY_MAX_BACKOFF_MS;
use crate::constants::FREE_COUNTER_SUFFIX;
use crate::constants::LEASED_COUNTER_SUFFIX;
use crate::constants::MAX_CAS_RETRIES;
use crate::error::ChannelError;
use crate::error::Result;
use crate::key::LocalKey;
use crate::key::MAX_LOCAL_KEY;

/// Store key of a node's leased-space counter.
pub fn leased_counter_key(host: NodeKey) -> String {
    format!("{}{}", host.0, LEASED_COUNTER_SUFFIX)
}

/// Store key of the free-space counter.
pub fn free_counter_key(host: NodeKey) -> String {
    format!("{}{}", host.0, FREE_COUNTER_SUFFIX)
}

/// Monotonic counter bounded by [`MAX_LOCAL_KEY`].
pub struct LocalKeyCounter<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    key: String,
    /// Serializes increments issued from this process.
    lock: Mutex<()>,
}

impl<S: KeyValueStore + ?Sized> LocalKeyCounter<S> {
    /// Open the counter stored under `key`, verifying any persisted value.
    pub async fn open(store: Arc<S>, key: impl Into<String>) -> Result<Self> {
        let counter = Self {
            store,
            key: key.into(),
            lock: Mutex::new(()),
        };
        let value = counter.read_current().await?;
        debug!(key = %counter.key, value, "opened local key counter");
        Ok(counter)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value. Zero when nothing has been allocated yet.
    pub async fn value(&self) -> Result<LocalKey> {
        self.read_current().await
    }

    /// Advance the counter by `delta` and return the new value.
    ///
    /// The reserved range is `(value - delta, value]`. Fails without changing
    /// the counter when the range would pass [`MAX_LOCAL_KEY`].
    pub async fn add(&self, delta: u32) -> Result<LocalKey> {
        let _guard = self.lock.lock().await;

        let mut attempt = 0u32;
        let mut backoff_ms = CAS_RETRY_INITIAL_BACKOFF_MS;

        loop {
            let current = self.read_current().await?;
            let available = MAX_LOCAL_KEY - current;
            if delta > available {
                return Err(ChannelError::CapacityExceeded {
                    space: self.key.clone(),
                    requested: u64::from(delta),
                    available: u64::from(available),
                });
            }
            if delta == 0 {
                return Ok(current);
            }

            let next = current + delta;
            let expected = (current != 0).then(|| current.to_string());
            match self.store.write(WriteRequest::compare_and_swap(self.key.clone(), expected, next.to_string())).await {
                Ok(_) => {
                    debug_assert!(next > current, "counter must advance: next={next}, current={current}");
                    debug!(key = %self.key, from = current, to = next, "advanced local key counter");
                    return Ok(next);
                }
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                    attempt += 1;
                    if attempt >= MAX_CAS_RETRIES {
                        warn!(key = %self.key, attempts = attempt, "gave up advancing local key counter");
                        return Err(ChannelError::Metadata {
                            source: KeyValueStoreError::Failed {
                                reason: format!("counter {} contended after {attempt} attempts", self.key),
                            },
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(CAS_RETRY_MAX_BACKOFF_MS);
                }
                Err(source) => return Err(ChannelError::Metadata { source }),
            }
        }
    }

    async fn read_current(&self) -> Result<LocalKey> {
        let result = self.store.read(ReadRequest::new(self.key.clone())).await?;
        let Some(raw) = result.value() else {
            return Ok(0);
        };
        match raw.parse::<LocalKey>() {
            Ok(v) if v <= MAX_LOCAL_KEY => Ok(v),
            Ok(v) => Err(ChannelError::CorruptedData {
                key: self.key.clone(),
                reason: format!("value {v} exceeds the local key space"),
            }),
            Err(_) => Err(ChannelError::CorruptedData {
                key: self.key.clone(),
                reason: "not a valid u32".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sable_kv::DeterministicKeyValueStore;

    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn starts_at_zero_and_advances() {
        let store = DeterministicKeyValueStore::new();
        let counter = LocalKeyCounter::open(store, leased_counter_key(NodeKey(1))).await.unwrap();
        assert_eq!(counter.value().await.unwrap(), 0);
        assert_eq!(counter.add(3).await.unwrap(), 3);
        assert_eq!(counter.add(1).await.unwrap(), 4);
        assert_eq!(counter.value().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn reopen_resumes_from_persisted_value() {
        let store = DeterministicKeyValueStore::new();
        let key = leased_counter_key(NodeKey(2));
        let first = LocalKeyCounter::open(store.clone(), key.clone()).await.unwrap();
        first.add(10).await.unwrap();
        drop(first);

        let second = LocalKeyCounter::open(store, key).await.unwrap();
        assert_eq!(second.add(1).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn overflow_leaves_counter_unchanged() {
        let store = DeterministicKeyValueStore::new();
        let counter = LocalKeyCounter::open(store, "c").await.unwrap();
        counter.add(MAX_LOCAL_KEY - 1).await.unwrap();

        let err = counter.add(2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(counter.value().await.unwrap(), MAX_LOCAL_KEY - 1);

        assert_eq!(counter.add(1).await.unwrap(), MAX_LOCAL_KEY);
    }

    #[tokio::test]
    async fn rejects_corrupted_value() {
        let store = DeterministicKeyValueStore::new();
        store.write(WriteRequest::set("c", "abc")).await.unwrap();
        let err = LocalKeyCounter::open(store, "c").await.err().unwrap();
        assert!(matches!(err, ChannelError::CorruptedData { .. }));
    }

    #[tokio::test]
    async fn two_counters_on_one_key_never_overlap() {
        let store = DeterministicKeyValueStore::new();
        let a = Arc::new(LocalKeyCounter::open(store.clone(), "shared").await.unwrap());
        let b = Arc::new(LocalKeyCounter::open(store, "shared").await.unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let counter = if i % 2 == 0 { a.clone() } else { b.clone() };
            handles.push(tokio::spawn(async move { counter.add(2).await.unwrap() }));
        }
        let mut ends = Vec::new();
        for h in handles {
            ends.push(h.await.unwrap());
        }
        ends.sort_unstable();
        ends.dedup();
        assert_eq!(ends.len(), 20);
        assert_eq!(*ends.last().unwrap(), 40);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn adds_are_monotonic(deltas in prop::collection::vec(0u32..=(MAX_LOCAL_KEY / 4), 1..12)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let counter = LocalKeyCounter::open(DeterministicKeyValueStore::new(), "p").await.unwrap();
                let mut expected = 0u32;
                for delta in deltas {
                    match counter.add(delta).await {
                        Ok(value) => {
                            expected += delta;
                            assert_eq!(value, expected);
                        }
                        Err(err) => {
                            assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
                            assert!(expected + delta > MAX_LOCAL_KEY);
                        }
                    }
                    assert_eq!(counter.value().await.unwrap(), expected);
                }
            });
        }
    }

    #[test]
    fn counter_keys() {
        assert_eq!(leased_counter_key(NodeKey(1)), "1.channel.counter.leased");
        assert_eq!(free_counter_key(NodeKey(1)), "1.channel.counter.free");
    }
}
