//! Physical time-series storage seam.
//!
//! The channel layer only needs to create, delete, rename and look up
//! storage channels. [`MemoryTsStore`] implements the same checks the real
//! engine enforces: an index with live dependents and a channel with open
//! writers cannot be deleted.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

use crate::channel::DataType;

/// Raw channel key as understood by the storage engine.
pub type StorageKey = u32;

/// Channel description handed to the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChannel {
    pub key: StorageKey,
    pub name: String,
    pub data_type: DataType,
    pub is_index: bool,
    /// Key of the index channel. Equal to `key` for index channels, zero when unindexed.
    pub index: StorageKey,
    pub is_virtual: bool,
}

/// Errors raised by the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TsStoreError {
    /// The channel does not exist.
    #[snafu(display("channel {key} not found"))]
    ChannelNotFound { key: StorageKey },

    /// A channel with the key already exists.
    #[snafu(display("channel {key} already exists"))]
    ChannelExists { key: StorageKey },

    /// The channel's index is missing or is not an index.
    #[snafu(display("index {index} for channel {key} not found"))]
    IndexNotFound { key: StorageKey, index: StorageKey },

    /// The channel has open writers or iterators.
    #[snafu(display("cannot delete channel {key}: {count} unclosed writers/iterators"))]
    UnclosedHandles { key: StorageKey, count: usize },

    /// The index still has dependent channels.
    #[snafu(display("cannot delete index {index}: channel {dependent} depends on it"))]
    IndexInUse { index: StorageKey, dependent: StorageKey },

    /// Any other engine failure.
    #[snafu(display("storage failure: {reason}"))]
    Failed { reason: String },
}

/// Operations the channel layer performs on physical storage.
#[async_trait]
pub trait TsStore: Send + Sync {
    async fn create_channels(&self, channels: &[StorageChannel]) -> Result<(), TsStoreError>;

    /// Delete channels. Missing keys are ignored.
    async fn delete_channels(&self, keys: &[StorageKey]) -> Result<(), TsStoreError>;

    async fn rename_channels(&self, keys: &[StorageKey], names: &[String]) -> Result<(), TsStoreError>;

    async fn retrieve_channels(&self, keys: &[StorageKey]) -> Result<Vec<StorageChannel>, TsStoreError>;
}

#[async_trait]
impl<T: TsStore + ?Sized> TsStore for Arc<T> {
    async fn create_channels(&self, channels: &[StorageChannel]) -> Result<(), TsStoreError> {
        (**self).create_channels(channels).await
    }

    async fn delete_channels(&self, keys: &[StorageKey]) -> Result<(), TsStoreError> {
        (**self).delete_channels(keys).await
    }

    async fn rename_channels(&self, keys: &[StorageKey], names: &[String]) -> Result<(), TsStoreError> {
        (**self).rename_channels(keys, names).await
    }

    async fn retrieve_channels(&self, keys: &[StorageKey]) -> Result<Vec<StorageChannel>, TsStoreError> {
        (**self).retrieve_channels(keys).await
    }
}

#[derive(Debug, Default)]
struct Entry {
    channel: Option<StorageChannel>,
    open_writers: usize,
}

/// In-memory storage engine used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryTsStore {
    channels: Mutex<BTreeMap<StorageKey, Entry>>,
    fail_next: Mutex<Option<String>>,
}

impl MemoryTsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a writer on a channel. The channel cannot be deleted while the
    /// returned guard is alive.
    pub fn open_writer(self: &Arc<Self>, key: StorageKey) -> Result<WriterGuard, TsStoreError> {
        let mut channels = self.channels.lock();
        match channels.get_mut(&key) {
            Some(entry) if entry.channel.is_some() => {
                entry.open_writers += 1;
                Ok(WriterGuard {
                    store: Arc::clone(self),
                    key,
                })
            }
            _ => Err(TsStoreError::ChannelNotFound { key }),
        }
    }

    /// Make the next mutating call fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }

    pub fn contains(&self, key: StorageKey) -> bool {
        self.channels.lock().get(&key).is_some_and(|e| e.channel.is_some())
    }

    pub fn len(&self) -> usize {
        self.channels.lock().values().filter(|e| e.channel.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_failure(&self) -> Result<(), TsStoreError> {
        match self.fail_next.lock().take() {
            Some(reason) => Err(TsStoreError::Failed { reason }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TsStore for MemoryTsStore {
    async fn create_channels(&self, channels: &[StorageChannel]) -> Result<(), TsStoreError> {
        self.take_failure()?;
        let mut existing = self.channels.lock();

        for (i, ch) in channels.iter().enumerate() {
            if existing.get(&ch.key).is_some_and(|e| e.channel.is_some()) {
                return Err(TsStoreError::ChannelExists { key: ch.key });
            }
            if ch.is_index || ch.is_virtual || ch.index == 0 {
                continue;
            }
            let in_store = existing.get(&ch.index).and_then(|e| e.channel.as_ref()).is_some_and(|c| c.is_index);
            let in_batch = channels[..i].iter().chain(&channels[i + 1..]).any(|c| c.key == ch.index && c.is_index);
            if !in_store && !in_batch {
                return Err(TsStoreError::IndexNotFound {
                    key: ch.key,
                    index: ch.index,
                });
            }
        }

        for ch in channels {
            existing.entry(ch.key).or_default().channel = Some(ch.clone());
        }
        Ok(())
    }

    async fn delete_channels(&self, keys: &[StorageKey]) -> Result<(), TsStoreError> {
        self.take_failure()?;
        let mut existing = self.channels.lock();

        for &key in keys {
            let Some(entry) = existing.get(&key) else { continue };
            let Some(ch) = entry.channel.as_ref() else { continue };
            if entry.open_writers > 0 {
                return Err(TsStoreError::UnclosedHandles {
                    key,
                    count: entry.open_writers,
                });
            }
            if ch.is_index {
                let dependent = existing
                    .values()
                    .filter_map(|e| e.channel.as_ref())
                    .find(|c| c.index == key && c.key != key && !keys.contains(&c.key));
                if let Some(dependent) = dependent {
                    return Err(TsStoreError::IndexInUse {
                        index: key,
                        dependent: dependent.key,
                    });
                }
            }
        }

        for key in keys {
            existing.remove(key);
        }
        Ok(())
    }

    async fn rename_channels(&self, keys: &[StorageKey], names: &[String]) -> Result<(), TsStoreError> {
        self.take_failure()?;
        let mut existing = self.channels.lock();

        if let Some(&key) = keys.iter().find(|k| !existing.get(k).is_some_and(|e| e.channel.is_some())) {
            return Err(TsStoreError::ChannelNotFound { key });
        }
        for (key, name) in keys.iter().zip(names) {
            if let Some(ch) = existing.get_mut(key).and_then(|e| e.channel.as_mut()) {
                ch.name = name.clone();
            }
        }
        Ok(())
    }

    async fn retrieve_channels(&self, keys: &[StorageKey]) -> Result<Vec<StorageChannel>, TsStoreError> {
        let existing = self.channels.lock();
        keys.iter()
            .map(|key| {
                existing
                    .get(key)
                    .and_then(|e| e.channel.clone())
                    .ok_or(TsStoreError::ChannelNotFound { key: *key })
            })
            .collect()
    }
}

/// Open writer on a [`MemoryTsStore`] channel.
#[derive(Debug)]
pub struct WriterGuard {
    store: Arc<MemoryTsStore>,
    key: StorageKey,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.store.channels.lock().get_mut(&self.key) {
            entry.open_writers = entry.open_writers.saturating_sub(1);
        }
    }
}
