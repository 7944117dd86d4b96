//! Quota accounting for external, non-virtual channels.
//!
//! Readers take the read lock for counts and membership. Mutating paths hold
//! the write guard across the storage step the update depends on, and only
//! change the set once that step has succeeded.

use tokio::sync::RwLock;
use tokio::sync::RwLockWriteGuard;

use crate::error::ChannelError;
use crate::error::Result;
use crate::integer_set::IntegerSet;
use crate::key::Key;

pub(crate) struct ExternalChannelSet {
    keys: RwLock<IntegerSet<Key>>,
    limit: u32,
}

impl ExternalChannelSet {
    pub(crate) fn new(keys: IntegerSet<Key>, limit: u32) -> Self {
        Self {
            keys: RwLock::new(keys),
            limit,
        }
    }

    pub(crate) async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub(crate) async fn contains(&self, key: Key) -> bool {
        self.keys.read().await.contains(key)
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, IntegerSet<Key>> {
        self.keys.write().await
    }

    /// Fail if adding `added` and removing `removed` members would exceed the limit.
    pub(crate) fn check_capacity(&self, keys: &IntegerSet<Key>, added: usize, removed: usize) -> Result<()> {
        let after = (keys.len() + added).saturating_sub(removed);
        let limit = self.limit as usize;
        if after > limit {
            return Err(ChannelError::CapacityExceeded {
                space: "external channels".to_string(),
                requested: added as u64,
                available: limit.saturating_sub(keys.len().saturating_sub(removed)) as u64,
            });
        }
        Ok(())
    }
}
