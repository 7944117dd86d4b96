//! Transactional access to channel metadata in the cluster store.
//!
//! A [`MetadataTxn`] buffers writes locally, serves reads through the buffer,
//! and applies everything as one atomic batch on commit. Dropping a
//! transaction without committing discards it.

use std::collections::BTreeMap;
use std::sync::Arc;

use sable_kv::BatchOperation;
use sable_kv::KeyValueStore;
use sable_kv::ReadRequest;
use sable_kv::ScanRequest;
use sable_kv::WriteRequest;
use tracing::debug;

use crate::channel::Channel;
use crate::error::Result;
use crate::key::Key;

/// Handle on the metadata namespace.
#[derive(Clone)]
pub struct MetadataStore {
    kv: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl MetadataStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix shared by every channel record.
    pub fn channel_prefix(&self) -> String {
        format!("{}/channel/", self.prefix)
    }

    /// Store key of a channel record. Zero-padded so keys sort numerically.
    pub fn channel_key(&self, key: Key) -> String {
        format!("{}/channel/{:010}", self.prefix, key.0)
    }

    pub fn begin(&self) -> MetadataTxn {
        MetadataTxn {
            store: self.clone(),
            pending: BTreeMap::new(),
        }
    }
}

/// Buffered read-your-writes transaction.
pub struct MetadataTxn {
    store: MetadataStore,
    /// `None` marks a staged delete.
    pending: BTreeMap<String, Option<String>>,
}

impl MetadataTxn {
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(staged) = self.pending.get(key) {
            return Ok(staged.clone());
        }
        let result = self.store.kv.read(ReadRequest::new(key)).await?;
        Ok(result.kv.map(|kv| kv.value))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pending.insert(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.pending.insert(key.into(), None);
    }

    /// All entries under `prefix`, staged writes applied, in key order.
    pub async fn scan(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let mut entries = BTreeMap::new();
        let mut token = None;
        loop {
            let page = self.store.kv.scan(ScanRequest::prefix(prefix).after(token)).await?;
            entries.extend(page.entries.into_iter().map(|e| (e.key, e.value)));
            if !page.is_truncated {
                break;
            }
            token = page.continuation_token;
        }

        for (key, staged) in self.pending.range(prefix.to_string()..).take_while(|(k, _)| k.starts_with(prefix)) {
            match staged {
                Some(value) => entries.insert(key.clone(), value.clone()),
                None => entries.remove(key),
            };
        }
        Ok(entries)
    }

    pub async fn get_channel(&self, key: Key) -> Result<Option<Channel>> {
        match self.get(&self.store.channel_key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stored channels among `keys`, in request order. Missing keys are skipped.
    pub async fn get_channels(&self, keys: &[Key]) -> Result<Vec<Channel>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(ch) = self.get_channel(*key).await? {
                found.push(ch);
            }
        }
        Ok(found)
    }

    /// Every stored channel in ascending key order.
    pub async fn channels(&self) -> Result<Vec<Channel>> {
        self.scan(&self.store.channel_prefix())
            .await?
            .values()
            .map(|raw| Ok(serde_json::from_str::<Channel>(raw)?))
            .collect()
    }

    /// Stored channels whose name is one of `names`.
    pub async fn channels_named(&self, names: &[&str]) -> Result<Vec<Channel>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let all = self.channels().await?;
        Ok(all.into_iter().filter(|ch| names.contains(&ch.name.as_str())).collect())
    }

    pub fn put_channel(&mut self, channel: &Channel) -> Result<()> {
        let value = serde_json::to_string(channel)?;
        let key = self.store.channel_key(channel.key());
        self.set(key, value);
        Ok(())
    }

    pub fn delete_channel(&mut self, key: Key) {
        let key = self.store.channel_key(key);
        self.delete(key);
    }

    /// Number of staged operations.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Apply all staged operations atomically.
    pub async fn commit(self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let count = self.pending.len();
        let operations = self
            .pending
            .into_iter()
            .map(|(key, staged)| match staged {
                Some(value) => BatchOperation::Set { key, value },
                None => BatchOperation::Delete { key },
            })
            .collect();
        self.store.kv.write(WriteRequest::batch(operations)).await?;
        debug!(operations = count, "committed metadata transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sable_kv::DeterministicKeyValueStore;

    use super::*;
    use crate::channel::DataType;
    use crate::cluster::NodeKey;

    fn store() -> MetadataStore {
        MetadataStore::new(DeterministicKeyValueStore::new(), "__test")
    }

    fn channel(node: u16, local: u32, name: &str) -> Channel {
        Channel {
            leaseholder: NodeKey(node),
            local_key: local,
            ..Channel::new_virtual(name, DataType::Float64)
        }
    }

    #[tokio::test]
    async fn reads_see_staged_writes() {
        let store = store();
        let mut txn = store.begin();
        txn.put_channel(&channel(1, 1, "a")).unwrap();
        assert_eq!(txn.get_channel(Key::new(NodeKey(1), 1)).await.unwrap().unwrap().name, "a");

        let other = store.begin();
        assert!(other.get_channel(Key::new(NodeKey(1), 1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_applies_and_drop_discards() {
        let store = store();
        let mut txn = store.begin();
        txn.put_channel(&channel(1, 1, "a")).unwrap();
        txn.commit().await.unwrap();

        let mut aborted = store.begin();
        aborted.delete_channel(Key::new(NodeKey(1), 1));
        drop(aborted);

        let txn = store.begin();
        assert_eq!(txn.channels().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn channels_sorted_numerically_with_staged_deletes() {
        let store = store();
        let mut txn = store.begin();
        for (node, local, name) in [(2, 1, "c"), (1, 10, "b"), (1, 2, "a")] {
            txn.put_channel(&channel(node, local, name)).unwrap();
        }
        txn.commit().await.unwrap();

        let mut txn = store.begin();
        txn.delete_channel(Key::new(NodeKey(1), 10));
        let names: Vec<String> = txn.channels().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "c"]);

        let named = txn.channels_named(&["c", "zzz"]).await.unwrap();
        assert_eq!(named.len(), 1);
    }

    #[tokio::test]
    async fn empty_commit_is_noop() {
        store().begin().commit().await.unwrap();
    }
}
