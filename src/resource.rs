//! Resource-graph registration for channels.
//!
//! Every external channel is registered as a resource and, unless the caller
//! opts out, linked as a child of the channel group. Writes are staged into
//! the caller's metadata transaction so they commit or abort with it.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::key::Key;
use crate::metadata::MetadataTxn;

/// Identifier of a node in the resource graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: String,
    pub key: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn channel(key: Key) -> Self {
        Self::new("channel", key.0.to_string())
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new("group", name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Directed edge between two resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: ResourceId,
    pub kind: String,
    pub to: ResourceId,
}

/// Relationship kind linking a group to its members.
pub const PARENT_OF: &str = "parent_of";

/// Staged mutations on the resource graph.
#[async_trait]
pub trait ResourceGraph: Send + Sync {
    async fn define_resources(&self, txn: &mut MetadataTxn, ids: &[ResourceId]) -> Result<()>;

    /// Delete resources together with every relationship touching them.
    async fn delete_resources(&self, txn: &mut MetadataTxn, ids: &[ResourceId]) -> Result<()>;

    async fn define_parent_of(&self, txn: &mut MetadataTxn, parent: &ResourceId, children: &[ResourceId])
    -> Result<()>;
}

/// Resource graph persisted in the metadata namespace.
#[derive(Debug, Clone, Default)]
pub struct KvResourceGraph;

impl KvResourceGraph {
    pub fn new() -> Self {
        Self
    }

    fn resource_key(txn: &MetadataTxn, id: &ResourceId) -> String {
        format!("{}/resource/{id}", txn.store().prefix())
    }

    fn relationship_prefix(txn: &MetadataTxn) -> String {
        format!("{}/relationship/", txn.store().prefix())
    }

    fn relationship_key(txn: &MetadataTxn, rel: &Relationship) -> String {
        format!("{}{}/{}/{}", Self::relationship_prefix(txn), rel.from, rel.kind, rel.to)
    }

    /// Look up a resource.
    pub async fn retrieve(&self, txn: &MetadataTxn, id: &ResourceId) -> Result<Option<ResourceId>> {
        match txn.get(&Self::resource_key(txn, id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Relationships whose source is `from`.
    pub async fn relationships_from(&self, txn: &MetadataTxn, from: &ResourceId) -> Result<Vec<Relationship>> {
        let prefix = format!("{}{from}/", Self::relationship_prefix(txn));
        txn.scan(&prefix)
            .await?
            .values()
            .map(|raw| Ok(serde_json::from_str::<Relationship>(raw)?))
            .collect()
    }

    /// Members of `parent`.
    pub async fn children(&self, txn: &MetadataTxn, parent: &ResourceId) -> Result<Vec<ResourceId>> {
        Ok(self
            .relationships_from(txn, parent)
            .await?
            .into_iter()
            .filter(|rel| rel.kind == PARENT_OF)
            .map(|rel| rel.to)
            .collect())
    }
}

#[async_trait]
impl ResourceGraph for KvResourceGraph {
    async fn define_resources(&self, txn: &mut MetadataTxn, ids: &[ResourceId]) -> Result<()> {
        for id in ids {
            let value = serde_json::to_string(id)?;
            let key = Self::resource_key(txn, id);
            txn.set(key, value);
        }
        Ok(())
    }

    async fn delete_resources(&self, txn: &mut MetadataTxn, ids: &[ResourceId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let relationships = txn.scan(&Self::relationship_prefix(txn)).await?;
        for (key, raw) in relationships {
            let rel: Relationship = serde_json::from_str(&raw)?;
            if ids.contains(&rel.from) || ids.contains(&rel.to) {
                txn.delete(key);
            }
        }
        for id in ids {
            let key = Self::resource_key(txn, id);
            txn.delete(key);
        }
        Ok(())
    }

    async fn define_parent_of(
        &self,
        txn: &mut MetadataTxn,
        parent: &ResourceId,
        children: &[ResourceId],
    ) -> Result<()> {
        for child in children {
            let rel = Relationship {
                from: parent.clone(),
                kind: PARENT_OF.to_string(),
                to: child.clone(),
            };
            let value = serde_json::to_string(&rel)?;
            let key = Self::relationship_key(txn, &rel);
            txn.set(key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sable_kv::DeterministicKeyValueStore;

    use super::*;
    use crate::cluster::NodeKey;
    use crate::metadata::MetadataStore;

    #[tokio::test]
    async fn define_link_and_delete() {
        let store = MetadataStore::new(DeterministicKeyValueStore::new(), "__test");
        let graph = KvResourceGraph::new();
        let group = ResourceId::group("channels");
        let a = ResourceId::channel(Key::new(NodeKey(1), 1));
        let b = ResourceId::channel(Key::new(NodeKey(1), 2));

        let mut txn = store.begin();
        graph.define_resources(&mut txn, &[group.clone(), a.clone(), b.clone()]).await.unwrap();
        graph.define_parent_of(&mut txn, &group, &[a.clone(), b.clone()]).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin();
        assert_eq!(graph.children(&txn, &group).await.unwrap().len(), 2);
        graph.delete_resources(&mut txn, &[a.clone()]).await.unwrap();
        assert!(graph.retrieve(&txn, &a).await.unwrap().is_none());
        assert_eq!(graph.children(&txn, &group).await.unwrap(), vec![b]);
    }

    #[test]
    fn display() {
        assert_eq!(ResourceId::channel(Key(5)).to_string(), "channel:5");
        assert_eq!(ResourceId::group("channels").to_string(), "group:channels");
    }
}
