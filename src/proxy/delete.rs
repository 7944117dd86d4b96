//! Channel deletion.

use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::check_batch_size;
use super::LeaseProxy;
use crate::channel::Channel;
use crate::cluster::NodeKey;
use crate::error::ChannelError;
use crate::error::Result;
use crate::key::Key;
use crate::storage::StorageKey;
use crate::transport::Ack;
use crate::transport::DeleteRequest;

/// Reject keys that cannot name a stored channel.
pub(super) fn check_assigned(field: &str, keys: &[Key]) -> Result<()> {
    match keys.iter().position(|k| !k.is_assigned()) {
        Some(i) => Err(ChannelError::Validation {
            path: format!("{field}[{i}]"),
            reason: format!("{} is not an assigned channel key", keys[i]),
        }),
        None => Ok(()),
    }
}

impl LeaseProxy {
    /// Delete channels by key. Keys with no stored channel are ignored.
    #[instrument(skip(self, keys), fields(host = %self.host, count = keys.len()))]
    pub async fn delete(&self, keys: &[Key], allow_internal: bool) -> Result<()> {
        check_batch_size("keys", keys.len())?;
        check_assigned("keys", keys)?;
        if !allow_internal {
            self.check_not_internal("delete", keys).await?;
        }

        let batch = self.router.batch(keys.iter().copied());
        for (node, keys) in batch.peers {
            self.delete_remote(node, keys, allow_internal).await?;
        }
        if !batch.free.is_empty() {
            self.delete_free(&batch.free).await?;
        }
        if !batch.gateway.is_empty() {
            self.delete_gateway(&batch.gateway).await?;
        }
        Ok(())
    }

    /// Delete every channel whose name is in `names`.
    pub async fn delete_by_name(&self, names: &[String], allow_internal: bool) -> Result<()> {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let keys: Vec<Key> = self.metadata.begin().channels_named(&names).await?.iter().map(Channel::key).collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.delete(&keys, allow_internal).await
    }

    pub(super) async fn handle_delete(&self, request: DeleteRequest) -> Result<Ack> {
        check_assigned("keys", &request.keys)?;
        if !request.allow_internal {
            self.check_not_internal("delete", &request.keys).await?;
        }
        let batch = self.router.batch(request.keys);
        let misrouted: usize = batch.peers.values().map(Vec::len).sum();
        if misrouted > 0 {
            warn!(host = %self.host, count = misrouted, "rejecting misrouted delete");
            return Err(ChannelError::Misrouted {
                node: self.host,
                count: misrouted,
            });
        }
        if !batch.free.is_empty() {
            self.delete_free(&batch.free).await?;
        }
        if !batch.gateway.is_empty() {
            self.delete_gateway(&batch.gateway).await?;
        }
        Ok(Ack)
    }

    pub(super) async fn delete_remote(&self, node: NodeKey, keys: Vec<Key>, allow_internal: bool) -> Result<()> {
        debug!(node = %node, count = keys.len(), "forwarding delete to leaseholder");
        self.call(node, self.transport.delete_client(), DeleteRequest { keys, allow_internal }).await?;
        Ok(())
    }

    /// Fail if any stored channel among `keys` is internal.
    pub(super) async fn check_not_internal(&self, operation: &str, keys: &[Key]) -> Result<()> {
        let names: Vec<String> = self
            .metadata
            .begin()
            .get_channels(keys)
            .await?
            .into_iter()
            .filter(|ch| ch.is_internal)
            .map(|ch| ch.name)
            .collect();
        if names.is_empty() {
            return Ok(());
        }
        Err(ChannelError::InternalChannelProtected {
            operation: operation.to_string(),
            names,
        })
    }

    /// Free channels have no physical storage.
    async fn delete_free(&self, keys: &[Key]) -> Result<()> {
        let mut txn = self.metadata.begin();
        for key in keys {
            txn.delete_channel(*key);
        }
        self.delete_resources(&mut txn, keys).await?;
        txn.commit().await
    }

    /// Physical deletion runs after the metadata deletes are staged and before
    /// they commit. If it fails the records stay in place and the delete can be
    /// retried.
    async fn delete_gateway(&self, keys: &[Key]) -> Result<()> {
        let mut txn = self.metadata.begin();
        for key in keys {
            txn.delete_channel(*key);
        }
        self.delete_resources(&mut txn, keys).await?;

        let storage: Vec<StorageKey> = keys.iter().map(|k| k.storage_key()).collect();
        let mut external = self.external.write().await;
        if let Err(source) = self.ts.delete_channels(&storage).await {
            warn!(error = %source, count = storage.len(), "storage rejected channel delete");
            return Err(ChannelError::StorageOpFailed { source });
        }
        txn.commit().await?;
        let removed = external.remove(keys.iter().copied());
        debug!(deleted = keys.len(), uncounted = removed, "deleted gateway channels");
        Ok(())
    }
}
