//! Channel renaming.

use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::check_batch_size;
use super::delete::check_assigned;
use super::LeaseProxy;
use crate::channel::Channel;
use crate::cluster::NodeKey;
use crate::error::ChannelError;
use crate::error::Result;
use crate::key::Key;
use crate::names::validate_batch_names;
use crate::names::ProposedName;
use crate::router::RenameEntry;
use crate::storage::StorageKey;
use crate::transport::Ack;
use crate::transport::RenameRequest;

/// Apply a new name to a stored channel.
fn rename_channel(mut channel: Channel, name: &str, allow_internal: bool) -> Result<Channel> {
    if channel.is_internal && !allow_internal {
        return Err(ChannelError::InternalChannelProtected {
            operation: "rename".to_string(),
            names: vec![channel.name],
        });
    }
    channel.name = name.to_string();
    Ok(channel)
}

fn unzip(entries: Vec<RenameEntry>) -> (Vec<Key>, Vec<String>) {
    entries.into_iter().map(|e| (e.key, e.name)).unzip()
}

impl LeaseProxy {
    /// Rename channels. `keys` and `names` pair up by position.
    #[instrument(skip(self, keys, names), fields(host = %self.host, count = keys.len()))]
    pub async fn rename(&self, keys: &[Key], names: &[String], allow_internal: bool) -> Result<()> {
        if keys.len() != names.len() {
            return Err(ChannelError::KeysNamesMismatch {
                keys: keys.len(),
                names: names.len(),
            });
        }
        check_batch_size("keys", keys.len())?;
        check_assigned("keys", keys)?;
        self.validate_rename_names(keys, names).await?;

        let entries = keys.iter().zip(names).map(|(key, name)| RenameEntry {
            key: *key,
            name: name.clone(),
        });
        let batch = self.router.batch(entries);
        for (node, entries) in batch.peers {
            let (keys, names) = unzip(entries);
            self.rename_remote(node, keys, names, allow_internal).await?;
        }
        if !batch.free.is_empty() {
            self.rename_local(batch.free, allow_internal, false).await?;
        }
        if !batch.gateway.is_empty() {
            self.rename_local(batch.gateway, allow_internal, true).await?;
        }
        Ok(())
    }

    pub(super) async fn handle_rename(&self, request: RenameRequest) -> Result<Ack> {
        if request.keys.len() != request.names.len() {
            return Err(ChannelError::KeysNamesMismatch {
                keys: request.keys.len(),
                names: request.names.len(),
            });
        }
        let entries = request.keys.into_iter().zip(request.names).map(|(key, name)| RenameEntry { key, name });
        let batch = self.router.batch(entries);
        let misrouted: usize = batch.peers.values().map(Vec::len).sum();
        if misrouted > 0 {
            warn!(host = %self.host, count = misrouted, "rejecting misrouted rename");
            return Err(ChannelError::Misrouted {
                node: self.host,
                count: misrouted,
            });
        }
        if !batch.free.is_empty() {
            self.rename_local(batch.free, request.allow_internal, false).await?;
        }
        if !batch.gateway.is_empty() {
            self.rename_local(batch.gateway, request.allow_internal, true).await?;
        }
        Ok(Ack)
    }

    async fn validate_rename_names(&self, keys: &[Key], names: &[String]) -> Result<()> {
        let proposed: Vec<ProposedName<'_>> =
            keys.iter().zip(names).map(|(key, name)| ProposedName { key: *key, name }).collect();
        let lookup: Vec<&str> = names.iter().map(String::as_str).collect();
        let existing = self.metadata.begin().channels_named(&lookup).await?;
        validate_batch_names("names", &proposed, &existing, false)
    }

    async fn rename_remote(
        &self,
        node: NodeKey,
        keys: Vec<Key>,
        names: Vec<String>,
        allow_internal: bool,
    ) -> Result<()> {
        debug!(node = %node, count = keys.len(), "forwarding rename to leaseholder");
        self.call(node, self.transport.rename_client(), RenameRequest {
            keys,
            names,
            allow_internal,
        })
        .await?;
        Ok(())
    }

    /// Rename stored records, and the physical channels when `in_storage` is set.
    async fn rename_local(&self, entries: Vec<RenameEntry>, allow_internal: bool, in_storage: bool) -> Result<()> {
        let mut txn = self.metadata.begin();
        let mut missing = Vec::new();
        for entry in &entries {
            match txn.get_channel(entry.key).await? {
                Some(stored) => {
                    let renamed = rename_channel(stored, &entry.name, allow_internal)?;
                    txn.put_channel(&renamed)?;
                }
                None => missing.push(entry.key.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(ChannelError::NotFound {
                what: "channels".to_string(),
                missing,
            });
        }

        let (keys, names) = unzip(entries);
        txn.commit().await?;
        if in_storage {
            // Metadata is already renamed. Repeating the rename brings storage in line.
            let storage: Vec<StorageKey> = keys.iter().map(|k| k.storage_key()).collect();
            self.ts.rename_channels(&storage, &names).await.map_err(|source| {
                warn!(error = %source, count = storage.len(), "failed to rename storage after metadata commit");
                ChannelError::StorageOpFailed { source }
            })?;
        }
        debug!(renamed = keys.len(), "renamed channels");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DataType;
    use crate::error::ErrorKind;

    #[test]
    fn internal_channels_need_permission() {
        let ch = Channel {
            is_internal: true,
            ..Channel::new_virtual("sy_control", DataType::String)
        };
        let err = rename_channel(ch.clone(), "other", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalChannelProtected);
        assert_eq!(rename_channel(ch, "other", true).unwrap().name, "other");
    }
}
