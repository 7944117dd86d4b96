//! Channel creation.

use sable_kv::KeyValueStore;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::check_batch_size;
use super::LeaseProxy;
use crate::channel::Channel;
use crate::cluster::NodeKey;
use crate::counter::LocalKeyCounter;
use crate::error::ChannelError;
use crate::error::Result;
use crate::error::StorageOpFailedSnafu;
use crate::index;
use crate::key::Key;
use crate::metadata::MetadataTxn;
use crate::names::validate_batch_names;
use crate::names::ProposedName;
use crate::router::reassemble;
use crate::storage::StorageChannel;
use crate::storage::StorageKey;
use crate::transport::CreateMessage;
use crate::transport::CreateOptions;

/// Stored channels removed to make room for a same-named replacement.
#[derive(Debug, Default)]
struct Overwritten {
    /// Physical channels on this node to delete before commit.
    storage: Vec<StorageKey>,
    /// Keys leaving the external channel count.
    external: Vec<Key>,
}

type Positioned = Vec<(usize, Channel)>;

fn unzip(entries: Positioned) -> (Vec<usize>, Vec<Channel>) {
    entries.into_iter().unzip()
}

fn zip(positions: Vec<usize>, channels: Vec<Channel>) -> Positioned {
    positions.into_iter().zip(channels).collect()
}

fn reassemble_channels(total: usize, parts: Positioned) -> Result<Vec<Channel>> {
    reassemble(total, parts).ok_or_else(|| ChannelError::Validation {
        path: "channels".to_string(),
        reason: "create response is missing channels".to_string(),
    })
}

fn require_names(channels: &[Channel]) -> Result<()> {
    match channels.iter().position(|ch| ch.name.is_empty()) {
        Some(i) => Err(ChannelError::InvalidName {
            path: format!("channels[{i}].name"),
            name: String::new(),
            reason: "name is required".to_string(),
        }),
        None => Ok(()),
    }
}

impl LeaseProxy {
    /// Create channels, assigning keys in their owners' key spaces.
    ///
    /// Returns the channels in request order followed by any index channels
    /// provisioned for new calculated channels.
    #[instrument(skip(self, channels), fields(host = %self.host, count = channels.len()))]
    pub async fn create(&self, channels: Vec<Channel>, opts: CreateOptions) -> Result<Vec<Channel>> {
        check_batch_size("channels", channels.len())?;
        let channels = index::provision(self.prepare(channels).await?);
        if self.config.validate_names {
            self.validate_create_names(&channels, opts).await?;
        }

        let total = channels.len();
        let batch = self.router.batch(channels.into_iter().enumerate());
        let mut done = Vec::with_capacity(total);

        for (node, entries) in batch.peers {
            done.extend(self.create_remote(node, entries, opts).await?);
        }
        if !batch.free.is_empty() {
            if self.host.is_bootstrapper() {
                done.extend(self.create_free(batch.free, opts).await?);
            } else {
                done.extend(self.create_remote(NodeKey::BOOTSTRAPPER, batch.free, opts).await?);
            }
        }
        done.extend(self.create_gateway(batch.gateway, opts).await?);

        reassemble_channels(total, done)
    }

    /// Serve a create forwarded by another node. Entries were prepared and
    /// validated by the sender and must all be owned here.
    pub(super) async fn handle_create(&self, msg: CreateMessage) -> Result<CreateMessage> {
        let total = msg.channels.len();
        let batch = self.router.batch(msg.channels.into_iter().enumerate());
        let misrouted: usize = batch.peers.values().map(Vec::len).sum();
        if misrouted > 0 {
            warn!(host = %self.host, count = misrouted, "rejecting misrouted create");
            return Err(ChannelError::Misrouted {
                node: self.host,
                count: misrouted,
            });
        }

        let mut done = Vec::with_capacity(total);
        if !batch.free.is_empty() {
            done.extend(self.create_free(batch.free, msg.opts).await?);
        }
        done.extend(self.create_gateway(batch.gateway, msg.opts).await?);
        Ok(CreateMessage {
            channels: reassemble_channels(total, done)?,
            opts: msg.opts,
        })
    }

    /// Default leases, force calculated channels into the free space, and
    /// clear keys on channels that must be re-created.
    async fn prepare(&self, channels: Vec<Channel>) -> Result<Vec<Channel>> {
        let mut prepared = Vec::with_capacity(channels.len());
        for (i, mut ch) in channels.into_iter().enumerate() {
            if ch.leaseholder.is_unset() {
                ch.leaseholder = self.host;
            }
            if ch.is_calculated() {
                index::check_calculated(i, &ch)?;
                ch.leaseholder = NodeKey::FREE;
                ch.is_virtual = true;
                if let Some(analyzer) = &self.analyzer {
                    ch.data_type = analyzer.analyze(&ch).await?;
                }
            } else if ch.local_key != 0 {
                ch.local_key = 0;
            }
            prepared.push(ch);
        }
        Ok(prepared)
    }

    async fn validate_create_names(&self, channels: &[Channel], opts: CreateOptions) -> Result<()> {
        let proposed: Vec<ProposedName<'_>> = channels
            .iter()
            .map(|ch| ProposedName {
                key: ch.key(),
                name: &ch.name,
            })
            .collect();
        let names: Vec<&str> = channels.iter().map(|ch| ch.name.as_str()).collect();
        let existing = self.metadata.begin().channels_named(&names).await?;
        validate_batch_names("channels", &proposed, &existing, opts.tolerates_existing_names())
    }

    async fn create_remote(&self, node: NodeKey, entries: Positioned, opts: CreateOptions) -> Result<Positioned> {
        let (positions, channels) = unzip(entries);
        debug!(node = %node, count = channels.len(), "forwarding create to leaseholder");
        let response = self.call(node, self.transport.create_client(), CreateMessage { channels, opts }).await?;
        if response.channels.len() != positions.len() {
            return Err(ChannelError::Validation {
                path: "channels".to_string(),
                reason: format!(
                    "node {node} returned {} channels for {} requested",
                    response.channels.len(),
                    positions.len()
                ),
            });
        }
        Ok(zip(positions, response.channels))
    }

    async fn create_free(&self, entries: Positioned, opts: CreateOptions) -> Result<Positioned> {
        let (positions, channels) = unzip(entries);
        let channels = self.create_free_local(channels, opts).await?;
        Ok(zip(positions, channels))
    }

    async fn create_gateway(&self, entries: Positioned, opts: CreateOptions) -> Result<Positioned> {
        if entries.is_empty() {
            return Ok(entries);
        }
        let (positions, channels) = unzip(entries);
        let channels = self.create_gateway_local(channels, opts).await?;
        Ok(zip(positions, channels))
    }

    /// Create or update channels in the free space. Bootstrapper only.
    async fn create_free_local(&self, channels: Vec<Channel>, opts: CreateOptions) -> Result<Vec<Channel>> {
        let Some(counter) = self.free_counter.as_ref() else {
            return Err(ChannelError::Configuration {
                reason: format!("node {} cannot assign free keys; only the bootstrapper can", self.host),
            });
        };
        require_names(&channels)?;

        let mut txn = self.metadata.begin();
        let channels = self.update_existing_free(&mut txn, channels, opts).await?;
        let (channels, overwritten) = if opts.overwrite_if_name_exists_and_different_properties {
            self.delete_overwritten(&mut txn, channels).await?
        } else {
            (channels, Overwritten::default())
        };
        let (channels, created) = assign_keys(&txn, channels, counter, opts.retrieve_if_name_exists).await?;

        let (channels, linked) = index::link(channels);
        for &i in linked.iter().filter(|i| !created.contains(*i)) {
            debug!(channel = %channels[i].name, "linking existing calculated channel to its index");
            txn.put_channel(&channels[i])?;
        }

        let new: Vec<&Channel> = created.iter().map(|&i| &channels[i]).collect();
        for ch in &new {
            txn.put_channel(ch)?;
        }
        self.define_resources(&mut txn, &new, opts).await?;

        if overwritten.storage.is_empty() {
            txn.commit().await?;
        } else {
            let mut external = self.external.write().await;
            self.delete_overwritten_storage(&overwritten).await?;
            txn.commit().await?;
            external.remove(overwritten.external.iter().copied());
        }
        debug!(created = new.len(), "created free channels");
        Ok(channels)
    }

    /// Apply name and expression changes to free channels that already have keys.
    async fn update_existing_free(
        &self,
        txn: &mut MetadataTxn,
        mut channels: Vec<Channel>,
        opts: CreateOptions,
    ) -> Result<Vec<Channel>> {
        let mut missing = Vec::new();
        for ch in channels.iter_mut().filter(|ch| ch.local_key != 0) {
            let Some(stored) = txn.get_channel(ch.key()).await? else {
                missing.push(ch.key().to_string());
                continue;
            };
            if opts.retrieve_if_name_exists {
                *ch = stored;
                continue;
            }
            let mut updated = stored;
            updated.name = ch.name.clone();
            if updated.is_calculated() && ch.is_calculated() {
                updated.expression = ch.expression.clone();
                updated.requires = ch.requires.clone();
            }
            txn.put_channel(&updated)?;
            *ch = updated;
        }
        if !missing.is_empty() {
            return Err(ChannelError::NotFound {
                what: "channels".to_string(),
                missing,
            });
        }
        Ok(channels)
    }

    /// Create channels leased to this node.
    async fn create_gateway_local(&self, channels: Vec<Channel>, opts: CreateOptions) -> Result<Vec<Channel>> {
        require_names(&channels)?;

        let mut txn = self.metadata.begin();
        let (channels, overwritten) = if opts.overwrite_if_name_exists_and_different_properties {
            self.delete_overwritten(&mut txn, channels).await?
        } else {
            (channels, Overwritten::default())
        };
        let (channels, created) =
            assign_keys(&txn, channels, &self.leased_counter, opts.retrieve_if_name_exists).await?;

        let new: Vec<&Channel> = created.iter().map(|&i| &channels[i]).collect();
        for ch in &new {
            txn.put_channel(ch)?;
        }
        self.define_resources(&mut txn, &new, opts).await?;

        let storage: Vec<StorageChannel> = new.iter().map(|ch| ch.storage()).collect();
        let counted: Vec<Key> = new.iter().filter(|ch| ch.is_external_non_virtual()).map(|ch| ch.key()).collect();

        let mut external = self.external.write().await;
        self.external.check_capacity(&external, counted.len(), overwritten.external.len())?;

        if !storage.is_empty() {
            self.ts.create_channels(&storage).await.context(StorageOpFailedSnafu)?;
        }
        let created_keys: Vec<StorageKey> = storage.iter().map(|ch| ch.key).collect();
        if let Err(err) = self.delete_overwritten_storage(&overwritten).await {
            self.discard_storage(&created_keys).await;
            return Err(err);
        }
        if let Err(err) = txn.commit().await {
            self.discard_storage(&created_keys).await;
            return Err(err);
        }
        external.insert(counted);
        external.remove(overwritten.external.iter().copied());
        drop(external);

        debug!(created = created_keys.len(), "created gateway channels");
        Ok(channels)
    }

    /// Stage deletion of stored channels that share a name with an incoming
    /// channel but differ in properties. Identical stored channels replace the
    /// incoming entry so their key is reused.
    async fn delete_overwritten(
        &self,
        txn: &mut MetadataTxn,
        mut channels: Vec<Channel>,
    ) -> Result<(Vec<Channel>, Overwritten)> {
        let names: Vec<&str> = channels.iter().map(|ch| ch.name.as_str()).collect();
        let existing = txn.channels_named(&names).await?;

        let mut stale = Vec::new();
        for stored in existing {
            let Some(i) = channels.iter().position(|ch| ch.name == stored.name && ch.key() != stored.key()) else {
                continue;
            };
            if channels[i].has_same_properties(&stored) {
                channels[i] = stored;
            } else {
                stale.push(stored);
            }
        }
        if stale.is_empty() {
            return Ok((channels, Overwritten::default()));
        }
        info!(count = stale.len(), "overwriting channels with different properties");

        let batch = self.router.batch(stale);
        for (node, remote) in batch.peers {
            let keys = remote.iter().map(Channel::key).collect();
            self.delete_remote(node, keys, true).await?;
        }

        let mut overwritten = Overwritten::default();
        let mut local_keys = Vec::with_capacity(batch.free.len() + batch.gateway.len());
        for ch in &batch.free {
            txn.delete_channel(ch.key());
            local_keys.push(ch.key());
        }
        for ch in &batch.gateway {
            txn.delete_channel(ch.key());
            local_keys.push(ch.key());
            overwritten.storage.push(ch.key().storage_key());
            if ch.is_external_non_virtual() {
                overwritten.external.push(ch.key());
            }
        }
        self.delete_resources(txn, &local_keys).await?;
        Ok((channels, overwritten))
    }

    async fn delete_overwritten_storage(&self, overwritten: &Overwritten) -> Result<()> {
        if overwritten.storage.is_empty() {
            return Ok(());
        }
        self.ts.delete_channels(&overwritten.storage).await.map_err(|source| {
            warn!(error = %source, "failed to delete storage of overwritten channels");
            ChannelError::StorageOpFailed { source }
        })
    }

    /// Best-effort removal of storage created by a step that did not commit.
    async fn discard_storage(&self, keys: &[StorageKey]) {
        if keys.is_empty() {
            return;
        }
        if let Err(error) = self.ts.delete_channels(keys).await {
            warn!(%error, count = keys.len(), "failed to discard storage of uncommitted channels");
        }
    }
}

/// Substitute stored same-named channels when requested, then assign
/// sequential keys to everything still unkeyed.
///
/// Returns the channels and the positions that received new keys.
async fn assign_keys(
    txn: &MetadataTxn,
    mut channels: Vec<Channel>,
    counter: &LocalKeyCounter<dyn KeyValueStore>,
    retrieve_if_name_exists: bool,
) -> Result<(Vec<Channel>, Vec<usize>)> {
    if retrieve_if_name_exists {
        let names: Vec<&str> = channels.iter().map(|ch| ch.name.as_str()).collect();
        for stored in txn.channels_named(&names).await? {
            if let Some(i) = channels.iter().position(|ch| ch.name == stored.name) {
                channels[i] = stored;
            }
        }
    }

    let pending = channels.iter().filter(|ch| ch.local_key == 0).count();
    let mut created = Vec::with_capacity(pending);
    let mut next = if pending > 0 {
        let requested = u32::try_from(pending).map_err(|_| ChannelError::CapacityExceeded {
            space: counter.key().to_string(),
            requested: pending as u64,
            available: 0,
        })?;
        counter.add(requested).await? - requested
    } else {
        0
    };

    for (i, ch) in channels.iter_mut().enumerate() {
        if ch.local_key == 0 {
            next += 1;
            ch.local_key = next;
            created.push(i);
        }
        if ch.is_index {
            ch.local_index = ch.local_key;
        }
    }
    debug!(counter = counter.key(), assigned = created.len(), "assigned local keys");
    Ok((channels, created))
}
