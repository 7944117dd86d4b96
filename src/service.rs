//! Channel service façade.
//!
//! [`Service`] owns a [`LeaseProxy`] and hands out short-lived [`Writer`] and
//! [`Retrieve`] handles. Reads go straight to the cluster metadata store, so
//! any node can answer them regardless of lease.

use std::sync::Arc;

use tracing::info;

use crate::channel::Channel;
use crate::cluster::NodeKey;
use crate::config::ServiceConfig;
use crate::constants::CHANNEL_GROUP_NAME;
use crate::error::ChannelError;
use crate::error::Result;
use crate::key::Key;
use crate::metadata::MetadataStore;
use crate::proxy::LeaseProxy;
use crate::resource::ResourceId;
use crate::transport::CreateOptions;

/// Entry point for channel reads and writes on one node.
pub struct Service {
    proxy: Arc<LeaseProxy>,
    group: Option<ResourceId>,
}

impl Service {
    /// Validate the configuration, define the channel group resource and open
    /// the lease proxy.
    pub async fn open(config: ServiceConfig) -> Result<Arc<Self>> {
        config.channel.validate().map_err(|e| ChannelError::Configuration { reason: e.to_string() })?;

        let group = match &config.resources {
            Some(graph) => {
                let group = ResourceId::group(CHANNEL_GROUP_NAME);
                let metadata = MetadataStore::new(Arc::clone(&config.metadata), config.channel.key_prefix.clone());
                let mut txn = metadata.begin();
                graph.define_resources(&mut txn, std::slice::from_ref(&group)).await?;
                txn.commit().await?;
                Some(group)
            }
            None => None,
        };

        let proxy = LeaseProxy::open(config, group.clone()).await?;
        info!(host = %proxy.host(), "channel service ready");
        Ok(Arc::new(Self { proxy, group }))
    }

    pub fn host(&self) -> NodeKey {
        self.proxy.host()
    }

    /// Resource every external channel is linked under, if a graph is configured.
    pub fn group(&self) -> Option<&ResourceId> {
        self.group.as_ref()
    }

    pub fn proxy(&self) -> &Arc<LeaseProxy> {
        &self.proxy
    }

    pub async fn external_count(&self) -> usize {
        self.proxy.external_count().await
    }

    pub fn writer(&self) -> Writer {
        Writer {
            proxy: Arc::clone(&self.proxy),
            allow_internal: false,
        }
    }

    pub fn retrieve(&self) -> Retrieve {
        Retrieve {
            metadata: self.proxy.metadata().clone(),
            keys: None,
            names: None,
            internal: None,
        }
    }
}

/// Mutating handle over the lease proxy.
#[derive(Clone)]
pub struct Writer {
    proxy: Arc<LeaseProxy>,
    allow_internal: bool,
}

impl Writer {
    /// Permit deleting and renaming internal channels.
    pub fn allow_internal(mut self) -> Self {
        self.allow_internal = true;
        self
    }

    /// Create one channel and return it with its assigned key.
    pub async fn create(&self, channel: Channel, opts: CreateOptions) -> Result<Channel> {
        let mut created = self.proxy.create(vec![channel], opts).await?;
        if created.is_empty() {
            return Err(ChannelError::NotFound {
                what: "created channel".to_string(),
                missing: Vec::new(),
            });
        }
        Ok(created.swap_remove(0))
    }

    /// Create a batch. See [`LeaseProxy::create`] for result ordering.
    pub async fn create_many(&self, channels: Vec<Channel>, opts: CreateOptions) -> Result<Vec<Channel>> {
        self.proxy.create(channels, opts).await
    }

    pub async fn delete(&self, keys: &[Key]) -> Result<()> {
        self.proxy.delete(keys, self.allow_internal).await
    }

    pub async fn delete_by_name(&self, names: &[String]) -> Result<()> {
        self.proxy.delete_by_name(names, self.allow_internal).await
    }

    pub async fn rename(&self, keys: &[Key], names: &[String]) -> Result<()> {
        self.proxy.rename(keys, names, self.allow_internal).await
    }
}

/// Query builder over stored channels.
///
/// Filters combine with AND. Requested keys and names must all exist.
#[derive(Clone)]
pub struct Retrieve {
    metadata: MetadataStore,
    keys: Option<Vec<Key>>,
    names: Option<Vec<String>>,
    internal: Option<bool>,
}

impl Retrieve {
    pub fn where_keys(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.keys = Some(keys.into_iter().collect());
        self
    }

    pub fn where_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn where_internal(mut self, internal: bool) -> Self {
        self.internal = Some(internal);
        self
    }

    /// Run the query. Results follow the requested key order when keys are
    /// given, ascending key order otherwise.
    pub async fn exec(self) -> Result<Vec<Channel>> {
        let txn = self.metadata.begin();
        let mut channels = match &self.keys {
            Some(keys) => {
                let found = txn.get_channels(keys).await?;
                let missing: Vec<String> = keys
                    .iter()
                    .filter(|k| !found.iter().any(|ch| ch.key() == **k))
                    .map(ToString::to_string)
                    .collect();
                if !missing.is_empty() {
                    return Err(ChannelError::NotFound {
                        what: "channels".to_string(),
                        missing,
                    });
                }
                found
            }
            None => txn.channels().await?,
        };

        if let Some(names) = &self.names {
            channels.retain(|ch| names.contains(&ch.name));
            let missing: Vec<String> =
                names.iter().filter(|n| !channels.iter().any(|ch| &ch.name == *n)).cloned().collect();
            if !missing.is_empty() {
                return Err(ChannelError::NotFound {
                    what: "channel names".to_string(),
                    missing,
                });
            }
        }
        if let Some(internal) = self.internal {
            channels.retain(|ch| ch.is_internal == internal);
        }
        Ok(channels)
    }

    /// Run the query and return the first match.
    pub async fn exec_one(self) -> Result<Channel> {
        let wanted: Vec<String> = self
            .keys
            .iter()
            .flatten()
            .map(ToString::to_string)
            .chain(self.names.iter().flatten().cloned())
            .collect();
        self.exec().await?.into_iter().next().ok_or(ChannelError::NotFound {
            what: "channel".to_string(),
            missing: wanted,
        })
    }
}
