//! Lease-aware proxy for channel writes.
//!
//! Every channel is owned by the node encoded in its key's leaseholder bits,
//! or by nobody when it lives in the free space. The proxy splits each
//! create, delete or rename batch by owner, forwards peer-owned entries over
//! the [`Transport`], sends free-space creates to the bootstrapper, and
//! handles its own entries locally.
//!
//! # Ordering
//!
//! Partitions are processed peers first (ascending node key), then the free
//! space, then the gateway. A failure aborts the remaining partitions;
//! partitions that already completed are not rolled back.

mod accounting;
mod create;
mod delete;
mod rename;

use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use sable_kv::KeyValueStore;
use tracing::info;

use self::accounting::ExternalChannelSet;
use crate::channel::CalculationAnalyzer;
use crate::channel::Channel;
use crate::cluster::HostResolver;
use crate::cluster::NodeKey;
use crate::config::ChannelConfig;
use crate::config::ServiceConfig;
use crate::constants::MAX_BATCH_CHANNELS;
use crate::counter::free_counter_key;
use crate::counter::leased_counter_key;
use crate::counter::LocalKeyCounter;
use crate::error::ChannelError;
use crate::error::Result;
use crate::integer_set::IntegerSet;
use crate::key::Key;
use crate::metadata::MetadataStore;
use crate::metadata::MetadataTxn;
use crate::resource::ResourceGraph;
use crate::resource::ResourceId;
use crate::router::BatchFactory;
use crate::storage::TsStore;
use crate::transport::Ack;
use crate::transport::CreateMessage;
use crate::transport::CreateOptions;
use crate::transport::DeleteRequest;
use crate::transport::RenameRequest;
use crate::transport::RpcError;
use crate::transport::Transport;
use crate::transport::UnaryClient;
use crate::transport::UnaryHandler;

/// Routes channel mutations to their leaseholders.
pub struct LeaseProxy {
    host: NodeKey,
    config: ChannelConfig,
    resolver: Arc<dyn HostResolver>,
    metadata: MetadataStore,
    ts: Arc<dyn TsStore>,
    transport: Arc<dyn Transport>,
    resources: Option<Arc<dyn ResourceGraph>>,
    /// Parent of every external channel in the resource graph.
    group: Option<ResourceId>,
    analyzer: Option<Arc<dyn CalculationAnalyzer>>,
    router: BatchFactory,
    leased_counter: LocalKeyCounter<dyn KeyValueStore>,
    /// Present only on the bootstrapper.
    free_counter: Option<LocalKeyCounter<dyn KeyValueStore>>,
    external: ExternalChannelSet,
}

impl LeaseProxy {
    /// Open the proxy and bind its RPC handlers on the transport.
    pub async fn open(config: ServiceConfig, group: Option<ResourceId>) -> Result<Arc<Self>> {
        let host = config.host.host_key();
        if host.is_unset() || host > NodeKey::MAX {
            return Err(ChannelError::Configuration {
                reason: format!("host key {host} is not a valid node key"),
            });
        }

        let metadata = MetadataStore::new(Arc::clone(&config.metadata), config.channel.key_prefix.clone());
        let leased_counter: LocalKeyCounter<dyn KeyValueStore> =
            LocalKeyCounter::open(Arc::clone(&config.metadata), leased_counter_key(host)).await?;
        let free_counter: Option<LocalKeyCounter<dyn KeyValueStore>> = if host.is_bootstrapper() {
            Some(LocalKeyCounter::open(Arc::clone(&config.metadata), free_counter_key(host)).await?)
        } else {
            None
        };

        let external: IntegerSet<Key> = metadata
            .begin()
            .channels()
            .await?
            .iter()
            .filter(|ch| ch.leaseholder == host && ch.is_external_non_virtual())
            .map(Channel::key)
            .collect();
        let external_count = external.len();

        let proxy = Arc::new(Self {
            host,
            external: ExternalChannelSet::new(external, config.channel.max_external_channels),
            config: config.channel,
            resolver: config.host,
            metadata,
            ts: config.ts,
            transport: config.transport,
            resources: config.resources,
            group,
            analyzer: config.analyzer,
            router: BatchFactory::new(host),
            leased_counter,
            free_counter,
        });

        let handler = Arc::new(ProxyHandler {
            proxy: Arc::downgrade(&proxy),
        });
        proxy.transport.create_server().bind_handler(handler.clone());
        proxy.transport.delete_server().bind_handler(handler.clone());
        proxy.transport.rename_server().bind_handler(handler);

        info!(
            host = %host,
            external = external_count,
            bootstrapper = host.is_bootstrapper(),
            "opened channel lease proxy"
        );
        Ok(proxy)
    }

    pub fn host(&self) -> NodeKey {
        self.host
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Number of external, non-virtual channels leased to this node.
    pub async fn external_count(&self) -> usize {
        self.external.len().await
    }

    /// Whether `key` is counted as an external, non-virtual channel here.
    pub async fn is_counted(&self, key: Key) -> bool {
        self.external.contains(key).await
    }

    /// Current value of this node's leased-space counter.
    pub async fn leased_counter_value(&self) -> Result<u32> {
        self.leased_counter.value().await
    }

    /// Send one request to `node`, bounded by the configured RPC timeout.
    async fn call<Req, Res>(&self, node: NodeKey, client: &dyn UnaryClient<Req, Res>, request: Req) -> Result<Res>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        let address = self.resolver.resolve(node).map_err(|e| ChannelError::RemoteUnreachable {
            node,
            reason: e.to_string(),
        })?;
        match tokio::time::timeout(self.config.rpc_timeout(), client.send(&address, request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(RpcError::Remote { kind, message })) => Err(ChannelError::Remote { node, kind, message }),
            Ok(Err(err)) => Err(ChannelError::RemoteUnreachable {
                node,
                reason: err.to_string(),
            }),
            Err(_) => Err(ChannelError::RemoteUnreachable {
                node,
                reason: format!("no response within {}ms", self.config.rpc_timeout_ms),
            }),
        }
    }

    /// Register channels in the resource graph and link them under the group.
    async fn define_resources(&self, txn: &mut MetadataTxn, channels: &[&Channel], opts: CreateOptions) -> Result<()> {
        let Some(graph) = &self.resources else {
            return Ok(());
        };
        let ids: Vec<ResourceId> =
            channels.iter().filter(|ch| !ch.is_internal).map(|ch| ResourceId::channel(ch.key())).collect();
        if ids.is_empty() {
            return Ok(());
        }
        graph.define_resources(txn, &ids).await?;
        if let Some(group) = self.group.as_ref().filter(|_| !opts.create_without_group_relationship) {
            graph.define_parent_of(txn, group, &ids).await?;
        }
        Ok(())
    }

    async fn delete_resources(&self, txn: &mut MetadataTxn, keys: &[Key]) -> Result<()> {
        let Some(graph) = &self.resources else {
            return Ok(());
        };
        let ids: Vec<ResourceId> = keys.iter().copied().map(ResourceId::channel).collect();
        graph.delete_resources(txn, &ids).await
    }
}

fn check_batch_size(field: &str, len: usize) -> Result<()> {
    if len > MAX_BATCH_CHANNELS {
        return Err(ChannelError::Validation {
            path: field.to_string(),
            reason: format!("batch of {len} exceeds the maximum of {MAX_BATCH_CHANNELS}"),
        });
    }
    Ok(())
}

/// Serves peer RPCs without keeping the proxy alive.
struct ProxyHandler {
    proxy: Weak<LeaseProxy>,
}

impl ProxyHandler {
    fn proxy(&self) -> Result<Arc<LeaseProxy>> {
        self.proxy.upgrade().ok_or_else(|| ChannelError::Configuration {
            reason: "channel service is closed".to_string(),
        })
    }
}

#[async_trait]
impl UnaryHandler<CreateMessage, CreateMessage> for ProxyHandler {
    async fn handle(&self, request: CreateMessage) -> Result<CreateMessage> {
        self.proxy()?.handle_create(request).await
    }
}

#[async_trait]
impl UnaryHandler<DeleteRequest, Ack> for ProxyHandler {
    async fn handle(&self, request: DeleteRequest) -> Result<Ack> {
        self.proxy()?.handle_delete(request).await
    }
}

#[async_trait]
impl UnaryHandler<RenameRequest, Ack> for ProxyHandler {
    async fn handle(&self, request: RenameRequest) -> Result<Ack> {
        self.proxy()?.handle_rename(request).await
    }
}
