//! Test support: an in-process cluster of channel services.
//!
//! Every node of a [`MockCluster`] shares one [`DeterministicKeyValueStore`]
//! as its cluster metadata store and one [`InMemoryNetwork`], while owning its
//! own [`MemoryTsStore`]. Node `k` listens at `node-{k}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sable_kv::DeterministicKeyValueStore;
use sable_kv::KeyValueStore;
use tracing_subscriber::EnvFilter;

use crate::channel::CalculationAnalyzer;
use crate::channel::Channel;
use crate::channel::DataType;
use crate::cluster::NodeAddress;
use crate::cluster::NodeKey;
use crate::cluster::StaticHostResolver;
use crate::config::ChannelConfig;
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::resource::KvResourceGraph;
use crate::service::Service;
use crate::storage::MemoryTsStore;
use crate::transport::InMemoryNetwork;

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

pub fn node_address(node: NodeKey) -> NodeAddress {
    NodeAddress::new(format!("node-{}", node.0))
}

/// Infers a calculated channel's type from its expression: `float` anywhere
/// in the expression yields `Float64`, anything else `Int64`.
#[derive(Debug, Default)]
pub struct ExpressionAnalyzer;

#[async_trait]
impl CalculationAnalyzer for ExpressionAnalyzer {
    async fn analyze(&self, channel: &Channel) -> Result<DataType> {
        if channel.expression.contains("float") {
            Ok(DataType::Float64)
        } else {
            Ok(DataType::Int64)
        }
    }
}

pub struct MockNode {
    pub service: Arc<Service>,
    pub ts: Arc<MemoryTsStore>,
    pub resolver: Arc<StaticHostResolver>,
    pub address: NodeAddress,
}

pub struct MockCluster {
    pub kv: Arc<DeterministicKeyValueStore>,
    pub network: Arc<InMemoryNetwork>,
    pub resources: Arc<KvResourceGraph>,
    pub nodes: BTreeMap<NodeKey, MockNode>,
}

impl MockCluster {
    /// Start nodes `1..=count` with the default channel config.
    pub async fn provision(count: u16) -> Result<Self> {
        Self::provision_with(count, ChannelConfig::default()).await
    }

    pub async fn provision_with(count: u16, config: ChannelConfig) -> Result<Self> {
        init_tracing();
        let mut cluster = Self {
            kv: DeterministicKeyValueStore::new(),
            network: InMemoryNetwork::new(),
            resources: Arc::new(KvResourceGraph::new()),
            nodes: BTreeMap::new(),
        };
        for k in 1..=count {
            cluster.add_node(NodeKey(k), config.clone()).await?;
        }
        Ok(cluster)
    }

    /// Start a node and make it resolvable from every existing node. A node
    /// already running under `key` is replaced, as after a restart.
    pub async fn add_node(&mut self, key: NodeKey, config: ChannelConfig) -> Result<&MockNode> {
        let address = node_address(key);
        let peers = self.nodes.iter().map(|(k, n)| (*k, n.address.clone()));
        let resolver = Arc::new(StaticHostResolver::new(key, peers.chain([(key, address.clone())])));
        for node in self.nodes.values() {
            node.resolver.insert(key, address.clone());
        }

        let ts = MemoryTsStore::new();
        let metadata: Arc<dyn KeyValueStore> = self.kv.clone();
        let service = Service::open(
            ServiceConfig::new(resolver.clone(), metadata, ts.clone(), self.network.transport(address.clone()))
                .with_channel_config(config)
                .with_resources(self.resources.clone())
                .with_analyzer(Arc::new(ExpressionAnalyzer)),
        )
        .await?;

        let node = MockNode {
            service,
            ts,
            resolver,
            address,
        };
        self.nodes.insert(key, node);
        Ok(&self.nodes[&key])
    }

    /// Panics if `key` was not provisioned.
    pub fn node(&self, key: u16) -> &MockNode {
        &self.nodes[&NodeKey(key)]
    }

    pub fn service(&self, key: u16) -> &Arc<Service> {
        &self.node(key).service
    }
}
