//! Node identity and address resolution.
//!
//! Every node owns a 12-bit [`NodeKey`]. Two values are reserved: `0` marks an
//! unset leaseholder and `0xFFF` is the free (unleased) space. Node `1` is the
//! bootstrapper and the sole allocator of free keys.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

/// Type-safe identifier of a cluster node, or of the free key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(pub u16);

impl NodeKey {
    /// Placeholder leaseholder, replaced by the handling node on create.
    pub const UNSET: NodeKey = NodeKey(0);
    /// Node that allocates keys in the free space.
    pub const BOOTSTRAPPER: NodeKey = NodeKey(1);
    /// Sentinel leaseholder for channels not leased to any node.
    pub const FREE: NodeKey = NodeKey(0xFFF);
    /// Largest node key an actual node may hold.
    pub const MAX: NodeKey = NodeKey(0xFFE);

    /// Create a `NodeKey` from a raw value.
    pub fn new(key: u16) -> Self {
        Self(key)
    }

    pub fn is_free(self) -> bool {
        self == Self::FREE
    }

    pub fn is_bootstrapper(self) -> bool {
        self == Self::BOOTSTRAPPER
    }

    pub fn is_unset(self) -> bool {
        self == Self::UNSET
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_free() {
            f.write_str("free")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u16> for NodeKey {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<NodeKey> for u16 {
    fn from(value: NodeKey) -> Self {
        value.0
    }
}

impl std::str::FromStr for NodeKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u16>().map(NodeKey)
    }
}

/// Transport-level address of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from resolving a node key to an address.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ResolveError {
    /// No address is known for the node.
    #[snafu(display("no address known for node {node}"))]
    UnknownNode { node: NodeKey },
}

/// Maps node keys to addresses and reports the local node's key.
pub trait HostResolver: Send + Sync {
    /// Key of the node this resolver runs on.
    fn host_key(&self) -> NodeKey;

    /// Address of `node`.
    fn resolve(&self, node: NodeKey) -> Result<NodeAddress, ResolveError>;
}

/// Resolver backed by an explicit membership table.
#[derive(Debug)]
pub struct StaticHostResolver {
    host: NodeKey,
    addresses: RwLock<HashMap<NodeKey, NodeAddress>>,
}

impl StaticHostResolver {
    pub fn new(host: NodeKey, addresses: impl IntoIterator<Item = (NodeKey, NodeAddress)>) -> Self {
        Self {
            host,
            addresses: RwLock::new(addresses.into_iter().collect()),
        }
    }

    /// Add or replace the address of a node.
    pub fn insert(&self, node: NodeKey, address: NodeAddress) {
        self.addresses.write().insert(node, address);
    }

    /// Forget a node.
    pub fn remove(&self, node: NodeKey) -> Option<NodeAddress> {
        self.addresses.write().remove(&node)
    }
}

impl HostResolver for StaticHostResolver {
    fn host_key(&self) -> NodeKey {
        self.host
    }

    fn resolve(&self, node: NodeKey) -> Result<NodeAddress, ResolveError> {
        self.addresses.read().get(&node).cloned().ok_or(ResolveError::UnknownNode { node })
    }
}
