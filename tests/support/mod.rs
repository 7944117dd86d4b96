//! Shared helpers for the channel integration tests.

#![allow(dead_code)]

use sable::cluster::NodeKey;
use sable::key::Key;
use sable::testing::MockCluster;
use sable::Channel;
use sable::DataType;

pub fn key(node: u16, local: u32) -> Key {
    Key::new(NodeKey(node), local)
}

pub fn free_key(local: u32) -> Key {
    Key::new(NodeKey::FREE, local)
}

/// A persisted float channel without an index.
pub fn float(name: &str) -> Channel {
    Channel::data(name, DataType::Float64, 0)
}

/// `float` leased to `node`.
pub fn float_on(name: &str, node: u16) -> Channel {
    Channel {
        leaseholder: NodeKey(node),
        ..float(name)
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub async fn cluster(nodes: u16) -> MockCluster {
    MockCluster::provision(nodes).await.expect("cluster should start")
}
