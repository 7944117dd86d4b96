//! Lease-based batch routing.
//!
//! A batch of keyed entries is split into the entries this node holds the
//! lease for (gateway), the entries in the free space, and per-peer groups.
//! Relative order is preserved inside every group.

use std::collections::BTreeMap;

use crate::channel::Channel;
use crate::cluster::NodeKey;
use crate::key::Key;

/// Anything that can report the node holding its lease.
pub trait Lease {
    fn lease(&self) -> NodeKey;
}

impl Lease for Key {
    fn lease(&self) -> NodeKey {
        self.leaseholder()
    }
}

impl Lease for Channel {
    fn lease(&self) -> NodeKey {
        self.leaseholder
    }
}

/// Positional wrapper, so routed results can be put back in request order.
impl<E: Lease> Lease for (usize, E) {
    fn lease(&self) -> NodeKey {
        self.1.lease()
    }
}

/// A rename target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameEntry {
    pub key: Key,
    pub name: String,
}

impl Lease for RenameEntry {
    fn lease(&self) -> NodeKey {
        self.key.leaseholder()
    }
}

/// Entries of one request split by leaseholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<E> {
    pub gateway: Vec<E>,
    pub free: Vec<E>,
    /// Remote leaseholders in ascending key order.
    pub peers: BTreeMap<NodeKey, Vec<E>>,
}

impl<E> Default for Batch<E> {
    fn default() -> Self {
        Self {
            gateway: Vec::new(),
            free: Vec::new(),
            peers: BTreeMap::new(),
        }
    }
}

impl<E> Batch<E> {
    pub fn len(&self) -> usize {
        self.gateway.len() + self.free.len() + self.peers.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits entries relative to the local host.
#[derive(Debug, Clone, Copy)]
pub struct BatchFactory {
    host: NodeKey,
}

impl BatchFactory {
    pub fn new(host: NodeKey) -> Self {
        Self { host }
    }

    pub fn host(&self) -> NodeKey {
        self.host
    }

    pub fn batch<E: Lease>(&self, entries: impl IntoIterator<Item = E>) -> Batch<E> {
        let mut batch = Batch::default();
        for entry in entries {
            let lease = entry.lease();
            if lease == self.host {
                batch.gateway.push(entry);
            } else if lease.is_free() {
                batch.free.push(entry);
            } else {
                batch.peers.entry(lease).or_default().push(entry);
            }
        }
        batch
    }
}

/// Put positional results back into request order.
///
/// Returns `None` if any position is missing.
pub fn reassemble<T>(len: usize, parts: impl IntoIterator<Item = (usize, T)>) -> Option<Vec<T>> {
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(len).collect();
    for (i, item) in parts {
        *slots.get_mut(i)? = Some(item);
    }
    slots.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn key(node: u16, local: u32) -> Key {
        Key::new(NodeKey(node), local)
    }

    #[test]
    fn splits_gateway_free_and_peers() {
        let factory = BatchFactory::new(NodeKey(1));
        let batch = factory.batch(vec![
            key(1, 1),
            key(2, 1),
            Key::new(NodeKey::FREE, 1),
            key(1, 2),
            key(3, 1),
            key(2, 2),
        ]);
        assert_eq!(batch.gateway, vec![key(1, 1), key(1, 2)]);
        assert_eq!(batch.free, vec![Key::new(NodeKey::FREE, 1)]);
        assert_eq!(batch.peers[&NodeKey(2)], vec![key(2, 1), key(2, 2)]);
        assert_eq!(batch.peers[&NodeKey(3)], vec![key(3, 1)]);
        assert_eq!(batch.len(), 6);
    }

    #[test]
    fn empty_batch() {
        let batch = BatchFactory::new(NodeKey(1)).batch(Vec::<Key>::new());
        assert!(batch.is_empty());
        assert!(batch.peers.is_empty());
    }

    #[test]
    fn reassemble_restores_order() {
        let out = reassemble(3, vec![(2, "c"), (0, "a"), (1, "b")]).unwrap();
        assert_eq!(out, vec!["a", "b", "c"]);
        assert!(reassemble(3, vec![(0, "a")]).is_none());
        assert!(reassemble(1, vec![(4, "a")]).is_none());
    }

    proptest! {
        #[test]
        fn routing_partitions_entries(
            host in 1u16..8,
            raw in prop::collection::vec((prop_oneof![1u16..8, Just(0xFFFu16)], 1u32..100), 0..64),
        ) {
            let keys: Vec<Key> = raw.iter().map(|(n, l)| key(*n, *l)).collect();
            let batch = BatchFactory::new(NodeKey(host)).batch(keys.iter().copied().enumerate());

            prop_assert_eq!(batch.len(), keys.len());
            prop_assert!(batch.gateway.iter().all(|(_, k)| k.leaseholder() == NodeKey(host)));
            prop_assert!(batch.free.iter().all(|(_, k)| k.is_free()));
            for (node, group) in &batch.peers {
                prop_assert!(*node != NodeKey(host) && !node.is_free());
                prop_assert!(group.iter().all(|(_, k)| k.leaseholder() == *node));
                prop_assert!(group.windows(2).all(|w| w[0].0 < w[1].0));
            }
            prop_assert!(batch.gateway.windows(2).all(|w| w[0].0 < w[1].0));

            let parts = batch.gateway.into_iter()
                .chain(batch.free)
                .chain(batch.peers.into_values().flatten());
            let restored = reassemble(keys.len(), parts).unwrap();
            prop_assert_eq!(restored, keys);
        }
    }
}
