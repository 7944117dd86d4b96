//! Channel records.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::cluster::NodeKey;
use crate::error::Result;
use crate::key::HasKey;
use crate::key::Key;
use crate::key::LocalKey;
use crate::storage::StorageChannel;

/// Sample type stored by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Unknown,
    Timestamp,
    Float64,
    Float32,
    Int64,
    Int32,
    Int16,
    Int8,
    Uint64,
    Uint32,
    Uint16,
    Uint8,
    String,
    Json,
    Bytes,
    Uuid,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Unknown => "unknown",
            DataType::Timestamp => "timestamp",
            DataType::Float64 => "float64",
            DataType::Float32 => "float32",
            DataType::Int64 => "int64",
            DataType::Int32 => "int32",
            DataType::Int16 => "int16",
            DataType::Int8 => "int8",
            DataType::Uint64 => "uint64",
            DataType::Uint32 => "uint32",
            DataType::Uint16 => "uint16",
            DataType::Uint8 => "uint8",
            DataType::String => "string",
            DataType::Json => "json",
            DataType::Bytes => "bytes",
            DataType::Uuid => "uuid",
        };
        f.write_str(s)
    }
}

/// A named time-series stream.
///
/// Identity is `(leaseholder, local_key)`; a zero `local_key` means the key has
/// not been assigned yet. A channel is calculated when `expression` is
/// non-empty, and calculated channels always live in the free space.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub leaseholder: NodeKey,
    pub local_key: LocalKey,
    pub data_type: DataType,
    pub is_index: bool,
    /// Local key of the index channel, in the same lease space.
    pub local_index: LocalKey,
    pub is_virtual: bool,
    pub is_internal: bool,
    pub expression: String,
    pub requires: Vec<Key>,
}

impl Channel {
    /// A persisted, leased data channel indexed by `index`.
    pub fn data(name: impl Into<String>, data_type: DataType, index: LocalKey) -> Self {
        Self {
            name: name.into(),
            data_type,
            local_index: index,
            ..Default::default()
        }
    }

    /// A timestamp index channel.
    pub fn new_index(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Timestamp,
            is_index: true,
            ..Default::default()
        }
    }

    /// A virtual channel with no persisted samples.
    pub fn new_virtual(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_virtual: true,
            ..Default::default()
        }
    }

    /// A calculated channel evaluating `expression`.
    pub fn calculated(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> Key {
        Key::new(self.leaseholder, self.local_key)
    }

    /// Key of this channel's index, if it has one.
    pub fn index(&self) -> Option<Key> {
        (self.local_index != 0).then(|| Key::new(self.leaseholder, self.local_index))
    }

    pub fn is_calculated(&self) -> bool {
        !self.expression.is_empty()
    }

    /// Whether the channel counts towards the external channel quota.
    pub fn is_external_non_virtual(&self) -> bool {
        !self.is_internal && !self.is_virtual
    }

    /// Compare every property except identity and lease.
    pub fn has_same_properties(&self, other: &Channel) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.is_index == other.is_index
            && self.is_virtual == other.is_virtual
            && self.is_internal == other.is_internal
            && self.expression == other.expression
            && self.requires == other.requires
    }

    /// Description handed to the storage engine.
    pub fn storage(&self) -> StorageChannel {
        let key = self.key().storage_key();
        StorageChannel {
            key,
            name: self.name.clone(),
            data_type: self.data_type,
            is_index: self.is_index,
            index: if self.is_index {
                key
            } else {
                self.index().map(Key::storage_key).unwrap_or(0)
            },
            is_virtual: self.is_virtual,
        }
    }
}

impl HasKey for Channel {
    fn key(&self) -> Key {
        Channel::key(self)
    }
}

/// Infers the data type of a calculated channel from its expression.
#[async_trait]
pub trait CalculationAnalyzer: Send + Sync {
    async fn analyze(&self, channel: &Channel) -> Result<DataType>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_reflects_lease() {
        let ch = Channel {
            leaseholder: NodeKey(2),
            local_key: 5,
            ..Channel::new_index("time")
        };
        assert_eq!(ch.key(), Key::new(NodeKey(2), 5));
    }

    #[test]
    fn index_is_in_same_lease_space() {
        let ch = Channel {
            leaseholder: NodeKey(3),
            local_key: 2,
            ..Channel::data("temp", DataType::Float32, 1)
        };
        assert_eq!(ch.index(), Some(Key::new(NodeKey(3), 1)));
        assert_eq!(Channel::new_virtual("v", DataType::Json).index(), None);
    }

    #[test]
    fn calculated_requires_expression() {
        assert!(Channel::calculated("x", "return a * 2").is_calculated());
        assert!(!Channel::new_virtual("y", DataType::Float64).is_calculated());
    }

    #[test]
    fn same_properties_ignores_identity() {
        let a = Channel {
            leaseholder: NodeKey(1),
            local_key: 4,
            local_index: 3,
            ..Channel::data("temp", DataType::Float32, 0)
        };
        let b = Channel {
            leaseholder: NodeKey(2),
            local_key: 9,
            local_index: 1,
            ..Channel::data("temp", DataType::Float32, 0)
        };
        assert!(a.has_same_properties(&b));

        let c = Channel {
            data_type: DataType::Float64,
            ..b.clone()
        };
        assert!(!a.has_same_properties(&c));
    }

    #[test]
    fn storage_index_points_at_self_for_indexes() {
        let idx = Channel {
            leaseholder: NodeKey(1),
            local_key: 7,
            local_index: 7,
            ..Channel::new_index("time")
        };
        let storage = idx.storage();
        assert_eq!(storage.key, idx.key().storage_key());
        assert_eq!(storage.index, storage.key);

        let virt = Channel {
            leaseholder: NodeKey(1),
            local_key: 8,
            ..Channel::new_virtual("v", DataType::Float32)
        };
        assert_eq!(virt.storage().index, 0);
    }
}
