//! Channel key encoding.
//!
//! A [`Key`] packs the leaseholder into the upper 12 bits and the local key
//! into the lower 20 bits of a `u32`. The same value is used as the storage
//! engine's channel key, so the layout is a persisted format.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

use crate::cluster::NodeKey;

/// A node-local channel counter value. Zero means "not yet assigned".
pub type LocalKey = u32;

/// Number of bits reserved for the local key.
pub const LOCAL_KEY_BITS: u32 = 20;

/// Mask selecting the local key.
pub const LOCAL_KEY_MASK: u32 = (1 << LOCAL_KEY_BITS) - 1;

/// Largest local key a counter may hand out.
pub const MAX_LOCAL_KEY: LocalKey = LOCAL_KEY_MASK;

/// Mask selecting the leaseholder after shifting.
const LEASEHOLDER_MASK: u32 = 0xFFF;

/// Cluster-wide channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(pub u32);

impl Key {
    /// Encode a key. Out-of-range inputs are truncated to their bit widths.
    pub fn new(leaseholder: NodeKey, local_key: LocalKey) -> Self {
        debug_assert!(u32::from(leaseholder.0) <= LEASEHOLDER_MASK, "leaseholder out of range");
        debug_assert!(local_key <= LOCAL_KEY_MASK, "local key out of range");
        Self(((u32::from(leaseholder.0) & LEASEHOLDER_MASK) << LOCAL_KEY_BITS) | (local_key & LOCAL_KEY_MASK))
    }

    pub fn leaseholder(self) -> NodeKey {
        NodeKey((self.0 >> LOCAL_KEY_BITS) as u16)
    }

    pub fn local_key(self) -> LocalKey {
        self.0 & LOCAL_KEY_MASK
    }

    /// Whether the key lives in the unleased space.
    pub fn is_free(self) -> bool {
        self.leaseholder().is_free()
    }

    /// Whether both halves carry assigned values.
    pub fn is_assigned(self) -> bool {
        !self.leaseholder().is_unset() && self.local_key() != 0
    }

    /// Raw value used as the storage engine key.
    pub fn storage_key(self) -> u32 {
        self.0
    }
}

/// Formats as `<leaseholder>:<local_key>`, e.g. `2:17` or `free:3`.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.leaseholder(), self.local_key())
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Key> for u32 {
    fn from(value: Key) -> Self {
        value.0
    }
}

/// Error parsing a [`Key`] from text.
#[derive(Debug, Snafu)]
#[snafu(display("invalid channel key '{input}': expected <leaseholder>:<local_key>"))]
pub struct ParseKeyError {
    input: String,
}

/// Parses the `Display` form. A bare integer is read as the raw encoding.
impl std::str::FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseKeyError { input: s.to_string() };
        let Some((node, local)) = s.split_once(':') else {
            return s.parse::<u32>().map(Key).map_err(|_| invalid());
        };
        let node = match node {
            "free" => NodeKey::FREE,
            other => other.parse::<NodeKey>().map_err(|_| invalid())?,
        };
        let local = local.parse::<LocalKey>().map_err(|_| invalid())?;
        if u32::from(node.0) > LEASEHOLDER_MASK || local > LOCAL_KEY_MASK {
            return Err(invalid());
        }
        Ok(Key::new(node, local))
    }
}

/// Collect the keys of anything that carries one.
pub fn keys_of<'a, T, I>(items: I) -> Vec<Key>
where
    T: 'a + HasKey,
    I: IntoIterator<Item = &'a T>,
{
    items.into_iter().map(HasKey::key).collect()
}

/// Implemented by records identified by a [`Key`].
pub trait HasKey {
    fn key(&self) -> Key;
}

impl HasKey for Key {
    fn key(&self) -> Key {
        *self
    }
}
