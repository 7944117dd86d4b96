//! Read operation types.

use serde::Deserialize;
use serde::Serialize;

/// A stored value together with its revision metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValueWithRevision {
    pub key: String,
    pub value: String,
    /// Store revision at which the key was first written.
    pub create_revision: u64,
    /// Store revision of the most recent write to the key.
    pub mod_revision: u64,
    /// Number of writes to the key since it was created.
    pub version: u64,
}

/// Request to read a single key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadRequest {
    pub key: String,
}

impl ReadRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Response from a read operation. `kv` is `None` when the key is absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadResult {
    pub kv: Option<KeyValueWithRevision>,
}

impl ReadResult {
    /// Value of the key, if present.
    pub fn value(&self) -> Option<&str> {
        self.kv.as_ref().map(|kv| kv.value.as_str())
    }
}
