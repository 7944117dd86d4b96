//! Write operation types for modifying key-value state.

use serde::Deserialize;
use serde::Serialize;

/// Commands for modifying key-value state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCommand {
    /// Set a single key-value pair.
    Set { key: String, value: String },
    /// Atomically update value if the current value matches `expected`.
    /// `expected: None` requires the key to be absent.
    CompareAndSwap {
        key: String,
        expected: Option<String>,
        new_value: String,
    },
    /// Atomically apply multiple Set/Delete operations.
    Batch { operations: Vec<BatchOperation> },
}

/// A single operation within a batch write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchOperation {
    Set { key: String, value: String },
    Delete { key: String },
}

impl BatchOperation {
    pub fn key(&self) -> &str {
        match self {
            BatchOperation::Set { key, .. } | BatchOperation::Delete { key } => key,
        }
    }
}

/// Request to perform a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    pub command: WriteCommand,
}

impl WriteRequest {
    /// Create a Set command to store a key-value pair.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Set {
                key: key.into(),
                value: value.into(),
            },
        }
    }

    /// Create a CompareAndSwap command.
    pub fn compare_and_swap(key: impl Into<String>, expected: Option<String>, new_value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::CompareAndSwap {
                key: key.into(),
                expected,
                new_value: new_value.into(),
            },
        }
    }

    /// Create an atomic Batch command.
    pub fn batch(operations: Vec<BatchOperation>) -> Self {
        Self {
            command: WriteCommand::Batch { operations },
        }
    }
}

/// Result of a write operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteResult {
    /// Store revision assigned to the write.
    pub header_revision: Option<u64>,
    /// Number of operations applied by a batch write.
    pub batch_applied: Option<u32>,
}
