//! Error types for channel identity and ownership operations.

use std::fmt;

use sable_kv::KeyValueStoreError;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

use crate::cluster::NodeKey;
use crate::key::Key;
use crate::storage::TsStoreError;

/// Result type for channel operations.
pub type Result<T, E = ChannelError> = std::result::Result<T, E>;

/// Errors produced by the channel layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ChannelError {
    /// A channel name failed syntax validation.
    #[snafu(display("{path}: invalid channel name '{name}': {reason}"))]
    InvalidName {
        /// Field path of the offending name.
        path: String,
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// Two entries of the same batch share a name.
    #[snafu(display("duplicate channel name '{name}' at positions {first} and {second}"))]
    DuplicateName {
        name: String,
        first: usize,
        second: usize,
    },

    /// The name already belongs to a different channel.
    #[snafu(display("channel name '{name}' is already in use by channel {existing}"))]
    NameConflict {
        name: String,
        /// Key of the channel that owns the name.
        existing: Key,
    },

    /// A new calculated channel arrived with a caller-supplied index.
    #[snafu(display("{path}: calculated channels cannot specify an index manually ('{name}')"))]
    ManualIndexOnCalculated { path: String, name: String },

    /// A bounded identifier space or channel quota would overflow.
    #[snafu(display("capacity exceeded for {space}: requested {requested}, available {available}"))]
    CapacityExceeded {
        /// The exhausted space (counter key or quota name).
        space: String,
        requested: u64,
        available: u64,
    },

    /// The operation targets internal channels without permission.
    #[snafu(display("cannot {operation} internal channel(s): {names:?}"))]
    InternalChannelProtected { operation: String, names: Vec<String> },

    /// Requested channels do not exist.
    #[snafu(display("{what} not found: {missing:?}"))]
    NotFound { what: String, missing: Vec<String> },

    /// A peer could not be resolved or contacted.
    #[snafu(display("node {node} unreachable: {reason}"))]
    RemoteUnreachable { node: NodeKey, reason: String },

    /// A peer executed the request and returned an error.
    #[snafu(display("node {node} rejected request ({kind}): {message}"))]
    Remote {
        node: NodeKey,
        kind: ErrorKind,
        message: String,
    },

    /// The time-series storage engine rejected an operation.
    #[snafu(display("storage operation failed: {source}"))]
    StorageOpFailed { source: TsStoreError },

    /// The node is deployed in a way that cannot serve the request.
    #[snafu(display("configuration error: {reason}"))]
    Configuration { reason: String },

    /// A request was structurally invalid.
    #[snafu(display("{path}: {reason}"))]
    Validation { path: String, reason: String },

    /// A rename request paired a different number of keys and names.
    #[snafu(display("keys and names must be the same length: {keys} keys, {names} names"))]
    KeysNamesMismatch { keys: usize, names: usize },

    /// A peer received entries leased to another node.
    #[snafu(display("node {node} received {count} entries it does not own"))]
    Misrouted { node: NodeKey, count: usize },

    /// The cluster metadata store failed.
    #[snafu(display("metadata store error: {source}"))]
    Metadata { source: KeyValueStoreError },

    /// A metadata record could not be encoded or decoded.
    #[snafu(display("serialization error: {source}"))]
    Serialization { source: serde_json::Error },

    /// Persisted state is unreadable.
    #[snafu(display("corrupted data in key '{key}': {reason}"))]
    CorruptedData { key: String, reason: String },
}

/// Classification of [`ChannelError`] shared across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidName,
    DuplicateName,
    NameConflict,
    ManualIndexOnCalculated,
    CapacityExceeded,
    InternalChannelProtected,
    NotFound,
    RemoteUnreachable,
    StorageOpFailed,
    Configuration,
    Validation,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidName => "invalid_name",
            ErrorKind::DuplicateName => "duplicate_name",
            ErrorKind::NameConflict => "name_conflict",
            ErrorKind::ManualIndexOnCalculated => "manual_index_on_calculated",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::InternalChannelProtected => "internal_channel_protected",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RemoteUnreachable => "remote_unreachable",
            ErrorKind::StorageOpFailed => "storage_op_failed",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl ChannelError {
    /// Get the taxonomy kind. Remote errors report the kind raised by the peer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. } => ErrorKind::InvalidName,
            Self::DuplicateName { .. } => ErrorKind::DuplicateName,
            Self::NameConflict { .. } => ErrorKind::NameConflict,
            Self::ManualIndexOnCalculated { .. } => ErrorKind::ManualIndexOnCalculated,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::InternalChannelProtected { .. } => ErrorKind::InternalChannelProtected,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RemoteUnreachable { .. } => ErrorKind::RemoteUnreachable,
            Self::Remote { kind, .. } => *kind,
            Self::StorageOpFailed { .. } => ErrorKind::StorageOpFailed,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Validation { .. } | Self::KeysNamesMismatch { .. } | Self::Misrouted { .. } => ErrorKind::Validation,
            Self::Metadata { .. } | Self::Serialization { .. } | Self::CorruptedData { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::RemoteUnreachable | ErrorKind::StorageOpFailed)
    }
}

impl From<KeyValueStoreError> for ChannelError {
    fn from(source: KeyValueStoreError) -> Self {
        ChannelError::Metadata { source }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(source: serde_json::Error) -> Self {
        ChannelError::Serialization { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_reports_remote_kind() {
        let err = ChannelError::Remote {
            node: NodeKey::new(2),
            kind: ErrorKind::NameConflict,
            message: "taken".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NameConflict);
    }

    #[test]
    fn protected_error_lists_channels() {
        let err = ChannelError::InternalChannelProtected {
            operation: "delete".into(),
            names: vec!["sy_node_1_control".into()],
        };
        assert_eq!(err.to_string(), "cannot delete internal channel(s): [\"sy_node_1_control\"]");
    }

    #[test]
    fn invalid_name_carries_path() {
        let err = ChannelError::InvalidName {
            path: "channels[2].name".into(),
            name: "1abc".into(),
            reason: "must not start with a digit".into(),
        };
        assert!(err.to_string().starts_with("channels[2].name:"));
        assert_eq!(err.kind(), ErrorKind::InvalidName);
    }

    #[test]
    fn retryable_kinds() {
        let unreachable = ChannelError::RemoteUnreachable {
            node: NodeKey::new(3),
            reason: "timeout".into(),
        };
        let conflict = ChannelError::NameConflict {
            name: "a".into(),
            existing: Key::new(NodeKey::new(1), 1),
        };
        assert!(unreachable.is_retryable());
        assert!(!conflict.is_retryable());
    }
}
