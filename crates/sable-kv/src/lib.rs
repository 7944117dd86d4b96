//! Key-value abstraction for Sable cluster metadata.
//!
//! The channel layer persists its records, counters and resource registrations
//! through the [`KeyValueStore`] trait defined here. Production deployments back
//! it with a replicated store; tests use [`DeterministicKeyValueStore`].
//!
//! # Key Components
//!
//! - **Traits**: `KeyValueStore`
//! - **Types**: `ReadRequest`, `WriteRequest`, `WriteCommand`, `ScanRequest`, etc.
//! - **Validation**: `validate_write_command` enforces fixed size limits

pub mod constants;
mod error;
mod inmemory;
mod read;
mod scan;
mod traits;
mod validation;
mod write;

pub use error::KeyValueStoreError;
pub use inmemory::DeterministicKeyValueStore;
pub use read::KeyValueWithRevision;
pub use read::ReadRequest;
pub use read::ReadResult;
pub use scan::ScanRequest;
pub use scan::ScanResult;
pub use traits::KeyValueStore;
pub use validation::validate_write_command;
pub use write::BatchOperation;
pub use write::WriteCommand;
pub use write::WriteRequest;
pub use write::WriteResult;
