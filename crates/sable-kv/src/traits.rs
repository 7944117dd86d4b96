//! The key-value store interface.

use async_trait::async_trait;

use crate::error::KeyValueStoreError;
use crate::read::ReadRequest;
use crate::read::ReadResult;
use crate::scan::ScanRequest;
use crate::scan::ScanResult;
use crate::write::WriteRequest;
use crate::write::WriteResult;

/// Linearizable key-value store interface.
///
/// Reads of absent keys return `Ok(ReadResult { kv: None })`; a failed
/// compare-and-swap returns [`KeyValueStoreError::CompareAndSwapFailed`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Apply a write command.
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError>;

    /// Read a value by key with revision metadata.
    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError>;

    /// Scan keys matching a prefix with pagination support.
    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        (**self).write(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        (**self).read(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        (**self).scan(request).await
    }
}
