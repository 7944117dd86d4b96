//! Deterministic in-memory key-value store.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::constants::DEFAULT_SCAN_LIMIT;
use crate::constants::MAX_SCAN_RESULTS;
use crate::error::KeyValueStoreError;
use crate::read::KeyValueWithRevision;
use crate::read::ReadRequest;
use crate::read::ReadResult;
use crate::scan::ScanRequest;
use crate::scan::ScanResult;
use crate::traits::KeyValueStore;
use crate::validation::validate_write_command;
use crate::write::BatchOperation;
use crate::write::WriteCommand;
use crate::write::WriteRequest;
use crate::write::WriteResult;

/// Versioned value for tracking revisions.
#[derive(Clone)]
struct VersionedValue {
    value: String,
    create_revision: u64,
    mod_revision: u64,
    version: u64,
}

#[derive(Default)]
struct State {
    data: BTreeMap<String, VersionedValue>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn put(&mut self, key: &str, value: &str, revision: u64) {
        match self.data.get_mut(key) {
            Some(existing) => {
                existing.value = value.to_string();
                existing.mod_revision = revision;
                existing.version += 1;
            }
            None => {
                self.data.insert(key.to_string(), VersionedValue {
                    value: value.to_string(),
                    create_revision: revision,
                    mod_revision: revision,
                    version: 1,
                });
            }
        }
    }
}

fn to_entry(key: &str, v: &VersionedValue) -> KeyValueWithRevision {
    KeyValueWithRevision {
        key: key.to_string(),
        value: v.value.clone(),
        create_revision: v.create_revision,
        mod_revision: v.mod_revision,
        version: v.version,
    }
}

/// A deterministic in-memory key-value store.
///
/// Every write is applied atomically under a single lock, so batches and
/// compare-and-swap behave linearizably. Intended for tests and for
/// single-process clusters.
#[derive(Default)]
pub struct DeterministicKeyValueStore {
    state: RwLock<State>,
}

impl DeterministicKeyValueStore {
    /// Create a new deterministic store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        let state = self.state.read().await;
        Ok(ReadResult {
            kv: state.data.get(&request.key).map(|v| to_entry(&request.key, v)),
        })
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        validate_write_command(&request.command)?;
        let mut state = self.state.write().await;

        // CAS is checked before a revision is consumed so that failures leave no trace.
        if let WriteCommand::CompareAndSwap { key, expected, .. } = &request.command {
            let current = state.data.get(key).map(|v| v.value.clone());
            if current.as_ref() != expected.as_ref() {
                return Err(KeyValueStoreError::CompareAndSwapFailed {
                    key: key.clone(),
                    expected: expected.clone(),
                    actual: current,
                });
            }
        }

        let revision = state.next_revision();
        let mut batch_applied = None;
        match &request.command {
            WriteCommand::Set { key, value } => state.put(key, value, revision),
            WriteCommand::CompareAndSwap { key, new_value, .. } => state.put(key, new_value, revision),
            WriteCommand::Batch { operations } => {
                for op in operations {
                    match op {
                        BatchOperation::Set { key, value } => state.put(key, value, revision),
                        BatchOperation::Delete { key } => {
                            state.data.remove(key);
                        }
                    }
                }
                batch_applied = Some(operations.len() as u32);
            }
        }

        Ok(WriteResult {
            header_revision: Some(revision),
            batch_applied,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        let state = self.state.read().await;
        let limit = request.limit.unwrap_or(DEFAULT_SCAN_LIMIT).clamp(1, MAX_SCAN_RESULTS) as usize;
        let lower = match &request.continuation_token {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Included(request.prefix.clone()),
        };

        let mut entries: Vec<KeyValueWithRevision> = state
            .data
            .range((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(&request.prefix))
            .take(limit + 1)
            .map(|(k, v)| to_entry(k, v))
            .collect();

        let is_truncated = entries.len() > limit;
        entries.truncate(limit);
        let continuation_token = if is_truncated {
            entries.last().map(|e| e.key.clone())
        } else {
            None
        };

        Ok(ScanResult {
            count: entries.len() as u32,
            entries,
            is_truncated,
            continuation_token,
        })
    }
}
