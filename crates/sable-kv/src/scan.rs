//! Prefix scan types with continuation-token pagination.

use serde::Deserialize;
use serde::Serialize;

use crate::read::KeyValueWithRevision;

/// Request to scan keys sharing a prefix.
///
/// Results are returned in ascending key order. When a page is truncated the
/// returned `continuation_token` resumes the scan after the last key returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRequest {
    pub prefix: String,
    pub limit: Option<u32>,
    pub continuation_token: Option<String>,
}

impl ScanRequest {
    /// Scan the first page of keys under `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            limit: None,
            continuation_token: None,
        }
    }

    /// Continue a scan from the token returned by a previous page.
    pub fn after(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of scan results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanResult {
    pub entries: Vec<KeyValueWithRevision>,
    pub count: u32,
    pub is_truncated: bool,
    pub continuation_token: Option<String>,
}
