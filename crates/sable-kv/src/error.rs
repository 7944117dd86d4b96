//! Error types for key-value operations.

use snafu::Snafu;

/// Errors returned by [`crate::KeyValueStore`] implementations.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyValueStoreError {
    /// The requested key does not exist.
    #[snafu(display("key '{key}' not found"))]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The operation failed for a backend-specific reason.
    #[snafu(display("operation failed: {reason}"))]
    Failed {
        /// Description of the failure.
        reason: String,
    },

    /// Keys must be non-empty.
    #[snafu(display("key cannot be empty"))]
    EmptyKey,

    /// Key exceeds [`crate::constants::MAX_KEY_SIZE`].
    #[snafu(display("key size {size} exceeds maximum of {max} bytes"))]
    KeyTooLarge {
        /// Actual key size.
        size: u32,
        /// Maximum permitted size.
        max: u32,
    },

    /// Value exceeds [`crate::constants::MAX_VALUE_SIZE`].
    #[snafu(display("value size {size} exceeds maximum of {max} bytes"))]
    ValueTooLarge {
        /// Actual value size.
        size: u32,
        /// Maximum permitted size.
        max: u32,
    },

    /// Batch exceeds [`crate::constants::MAX_BATCH_KEYS`].
    #[snafu(display("batch size {size} exceeds maximum of {max} keys"))]
    BatchTooLarge {
        /// Number of keys in the batch.
        size: u32,
        /// Maximum permitted keys.
        max: u32,
    },

    /// The stored value did not match the expected value.
    #[snafu(display("compare-and-swap failed for key '{key}': expected {expected:?}, found {actual:?}"))]
    CompareAndSwapFailed {
        /// Key that was compared.
        key: String,
        /// Value the caller expected.
        expected: Option<String>,
        /// Value actually stored.
        actual: Option<String>,
    },

    /// The operation did not complete in time.
    #[snafu(display("operation timed out after {duration_ms}ms"))]
    Timeout {
        /// Elapsed time before giving up.
        duration_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_error_not_found_display() {
        let err = KeyValueStoreError::NotFound {
            key: "my-key".to_string(),
        };
        assert_eq!(err.to_string(), "key 'my-key' not found");
    }

    #[test]
    fn kv_error_compare_and_swap_failed_display() {
        let err = KeyValueStoreError::CompareAndSwapFailed {
            key: "counter".to_string(),
            expected: Some("10".to_string()),
            actual: Some("11".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "compare-and-swap failed for key 'counter': expected Some(\"10\"), found Some(\"11\")"
        );
    }

    #[test]
    fn kv_error_batch_too_large_display() {
        let err = KeyValueStoreError::BatchTooLarge { size: 5000, max: 4096 };
        assert_eq!(err.to_string(), "batch size 5000 exceeds maximum of 4096 keys");
    }

    #[test]
    fn kv_error_equality() {
        let err1 = KeyValueStoreError::EmptyKey;
        let err2 = KeyValueStoreError::EmptyKey;
        let err3 = KeyValueStoreError::Timeout { duration_ms: 100 };

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
        assert_eq!(err3.clone(), err3);
    }
}
