//! Fixed resource limits for key-value operations.

/// Maximum size of a single key in bytes.
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum size of a single value in bytes (1 MB).
pub const MAX_VALUE_SIZE: u32 = 1024 * 1024;

/// Maximum number of keys touched by one multi-key or batch write.
pub const MAX_BATCH_KEYS: u32 = 4096;

/// Default page size for scans that do not specify a limit.
pub const DEFAULT_SCAN_LIMIT: u32 = 1000;

/// Upper bound on the page size of a single scan.
pub const MAX_SCAN_RESULTS: u32 = 10_000;
