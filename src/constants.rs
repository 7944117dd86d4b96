//! Fixed limits and well-known names.

/// Maximum CAS attempts before a counter increment gives up.
pub const MAX_CAS_RETRIES: u32 = 32;

/// Initial backoff between CAS retries.
pub const CAS_RETRY_INITIAL_BACKOFF_MS: u64 = 1;

/// Upper bound for CAS retry backoff.
pub const CAS_RETRY_MAX_BACKOFF_MS: u64 = 64;

/// Suffix of the counter that allocates keys in a node's leased space.
pub const LEASED_COUNTER_SUFFIX: &str = ".channel.counter.leased";

/// Suffix of the bootstrapper's counter for the unleased (free) space.
pub const FREE_COUNTER_SUFFIX: &str = ".channel.counter.free";

/// Name suffix of index channels provisioned for calculated channels.
pub const CALCULATED_INDEX_SUFFIX: &str = "_time";

/// Name of the resource group every external channel is linked under.
pub const CHANNEL_GROUP_NAME: &str = "channels";

/// Default namespace for metadata records.
pub const DEFAULT_KEY_PREFIX: &str = "__sable";

/// Default bound on a single peer RPC.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;

/// Maximum channels accepted in one create, delete or rename batch.
///
/// A channel stages up to six metadata writes (record, resource, group
/// relationship, and the same again for an overwritten channel), and one
/// commit must stay within `sable_kv::constants::MAX_BATCH_KEYS`.
pub const MAX_BATCH_CHANNELS: usize = 512;
