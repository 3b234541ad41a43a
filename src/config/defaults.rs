//! Default constants for userdir configuration.
//!
//! Listen address, storage location and fan-out limits used when no file,
//! environment variable or flag says otherwise.

// =============================================================================
// Network Defaults
// =============================================================================

/// Default HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1001";

// =============================================================================
// Storage Defaults
// =============================================================================

/// Default data directory for the RocksDB-backed stores
pub const DEFAULT_DATA_DIR: &str = "./userdir-data";

/// Key namespace for records in the key/value backends
pub const DEFAULT_NAMESPACE: &str = crate::codec::DEFAULT_NAMESPACE;

// =============================================================================
// Aggregation Defaults
// =============================================================================

/// Deadline for one point read during a fan-out listing (milliseconds).
/// A read that misses it is reported as an empty record.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;

/// Reads a single listing may run at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;
