//! Server configuration.

/// Default limit on entries in one put batch.
pub const DEFAULT_MAX_BATCH_ENTRIES: usize = 100_000;

/// Default limit on the size of one request payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Configuration for the pulse server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Maximum entries, over all buckets, in one put batch.
    pub max_batch_entries: usize,
    /// Maximum size of a request payload in bytes.
    pub max_payload_bytes: usize,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_batch_entries: DEFAULT_MAX_BATCH_ENTRIES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Sets the maximum entries in one put batch.
    #[must_use]
    pub const fn with_max_batch_entries(mut self, max: usize) -> Self {
        self.max_batch_entries = max;
        self
    }

    /// Sets the maximum request payload size.
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
