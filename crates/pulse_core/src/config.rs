//! Access layer configuration.

use crate::cache::CacheLevel;
use crate::error::{CoreError, CoreResult};

/// Configuration for the local access layer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Rows per time-series segment.
    pub segment_capacity: usize,

    /// Initial slot count of a new object, and the growth step.
    pub object_slot_chunk: usize,

    /// Serialized slice size (plus its 4-byte prefix) at which a slice gets
    /// a dedicated segment.
    pub object_slice_threshold: usize,

    /// Byte budget of a packed object segment.
    pub object_segment_budget: usize,

    /// Maximum number of open sessions.
    pub max_sessions: usize,

    /// Maximum number of live object trees.
    pub max_objects: usize,

    /// Cache level of newly opened sessions.
    pub cache_level: CacheLevel,

    /// Time-base path used when a caller gives none.
    pub default_time_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_capacity: 100,
            object_slot_chunk: 256,
            object_slice_threshold: 10_000,
            object_segment_budget: 30_000,
            max_sessions: 1000,
            max_objects: 100_000,
            cache_level: CacheLevel::Disabled,
            default_time_base: "time".to_string(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rows per time-series segment.
    #[must_use]
    pub const fn segment_capacity(mut self, rows: usize) -> Self {
        self.segment_capacity = rows;
        self
    }

    /// Sets the object slot growth step.
    #[must_use]
    pub const fn object_slot_chunk(mut self, slots: usize) -> Self {
        self.object_slot_chunk = slots;
        self
    }

    /// Sets the dedicated-segment threshold for object slices.
    #[must_use]
    pub const fn object_slice_threshold(mut self, bytes: usize) -> Self {
        self.object_slice_threshold = bytes;
        self
    }

    /// Sets the byte budget of packed object segments.
    #[must_use]
    pub const fn object_segment_budget(mut self, bytes: usize) -> Self {
        self.object_segment_budget = bytes;
        self
    }

    /// Sets the maximum number of open sessions.
    #[must_use]
    pub const fn max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = n;
        self
    }

    /// Sets the maximum number of live object trees.
    #[must_use]
    pub const fn max_objects(mut self, n: usize) -> Self {
        self.max_objects = n;
        self
    }

    /// Sets the cache level of new sessions.
    #[must_use]
    pub const fn cache_level(mut self, level: CacheLevel) -> Self {
        self.cache_level = level;
        self
    }

    /// Sets the default time-base path.
    #[must_use]
    pub fn default_time_base(mut self, path: impl Into<String>) -> Self {
        self.default_time_base = path.into();
        self
    }

    /// Checks that the limits are usable together.
    ///
    /// # Errors
    ///
    /// Returns an error if a capacity is zero or the packed-segment budget
    /// cannot hold a slice just under the dedicated-segment threshold.
    pub fn validate(&self) -> CoreResult<()> {
        if self.segment_capacity == 0 || self.object_slot_chunk == 0 {
            return Err(CoreError::invalid_argument(
                "segment capacity and object slot chunk must be positive",
            ));
        }
        if self.object_slice_threshold == 0 {
            return Err(CoreError::invalid_argument(
                "object slice threshold must be positive",
            ));
        }
        if self.object_segment_budget < self.object_slice_threshold {
            return Err(CoreError::invalid_argument(format!(
                "object segment budget {} is below the slice threshold {}",
                self.object_segment_budget, self.object_slice_threshold
            )));
        }
        if self.max_sessions == 0 || self.max_objects == 0 {
            return Err(CoreError::invalid_argument(
                "handle table capacities must be positive",
            ));
        }
        Ok(())
    }
}
