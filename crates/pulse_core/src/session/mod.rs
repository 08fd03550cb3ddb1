//! Sessions on pulse files.
//!
//! A session is either a [`LocalSession`] on a backing store or a remote
//! session that batches its calls to a peer. Both implement
//! [`PulseAccess`], so callers holding a session cannot tell them apart.
//!
//! Every field is addressed by `(cpo, path)`: `cpo` names the record and
//! its occurrence (`"equilibrium/1"`), `path` the field inside it
//! (`"time_slice/profiles_1d/psi"`). Both are encoded with the path codec
//! before they reach the store.

mod local;
mod registry;

pub use local::LocalSession;
pub use registry::{FileStoreProvider, MemoryStoreProvider, StoreProvider, TargetRegistry};

use crate::cache::{CacheLevel, FieldInfo};
use crate::error::{CoreError, CoreResult};
use crate::object::ObjectNode;
use crate::path::{FieldPath, NodePath};
use crate::sample::{Sample, Series, SlicePolicy};
use crate::types::{GetKind, PulseTarget, PutKind};
use pulse_codec::Value;

/// Node path of the field `path` of record `cpo`.
///
/// # Errors
///
/// Returns `InvalidArgument` if either part is empty.
pub fn field_node(cpo: &str, path: &str) -> CoreResult<NodePath> {
    if FieldPath::parse(cpo).is_empty() {
        return Err(CoreError::invalid_argument("empty record path"));
    }
    if FieldPath::parse(path).is_empty() {
        return Err(CoreError::invalid_argument(format!(
            "empty field path in {cpo}"
        )));
    }
    Ok(NodePath::field(cpo, path))
}

/// Node path of record `cpo`.
///
/// # Errors
///
/// Returns `InvalidArgument` if the path is empty.
pub fn record_node(cpo: &str) -> CoreResult<NodePath> {
    let parsed = FieldPath::parse(cpo);
    if parsed.is_empty() {
        return Err(CoreError::invalid_argument("empty record path"));
    }
    Ok(parsed.encode())
}

/// Leaf prefix of the shape bookkeeping fields written alongside slices.
pub const SHAPE_PREFIX: &str = "shape_of";

/// Whether `path` is a shape bookkeeping field. Inside slice and
/// replace-last puts these are written whole instead of as a row.
#[must_use]
pub fn is_shape_field(path: &NodePath) -> bool {
    path.leaf().starts_with(SHAPE_PREFIX)
}

/// Operations of a session on one pulse file.
///
/// All methods take `&self`; implementations serialize calls with their own
/// lock, so a session may be shared between threads.
pub trait PulseAccess: Send + Sync {
    /// The pulse file this session is open on.
    fn target(&self) -> &PulseTarget;

    /// Opens a write bracket on a record.
    ///
    /// A full put clears the record first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a put is already open on the record.
    fn begin_put(&self, cpo: &str, kind: PutKind) -> CoreResult<()>;

    /// Closes the write bracket on a record, flushing what it collected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no put is open on the record.
    fn end_put(&self, cpo: &str) -> CoreResult<()>;

    /// Opens a read bracket on a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be fetched.
    fn begin_get(&self, cpo: &str, kind: GetKind) -> CoreResult<()>;

    /// Closes a read bracket on a record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no get is open on the record.
    fn end_get(&self, cpo: &str) -> CoreResult<()>;

    /// Writes a whole field, replacing what it held.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be stored.
    fn put_data(&self, cpo: &str, path: &str, value: Value) -> CoreResult<()>;

    /// Reads a whole field.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    fn get_data(&self, cpo: &str, path: &str) -> CoreResult<Value>;

    /// Existence and dimensions of a field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field cannot be read.
    fn get_dimension(&self, cpo: &str, path: &str) -> CoreResult<FieldInfo>;

    /// Deletes a field and everything below it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn delete_data(&self, cpo: &str, path: &str) -> CoreResult<()>;

    /// Deletes every field of a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn delete_all_fields(&self, cpo: &str) -> CoreResult<()>;

    /// Appends rows keyed by `times` to a time-sampled field.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the rows do not fit the field.
    fn put_segment(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        rows: Vec<Value>,
        times: Vec<f64>,
    ) -> CoreResult<()>;

    /// Appends one row keyed by `time`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the row does not fit the field.
    fn put_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        value: Value,
        time: f64,
    ) -> CoreResult<()>;

    /// Overwrites the last row of a time-sampled field.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if the field has no rows.
    fn replace_last_slice(&self, cpo: &str, path: &str, value: Value) -> CoreResult<()>;

    /// Every row and key of a time-sampled field.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    fn get_all(&self, cpo: &str, path: &str, time_base: &str) -> CoreResult<Series>;

    /// A time-sampled field at `time`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field and `NoSlice` for an empty one.
    fn get_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<Sample>;

    /// Rows of a time-sampled field with keys in `[t1, t2]`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    fn get_range(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        t1: f64,
        t2: f64,
    ) -> CoreResult<Series>;

    /// Whether a field is stored as time segments.
    ///
    /// # Errors
    ///
    /// Returns an error if the field cannot be inspected.
    fn is_sliced(&self, cpo: &str, path: &str) -> CoreResult<bool>;

    /// Stores a whole object, replacing what the field held.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a timed object that is not an array.
    fn put_object(&self, cpo: &str, path: &str, object: &ObjectNode, timed: bool)
        -> CoreResult<()>;

    /// Appends one object slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice cannot be stored.
    fn put_object_slice(&self, cpo: &str, path: &str, slice: &ObjectNode) -> CoreResult<()>;

    /// Replaces the last object slice.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if the field has no slices.
    fn replace_last_object_slice(&self, cpo: &str, path: &str, slice: &ObjectNode)
        -> CoreResult<()>;

    /// The whole object at a field.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    fn get_object(&self, cpo: &str, path: &str) -> CoreResult<ObjectNode>;

    /// The object slice at `time`.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if nothing is stored at the resolved index.
    fn get_object_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<ObjectNode>;

    /// Current cache level.
    fn cache_level(&self) -> CacheLevel;

    /// Changes the cache level, flushing deferred writes when leaving the
    /// deferred level.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn set_cache_level(&self, level: CacheLevel) -> CoreResult<()>;

    /// Writes deferred values of one record, or of every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn flush_cache(&self, cpo: Option<&str>) -> CoreResult<()>;

    /// Drops cached entries of one record, or of every record, without
    /// writing them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty record path.
    fn discard_cache(&self, cpo: Option<&str>) -> CoreResult<()>;

    /// Switches to read-through caching.
    ///
    /// # Errors
    ///
    /// Same as [`PulseAccess::set_cache_level`].
    fn enable_cache(&self) -> CoreResult<()> {
        self.set_cache_level(CacheLevel::ReadThrough)
    }

    /// Flushes and disables the cache.
    ///
    /// # Errors
    ///
    /// Same as [`PulseAccess::set_cache_level`].
    fn disable_cache(&self) -> CoreResult<()> {
        self.flush_cache(None)?;
        self.set_cache_level(CacheLevel::Disabled)
    }

    /// The most recent error message, if any.
    fn last_error(&self) -> Option<String>;

    /// Remembers an error message, replacing the previous one.
    fn record_error(&self, message: String);

    /// Forgets the last error.
    fn reset_error(&self);

    /// Closes the session. Further calls fail with `InvalidState`.
    ///
    /// # Errors
    ///
    /// Returns an error if deferred writes or the store cannot be flushed.
    fn close(&self) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_nodes_encode_both_parts() {
        let node = field_node("equilibrium/1", "time_slice/psi").unwrap();
        assert_eq!(node.as_str(), "equilibr331/1/time_sli200/psi0");
        assert_eq!(record_node("equilibrium/1").unwrap().as_str(), "equilibr331/1");
    }

    #[test]
    fn shape_fields_survive_encoding() {
        assert!(is_shape_field(&field_node("magnetics", "flux_loop/shape_of").unwrap()));
        assert!(!is_shape_field(&field_node("magnetics", "shape").unwrap()));
        assert!(!is_shape_field(&field_node("magnetics", "shape_of/ip").unwrap()));
    }

    #[test]
    fn empty_parts_rejected() {
        assert!(field_node("", "psi").is_err());
        assert!(field_node("magnetics", "").is_err());
        assert!(field_node("magnetics", "//").is_err());
        assert!(record_node("/").is_err());
    }
}
