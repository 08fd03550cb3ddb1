//! Field reads shared by local and remote sessions.
//!
//! A session exposes what a field holds as a [`FieldContent`] through the
//! [`FieldSource`] trait: a local session reads it from the backing store,
//! a remote session from the batch fetched by `begin_get`. Every read
//! operation is then one function over that content, so both session kinds
//! resolve slices, ranges and objects identically.

use crate::cache::FieldInfo;
use crate::error::{CoreError, CoreResult};
use crate::object::ObjectNode;
use crate::path::NodePath;
use crate::sample::{check_keys, resolve, Pick, Sample, Series, SlicePolicy};
use pulse_codec::Value;

/// What one field holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldContent {
    /// A whole record: plain data, a non-timed object or a legacy
    /// non-segmented time series.
    Record(Value),
    /// Time segments.
    Series(Series),
    /// A time series already resolved at one time.
    Sample(Sample),
    /// Object slices in index order.
    Objects(Vec<ObjectNode>),
    /// An object already resolved at one time.
    ObjectSlice(ObjectNode),
}

/// Source of field contents.
pub trait FieldSource {
    /// Content of the field at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the field holds nothing.
    fn content(&self, path: &NodePath) -> CoreResult<FieldContent>;

    /// Slice `index` of the object at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if the object has no such slice.
    fn object_slice(&self, path: &NodePath, index: usize) -> CoreResult<ObjectNode> {
        let slots = match self.content(path)? {
            FieldContent::Objects(slots) => slots,
            FieldContent::Record(value) => ObjectNode::from_value(value).into_slots()?,
            FieldContent::ObjectSlice(node) => return Ok(node),
            _ => {
                return Err(CoreError::invalid_argument(format!(
                    "{path} does not hold an object"
                )))
            }
        };
        slots
            .into_iter()
            .nth(index)
            .ok_or_else(|| CoreError::no_slice(format!("{path} slice {index}")))
    }
}

/// Whole value of a field; time series are stacked along a leading
/// dimension.
///
/// # Errors
///
/// Returns `NotFound` for a missing field.
pub fn read_data(src: &dyn FieldSource, path: &NodePath) -> CoreResult<Value> {
    match src.content(path)? {
        FieldContent::Record(value) => Ok(value),
        FieldContent::Series(series) => series.stacked(),
        FieldContent::Sample(sample) => Ok(sample.value),
        FieldContent::Objects(slots) => Ok(ObjectNode::Array(slots).to_value()),
        FieldContent::ObjectSlice(node) => Ok(ObjectNode::Array(vec![node]).to_value()),
    }
}

/// Keys held by a time-base field.
///
/// # Errors
///
/// Returns `NotFound` for a missing field and `InvalidArgument` if it holds
/// no numbers.
pub fn read_keys(src: &dyn FieldSource, time_base: &NodePath) -> CoreResult<Vec<f64>> {
    match src.content(time_base)? {
        FieldContent::Series(series) => Ok(series.keys),
        FieldContent::Sample(sample) => Ok(vec![sample.time]),
        FieldContent::Record(value) => {
            let keys = value.to_f64_vec().ok_or_else(|| {
                CoreError::invalid_argument(format!("time base {time_base} is not numeric"))
            })?;
            check_keys(&keys, &format!("time base {time_base}"))?;
            Ok(keys)
        }
        FieldContent::Objects(_) | FieldContent::ObjectSlice(_) => Err(
            CoreError::invalid_argument(format!("time base {time_base} is an object")),
        ),
    }
}

/// Every row and key of a time-sampled field.
///
/// A legacy record is split along its leading dimension and keyed by
/// `time_base`.
///
/// # Errors
///
/// Returns `NotFound` for a missing field or time base.
pub fn read_all(src: &dyn FieldSource, path: &NodePath, time_base: &NodePath) -> CoreResult<Series> {
    match src.content(path)? {
        FieldContent::Series(series) => Ok(series),
        FieldContent::Sample(sample) => Series::new(vec![sample.time], vec![sample.value]),
        FieldContent::Record(value) => Series::from_record(value, read_keys(src, time_base)?),
        FieldContent::Objects(_) | FieldContent::ObjectSlice(_) => Err(
            CoreError::invalid_argument(format!("{path} holds object slices")),
        ),
    }
}

/// The field at `time`, picked by `policy`.
///
/// # Errors
///
/// Returns `NoSlice` for a field without rows.
pub fn read_slice(
    src: &dyn FieldSource,
    path: &NodePath,
    time_base: &NodePath,
    time: f64,
    policy: SlicePolicy,
) -> CoreResult<Sample> {
    match src.content(path)? {
        FieldContent::Sample(sample) => Ok(sample),
        _ => read_all(src, path, time_base)?.sample(time, policy),
    }
}

/// Rows whose keys lie in `[t1, t2]`.
///
/// # Errors
///
/// Same as [`read_all`].
pub fn read_range(
    src: &dyn FieldSource,
    path: &NodePath,
    time_base: &NodePath,
    t1: f64,
    t2: f64,
) -> CoreResult<Series> {
    Ok(read_all(src, path, time_base)?.range(t1, t2))
}

/// The whole object at `path`.
///
/// # Errors
///
/// Returns `NotFound` for a missing field and `InvalidArgument` if the
/// field is a time series.
pub fn read_object(src: &dyn FieldSource, path: &NodePath) -> CoreResult<ObjectNode> {
    match src.content(path)? {
        FieldContent::Objects(slots) => Ok(ObjectNode::Array(slots)),
        FieldContent::ObjectSlice(node) => Ok(ObjectNode::Array(vec![node])),
        FieldContent::Record(value) => Ok(ObjectNode::from_value(value)),
        FieldContent::Series(_) | FieldContent::Sample(_) => Err(CoreError::invalid_argument(
            format!("{path} holds time-series rows"),
        )),
    }
}

/// The object slice at `time`. Structures cannot be interpolated, so
/// interpolation picks the previous slice.
///
/// # Errors
///
/// Returns `NoSlice` if the time base is empty or the object has no slice
/// at the resolved index.
pub fn read_object_slice(
    src: &dyn FieldSource,
    path: &NodePath,
    time_base: &NodePath,
    time: f64,
    policy: SlicePolicy,
) -> CoreResult<ObjectNode> {
    if let FieldContent::ObjectSlice(node) = src.content(path)? {
        return Ok(node);
    }
    let policy = match policy {
        SlicePolicy::Interpolation => SlicePolicy::Previous,
        other => other,
    };
    let keys = read_keys(src, time_base)?;
    match resolve(&keys, time, policy)? {
        Some(Pick::Row(index)) => src.object_slice(path, index),
        Some(Pick::Blend { i1, .. }) => src.object_slice(path, i1),
        None => Err(CoreError::no_slice(path.as_str())),
    }
}

/// Existence and dimensions of a field. Time series report the number of
/// rows first.
///
/// # Errors
///
/// Returns an error if the field cannot be read; a missing field is
/// reported as not existing.
pub fn read_dimension(src: &dyn FieldSource, path: &NodePath) -> CoreResult<FieldInfo> {
    let content = match src.content(path) {
        Ok(content) => content,
        Err(e) if e.is_not_found() => {
            return Ok(FieldInfo {
                exists: false,
                dims: Vec::new(),
            })
        }
        Err(e) => return Err(e),
    };
    Ok(match content {
        FieldContent::Record(value) => FieldInfo::of(&value),
        FieldContent::Sample(sample) => FieldInfo::of(&sample.value),
        FieldContent::Series(series) => {
            let mut dims = vec![series.len()];
            if let Some(first) = series.rows.first() {
                dims.extend(first.shape());
            }
            FieldInfo {
                exists: !series.is_empty(),
                dims,
            }
        }
        FieldContent::Objects(slots) => FieldInfo {
            exists: !slots.is_empty(),
            dims: vec![slots.len()],
        },
        FieldContent::ObjectSlice(_) => FieldInfo {
            exists: true,
            dims: vec![1],
        },
    })
}
