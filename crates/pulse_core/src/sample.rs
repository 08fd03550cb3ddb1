//! Time series values and slice resolution.
//!
//! A [`Series`] is the in-memory form of a time-sampled field: ascending
//! keys and one row per key. Reading a slice at time `t` first brackets `t`
//! between two neighbouring keys and then applies a [`SlicePolicy`]:
//!
//! ```text
//! keys    0 ----- 10 ----- 20
//! t = 5        ^ i1=0, i2=1
//! PREVIOUS      -> row 0 at key 0
//! CLOSEST       -> row 0 at key 0 (ties go to i1)
//! INTERPOLATION -> row0 + (row1 - row0) * 0.5 at key 5
//! ```

use crate::error::{CoreError, CoreResult};
use pulse_codec::{Array, ArrayData, ElementType, Value};

/// How a slice read picks its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlicePolicy {
    /// The sample whose key is nearest to the requested time.
    Closest,
    /// The last sample at or before the requested time.
    Previous,
    /// Linear interpolation between the bracketing samples.
    Interpolation,
}

impl SlicePolicy {
    /// Integer code of [`SlicePolicy::Closest`].
    pub const CLOSEST_SAMPLE: i32 = 1;
    /// Integer code of [`SlicePolicy::Previous`].
    pub const PREVIOUS_SAMPLE: i32 = 2;
    /// Integer code of [`SlicePolicy::Interpolation`].
    pub const INTERPOLATION: i32 = 3;

    /// The policy's integer code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Closest => Self::CLOSEST_SAMPLE,
            Self::Previous => Self::PREVIOUS_SAMPLE,
            Self::Interpolation => Self::INTERPOLATION,
        }
    }

    /// Parses an integer code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unknown codes.
    pub fn from_code(code: i32) -> CoreResult<Self> {
        match code {
            Self::CLOSEST_SAMPLE => Ok(Self::Closest),
            Self::PREVIOUS_SAMPLE => Ok(Self::Previous),
            Self::INTERPOLATION => Ok(Self::Interpolation),
            other => Err(CoreError::invalid_argument(format!(
                "unknown slice policy {other}"
            ))),
        }
    }

    /// The policy actually applied to values of `element_type`.
    ///
    /// Integers are never interpolated or snapped forward; text can be
    /// snapped but not interpolated.
    #[must_use]
    pub fn effective_for(self, element_type: Option<ElementType>) -> Self {
        match (self, element_type) {
            (_, Some(ElementType::Int)) => Self::Previous,
            (Self::Interpolation, Some(ElementType::Float | ElementType::Double)) => self,
            (Self::Interpolation, _) => Self::Previous,
            _ => self,
        }
    }
}

/// Checks that `keys` can be bracketed: no NaN and never descending.
///
/// # Errors
///
/// Returns `CorruptSegment` naming `what` otherwise.
pub fn check_keys(keys: &[f64], what: &str) -> CoreResult<()> {
    if keys.iter().any(|k| k.is_nan()) {
        return Err(CoreError::corrupt_segment(format!("{what} holds a NaN time")));
    }
    if keys.windows(2).any(|w| w[1] < w[0]) {
        return Err(CoreError::corrupt_segment(format!(
            "{what} times are not ascending"
        )));
    }
    Ok(())
}

/// Indices of the keys bracketing `t`.
///
/// Returns `(0, 0)` when `t` precedes every key, `(n-1, n-1)` when it
/// follows every key, and otherwise the last index with key `<= t` and its
/// successor. `None` for an empty key array, a NaN `t`, or keys that are
/// not ascending around `t`.
#[must_use]
pub fn bracket(keys: &[f64], t: f64) -> Option<(usize, usize)> {
    let last = keys.len().checked_sub(1)?;
    if t.is_nan() {
        return None;
    }
    if t < keys[0] {
        return Some((0, 0));
    }
    if t >= keys[last] {
        return Some((last, last));
    }
    let i2 = keys.partition_point(|&k| k <= t);
    let i1 = i2.checked_sub(1)?;
    (i2 <= last).then_some((i1, i2))
}

/// What a slice read resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pick {
    /// Use the row at this index as stored.
    Row(usize),
    /// Blend rows `i1` and `i2` with weight `w` on `i2`.
    Blend {
        /// Earlier row.
        i1: usize,
        /// Later row.
        i2: usize,
        /// `(t - key1) / (key2 - key1)`.
        w: f64,
    },
}

/// Resolves a read at `t` against ascending `keys`.
///
/// `Ok(None)` for an empty key array.
///
/// # Errors
///
/// Returns `InvalidArgument` for a time that is not finite and
/// `CorruptSegment` for keys that cannot be bracketed.
pub fn resolve(keys: &[f64], t: f64, policy: SlicePolicy) -> CoreResult<Option<Pick>> {
    if !t.is_finite() {
        return Err(CoreError::invalid_argument(format!(
            "slice time {t} is not finite"
        )));
    }
    if keys.is_empty() {
        return Ok(None);
    }
    let Some((i1, i2)) = bracket(keys, t) else {
        return Err(CoreError::corrupt_segment(format!(
            "keys cannot be bracketed at {t}"
        )));
    };
    let (k1, k2) = (keys[i1], keys[i2]);
    Ok(Some(match policy {
        SlicePolicy::Previous => Pick::Row(i1),
        SlicePolicy::Closest => {
            if (t - k1).abs() <= (t - k2).abs() {
                Pick::Row(i1)
            } else {
                Pick::Row(i2)
            }
        }
        SlicePolicy::Interpolation => {
            if k1 == k2 {
                Pick::Row(i1)
            } else {
                Pick::Blend {
                    i1,
                    i2,
                    w: (t - k1) / (k2 - k1),
                }
            }
        }
    }))
}

/// Linear blend `v1 + (v2 - v1) * w`.
///
/// Floats stay single precision; arrays blend element-wise.
///
/// # Errors
///
/// Returns `InvalidArgument` if the values differ in type or shape, or
/// cannot be interpolated.
pub fn interpolate(v1: &Value, v2: &Value, w: f64) -> CoreResult<Value> {
    let lerp = |a: f64, b: f64| a + (b - a) * w;
    #[allow(clippy::cast_possible_truncation)]
    let lerp32 = |a: f32, b: f32| lerp(f64::from(a), f64::from(b)) as f32;

    match (v1, v2) {
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(lerp(*a, *b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(lerp32(*a, *b))),
        (Value::Array(a), Value::Array(b)) if a.shape() == b.shape() => {
            let data = match (a.data(), b.data()) {
                (ArrayData::Double(x), ArrayData::Double(y)) => {
                    ArrayData::Double(x.iter().zip(y).map(|(&p, &q)| lerp(p, q)).collect())
                }
                (ArrayData::Float(x), ArrayData::Float(y)) => {
                    ArrayData::Float(x.iter().zip(y).map(|(&p, &q)| lerp32(p, q)).collect())
                }
                _ => {
                    return Err(CoreError::invalid_argument(format!(
                        "cannot interpolate {:?} arrays",
                        a.element_type()
                    )))
                }
            };
            Ok(Value::Array(Array::new(a.shape().to_vec(), data)?))
        }
        _ => Err(CoreError::invalid_argument(
            "interpolated samples differ in type or shape",
        )),
    }
}

/// One value read at one time.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// The value.
    pub value: Value,
    /// The key it was read at (the requested time when interpolated).
    pub time: f64,
}

/// A time-sampled field: ascending keys and one row per key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    /// Ordering keys, ascending.
    pub keys: Vec<f64>,
    /// One row per key.
    pub rows: Vec<Value>,
}

impl Series {
    /// Pairs keys with rows.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the counts differ.
    pub fn new(keys: Vec<f64>, rows: Vec<Value>) -> CoreResult<Self> {
        if keys.len() != rows.len() {
            return Err(CoreError::invalid_argument(format!(
                "{} rows for {} times",
                rows.len(),
                keys.len()
            )));
        }
        Ok(Self { keys, rows })
    }

    /// Splits a legacy whole-record value along its leading dimension and
    /// pairs the parts with `keys`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for values with no leading dimension and
    /// `CorruptSegment` if the time base has a different length, holds a
    /// NaN or is not ascending.
    pub fn from_record(value: Value, keys: Vec<f64>) -> CoreResult<Self> {
        check_keys(&keys, "time base")?;
        let rows = split_leading(value)?;
        if rows.len() != keys.len() {
            return Err(CoreError::corrupt_segment(format!(
                "record has {} rows but its time base has {} keys",
                rows.len(),
                keys.len()
            )));
        }
        Ok(Self { keys, rows })
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Element type of the rows.
    #[must_use]
    pub fn element_type(&self) -> Option<ElementType> {
        self.rows.first().and_then(Value::element_type)
    }

    /// Reads the series at `t`.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` for an empty series, `InvalidArgument` for a time
    /// that is not finite, or an error if interpolation fails.
    pub fn sample(&self, t: f64, policy: SlicePolicy) -> CoreResult<Sample> {
        let policy = policy.effective_for(self.element_type());
        match resolve(&self.keys, t, policy)? {
            None => Err(CoreError::no_slice("empty series")),
            Some(Pick::Row(i)) => Ok(Sample {
                value: self.rows[i].clone(),
                time: self.keys[i],
            }),
            Some(Pick::Blend { i1, i2, w }) => Ok(Sample {
                value: interpolate(&self.rows[i1], &self.rows[i2], w)?,
                time: t,
            }),
        }
    }

    /// Rows whose keys lie in `[t1, t2]`.
    #[must_use]
    pub fn range(&self, t1: f64, t2: f64) -> Self {
        let (keys, rows) = self
            .keys
            .iter()
            .zip(&self.rows)
            .filter(|(k, _)| **k >= t1 && **k <= t2)
            .map(|(&k, v)| (k, v.clone()))
            .unzip();
        Self { keys, rows }
    }

    /// Stacks the rows into one value with a leading time dimension.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the rows do not share one layout.
    pub fn stacked(&self) -> CoreResult<Value> {
        let Some(first) = self.rows.first() else {
            return Ok(Value::Empty);
        };
        let Some(element_type) = first.element_type() else {
            return Ok(Value::List(self.rows.clone()));
        };
        let item_shape = first.shape();
        let mut data = ArrayData::empty(element_type);
        for row in &self.rows {
            if row.shape() != item_shape {
                return Err(CoreError::invalid_argument("rows differ in shape"));
            }
            let part = match row {
                Value::Int(n) => ArrayData::Int(vec![*n]),
                Value::Float(x) => ArrayData::Float(vec![*x]),
                Value::Double(x) => ArrayData::Double(vec![*x]),
                Value::Text(s) => ArrayData::Text(vec![s.clone()]),
                Value::Array(a) => a.data().clone(),
                _ => return Err(CoreError::invalid_argument("rows differ in type")),
            };
            data.extend_from(&part)
                .map_err(|_| CoreError::invalid_argument("rows differ in type"))?;
        }
        let mut shape = vec![self.rows.len()];
        shape.extend(item_shape);
        Ok(Value::Array(Array::new(shape, data)?))
    }
}

fn split_leading(value: Value) -> CoreResult<Vec<Value>> {
    match value {
        Value::Int(_) | Value::Float(_) | Value::Double(_) | Value::Text(_) => Ok(vec![value]),
        Value::List(items) => Ok(items),
        Value::Array(array) => {
            let (shape, data) = array.into_parts();
            let n = shape[0];
            let inner = shape[1..].to_vec();
            let step: usize = inner.iter().product();
            (0..n)
                .map(|i| {
                    let part = data.slice(i * step, (i + 1) * step);
                    if inner.is_empty() {
                        Ok(scalar_at(&part))
                    } else {
                        Ok(Value::Array(Array::new(inner.clone(), part)?))
                    }
                })
                .collect()
        }
        Value::Empty | Value::Struct(_) => Err(CoreError::invalid_argument(
            "value has no leading dimension to slice",
        )),
    }
}

fn scalar_at(single: &ArrayData) -> Value {
    match single {
        ArrayData::Int(v) => Value::Int(v[0]),
        ArrayData::Float(v) => Value::Float(v[0]),
        ArrayData::Double(v) => Value::Double(v[0]),
        ArrayData::Text(v) => Value::Text(v[0].clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Series {
        Series::new(
            vec![0.0, 10.0, 20.0],
            vec![Value::Double(0.0), Value::Double(100.0), Value::Double(200.0)],
        )
        .unwrap()
    }

    #[test]
    fn bracket_clamps_and_finds_neighbours() {
        let keys = [0.0, 10.0, 20.0];
        assert_eq!(bracket(&keys, -5.0), Some((0, 0)));
        assert_eq!(bracket(&keys, 0.0), Some((0, 1)));
        assert_eq!(bracket(&keys, 5.0), Some((0, 1)));
        assert_eq!(bracket(&keys, 10.0), Some((1, 2)));
        assert_eq!(bracket(&keys, 20.0), Some((2, 2)));
        assert_eq!(bracket(&keys, 25.0), Some((2, 2)));
        assert_eq!(bracket(&[], 1.0), None);
        assert_eq!(bracket(&[3.0], 1.0), Some((0, 0)));
        assert_eq!(bracket(&[3.0], 4.0), Some((0, 0)));
        assert_eq!(bracket(&keys, f64::NAN), None);
        assert_eq!(bracket(&[f64::NAN], 1.5), None);
    }

    #[test]
    fn non_finite_times_rejected() {
        for t in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            for policy in [
                SlicePolicy::Closest,
                SlicePolicy::Previous,
                SlicePolicy::Interpolation,
            ] {
                assert!(matches!(
                    ramp().sample(t, policy),
                    Err(CoreError::InvalidArgument { .. })
                ));
            }
        }
        assert!(resolve(&[], f64::NAN, SlicePolicy::Previous).is_err());
        assert_eq!(resolve(&[], 1.0, SlicePolicy::Previous).unwrap(), None);
    }

    #[test]
    fn unbracketable_keys_are_corrupt() {
        let err = resolve(&[f64::NAN], 1.5, SlicePolicy::Previous).unwrap_err();
        assert!(matches!(err, CoreError::CorruptSegment { .. }));
    }

    #[test]
    fn interpolation_between_samples() {
        let sample = ramp().sample(5.0, SlicePolicy::Interpolation).unwrap();
        assert_eq!(sample.value, Value::Double(50.0));
        assert_eq!(sample.time, 5.0);
    }

    #[test]
    fn closest_ties_go_to_earlier_sample() {
        let sample = ramp().sample(5.0, SlicePolicy::Closest).unwrap();
        assert_eq!(sample.value, Value::Double(0.0));
        assert_eq!(sample.time, 0.0);

        let sample = ramp().sample(6.0, SlicePolicy::Closest).unwrap();
        assert_eq!(sample.time, 10.0);
    }

    #[test]
    fn reads_outside_the_keys_clamp() {
        for policy in [
            SlicePolicy::Closest,
            SlicePolicy::Previous,
            SlicePolicy::Interpolation,
        ] {
            let after = ramp().sample(25.0, policy).unwrap();
            assert_eq!((after.value, after.time), (Value::Double(200.0), 20.0));
            let before = ramp().sample(-5.0, policy).unwrap();
            assert_eq!((before.value, before.time), (Value::Double(0.0), 0.0));
        }
    }

    #[test]
    fn integers_always_use_previous_sample() {
        let series = Series::new(vec![0.0, 10.0], vec![Value::Int(1), Value::Int(3)]).unwrap();
        for policy in [SlicePolicy::Interpolation, SlicePolicy::Closest] {
            let sample = series.sample(9.0, policy).unwrap();
            assert_eq!(sample, series.sample(9.0, SlicePolicy::Previous).unwrap());
            assert_eq!(sample.value, Value::Int(1));
        }
    }

    #[test]
    fn text_snaps_but_never_interpolates() {
        let series = Series::new(vec![0.0, 10.0], vec![Value::from("a"), Value::from("b")]).unwrap();
        assert_eq!(
            series.sample(9.0, SlicePolicy::Interpolation).unwrap().value,
            Value::from("a")
        );
        assert_eq!(
            series.sample(9.0, SlicePolicy::Closest).unwrap().value,
            Value::from("b")
        );
    }

    #[test]
    fn arrays_interpolate_elementwise() {
        let series = Series::new(
            vec![0.0, 2.0],
            vec![
                Value::from(vec![0.0f32, 10.0]),
                Value::from(vec![2.0f32, 30.0]),
            ],
        )
        .unwrap();
        let sample = series.sample(1.0, SlicePolicy::Interpolation).unwrap();
        assert_eq!(sample.value, Value::from(vec![1.0f32, 20.0]));
    }

    #[test]
    fn equal_keys_do_not_divide_by_zero() {
        let series = Series::new(
            vec![1.0, 1.0, 2.0],
            vec![Value::Double(5.0), Value::Double(6.0), Value::Double(7.0)],
        )
        .unwrap();
        let sample = series.sample(1.0, SlicePolicy::Interpolation).unwrap();
        assert!(sample.value.as_f64().unwrap().is_finite());
    }

    #[test]
    fn empty_series_has_no_slice() {
        assert!(matches!(
            Series::default().sample(0.0, SlicePolicy::Previous),
            Err(CoreError::NoSlice { .. })
        ));
    }

    #[test]
    fn mismatched_lengths_rejected() {
        assert!(Series::new(vec![0.0], vec![]).is_err());
    }

    #[test]
    fn range_is_inclusive() {
        let range = ramp().range(0.0, 10.0);
        assert_eq!(range.keys, vec![0.0, 10.0]);
        assert_eq!(range.rows.len(), 2);
        assert!(ramp().range(11.0, 19.0).is_empty());
    }

    #[test]
    fn legacy_record_splits_leading_dimension() {
        let value = Value::Array(
            Array::new(vec![3, 2], ArrayData::Int(vec![1, 2, 3, 4, 5, 6])).unwrap(),
        );
        let series = Series::from_record(value, vec![0.0, 1.0, 2.0]).unwrap();
        assert_eq!(series.rows[1], Value::from(vec![3, 4]));

        let series = Series::from_record(Value::from(vec![1.0, 2.0]), vec![0.0, 1.0]).unwrap();
        assert_eq!(series.rows, vec![Value::Double(1.0), Value::Double(2.0)]);
    }

    #[test]
    fn legacy_time_base_must_ascend() {
        let value = Value::from(vec![1.0, 2.0, 3.0]);
        let err = Series::from_record(value.clone(), vec![0.0, 2.0, 1.0]).unwrap_err();
        assert!(matches!(err, CoreError::CorruptSegment { .. }));
        let err = Series::from_record(value.clone(), vec![0.0, f64::NAN, 1.0]).unwrap_err();
        assert!(matches!(err, CoreError::CorruptSegment { .. }));
        assert!(Series::from_record(value, vec![0.0, 0.0, 1.0]).is_ok());
    }

    #[test]
    fn legacy_record_length_must_match_time_base() {
        let err = Series::from_record(Value::from(vec![1.0, 2.0]), vec![0.0]).unwrap_err();
        assert!(matches!(err, CoreError::CorruptSegment { .. }));
    }

    #[test]
    fn stacked_adds_leading_dimension() {
        let series = Series::new(
            vec![0.0, 1.0],
            vec![Value::from(vec![1.0, 2.0]), Value::from(vec![3.0, 4.0])],
        )
        .unwrap();
        let stacked = series.stacked().unwrap();
        assert_eq!(stacked.shape(), vec![2, 2]);
        assert_eq!(stacked.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        let restored = Series::from_record(stacked, series.keys.clone()).unwrap();
        assert_eq!(restored, series);
    }

    #[test]
    fn policy_codes() {
        assert_eq!(SlicePolicy::from_code(1).unwrap(), SlicePolicy::Closest);
        assert_eq!(SlicePolicy::Interpolation.code(), 3);
        assert!(SlicePolicy::from_code(0).is_err());
    }
}
