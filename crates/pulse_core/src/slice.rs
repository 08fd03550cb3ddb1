//! Segmented time-series storage.
//!
//! A time-sampled field is stored as an ordered list of segments, each a
//! fixed number of keyed rows. Appends first fill the leftover rows of the
//! last segment and then open new capacity-sized segments, so every segment
//! except the last is full and keys never decrease across segments.

use crate::error::{CoreError, CoreResult};
use crate::path::NodePath;
use crate::sample::Series;
use crate::segment::{ItemLayout, SegmentDescriptor};
use pulse_codec::Value;
use pulse_storage::{BackingStore, NodeId, RowIndex, SegmentLayout};
use tracing::debug;

/// Writes time-series segments into a backing store.
pub struct SliceEngine<'a> {
    store: &'a mut dyn BackingStore,
    capacity: usize,
}

impl<'a> SliceEngine<'a> {
    /// Creates an engine writing segments of `capacity` rows.
    pub fn new(store: &'a mut dyn BackingStore, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    /// Appends `rows` keyed by `times` to the field at `path`.
    ///
    /// Rows fill the leftover capacity of the last segment first; the rest
    /// goes to new segments. Writing no rows does nothing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the counts differ, the rows do not share
    /// the layout of the field, or the times are not ascending from the
    /// field's current end.
    pub fn put_segment(
        &mut self,
        path: &NodePath,
        time_base: &str,
        rows: &[Value],
        times: &[f64],
    ) -> CoreResult<()> {
        if rows.len() != times.len() {
            return Err(CoreError::invalid_argument(format!(
                "{} rows for {} times on {path}",
                rows.len(),
                times.len()
            )));
        }
        let Some(first) = rows.first() else {
            return Ok(());
        };
        if times.iter().any(|t| t.is_nan()) || times.windows(2).any(|w| w[1] < w[0]) {
            return Err(CoreError::invalid_argument(format!(
                "times written to {path} are not ascending"
            )));
        }

        let item = ItemLayout::of(first)?;
        let row_size = item.row_size();
        let mut encoded = Vec::with_capacity(row_size * rows.len());
        for (row, &time) in rows.iter().zip(times) {
            item.encode_row(&mut encoded, time, row)?;
        }

        let node = self.store.find_or_create_node(path.as_str())?;
        let count = self.store.segment_count(node)?;
        let mut written = 0;

        if count > 0 {
            let last = count - 1;
            let info = self.store.segment_info(node, last)?;
            match SegmentDescriptor::decode(&info.descriptor)? {
                SegmentDescriptor::Series { item: existing, .. } if existing == item => {}
                SegmentDescriptor::Series { item: existing, .. } => {
                    return Err(CoreError::invalid_argument(format!(
                        "{path} holds {:?} rows of shape {:?}, got {:?} of shape {:?}",
                        existing.element_type, existing.shape, item.element_type, item.shape
                    )))
                }
                SegmentDescriptor::Objects { .. } => {
                    return Err(CoreError::invalid_argument(format!(
                        "{path} holds object slices"
                    )))
                }
            }
            if info.used > 0 && times[0] < info.end {
                return Err(CoreError::invalid_argument(format!(
                    "time {} precedes the end {} of {path}",
                    times[0], info.end
                )));
            }

            let leftover = info.leftover();
            if leftover > 0 {
                let n = leftover.min(rows.len());
                self.store
                    .put_segment_rows(node, RowIndex::Append, &encoded[..n * row_size])?;
                let start = if info.used == 0 { times[0] } else { info.start };
                self.store
                    .update_segment(node, last, start, times[n - 1], None)?;
                debug!(%path, rows = n, segment = last, "filled leftover rows");
                written = n;
            }
        }

        if written < rows.len() {
            let descriptor = SegmentDescriptor::Series {
                item,
                time_base: time_base.to_string(),
            }
            .encode()?;
            while written < rows.len() {
                let end = (written + self.capacity).min(rows.len());
                self.store.begin_segment(
                    node,
                    times[written],
                    times[end - 1],
                    SegmentLayout {
                        row_size,
                        capacity: self.capacity,
                        descriptor: descriptor.clone(),
                    },
                )?;
                self.store.put_segment_rows(
                    node,
                    RowIndex::Append,
                    &encoded[written * row_size..end * row_size],
                )?;
                debug!(%path, rows = end - written, "opened segment");
                written = end;
            }
        }
        Ok(())
    }

    /// Appends one row keyed by `time`.
    ///
    /// # Errors
    ///
    /// Same as [`SliceEngine::put_segment`].
    pub fn put_slice(
        &mut self,
        path: &NodePath,
        time_base: &str,
        value: &Value,
        time: f64,
    ) -> CoreResult<()> {
        self.put_segment(path, time_base, std::slice::from_ref(value), &[time])
    }

    /// Overwrites the last row of the field, keeping its key.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if the field has no rows and `InvalidArgument` if
    /// the value does not have the field's layout.
    pub fn replace_last_slice(&mut self, path: &NodePath, value: &Value) -> CoreResult<()> {
        let node = self
            .store
            .find_node(path.as_str())?
            .ok_or_else(|| CoreError::no_slice(path.as_str()))?;
        let count = self.store.segment_count(node)?;
        if count == 0 {
            return Err(CoreError::no_slice(path.as_str()));
        }
        let last = count - 1;
        let data = self.store.read_segment(node, last)?;
        let SegmentDescriptor::Series { item, .. } = SegmentDescriptor::decode(&data.info.descriptor)?
        else {
            return Err(CoreError::invalid_argument(format!(
                "{path} holds object slices"
            )));
        };
        let Some(row_index) = data.info.used.checked_sub(1) else {
            return Err(CoreError::no_slice(path.as_str()));
        };
        let row_size = item.row_size();
        let row = data
            .bytes
            .get(row_index * row_size..(row_index + 1) * row_size)
            .ok_or_else(|| CoreError::corrupt_segment(format!("last row of {path} is truncated")))?;
        let (key, _) = item.decode_row(row)?;

        let mut encoded = Vec::with_capacity(row_size);
        item.encode_row(&mut encoded, key, value)?;
        self.store
            .put_segment_rows(node, RowIndex::At(row_index), &encoded)?;
        debug!(%path, key, "replaced last slice");
        Ok(())
    }
}

/// Reads every row of the time segments of `node`, trimmed to the rows
/// actually written.
///
/// # Errors
///
/// Returns `CorruptSegment` if a segment is not a time segment or its rows
/// do not decode.
pub fn read_series(store: &dyn BackingStore, node: NodeId, path: &NodePath) -> CoreResult<Series> {
    let mut series = Series::default();
    for index in 0..store.segment_count(node)? {
        let data = store.read_segment(node, index)?;
        let SegmentDescriptor::Series { item, .. } = SegmentDescriptor::decode(&data.info.descriptor)?
        else {
            return Err(CoreError::corrupt_segment(format!(
                "segment {index} of {path} is not a time segment"
            )));
        };
        let row_size = item.row_size();
        if data.info.row_size != row_size {
            return Err(CoreError::corrupt_segment(format!(
                "segment {index} of {path} has {}-byte rows, layout needs {row_size}",
                data.info.row_size
            )));
        }
        let used = data.used_bytes();
        if used.len() != data.info.used * row_size {
            return Err(CoreError::corrupt_segment(format!(
                "segment {index} of {path} claims {} rows but holds {} bytes",
                data.info.used,
                used.len()
            )));
        }
        for row in used.chunks_exact(row_size) {
            let (key, value) = item.decode_row(row)?;
            series.keys.push(key);
            series.rows.push(value);
        }
    }
    Ok(series)
}

/// Whether the field at `path` is stored as time segments.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn is_sliced(store: &dyn BackingStore, path: &NodePath) -> CoreResult<bool> {
    let Some(node) = store.find_node(path.as_str())? else {
        return Ok(false);
    };
    Ok(matches!(
        crate::segment::first_descriptor(store, node)?,
        Some(SegmentDescriptor::Series { .. })
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use pulse_storage::InMemoryStore;

    fn path() -> NodePath {
        NodePath::from_encoded("ids0/field0")
    }

    fn doubles(values: impl IntoIterator<Item = f64>) -> Vec<Value> {
        values.into_iter().map(Value::Double).collect()
    }

    fn read(store: &InMemoryStore) -> Series {
        let node = store.find_node(path().as_str()).unwrap().unwrap();
        read_series(store, node, &path()).unwrap()
    }

    #[test]
    fn rows_beyond_capacity_spill_into_new_segments() {
        let mut store = InMemoryStore::new();
        let times: Vec<f64> = (0..137).map(f64::from).collect();
        SliceEngine::new(&mut store, 100)
            .put_segment(&path(), "time", &doubles(times.clone()), &times)
            .unwrap();

        let node = store.find_node(path().as_str()).unwrap().unwrap();
        assert_eq!(store.segment_count(node).unwrap(), 2);
        assert_eq!(store.segment_limits(node, 1).unwrap(), (100.0, 136.0));

        let series = read(&store);
        assert_eq!(series.len(), 137);
        assert_eq!(series.keys, times);
    }

    #[test]
    fn appends_fill_leftover_rows_first() {
        let mut store = InMemoryStore::new();
        let mut engine = SliceEngine::new(&mut store, 4);
        engine
            .put_segment(&path(), "time", &doubles([0.0, 1.0, 2.0]), &[0.0, 1.0, 2.0])
            .unwrap();
        engine
            .put_segment(&path(), "time", &doubles([3.0, 4.0]), &[3.0, 4.0])
            .unwrap();

        let node = store.find_node(path().as_str()).unwrap().unwrap();
        assert_eq!(store.segment_count(node).unwrap(), 2);
        let first = store.segment_info(node, 0).unwrap();
        assert_eq!((first.used, first.start, first.end), (4, 0.0, 3.0));
        let second = store.segment_info(node, 1).unwrap();
        assert_eq!((second.used, second.start, second.end), (1, 4.0, 4.0));
        assert_eq!(read(&store).rows, doubles([0.0, 1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn empty_write_is_a_noop() {
        let mut store = InMemoryStore::new();
        SliceEngine::new(&mut store, 4)
            .put_segment(&path(), "time", &[], &[])
            .unwrap();
        assert_eq!(store.find_node(path().as_str()).unwrap(), None);
    }

    #[test]
    fn mismatched_counts_rejected() {
        let mut store = InMemoryStore::new();
        let err = SliceEngine::new(&mut store, 4)
            .put_segment(&path(), "time", &doubles([1.0]), &[0.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn layout_change_rejected() {
        let mut store = InMemoryStore::new();
        let mut engine = SliceEngine::new(&mut store, 4);
        engine
            .put_slice(&path(), "time", &Value::Double(1.0), 0.0)
            .unwrap();
        assert!(engine
            .put_slice(&path(), "time", &Value::Int(1), 1.0)
            .is_err());
        assert!(engine
            .put_slice(&path(), "time", &Value::from(vec![1.0, 2.0]), 1.0)
            .is_err());
    }

    #[test]
    fn time_going_backwards_rejected() {
        let mut store = InMemoryStore::new();
        let mut engine = SliceEngine::new(&mut store, 4);
        engine
            .put_slice(&path(), "time", &Value::Double(1.0), 5.0)
            .unwrap();
        assert!(engine
            .put_slice(&path(), "time", &Value::Double(2.0), 4.0)
            .is_err());
        assert!(engine
            .put_segment(&path(), "time", &doubles([1.0, 2.0]), &[7.0, 6.0])
            .is_err());
        // Equal keys are allowed.
        engine
            .put_slice(&path(), "time", &Value::Double(3.0), 5.0)
            .unwrap();
    }

    #[test]
    fn text_rows_rejected() {
        let mut store = InMemoryStore::new();
        let err = SliceEngine::new(&mut store, 4)
            .put_slice(&path(), "time", &Value::from("label"), 0.0)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn replace_last_slice_keeps_key() {
        let mut store = InMemoryStore::new();
        let mut engine = SliceEngine::new(&mut store, 2);
        engine
            .put_segment(&path(), "time", &doubles([1.0, 2.0, 3.0]), &[0.0, 1.0, 2.0])
            .unwrap();
        engine
            .replace_last_slice(&path(), &Value::Double(30.0))
            .unwrap();

        let series = read(&store);
        assert_eq!(series.keys, vec![0.0, 1.0, 2.0]);
        assert_eq!(series.rows, doubles([1.0, 2.0, 30.0]));
    }

    #[test]
    fn replace_without_slices_fails() {
        let mut store = InMemoryStore::new();
        let err = SliceEngine::new(&mut store, 2)
            .replace_last_slice(&path(), &Value::Double(1.0))
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSlice { .. }));
    }

    #[test]
    fn array_rows_roundtrip() {
        let mut store = InMemoryStore::new();
        let rows = vec![Value::from(vec![1, 2, 3]), Value::from(vec![4, 5, 6])];
        SliceEngine::new(&mut store, 10)
            .put_segment(&path(), "time", &rows, &[0.1, 0.2])
            .unwrap();
        assert_eq!(read(&store).rows, rows);
    }

    #[test]
    fn is_sliced_tracks_segments() {
        let mut store = InMemoryStore::new();
        assert!(!is_sliced(&store, &path()).unwrap());
        let node = store.find_or_create_node(path().as_str()).unwrap();
        store.write_record(node, Some(b"x")).unwrap();
        assert!(!is_sliced(&store, &path()).unwrap());
        SliceEngine::new(&mut store, 2)
            .put_slice(&path(), "time", &Value::Double(1.0), 0.0)
            .unwrap();
        assert!(is_sliced(&store, &path()).unwrap());
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_contents(
            values in prop::collection::vec(-1e6f64..1e6, 1..60),
            cuts in prop::collection::vec(0usize..60, 0..6),
            capacity in 1usize..9,
        ) {
            let times: Vec<f64> = (0..values.len()).map(|i| i as f64 * 0.5).collect();
            let mut bounds: Vec<usize> = cuts.into_iter().map(|c| c % (values.len() + 1)).collect();
            bounds.push(0);
            bounds.push(values.len());
            bounds.sort_unstable();

            let mut store = InMemoryStore::new();
            let mut engine = SliceEngine::new(&mut store, capacity);
            for w in bounds.windows(2) {
                engine
                    .put_segment(&path(), "time", &doubles(values[w[0]..w[1]].iter().copied()), &times[w[0]..w[1]])
                    .unwrap();
            }

            let series = read(&store);
            prop_assert_eq!(series.keys, times);
            prop_assert_eq!(series.rows, doubles(values.iter().copied()));

            // Every segment but the last is full.
            let node = store.find_node(path().as_str()).unwrap().unwrap();
            let count = store.segment_count(node).unwrap();
            for i in 0..count.saturating_sub(1) {
                let info = store.segment_info(node, i).unwrap();
                prop_assert_eq!(info.used, info.capacity);
            }
        }
    }
}
