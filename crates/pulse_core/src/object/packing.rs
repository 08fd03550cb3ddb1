//! Packing object slices into segments.
//!
//! Each slice of a time-dependent object is one serialized structure.
//! Segments holding slices are byte segments (one-byte rows) keyed by slice
//! index, in one of two forms:
//!
//! ```text
//! Single:  | slice bytes |                          (exactly one slice)
//! Packed:  | len u32 | slice | len u32 | slice | ... (zero-filled tail)
//! ```
//!
//! Slices whose size plus prefix reaches the threshold get a dedicated
//! single segment. Smaller slices are packed into budget-sized segments.

use super::ObjectNode;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::path::NodePath;
use crate::segment::{SegmentDescriptor, SegmentForm};
use bytes::{Buf, BufMut};
use pulse_codec::{from_cbor, to_cbor};
use pulse_storage::{BackingStore, NodeId, RowIndex, SegmentData, SegmentLayout};
use tracing::debug;

/// Length prefix of a packed slice.
const PREFIX_SIZE: usize = 4;

/// Where a slice goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// After the last slice.
    Append,
    /// Over the last slice.
    ReplaceLast,
}

/// Writes object slices into a backing store.
pub struct ObjectEngine<'a> {
    store: &'a mut dyn BackingStore,
    threshold: usize,
    budget: usize,
}

impl<'a> ObjectEngine<'a> {
    /// Creates an engine using the object limits of `config`.
    pub fn new(store: &'a mut dyn BackingStore, config: &Config) -> Self {
        Self {
            store,
            threshold: config.object_slice_threshold,
            budget: config.object_segment_budget.max(config.object_slice_threshold),
        }
    }

    /// Stores a whole object at `path`, replacing what was there.
    ///
    /// A non-timed object is written as one record. A timed object must be
    /// an array; each slot becomes one slice.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a timed object that is not an array, or
    /// a store or codec error.
    pub fn put_object(&mut self, path: &NodePath, object: &ObjectNode, timed: bool) -> CoreResult<()> {
        self.store.delete_node(path.as_str())?;
        if !timed {
            let bytes = to_cbor(&object.to_value())?;
            let node = self.store.find_or_create_node(path.as_str())?;
            self.store.write_record(node, Some(&bytes))?;
            return Ok(());
        }
        let slots = object
            .slots()
            .ok_or_else(|| CoreError::invalid_argument("timed object is not an array of structures"))?;
        for slot in slots {
            self.put_object_segment(path, slot, Placement::Append)?;
        }
        Ok(())
    }

    /// Appends or replaces one slice of the object at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` when replacing on a field without slices and
    /// `InvalidArgument` if the field holds time-series rows.
    pub fn put_object_segment(
        &mut self,
        path: &NodePath,
        slice: &ObjectNode,
        placement: Placement,
    ) -> CoreResult<()> {
        let bytes = to_cbor(&slice.to_value())?;
        match placement {
            Placement::Append => self.append(path, &bytes),
            Placement::ReplaceLast => self.replace_last(path, &bytes),
        }
    }

    fn last_form(&self, node: NodeId, last: usize, path: &NodePath) -> CoreResult<SegmentForm> {
        let info = self.store.segment_info(node, last)?;
        match SegmentDescriptor::decode(&info.descriptor)? {
            SegmentDescriptor::Objects { form } => Ok(form),
            SegmentDescriptor::Series { .. } => Err(CoreError::invalid_argument(format!(
                "{path} holds time-series rows"
            ))),
        }
    }

    fn append(&mut self, path: &NodePath, bytes: &[u8]) -> CoreResult<()> {
        let node = self.store.find_or_create_node(path.as_str())?;
        let count = self.store.segment_count(node)?;
        let mut index = 0.0;
        let mut open_packed = None;
        if let Some(last) = count.checked_sub(1) {
            let form = self.last_form(node, last, path)?;
            let info = self.store.segment_info(node, last)?;
            index = info.end + 1.0;
            if form == SegmentForm::Packed {
                open_packed = Some((last, info));
            }
        }

        if bytes.len() + PREFIX_SIZE >= self.threshold {
            self.begin_single(node, index, bytes)?;
            debug!(%path, index, len = bytes.len(), "dedicated object segment");
            return Ok(());
        }

        let prefixed = prefixed(bytes)?;
        match open_packed {
            Some((last, info)) if info.leftover() >= prefixed.len() => {
                self.store
                    .put_segment_rows(node, RowIndex::Append, &prefixed)?;
                self.store
                    .update_segment(node, last, info.start, index, None)?;
            }
            _ => {
                let descriptor = SegmentDescriptor::Objects {
                    form: SegmentForm::Packed,
                }
                .encode()?;
                self.store.begin_segment(
                    node,
                    index,
                    index,
                    SegmentLayout {
                        row_size: 1,
                        capacity: self.budget,
                        descriptor,
                    },
                )?;
                self.store
                    .put_segment_rows(node, RowIndex::Append, &prefixed)?;
                debug!(%path, index, "opened packed object segment");
            }
        }
        Ok(())
    }

    fn replace_last(&mut self, path: &NodePath, bytes: &[u8]) -> CoreResult<()> {
        let node = self
            .store
            .find_node(path.as_str())?
            .ok_or_else(|| CoreError::no_slice(path.as_str()))?;
        let Some(last) = self.store.segment_count(node)?.checked_sub(1) else {
            return Err(CoreError::no_slice(path.as_str()));
        };
        let form = self.last_form(node, last, path)?;
        let (start, end) = self.store.segment_limits(node, last)?;
        if end < start {
            return Err(CoreError::no_slice(path.as_str()));
        }

        if end == start {
            // The segment holds only the replaced slice.
            self.store.drop_last_segment(node)?;
            debug!(%path, index = end, "dropped segment of replaced slice");
        } else {
            self.shrink_last(node, last, form, (start, end), path)?;
        }

        self.begin_single(node, end, bytes)?;
        debug!(%path, index = end, "replaced last object slice");
        Ok(())
    }

    /// Drops the last slice from the index range of segment `last`.
    fn shrink_last(
        &mut self,
        node: NodeId,
        last: usize,
        form: SegmentForm,
        (start, end): (f64, f64),
        path: &NodePath,
    ) -> CoreResult<()> {
        self.store
            .update_segment(node, last, start, end - 1.0, None)?;
        if form == SegmentForm::Packed && end - 1.0 == start {
            let data = self.store.read_segment(node, last)?;
            let remaining = packed_slices(&data, 1, path)?
                .first()
                .map(|slice| slice.to_vec())
                .ok_or_else(|| CoreError::corrupt_segment(format!("{path} lost its slice")))?;
            self.store
                .put_segment_rows(node, RowIndex::At(0), &remaining)?;
            let descriptor = SegmentDescriptor::Objects {
                form: SegmentForm::Single {
                    len: remaining.len(),
                },
            }
            .encode()?;
            self.store
                .update_segment(node, last, start, start, Some(descriptor))?;
            debug!(%path, index = start, "rewrote remaining slice unprefixed");
        }
        Ok(())
    }

    fn begin_single(&mut self, node: NodeId, index: f64, bytes: &[u8]) -> CoreResult<()> {
        let descriptor = SegmentDescriptor::Objects {
            form: SegmentForm::Single { len: bytes.len() },
        }
        .encode()?;
        self.store.begin_segment(
            node,
            index,
            index,
            SegmentLayout {
                row_size: 1,
                capacity: bytes.len(),
                descriptor,
            },
        )?;
        self.store.put_segment_rows(node, RowIndex::Append, bytes)?;
        Ok(())
    }
}

fn prefixed(bytes: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CoreError::invalid_argument("object slice too large"))?;
    let mut buf = Vec::with_capacity(PREFIX_SIZE + bytes.len());
    buf.put_u32_le(len);
    buf.put_slice(bytes);
    Ok(buf)
}

/// The first `count` slices of a packed segment.
fn packed_slices<'d>(data: &'d SegmentData, count: usize, path: &NodePath) -> CoreResult<Vec<&'d [u8]>> {
    let mut rest = data.used_bytes();
    let mut slices = Vec::with_capacity(count);
    for _ in 0..count {
        if rest.len() < PREFIX_SIZE {
            return Err(CoreError::corrupt_segment(format!(
                "{path}: length prefix past the end of the segment"
            )));
        }
        let len = rest.get_u32_le() as usize;
        if len > rest.len() {
            return Err(CoreError::corrupt_segment(format!(
                "{path}: length prefix {len} exceeds the {} remaining bytes",
                rest.len()
            )));
        }
        let (slice, tail) = rest.split_at(len);
        slices.push(slice);
        rest = tail;
    }
    Ok(slices)
}

fn single_slice<'d>(data: &'d SegmentData, len: usize, path: &NodePath) -> CoreResult<&'d [u8]> {
    data.bytes
        .get(..len)
        .ok_or_else(|| CoreError::corrupt_segment(format!("{path}: single slice is truncated")))
}

fn decode_slice(bytes: &[u8]) -> CoreResult<ObjectNode> {
    Ok(ObjectNode::from_value(from_cbor(bytes)?))
}

/// Index range `[start, end]` of a segment as slice counts, `None` when
/// the range is empty.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn slice_range(start: f64, end: f64) -> Option<(usize, usize)> {
    (end >= start && start >= 0.0).then(|| (start as usize, end as usize))
}

fn object_form(data: &SegmentData, index: usize, path: &NodePath) -> CoreResult<SegmentForm> {
    match SegmentDescriptor::decode(&data.info.descriptor)? {
        SegmentDescriptor::Objects { form } => Ok(form),
        SegmentDescriptor::Series { .. } => Err(CoreError::corrupt_segment(format!(
            "segment {index} of {path} is not an object segment"
        ))),
    }
}

/// Reads every slice of the object at `node`, in index order.
///
/// # Errors
///
/// Returns `CorruptSegment` if a segment does not walk cleanly.
pub fn read_object_slices(
    store: &dyn BackingStore,
    node: NodeId,
    path: &NodePath,
) -> CoreResult<Vec<ObjectNode>> {
    let mut slices = Vec::new();
    for index in 0..store.segment_count(node)? {
        let data = store.read_segment(node, index)?;
        let form = object_form(&data, index, path)?;
        let Some((first, last)) = slice_range(data.info.start, data.info.end) else {
            continue;
        };
        let count = last - first + 1;
        match form {
            SegmentForm::Single { len } => {
                if count != 1 {
                    return Err(CoreError::corrupt_segment(format!(
                        "segment {index} of {path} is single but spans {count} slices"
                    )));
                }
                slices.push(decode_slice(single_slice(&data, len, path)?)?);
            }
            SegmentForm::Packed => {
                for bytes in packed_slices(&data, count, path)? {
                    slices.push(decode_slice(bytes)?);
                }
            }
        }
    }
    Ok(slices)
}

/// Reads slice `slice` of the object at `node`, decoding only that slice.
///
/// # Errors
///
/// Returns `NoSlice` if no segment covers the index.
pub fn read_object_slice(
    store: &dyn BackingStore,
    node: NodeId,
    path: &NodePath,
    slice: usize,
) -> CoreResult<ObjectNode> {
    for index in 0..store.segment_count(node)? {
        let (start, end) = store.segment_limits(node, index)?;
        let Some((first, last)) = slice_range(start, end) else {
            continue;
        };
        if slice < first || slice > last {
            continue;
        }
        let data = store.read_segment(node, index)?;
        let offset = slice - first;
        return match object_form(&data, index, path)? {
            SegmentForm::Single { len } if offset == 0 => {
                decode_slice(single_slice(&data, len, path)?)
            }
            SegmentForm::Single { .. } => Err(CoreError::corrupt_segment(format!(
                "segment {index} of {path} is single but spans several slices"
            ))),
            SegmentForm::Packed => {
                let slices = packed_slices(&data, offset + 1, path)?;
                decode_slice(slices[offset])
            }
        };
    }
    Err(CoreError::no_slice(format!("{path}[{slice}]")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_codec::Value;
    use pulse_storage::InMemoryStore;

    fn path() -> NodePath {
        NodePath::from_encoded("ids0/aos0")
    }

    fn slice(n: i32) -> ObjectNode {
        let mut object = ObjectNode::with_capacity(1);
        object.put_value("n", 0, Value::Int(n), 1).unwrap();
        object.put_value("label", 0, Value::from("coil"), 1).unwrap();
        object.into_slots().unwrap().remove(0)
    }

    fn big_slice(bytes: usize) -> ObjectNode {
        ObjectNode::Composite(vec![(
            "blob".into(),
            ObjectNode::Scalar(Value::from(vec![0.5f64; bytes / 8])),
        )])
    }

    fn read_all(store: &InMemoryStore) -> Vec<ObjectNode> {
        let node = store.find_node(path().as_str()).unwrap().unwrap();
        read_object_slices(store, node, &path()).unwrap()
    }

    fn form(store: &InMemoryStore, index: usize) -> SegmentForm {
        let node = store.find_node(path().as_str()).unwrap().unwrap();
        let info = store.segment_info(node, index).unwrap();
        match SegmentDescriptor::decode(&info.descriptor).unwrap() {
            SegmentDescriptor::Objects { form } => form,
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    fn append(store: &mut InMemoryStore, config: &Config, s: &ObjectNode) {
        ObjectEngine::new(store, config)
            .put_object_segment(&path(), s, Placement::Append)
            .unwrap();
    }

    #[test]
    fn single_small_slice_roundtrips() {
        let mut store = InMemoryStore::new();
        append(&mut store, &Config::default(), &slice(1));
        assert_eq!(read_all(&store), vec![slice(1)]);
        assert_eq!(form(&store, 0), SegmentForm::Packed);
    }

    #[test]
    fn small_slices_share_a_packed_segment() {
        let mut store = InMemoryStore::new();
        let config = Config::default();
        for n in 0..5 {
            append(&mut store, &config, &slice(n));
        }
        let node = store.find_node(path().as_str()).unwrap().unwrap();
        assert_eq!(store.segment_count(node).unwrap(), 1);
        assert_eq!(store.segment_limits(node, 0).unwrap(), (0.0, 4.0));
        assert_eq!(read_all(&store), (0..5).map(slice).collect::<Vec<_>>());
    }

    #[test]
    fn full_budget_opens_new_segment() {
        let mut store = InMemoryStore::new();
        let one = to_cbor(&slice(0).to_value()).unwrap().len() + PREFIX_SIZE;
        let config = Config::new()
            .object_slice_threshold(one + 1)
            .object_segment_budget(one * 2 + 1);
        for n in 0..5 {
            append(&mut store, &config, &slice(n));
        }
        let node = store.find_node(path().as_str()).unwrap().unwrap();
        assert_eq!(store.segment_count(node).unwrap(), 3);
        assert_eq!(store.segment_limits(node, 1).unwrap(), (2.0, 3.0));
        assert_eq!(read_all(&store), (0..5).map(slice).collect::<Vec<_>>());
    }

    #[test]
    fn large_slices_get_dedicated_segments() {
        let mut store = InMemoryStore::new();
        let config = Config::default();
        append(&mut store, &config, &slice(0));
        append(&mut store, &config, &big_slice(12_000));
        append(&mut store, &config, &slice(2));

        let node = store.find_node(path().as_str()).unwrap().unwrap();
        assert_eq!(store.segment_count(node).unwrap(), 3);
        assert!(matches!(form(&store, 1), SegmentForm::Single { .. }));
        let info = store.segment_info(node, 1).unwrap();
        assert_eq!(info.capacity, info.used);
        assert_eq!(
            read_all(&store),
            vec![slice(0), big_slice(12_000), slice(2)]
        );
    }

    #[test]
    fn replace_in_packed_segment() {
        let mut store = InMemoryStore::new();
        let config = Config::default();
        for n in 0..3 {
            append(&mut store, &config, &slice(n));
        }
        ObjectEngine::new(&mut store, &config)
            .put_object_segment(&path(), &slice(30), Placement::ReplaceLast)
            .unwrap();

        assert_eq!(read_all(&store), vec![slice(0), slice(1), slice(30)]);
        assert_eq!(form(&store, 0), SegmentForm::Packed);
        assert!(matches!(form(&store, 1), SegmentForm::Single { .. }));
    }

    #[test]
    fn replace_leaving_one_slice_rewrites_it_unprefixed() {
        let mut store = InMemoryStore::new();
        let config = Config::default();
        append(&mut store, &config, &slice(0));
        append(&mut store, &config, &slice(1));
        ObjectEngine::new(&mut store, &config)
            .put_object_segment(&path(), &slice(10), Placement::ReplaceLast)
            .unwrap();

        let len = to_cbor(&slice(0).to_value()).unwrap().len();
        assert_eq!(form(&store, 0), SegmentForm::Single { len });
        assert_eq!(read_all(&store), vec![slice(0), slice(10)]);

        // Appending after a replace continues the index sequence.
        append(&mut store, &config, &slice(2));
        assert_eq!(read_all(&store), vec![slice(0), slice(10), slice(2)]);
    }

    #[test]
    fn repeated_replace_of_single_slice() {
        let mut store = InMemoryStore::new();
        let config = Config::default();
        append(&mut store, &config, &slice(0));
        for n in 1..4 {
            ObjectEngine::new(&mut store, &config)
                .put_object_segment(&path(), &slice(n), Placement::ReplaceLast)
                .unwrap();
        }
        assert_eq!(read_all(&store), vec![slice(3)]);
        let node = store.find_node(path().as_str()).unwrap().unwrap();
        assert_eq!(read_object_slice(&store, node, &path(), 0).unwrap(), slice(3));
        assert_eq!(store.segment_count(node).unwrap(), 1);

        // Replacing a dedicated last slice keeps the segment list flat.
        append(&mut store, &config, &slice(4));
        for n in 5..25 {
            ObjectEngine::new(&mut store, &config)
                .put_object_segment(&path(), &slice(n), Placement::ReplaceLast)
                .unwrap();
            assert_eq!(store.segment_count(node).unwrap(), 2);
        }
        assert_eq!(read_all(&store), vec![slice(3), slice(24)]);
        assert_eq!(store.segment_limits(node, 1).unwrap(), (1.0, 1.0));
    }

    #[test]
    fn replace_then_append_on_packed_segment() {
        let mut store = InMemoryStore::new();
        let one = to_cbor(&slice(0).to_value()).unwrap().len() + PREFIX_SIZE;
        let config = Config::new()
            .object_slice_threshold(one + 1)
            .object_segment_budget(one * 8);
        for n in 0..4 {
            append(&mut store, &config, &slice(n));
        }
        ObjectEngine::new(&mut store, &config)
            .put_object_segment(&path(), &slice(30), Placement::ReplaceLast)
            .unwrap();
        let node = store.find_node(path().as_str()).unwrap().unwrap();

        // The packed prefix table still walks its three remaining slices.
        assert_eq!(form(&store, 0), SegmentForm::Packed);
        assert_eq!(store.segment_limits(node, 0).unwrap(), (0.0, 2.0));
        let data = store.read_segment(node, 0).unwrap();
        let packed = packed_slices(&data, 3, &path()).unwrap();
        for (n, bytes) in packed.into_iter().enumerate() {
            assert_eq!(decode_slice(bytes).unwrap(), slice(n as i32));
        }
        assert!(matches!(form(&store, 1), SegmentForm::Single { .. }));

        // Appends continue after the replacement, below and above the
        // threshold.
        append(&mut store, &config, &slice(4));
        append(&mut store, &config, &big_slice(one * 2));
        append(&mut store, &config, &slice(6));
        assert_eq!(store.segment_count(node).unwrap(), 5);
        assert_eq!(form(&store, 2), SegmentForm::Packed);
        assert_eq!(store.segment_limits(node, 2).unwrap(), (4.0, 4.0));
        assert!(matches!(form(&store, 3), SegmentForm::Single { .. }));
        assert_eq!(store.segment_limits(node, 4).unwrap(), (6.0, 6.0));

        let expected = vec![
            slice(0),
            slice(1),
            slice(2),
            slice(30),
            slice(4),
            big_slice(one * 2),
            slice(6),
        ];
        assert_eq!(read_all(&store), expected);
        for (index, slot) in expected.iter().enumerate() {
            assert_eq!(&read_object_slice(&store, node, &path(), index).unwrap(), slot);
        }
    }

    #[test]
    fn replace_without_slices_fails() {
        let mut store = InMemoryStore::new();
        let err = ObjectEngine::new(&mut store, &Config::default())
            .put_object_segment(&path(), &slice(0), Placement::ReplaceLast)
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSlice { .. }));
    }

    #[test]
    fn read_single_slice_by_index() {
        let mut store = InMemoryStore::new();
        let config = Config::default();
        for n in 0..4 {
            append(&mut store, &config, &slice(n));
        }
        append(&mut store, &config, &big_slice(16_000));
        let node = store.find_node(path().as_str()).unwrap().unwrap();

        assert_eq!(read_object_slice(&store, node, &path(), 2).unwrap(), slice(2));
        assert_eq!(
            read_object_slice(&store, node, &path(), 4).unwrap(),
            big_slice(16_000)
        );
        assert!(matches!(
            read_object_slice(&store, node, &path(), 5),
            Err(CoreError::NoSlice { .. })
        ));
    }

    #[test]
    fn oversized_length_prefix_is_corrupt() {
        let mut store = InMemoryStore::new();
        append(&mut store, &Config::default(), &slice(0));
        let node = store.find_node(path().as_str()).unwrap().unwrap();
        store
            .put_segment_rows(node, RowIndex::At(0), &u32::MAX.to_le_bytes())
            .unwrap();
        assert!(matches!(
            read_object_slices(&store, node, &path()),
            Err(CoreError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn put_object_timed_and_untimed() {
        let mut object = ObjectNode::with_capacity(3);
        for n in 0..3 {
            object.put_value("n", n as usize, Value::Int(n), 3).unwrap();
        }
        let mut store = InMemoryStore::new();
        let config = Config::default();
        ObjectEngine::new(&mut store, &config)
            .put_object(&path(), &object, true)
            .unwrap();
        assert_eq!(read_all(&store), object.clone().into_slots().unwrap());

        ObjectEngine::new(&mut store, &config)
            .put_object(&path(), &object, false)
            .unwrap();
        let node = store.find_node(path().as_str()).unwrap().unwrap();
        assert_eq!(store.segment_count(node).unwrap(), 0);
        let record = store.read_record(node).unwrap().unwrap();
        assert_eq!(ObjectNode::from_value(from_cbor(&record).unwrap()), object);
    }

    #[test]
    fn object_segments_refuse_series_fields() {
        let mut store = InMemoryStore::new();
        crate::slice::SliceEngine::new(&mut store, 4)
            .put_slice(&path(), "time", &Value::Double(1.0), 0.0)
            .unwrap();
        let err = ObjectEngine::new(&mut store, &Config::default())
            .put_object_segment(&path(), &slice(0), Placement::Append)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }
}
