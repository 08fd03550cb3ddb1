//! Segment descriptors and row layout.
//!
//! Backing stores keep a segment descriptor as opaque bytes next to the
//! rows. The engines store a codec-encoded [`SegmentDescriptor`] there,
//! telling time-series segments (fixed-size keyed rows) apart from object
//! segments (serialized structure slices) and recording how to read them.
//!
//! # Series rows
//!
//! ```text
//! key f64 LE | element 0 | element 1 | ... (i32 / f32 / f64 LE)
//! ```

use crate::error::{CoreError, CoreResult};
use bytes::{Buf, BufMut};
use pulse_codec::{from_cbor, to_cbor, Array, ArrayData, ElementType, Value};
use pulse_storage::{BackingStore, NodeId};

/// Bytes used by the key at the start of every series row.
pub const KEY_SIZE: usize = 8;

/// Element type and shape shared by every row of a time series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLayout {
    /// Element type of the items.
    pub element_type: ElementType,
    /// Item shape; empty for scalars.
    pub shape: Vec<usize>,
}

impl ItemLayout {
    /// Layout of a value that is to be stored as one row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for text, containers and empty values,
    /// which cannot be stored in fixed-size rows.
    pub fn of(value: &Value) -> CoreResult<Self> {
        let element_type = match value {
            Value::Int(_) | Value::Float(_) | Value::Double(_) | Value::Array(_) => value
                .element_type()
                .ok_or_else(|| CoreError::invalid_argument("value has no element type"))?,
            other => {
                return Err(CoreError::invalid_argument(format!(
                    "{} values cannot be stored in time segments",
                    kind_name(other)
                )))
            }
        };
        if element_type == ElementType::Text {
            return Err(CoreError::invalid_argument(
                "text values cannot be stored in time segments",
            ));
        }
        Ok(Self {
            element_type,
            shape: value.shape(),
        })
    }

    /// Elements per item.
    #[must_use]
    pub fn item_len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Bytes per row, key included.
    #[must_use]
    pub fn row_size(&self) -> usize {
        KEY_SIZE + self.element_type.width().unwrap_or(0) * self.item_len()
    }

    /// Appends one encoded row to `buf`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the value does not have this layout.
    pub fn encode_row(&self, buf: &mut Vec<u8>, key: f64, value: &Value) -> CoreResult<()> {
        let layout = Self::of(value)?;
        if layout != *self {
            return Err(CoreError::invalid_argument(format!(
                "row of type {:?} shape {:?} does not match series of type {:?} shape {:?}",
                layout.element_type, layout.shape, self.element_type, self.shape
            )));
        }
        buf.put_f64_le(key);
        match value {
            Value::Int(n) => buf.put_i32_le(*n),
            Value::Float(x) => buf.put_f32_le(*x),
            Value::Double(x) => buf.put_f64_le(*x),
            Value::Array(array) => match array.data() {
                ArrayData::Int(v) => v.iter().for_each(|&n| buf.put_i32_le(n)),
                ArrayData::Float(v) => v.iter().for_each(|&x| buf.put_f32_le(x)),
                ArrayData::Double(v) => v.iter().for_each(|&x| buf.put_f64_le(x)),
                ArrayData::Text(_) => {
                    return Err(CoreError::invalid_argument(
                        "text values cannot be stored in time segments",
                    ))
                }
            },
            other => {
                return Err(CoreError::invalid_argument(format!(
                    "{} values cannot be stored in time segments",
                    kind_name(other)
                )))
            }
        }
        Ok(())
    }

    /// Decodes one row produced by [`ItemLayout::encode_row`].
    ///
    /// # Errors
    ///
    /// Returns `CorruptSegment` if `row` is not exactly one row long.
    pub fn decode_row(&self, mut row: &[u8]) -> CoreResult<(f64, Value)> {
        if row.len() != self.row_size() {
            return Err(CoreError::corrupt_segment(format!(
                "row of {} bytes, expected {}",
                row.len(),
                self.row_size()
            )));
        }
        let key = row.get_f64_le();
        let n = self.item_len();
        let value = if self.shape.is_empty() {
            match self.element_type {
                ElementType::Int => Value::Int(row.get_i32_le()),
                ElementType::Float => Value::Float(row.get_f32_le()),
                _ => Value::Double(row.get_f64_le()),
            }
        } else {
            let data = match self.element_type {
                ElementType::Int => ArrayData::Int((0..n).map(|_| row.get_i32_le()).collect()),
                ElementType::Float => {
                    ArrayData::Float((0..n).map(|_| row.get_f32_le()).collect())
                }
                _ => ArrayData::Double((0..n).map(|_| row.get_f64_le()).collect()),
            };
            Value::Array(Array::new(self.shape.clone(), data)?)
        };
        Ok((key, value))
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Empty => "empty",
        Value::Text(_) => "text",
        Value::List(_) => "list",
        Value::Struct(_) => "struct",
        _ => "numeric",
    }
}

/// Physical form of an object segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentForm {
    /// Exactly one unprefixed serialized slice of `len` bytes at offset 0.
    Single {
        /// Serialized slice length.
        len: usize,
    },
    /// Slices back to back, each preceded by a 4-byte little-endian length.
    Packed,
}

/// Descriptor stored with every segment the engines write.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentDescriptor {
    /// Rows of a time series.
    Series {
        /// Item layout of every row.
        item: ItemLayout,
        /// Path of the companion time array (the key expression).
        time_base: String,
    },
    /// Serialized structure slices keyed by slice index.
    Objects {
        /// How the slices are laid out.
        form: SegmentForm,
    },
}

fn usize_value(n: usize) -> CoreResult<Value> {
    i32::try_from(n)
        .map(Value::Int)
        .map_err(|_| CoreError::invalid_argument(format!("{n} exceeds descriptor range")))
}

fn usize_field(value: &Value, name: &str) -> CoreResult<usize> {
    value
        .get(name)
        .and_then(Value::as_int)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CoreError::corrupt_segment(format!("descriptor field {name} missing")))
}

impl SegmentDescriptor {
    /// Encodes the descriptor for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension does not fit the descriptor format.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let value = match self {
            Self::Series { item, time_base } => Value::record([
                ("kind", Value::from("series")),
                ("type", Value::Int(i32::from(item.element_type.code()))),
                (
                    "shape",
                    Value::List(
                        item.shape
                            .iter()
                            .map(|&d| usize_value(d))
                            .collect::<CoreResult<_>>()?,
                    ),
                ),
                ("time_base", Value::from(time_base.as_str())),
            ]),
            Self::Objects {
                form: SegmentForm::Single { len },
            } => Value::record([
                ("kind", Value::from("objects")),
                ("form", Value::from("single")),
                ("len", usize_value(*len)?),
            ]),
            Self::Objects {
                form: SegmentForm::Packed,
            } => Value::record([
                ("kind", Value::from("objects")),
                ("form", Value::from("packed")),
            ]),
        };
        Ok(to_cbor(&value)?)
    }

    /// Decodes a stored descriptor.
    ///
    /// # Errors
    ///
    /// Returns `CorruptSegment` if the bytes are not a descriptor.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let value = from_cbor(bytes)
            .map_err(|e| CoreError::corrupt_segment(format!("unreadable descriptor: {e}")))?;
        match value.get("kind").and_then(Value::as_text) {
            Some("series") => {
                let code = value
                    .get("type")
                    .and_then(Value::as_int)
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| CoreError::corrupt_segment("descriptor type missing"))?;
                let element_type = ElementType::from_code(code)
                    .map_err(|e| CoreError::corrupt_segment(e.to_string()))?;
                let shape = value
                    .get("shape")
                    .and_then(Value::as_list)
                    .ok_or_else(|| CoreError::corrupt_segment("descriptor shape missing"))?
                    .iter()
                    .map(|d| {
                        d.as_int()
                            .and_then(|n| usize::try_from(n).ok())
                            .ok_or_else(|| CoreError::corrupt_segment("bad dimension"))
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                let time_base = value
                    .get("time_base")
                    .and_then(Value::as_text)
                    .unwrap_or_default()
                    .to_string();
                Ok(Self::Series {
                    item: ItemLayout {
                        element_type,
                        shape,
                    },
                    time_base,
                })
            }
            Some("objects") => {
                let form = match value.get("form").and_then(Value::as_text) {
                    Some("single") => SegmentForm::Single {
                        len: usize_field(&value, "len")?,
                    },
                    Some("packed") => SegmentForm::Packed,
                    other => {
                        return Err(CoreError::corrupt_segment(format!(
                            "unknown object segment form {other:?}"
                        )))
                    }
                };
                Ok(Self::Objects { form })
            }
            other => Err(CoreError::corrupt_segment(format!(
                "unknown segment kind {other:?}"
            ))),
        }
    }
}

/// Descriptor of the first segment of `node`, `None` if it has none.
pub(crate) fn first_descriptor(
    store: &dyn BackingStore,
    node: NodeId,
) -> CoreResult<Option<SegmentDescriptor>> {
    if store.segment_count(node)? == 0 {
        return Ok(None);
    }
    let info = store.segment_info(node, 0)?;
    SegmentDescriptor::decode(&info.descriptor).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_layouts() {
        let layout = ItemLayout::of(&Value::Double(1.0)).unwrap();
        assert_eq!(layout.row_size(), 16);
        assert!(layout.shape.is_empty());

        let layout = ItemLayout::of(&Value::Int(1)).unwrap();
        assert_eq!(layout.row_size(), 12);
    }

    #[test]
    fn array_layout_row_size() {
        let value = Value::Array(Array::new(vec![2, 3], ArrayData::Float(vec![0.0; 6])).unwrap());
        let layout = ItemLayout::of(&value).unwrap();
        assert_eq!(layout.row_size(), 8 + 4 * 6);
    }

    #[test]
    fn text_and_containers_rejected() {
        assert!(matches!(
            ItemLayout::of(&Value::from("x")),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(ItemLayout::of(&Value::List(vec![])).is_err());
        assert!(ItemLayout::of(&Value::Empty).is_err());
        let text = Value::Array(Array::vector(ArrayData::Text(vec!["a".into()])));
        assert!(ItemLayout::of(&text).is_err());
    }

    #[test]
    fn row_encoding_keeps_key_and_elements() {
        let value = Value::from(vec![1.5, -2.0, 3.25]);
        let layout = ItemLayout::of(&value).unwrap();
        let mut buf = Vec::new();
        layout.encode_row(&mut buf, 0.75, &value).unwrap();
        assert_eq!(buf.len(), layout.row_size());
        assert_eq!(&buf[..8], &0.75f64.to_le_bytes());

        let (key, decoded) = layout.decode_row(&buf).unwrap();
        assert_eq!(key, 0.75);
        assert_eq!(decoded, value);
    }

    #[test]
    fn float_rows_stay_single_precision() {
        let layout = ItemLayout::of(&Value::Float(0.5)).unwrap();
        let mut buf = Vec::new();
        layout.encode_row(&mut buf, 1.0, &Value::Float(0.5)).unwrap();
        assert_eq!(layout.decode_row(&buf).unwrap().1, Value::Float(0.5));
    }

    #[test]
    fn mismatched_row_rejected() {
        let layout = ItemLayout::of(&Value::Double(0.0)).unwrap();
        let mut buf = Vec::new();
        assert!(layout.encode_row(&mut buf, 0.0, &Value::Int(1)).is_err());
        assert!(layout
            .encode_row(&mut buf, 0.0, &Value::from(vec![1.0]))
            .is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn short_row_is_corrupt() {
        let layout = ItemLayout::of(&Value::Double(0.0)).unwrap();
        assert!(matches!(
            layout.decode_row(&[0; 10]),
            Err(CoreError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn descriptor_forms_roundtrip() {
        let descriptors = [
            SegmentDescriptor::Series {
                item: ItemLayout {
                    element_type: ElementType::Int,
                    shape: vec![4, 2],
                },
                time_base: "time".into(),
            },
            SegmentDescriptor::Objects {
                form: SegmentForm::Single { len: 1234 },
            },
            SegmentDescriptor::Objects {
                form: SegmentForm::Packed,
            },
        ];
        for descriptor in descriptors {
            let bytes = descriptor.encode().unwrap();
            assert_eq!(SegmentDescriptor::decode(&bytes).unwrap(), descriptor);
        }
    }

    #[test]
    fn garbage_descriptor_is_corrupt() {
        assert!(matches!(
            SegmentDescriptor::decode(&[0xff, 0x00]),
            Err(CoreError::CorruptSegment { .. })
        ));
        let other = to_cbor(&Value::record([("kind", Value::from("mystery"))])).unwrap();
        assert!(SegmentDescriptor::decode(&other).is_err());
    }
}
