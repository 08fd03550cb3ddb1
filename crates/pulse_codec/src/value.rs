//! Dynamic value type for pulse-file fields.

use crate::error::{CodecError, CodecResult};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Maximum rank of an n-dimensional array.
pub const MAX_RANK: usize = 7;

/// Element type of scalar and array data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit signed integer.
    Int,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    Text,
}

impl ElementType {
    /// Stable numeric code used in descriptors.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Int => 1,
            Self::Float => 2,
            Self::Double => 3,
            Self::Text => 4,
        }
    }

    /// Parses a code produced by [`ElementType::code`].
    ///
    /// # Errors
    ///
    /// Returns an error for unknown codes.
    pub fn from_code(code: u8) -> CodecResult<Self> {
        match code {
            1 => Ok(Self::Int),
            2 => Ok(Self::Float),
            3 => Ok(Self::Double),
            4 => Ok(Self::Text),
            other => Err(CodecError::invalid_structure(format!(
                "unknown element type code {other}"
            ))),
        }
    }

    /// Width in bytes of one element, `None` for text.
    #[must_use]
    pub const fn width(self) -> Option<usize> {
        match self {
            Self::Int | Self::Float => Some(4),
            Self::Double => Some(8),
            Self::Text => None,
        }
    }

    /// Whether values of this type can be interpolated.
    #[must_use]
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }
}

/// Flat element storage of an [`Array`], in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// Integer elements.
    Int(Vec<i32>),
    /// Single-precision elements.
    Float(Vec<f32>),
    /// Double-precision elements.
    Double(Vec<f64>),
    /// String elements.
    Text(Vec<String>),
}

impl ArrayData {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    /// Whether there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of this storage.
    #[must_use]
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::Int(_) => ElementType::Int,
            Self::Float(_) => ElementType::Float,
            Self::Double(_) => ElementType::Double,
            Self::Text(_) => ElementType::Text,
        }
    }

    /// Empty storage of the given type.
    #[must_use]
    pub const fn empty(element_type: ElementType) -> Self {
        match element_type {
            ElementType::Int => Self::Int(Vec::new()),
            ElementType::Float => Self::Float(Vec::new()),
            ElementType::Double => Self::Double(Vec::new()),
            ElementType::Text => Self::Text(Vec::new()),
        }
    }

    /// Copies elements `[start, end)` into new storage.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            Self::Int(v) => Self::Int(v[start..end].to_vec()),
            Self::Float(v) => Self::Float(v[start..end].to_vec()),
            Self::Double(v) => Self::Double(v[start..end].to_vec()),
            Self::Text(v) => Self::Text(v[start..end].to_vec()),
        }
    }

    /// Appends all elements of `other`.
    ///
    /// # Errors
    ///
    /// Returns an error if the element types differ.
    pub fn extend_from(&mut self, other: &Self) -> CodecResult<()> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.extend_from_slice(b),
            (Self::Float(a), Self::Float(b)) => a.extend_from_slice(b),
            (Self::Double(a), Self::Double(b)) => a.extend_from_slice(b),
            (Self::Text(a), Self::Text(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(CodecError::type_mismatch(
                    format!("{:?}", a.element_type()),
                    format!("{:?}", b.element_type()),
                ))
            }
        }
        Ok(())
    }
}

/// An n-dimensional array with a fixed element type.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    data: ArrayData,
}

impl Array {
    /// Creates an array, checking that the shape matches the data.
    ///
    /// # Errors
    ///
    /// Returns an error if the rank is outside `1..=7` or the element count
    /// disagrees with the shape.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> CodecResult<Self> {
        if shape.is_empty() || shape.len() > MAX_RANK {
            return Err(CodecError::invalid_structure(format!(
                "array rank {} outside 1..={MAX_RANK}",
                shape.len()
            )));
        }
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(CodecError::IntegerOverflow)?;
        if expected != data.len() {
            return Err(CodecError::invalid_structure(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A one-dimensional array over `data`.
    #[must_use]
    pub fn vector(data: ArrayData) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Array dimensions.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat element storage.
    #[must_use]
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Element type.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Splits into shape and data.
    #[must_use]
    pub fn into_parts(self) -> (Vec<usize>, ArrayData) {
        (self.shape, self.data)
    }
}

/// A field value.
///
/// Leaf data is `Int`, `Float`, `Double`, `Text` or `Array`. `List` holds an
/// array of structures and `Struct` the ordered named children of one
/// structure instance. `Empty` marks an absent value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value.
    #[default]
    Empty,
    /// Integer scalar.
    Int(i32),
    /// Single-precision scalar.
    Float(f32),
    /// Double-precision scalar.
    Double(f64),
    /// String scalar.
    Text(String),
    /// Typed n-dimensional array.
    Array(Array),
    /// Ordered list of values (array of structures).
    List(Vec<Value>),
    /// Named children in insertion order.
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Element type of leaf data, `None` for containers and `Empty`.
    #[must_use]
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            Value::Int(_) => Some(ElementType::Int),
            Value::Float(_) => Some(ElementType::Float),
            Value::Double(_) => Some(ElementType::Double),
            Value::Text(_) => Some(ElementType::Text),
            Value::Array(a) => Some(a.element_type()),
            Value::Empty | Value::List(_) | Value::Struct(_) => None,
        }
    }

    /// Shape of leaf data; scalars have an empty shape.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Array(a) => a.shape().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Whether this is `Empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Returns the integer if this is `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns a numeric scalar widened to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(f64::from(*n)),
            Value::Float(x) => Some(f64::from(*x)),
            Value::Double(x) => Some(*x),
            _ => None,
        }
    }

    /// Returns the string if this is `Text`.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the array if this is `Array`.
    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the items if this is `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the children if this is `Struct`.
    #[must_use]
    pub fn as_struct(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a child of a `Struct` by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.as_struct()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Flattens numeric leaf data to `f64`s.
    ///
    /// Scalars yield one element. Text and containers yield `None`.
    #[must_use]
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Value::Array(a) => match a.data() {
                ArrayData::Int(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
                ArrayData::Float(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
                ArrayData::Double(v) => Some(v.clone()),
                ArrayData::Text(_) => None,
            },
            other => other.as_f64().map(|x| vec![x]),
        }
    }

    /// Builds a `Struct` from `(&str, Value)` pairs.
    #[must_use]
    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(x)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Double(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(Array::vector(ArrayData::Double(v)))
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::Array(Array::vector(ArrayData::Int(v)))
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Array(Array::vector(ArrayData::Float(v)))
    }
}

struct ArrayView<'a>(&'a Array);

impl Serialize for ArrayView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("shape", self.0.shape())?;
        match self.0.data() {
            ArrayData::Int(v) => map.serialize_entry("data", v)?,
            ArrayData::Float(v) => map.serialize_entry("data", v)?,
            ArrayData::Double(v) => map.serialize_entry("data", v)?,
            ArrayData::Text(v) => map.serialize_entry("data", v)?,
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Empty => serializer.serialize_none(),
            Value::Int(n) => serializer.serialize_i32(*n),
            Value::Float(x) => serializer.serialize_f32(*x),
            Value::Double(x) => serializer.serialize_f64(*x),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Array(a) => ArrayView(a).serialize(serializer),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Struct(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_shape_must_match_data() {
        let ok = Array::new(vec![2, 3], ArrayData::Double(vec![0.0; 6]));
        assert!(ok.is_ok());

        let bad = Array::new(vec![2, 3], ArrayData::Double(vec![0.0; 5]));
        assert!(matches!(bad, Err(CodecError::InvalidStructure { .. })));
    }

    #[test]
    fn array_rank_limits() {
        assert!(Array::new(vec![], ArrayData::Int(vec![])).is_err());
        assert!(Array::new(vec![1; 8], ArrayData::Int(vec![1])).is_err());
        assert!(Array::new(vec![1; 7], ArrayData::Int(vec![1])).is_ok());
    }

    #[test]
    fn element_type_codes_roundtrip() {
        for t in [
            ElementType::Int,
            ElementType::Float,
            ElementType::Double,
            ElementType::Text,
        ] {
            assert_eq!(ElementType::from_code(t.code()).unwrap(), t);
        }
        assert!(ElementType::from_code(0).is_err());
    }

    #[test]
    fn struct_lookup_keeps_order() {
        let v = Value::record([("b", Value::Int(2)), ("a", Value::Int(1))]);
        assert_eq!(v.get("a"), Some(&Value::Int(1)));
        assert_eq!(v.as_struct().unwrap()[0].0, "b");
        assert_eq!(v.get("missing"), None);
    }

    #[test]
    fn scalar_shape_is_empty() {
        assert!(Value::Double(1.0).shape().is_empty());
        assert_eq!(Value::from(vec![1.0, 2.0]).shape(), vec![2]);
    }

    #[test]
    fn to_f64_vec_widens() {
        assert_eq!(Value::Int(3).to_f64_vec(), Some(vec![3.0]));
        assert_eq!(
            Value::from(vec![1.5f32, 2.5]).to_f64_vec(),
            Some(vec![1.5, 2.5])
        );
        assert_eq!(Value::from("x").to_f64_vec(), None);
    }

    #[test]
    fn extend_rejects_mixed_types() {
        let mut a = ArrayData::Int(vec![1]);
        assert!(a.extend_from(&ArrayData::Int(vec![2])).is_ok());
        assert_eq!(a, ArrayData::Int(vec![1, 2]));
        assert!(a.extend_from(&ArrayData::Double(vec![2.0])).is_err());
    }
}
