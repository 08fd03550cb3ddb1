//! CBOR encoder for field values.

use crate::error::CodecResult;
use crate::value::{Array, ArrayData, Value};
use bytes::{BufMut, BytesMut};

/// RFC 8746 tag for a row-major multi-dimensional array.
pub(crate) const TAG_MULTI_DIM: u64 = 40;
/// RFC 8746 typed-array tag: sint32, little endian.
pub(crate) const TAG_I32_LE: u64 = 78;
/// RFC 8746 typed-array tag: float32, little endian.
pub(crate) const TAG_F32_LE: u64 = 85;
/// RFC 8746 typed-array tag: float64, little endian.
pub(crate) const TAG_F64_LE: u64 = 86;

/// Encode a value to CBOR bytes.
///
/// Struct children keep their insertion order, `Float` is written as a
/// single-precision float and `Double` as a double, so decoding returns an
/// equal value. Numeric arrays are packed as RFC 8746 typed arrays inside a
/// tag-40 multi-dimensional array.
///
/// # Errors
///
/// Returns an error if the value cannot be encoded.
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CborEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A CBOR encoder.
pub struct CborEncoder {
    buffer: Vec<u8>,
}

impl CborEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Empty => {
                // CBOR null
                self.buffer.push(0xf6);
                Ok(())
            }
            Value::Int(n) => {
                self.encode_integer(i64::from(*n));
                Ok(())
            }
            Value::Float(x) => {
                self.buffer.push(0xfa);
                self.buffer.extend_from_slice(&x.to_be_bytes());
                Ok(())
            }
            Value::Double(x) => {
                self.buffer.push(0xfb);
                self.buffer.extend_from_slice(&x.to_be_bytes());
                Ok(())
            }
            Value::Text(s) => {
                self.encode_text(s);
                Ok(())
            }
            Value::Array(a) => {
                self.encode_nd_array(a);
                Ok(())
            }
            Value::List(items) => self.encode_list(items),
            Value::Struct(fields) => self.encode_struct(fields),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // CBOR negative integers encode -(n+1)
            let abs_minus_one = (-(n + 1)) as u64;
            self.encode_unsigned(1, abs_minus_one);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_typed(&mut self, tag: u64, packed: &[u8]) {
        self.encode_unsigned(6, tag);
        self.encode_unsigned(2, packed.len() as u64);
        self.buffer.extend_from_slice(packed);
    }

    fn encode_nd_array(&mut self, array: &Array) {
        self.encode_unsigned(6, TAG_MULTI_DIM);
        self.encode_unsigned(4, 2);

        self.encode_unsigned(4, array.shape().len() as u64);
        for &dim in array.shape() {
            self.encode_unsigned(0, dim as u64);
        }

        match array.data() {
            ArrayData::Int(v) => {
                let mut packed = BytesMut::with_capacity(v.len() * 4);
                for &x in v {
                    packed.put_i32_le(x);
                }
                self.encode_typed(TAG_I32_LE, &packed);
            }
            ArrayData::Float(v) => {
                let mut packed = BytesMut::with_capacity(v.len() * 4);
                for &x in v {
                    packed.put_f32_le(x);
                }
                self.encode_typed(TAG_F32_LE, &packed);
            }
            ArrayData::Double(v) => {
                let mut packed = BytesMut::with_capacity(v.len() * 8);
                for &x in v {
                    packed.put_f64_le(x);
                }
                self.encode_typed(TAG_F64_LE, &packed);
            }
            ArrayData::Text(v) => {
                self.encode_unsigned(4, v.len() as u64);
                for s in v {
                    self.encode_text(s);
                }
            }
        }
    }

    fn encode_list(&mut self, items: &[Value]) -> CodecResult<()> {
        self.encode_unsigned(4, items.len() as u64);
        for item in items {
            self.encode(item)?;
        }
        Ok(())
    }

    fn encode_struct(&mut self, fields: &[(String, Value)]) -> CodecResult<()> {
        self.encode_unsigned(5, fields.len() as u64);
        for (name, value) in fields {
            self.encode_text(name);
            self.encode(value)?;
        }
        Ok(())
    }
}

impl Default for CborEncoder {
    fn default() -> Self {
        Self::new()
    }
}
