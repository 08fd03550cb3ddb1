//! CBOR decoder for field values.

use crate::encoder::{TAG_F32_LE, TAG_F64_LE, TAG_I32_LE, TAG_MULTI_DIM};
use crate::error::{CodecError, CodecResult};
use crate::value::{Array, ArrayData, Value};
use bytes::Buf;

/// Decode a value from CBOR bytes.
///
/// The whole input must be consumed by one value.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR, use a construct that
/// has no [`Value`] counterpart, or carry trailing bytes.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CborDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining().len(),
        });
    }
    Ok(value)
}

/// A CBOR decoder over a borrowed buffer.
pub struct CborDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

/// Maximum allowed element count for arrays and maps.
/// This prevents allocation-based DoS from untrusted input.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Maximum container nesting.
const MAX_DEPTH: usize = 128;

impl<'a> CborDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 => {
                let n = self.decode_unsigned(additional_info)?;
                i32::try_from(n)
                    .map(Value::Int)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            1 => {
                let n = self.decode_unsigned(additional_info)?;
                // Negative integer: value is -(n+1)
                let n = i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?;
                i32::try_from(-n - 1)
                    .map(Value::Int)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            2 => Err(CodecError::unsupported_type("untagged byte string")),
            3 => self.decode_text(additional_info).map(Value::Text),
            4 => self.nested(|d| d.decode_list(additional_info)),
            5 => self.nested(|d| d.decode_struct(additional_info)),
            6 => {
                let tag = self.decode_unsigned(additional_info)?;
                if tag == TAG_MULTI_DIM {
                    self.decode_nd_array()
                } else {
                    Err(CodecError::unsupported_type(format!("tag {tag}")))
                }
            }
            7 => self.decode_simple(additional_info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<T>) -> CodecResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::DepthLimitExceeded {
                max_depth: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.data.len() - self.pos {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_header(&mut self) -> CodecResult<(u8, u8)> {
        let byte = self.read_byte()?;
        Ok((byte >> 5, byte & 0x1f))
    }

    #[inline]
    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => Ok(u64::from(self.read_byte()?)),
            25 => {
                let mut bytes = self.read_bytes(2)?;
                Ok(u64::from(bytes.get_u16()))
            }
            26 => {
                let mut bytes = self.read_bytes(4)?;
                Ok(u64::from(bytes.get_u32()))
            }
            27 => {
                let mut bytes = self.read_bytes(8)?;
                Ok(bytes.get_u64())
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            _ => Err(CodecError::IndefiniteLengthForbidden),
        }
    }

    fn decode_length(&mut self, additional_info: u8, max: u64) -> CodecResult<usize> {
        let len = self.decode_unsigned(additional_info)?;
        if len > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: max,
            });
        }
        usize::try_from(len).map_err(|_| CodecError::IntegerOverflow)
    }

    fn decode_text(&mut self, additional_info: u8) -> CodecResult<String> {
        let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(text.to_string())
    }

    fn expect_text(&mut self) -> CodecResult<String> {
        match self.read_header()? {
            (3, info) => self.decode_text(info),
            (major, _) => Err(CodecError::type_mismatch(
                "text",
                format!("major type {major}"),
            )),
        }
    }

    fn decode_list(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::List(items))
    }

    fn decode_struct(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut fields = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let name = self.expect_text()?;
            let value = self.decode()?;
            fields.push((name, value));
        }
        Ok(Value::Struct(fields))
    }

    fn decode_nd_array(&mut self) -> CodecResult<Value> {
        if self.read_header()? != (4, 2) {
            return Err(CodecError::invalid_structure(
                "multi-dimensional array must be [dims, elements]",
            ));
        }

        let (major, info) = self.read_header()?;
        if major != 4 {
            return Err(CodecError::invalid_structure("array dims must be a list"));
        }
        let rank = self.decode_length(info, MAX_CONTAINER_ELEMENTS)?;
        let mut shape = Vec::with_capacity(rank.min(16));
        for _ in 0..rank {
            let (major, info) = self.read_header()?;
            if major != 0 {
                return Err(CodecError::invalid_structure("array dim must be unsigned"));
            }
            let dim = self.decode_unsigned(info)?;
            shape.push(usize::try_from(dim).map_err(|_| CodecError::IntegerOverflow)?);
        }

        let data = match self.read_header()? {
            (6, info) => {
                let tag = self.decode_unsigned(info)?;
                let (major, info) = self.read_header()?;
                if major != 2 {
                    return Err(CodecError::invalid_structure(
                        "typed array payload must be a byte string",
                    ));
                }
                let len = self.decode_length(info, MAX_BYTES_LENGTH)?;
                let packed = self.read_bytes(len)?;
                unpack_typed(tag, packed)?
            }
            (4, info) => {
                let len = self.decode_length(info, MAX_CONTAINER_ELEMENTS)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.expect_text()?);
                }
                ArrayData::Text(items)
            }
            (major, _) => {
                return Err(CodecError::unsupported_type(format!(
                    "array elements of major type {major}"
                )))
            }
        };

        Array::new(shape, data).map(Value::Array)
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<Value> {
        match additional_info {
            22 | 23 => Ok(Value::Empty),
            26 => {
                let mut bytes = self.read_bytes(4)?;
                Ok(Value::Float(bytes.get_f32()))
            }
            27 => {
                let mut bytes = self.read_bytes(8)?;
                Ok(Value::Double(bytes.get_f64()))
            }
            20 | 21 => Err(CodecError::unsupported_type("boolean")),
            25 => Err(CodecError::unsupported_type("half-precision float")),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            _ => Err(CodecError::unsupported_type(format!(
                "simple value {additional_info}"
            ))),
        }
    }
}

fn unpack_typed(tag: u64, mut packed: &[u8]) -> CodecResult<ArrayData> {
    let width = match tag {
        TAG_I32_LE | TAG_F32_LE => 4,
        TAG_F64_LE => 8,
        other => return Err(CodecError::unsupported_type(format!("typed array tag {other}"))),
    };
    if packed.len() % width != 0 {
        return Err(CodecError::invalid_structure(format!(
            "typed array of {} bytes is not a multiple of {width}",
            packed.len()
        )));
    }
    let count = packed.len() / width;
    Ok(match tag {
        TAG_I32_LE => ArrayData::Int((0..count).map(|_| packed.get_i32_le()).collect()),
        TAG_F32_LE => ArrayData::Float((0..count).map(|_| packed.get_f32_le()).collect()),
        _ => ArrayData::Double((0..count).map(|_| packed.get_f64_le()).collect()),
    })
}
