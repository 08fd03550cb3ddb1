//! # Pulse Codec
//!
//! Field values and their CBOR serialization.
//!
//! Every value stored in a pulse file, carried in a remote batch or held in
//! an object tree is a [`Value`]. This crate is the serialize/deserialize
//! collaborator of the backing store:
//!
//! - Integers use the shortest encoding and must fit in `i32`
//! - `Float` is encoded as single precision, `Double` as double precision
//! - Struct children keep insertion order
//! - Numeric n-d arrays use RFC 8746 typed arrays under tag 40
//! - No indefinite-length items
//!
//! ## Usage
//!
//! ```
//! use pulse_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::record([("ip", Value::Double(1.5e6))]);
//! let bytes = to_cbor(&value).unwrap();
//!
//! let decoded = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{from_cbor, CborDecoder};
pub use encoder::{to_cbor, CborEncoder};
pub use error::{CodecError, CodecResult};
pub use value::{Array, ArrayData, ElementType, Value, MAX_RANK};

/// Trait for types that can be encoded to CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Empty),
            any::<i32>().prop_map(Value::Int),
            (-1.0e30f32..1.0e30).prop_map(Value::Float),
            (-1.0e300f64..1.0e300).prop_map(Value::Double),
            "[a-z_]{0,12}".prop_map(Value::Text),
            prop::collection::vec(any::<i32>(), 0..16).prop_map(Value::from),
            prop::collection::vec(-1.0e9f64..1.0e9, 0..16).prop_map(Value::from),
        ]
    }

    fn tree() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(4, 64, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
                prop::collection::vec(("[a-z]{1,8}", inner), 0..6).prop_map(Value::Struct),
            ]
        })
    }

    #[test]
    fn roundtrip_nested_structures() {
        let value = Value::List(vec![
            Value::record([
                ("name", Value::from("coil_1")),
                ("current", Value::from(vec![1.0, 2.0, 3.0])),
            ]),
            Value::Empty,
            Value::record([("turns", Value::Int(12))]),
        ]);
        let bytes = value.encode().unwrap();
        assert_eq!(Value::decode(&bytes).unwrap(), value);
    }

    proptest! {
        #[test]
        fn any_tree_roundtrips(value in tree()) {
            let bytes = to_cbor(&value).unwrap();
            prop_assert_eq!(from_cbor(&bytes).unwrap(), value);
        }

        #[test]
        fn decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = from_cbor(&bytes);
        }
    }
}
