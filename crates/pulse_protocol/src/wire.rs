//! Value encoding of the types carried in batches.

use pulse_codec::{from_cbor, to_cbor, CodecError, CodecResult, Value};
use pulse_core::{FieldContent, GetKind, ObjectNode, PutKind, Sample, Series, SlicePolicy};

/// A message with a value encoding.
pub trait WireMessage: Sized {
    /// The message as a codec value.
    fn to_value(&self) -> Value;

    /// Parses a value produced by [`WireMessage::to_value`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidStructure` if a field is missing or mistyped.
    fn from_value(value: &Value) -> CodecResult<Self>;

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(&self.to_value())
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid message.
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::from_value(&from_cbor(bytes)?)
    }
}

/// Named fields of a struct value.
pub(crate) struct Fields<'a> {
    what: &'static str,
    fields: &'a [(String, Value)],
}

impl<'a> Fields<'a> {
    pub(crate) fn of(value: &'a Value, what: &'static str) -> CodecResult<Self> {
        value
            .as_struct()
            .map(|fields| Self { what, fields })
            .ok_or_else(|| CodecError::invalid_structure(format!("{what}: expected map")))
    }

    pub(crate) fn get(&self, name: &str) -> Option<&'a Value> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    fn missing(&self, name: &str) -> CodecError {
        CodecError::invalid_structure(format!("{}: missing or invalid {name}", self.what))
    }

    pub(crate) fn value(&self, name: &str) -> CodecResult<&'a Value> {
        self.get(name).ok_or_else(|| self.missing(name))
    }

    pub(crate) fn text(&self, name: &str) -> CodecResult<&'a str> {
        self.get(name)
            .and_then(Value::as_text)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn int(&self, name: &str) -> CodecResult<i32> {
        self.get(name)
            .and_then(Value::as_int)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn double(&self, name: &str) -> CodecResult<f64> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn doubles(&self, name: &str) -> CodecResult<Vec<f64>> {
        self.get(name)
            .and_then(Value::to_f64_vec)
            .ok_or_else(|| self.missing(name))
    }

    pub(crate) fn list(&self, name: &str) -> CodecResult<&'a [Value]> {
        self.get(name)
            .and_then(Value::as_list)
            .ok_or_else(|| self.missing(name))
    }
}

fn tagged(kind: &str, fields: Vec<(&str, Value)>) -> Value {
    let mut all = vec![("kind", Value::from(kind))];
    all.extend(fields);
    Value::record(all)
}

/// Encodes a put kind.
#[must_use]
pub fn put_kind_to_value(kind: &PutKind) -> Value {
    match kind {
        PutKind::Full { times } => tagged("full", vec![("times", Value::from(times.clone()))]),
        PutKind::Slice { time } => tagged("slice", vec![("time", Value::Double(*time))]),
        PutKind::ReplaceLast => tagged("replace_last", Vec::new()),
    }
}

/// Decodes a put kind.
///
/// # Errors
///
/// Returns `InvalidStructure` for unknown kinds.
pub fn put_kind_from_value(value: &Value) -> CodecResult<PutKind> {
    let fields = Fields::of(value, "put kind")?;
    match fields.text("kind")? {
        "full" => Ok(PutKind::Full {
            times: fields.doubles("times")?,
        }),
        "slice" => Ok(PutKind::Slice {
            time: fields.double("time")?,
        }),
        "replace_last" => Ok(PutKind::ReplaceLast),
        other => Err(CodecError::invalid_structure(format!(
            "unknown put kind {other}"
        ))),
    }
}

/// Encodes a get kind.
#[must_use]
pub fn get_kind_to_value(kind: &GetKind) -> Value {
    match kind {
        GetKind::Full => tagged("full", Vec::new()),
        GetKind::Slice { time, policy } => tagged(
            "slice",
            vec![
                ("time", Value::Double(*time)),
                ("policy", Value::Int(policy.code())),
            ],
        ),
    }
}

/// Decodes a get kind.
///
/// # Errors
///
/// Returns `InvalidStructure` for unknown kinds or policies.
pub fn get_kind_from_value(value: &Value) -> CodecResult<GetKind> {
    let fields = Fields::of(value, "get kind")?;
    match fields.text("kind")? {
        "full" => Ok(GetKind::Full),
        "slice" => {
            let policy = SlicePolicy::from_code(fields.int("policy")?)
                .map_err(|e| CodecError::invalid_structure(e.to_string()))?;
            Ok(GetKind::Slice {
                time: fields.double("time")?,
                policy,
            })
        }
        other => Err(CodecError::invalid_structure(format!(
            "unknown get kind {other}"
        ))),
    }
}

/// Encodes a field's content.
#[must_use]
pub fn content_to_value(content: &FieldContent) -> Value {
    match content {
        FieldContent::Record(value) => tagged("record", vec![("value", value.clone())]),
        FieldContent::Series(series) => tagged(
            "series",
            vec![
                ("keys", Value::from(series.keys.clone())),
                ("rows", Value::List(series.rows.clone())),
            ],
        ),
        FieldContent::Sample(sample) => tagged(
            "sample",
            vec![
                ("time", Value::Double(sample.time)),
                ("value", sample.value.clone()),
            ],
        ),
        FieldContent::Objects(slots) => tagged(
            "objects",
            vec![(
                "slots",
                Value::List(slots.iter().map(ObjectNode::to_value).collect()),
            )],
        ),
        FieldContent::ObjectSlice(node) => tagged("object_slice", vec![("value", node.to_value())]),
    }
}

/// Decodes a field's content.
///
/// # Errors
///
/// Returns `InvalidStructure` for unknown kinds or a series whose key and
/// row counts differ.
pub fn content_from_value(value: &Value) -> CodecResult<FieldContent> {
    let fields = Fields::of(value, "field content")?;
    match fields.text("kind")? {
        "record" => Ok(FieldContent::Record(fields.value("value")?.clone())),
        "series" => {
            let series = Series::new(fields.doubles("keys")?, fields.list("rows")?.to_vec())
                .map_err(|e| CodecError::invalid_structure(e.to_string()))?;
            Ok(FieldContent::Series(series))
        }
        "sample" => Ok(FieldContent::Sample(Sample {
            value: fields.value("value")?.clone(),
            time: fields.double("time")?,
        })),
        "objects" => Ok(FieldContent::Objects(
            fields
                .list("slots")?
                .iter()
                .cloned()
                .map(ObjectNode::from_value)
                .collect(),
        )),
        "object_slice" => Ok(FieldContent::ObjectSlice(ObjectNode::from_value(
            fields.value("value")?.clone(),
        ))),
        other => Err(CodecError::invalid_structure(format!(
            "unknown field content {other}"
        ))),
    }
}
