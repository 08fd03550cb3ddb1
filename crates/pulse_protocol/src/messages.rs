//! Protocol messages.
//!
//! Each procedure takes one request message and answers with one reply.
//! Paths travel already encoded, as node paths.

use crate::wire::{
    content_from_value, content_to_value, get_kind_from_value, get_kind_to_value,
    put_kind_from_value, put_kind_to_value, Fields, WireMessage,
};
use pulse_codec::{CodecError, CodecResult, Value};
use pulse_core::{FieldContent, GetKind, PutKind};

/// Opaque session token handed out by a peer.
///
/// Travels as two 32-bit halves, low half first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(pub i64);

impl SessionToken {
    #[allow(clippy::cast_possible_truncation)]
    fn to_value(self) -> Value {
        let raw = self.0 as u64;
        Value::List(vec![
            Value::Int(raw as u32 as i32),
            Value::Int((raw >> 32) as u32 as i32),
        ])
    }

    #[allow(clippy::cast_sign_loss)]
    fn from_value(value: &Value) -> CodecResult<Self> {
        match value.as_list() {
            Some([Value::Int(lo), Value::Int(hi)]) => {
                let raw = u64::from(*lo as u32) | (u64::from(*hi as u32) << 32);
                Ok(Self(raw as i64))
            }
            _ => Err(CodecError::invalid_structure("session token: expected two ints")),
        }
    }
}

fn session_of(fields: &Fields<'_>) -> CodecResult<SessionToken> {
    SessionToken::from_value(fields.value("session")?)
}

/// Opens a session on an existing pulse file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Database name.
    pub name: String,
    /// Shot number.
    pub shot: i32,
    /// Run number.
    pub run: i32,
}

impl WireMessage for OpenRequest {
    fn to_value(&self) -> Value {
        Value::record([
            ("name", Value::from(self.name.as_str())),
            ("shot", Value::Int(self.shot)),
            ("run", Value::Int(self.run)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "open request")?;
        Ok(Self {
            name: fields.text("name")?.to_string(),
            shot: fields.int("shot")?,
            run: fields.int("run")?,
        })
    }
}

/// Creates a pulse file and opens a session on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Database name.
    pub name: String,
    /// Shot number.
    pub shot: i32,
    /// Run number.
    pub run: i32,
    /// Shot of the reference pulse.
    pub ref_shot: i32,
    /// Run of the reference pulse.
    pub ref_run: i32,
}

impl WireMessage for CreateRequest {
    fn to_value(&self) -> Value {
        Value::record([
            ("name", Value::from(self.name.as_str())),
            ("shot", Value::Int(self.shot)),
            ("run", Value::Int(self.run)),
            ("ref_shot", Value::Int(self.ref_shot)),
            ("ref_run", Value::Int(self.ref_run)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "create request")?;
        Ok(Self {
            name: fields.text("name")?.to_string(),
            shot: fields.int("shot")?,
            run: fields.int("run")?,
            ref_shot: fields.int("ref_shot")?,
            ref_run: fields.int("ref_run")?,
        })
    }
}

/// Answer to open and create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReply {
    /// Token to pass with every later call.
    pub session: SessionToken,
}

impl WireMessage for SessionReply {
    fn to_value(&self) -> Value {
        Value::record([("session", self.session.to_value())])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "session reply")?;
        Ok(Self {
            session: session_of(&fields)?,
        })
    }
}

/// Closes a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseRequest {
    /// The session to close.
    pub session: SessionToken,
}

impl WireMessage for CloseRequest {
    fn to_value(&self) -> Value {
        Value::record([("session", self.session.to_value())])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "close request")?;
        Ok(Self {
            session: session_of(&fields)?,
        })
    }
}

/// One collected write.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Encoded node path of the field.
    pub name: String,
    /// The value: a whole field, a list of rows, or a list of object slots.
    pub value: Value,
    /// Keys of the rows, when they differ from the batch's.
    pub times: Vec<f64>,
    /// Whether an object entry is time-dependent.
    pub timed: bool,
    /// Whether an object entry holds slices for an existing field rather
    /// than a whole object.
    pub slice: bool,
}

impl Entry {
    /// A plain entry.
    #[must_use]
    pub fn plain(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            times: Vec::new(),
            timed: false,
            slice: false,
        }
    }

    /// Rows keyed by `times`.
    #[must_use]
    pub fn rows(name: impl Into<String>, rows: Vec<Value>, times: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            value: Value::List(rows),
            times,
            timed: true,
            slice: false,
        }
    }

    /// A whole object, stored as slices when `timed`.
    #[must_use]
    pub fn object(name: impl Into<String>, value: Value, timed: bool) -> Self {
        Self {
            name: name.into(),
            value,
            times: Vec::new(),
            timed,
            slice: false,
        }
    }

    /// Object slots to append, or to put over the last slice.
    #[must_use]
    pub fn slices(name: impl Into<String>, slots: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            value: Value::List(slots),
            times: Vec::new(),
            timed: true,
            slice: true,
        }
    }

    fn to_value(&self) -> Value {
        Value::record([
            ("name", Value::from(self.name.as_str())),
            ("value", self.value.clone()),
            ("times", Value::from(self.times.clone())),
            ("timed", Value::Int(i32::from(self.timed))),
            ("slice", Value::Int(i32::from(self.slice))),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "entry")?;
        Ok(Self {
            name: fields.text("name")?.to_string(),
            value: fields.value("value")?.clone(),
            times: fields.doubles("times")?,
            timed: fields.int("timed")? != 0,
            slice: fields.int("slice")? != 0,
        })
    }
}

fn entries_to_value(entries: &[Entry]) -> Value {
    Value::List(entries.iter().map(Entry::to_value).collect())
}

fn entries_from(fields: &Fields<'_>, name: &str) -> CodecResult<Vec<Entry>> {
    fields.list(name)?.iter().map(Entry::from_value).collect()
}

/// Every write collected between `begin_put` and `end_put` on one record.
#[derive(Debug, Clone, PartialEq)]
pub struct PutBatch {
    /// The session writing.
    pub session: SessionToken,
    /// Encoded node path of the record.
    pub cpo: String,
    /// Kind of the bracket.
    pub kind: PutKind,
    /// Encoded node path of the time base, last declared wins.
    pub time_base: Option<String>,
    /// Whole-field writes.
    pub plain: Vec<Entry>,
    /// Time-keyed rows.
    pub segments: Vec<Entry>,
    /// Objects and object slices.
    pub objects: Vec<Entry>,
}

impl PutBatch {
    /// An empty batch.
    #[must_use]
    pub fn new(session: SessionToken, cpo: impl Into<String>, kind: PutKind) -> Self {
        Self {
            session,
            cpo: cpo.into(),
            kind,
            time_base: None,
            plain: Vec::new(),
            segments: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Number of collected entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plain.len() + self.segments.len() + self.objects.len()
    }

    /// Whether nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys for a segment entry: its own when it has them, otherwise the
    /// batch's.
    #[must_use]
    pub fn times_for<'a>(&'a self, entry: &'a Entry) -> &'a [f64] {
        if !entry.times.is_empty() {
            return &entry.times;
        }
        match &self.kind {
            PutKind::Full { times } => times.as_slice(),
            PutKind::Slice { time } => std::slice::from_ref(time),
            PutKind::ReplaceLast => &[],
        }
    }
}

impl WireMessage for PutBatch {
    fn to_value(&self) -> Value {
        let mut fields = vec![
            ("session", self.session.to_value()),
            ("cpo", Value::from(self.cpo.as_str())),
            ("kind", put_kind_to_value(&self.kind)),
        ];
        if let Some(time_base) = &self.time_base {
            fields.push(("time_base", Value::from(time_base.as_str())));
        }
        fields.push(("plain", entries_to_value(&self.plain)));
        fields.push(("segments", entries_to_value(&self.segments)));
        fields.push(("objects", entries_to_value(&self.objects)));
        Value::record(fields)
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "put batch")?;
        let time_base = match fields.get("time_base") {
            Some(value) => Some(
                value
                    .as_text()
                    .ok_or_else(|| CodecError::invalid_structure("put batch: invalid time_base"))?
                    .to_string(),
            ),
            None => None,
        };
        Ok(Self {
            session: session_of(&fields)?,
            cpo: fields.text("cpo")?.to_string(),
            kind: put_kind_from_value(fields.value("kind")?)?,
            time_base,
            plain: entries_from(&fields, "plain")?,
            segments: entries_from(&fields, "segments")?,
            objects: entries_from(&fields, "objects")?,
        })
    }
}

/// Asks for every field of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct GetBatchRequest {
    /// The session reading.
    pub session: SessionToken,
    /// Encoded node path of the record.
    pub cpo: String,
    /// Whole fields, or fields resolved at one time.
    pub kind: GetKind,
}

impl WireMessage for GetBatchRequest {
    fn to_value(&self) -> Value {
        Value::record([
            ("session", self.session.to_value()),
            ("cpo", Value::from(self.cpo.as_str())),
            ("kind", get_kind_to_value(&self.kind)),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "get batch request")?;
        Ok(Self {
            session: session_of(&fields)?,
            cpo: fields.text("cpo")?.to_string(),
            kind: get_kind_from_value(fields.value("kind")?)?,
        })
    }
}

/// The fields of one record, keyed by their path relative to the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetBatchReply {
    /// Encoded relative path and content of each field.
    pub fields: Vec<(String, FieldContent)>,
}

impl WireMessage for GetBatchReply {
    fn to_value(&self) -> Value {
        Value::record([(
            "fields",
            Value::List(
                self.fields
                    .iter()
                    .map(|(name, content)| {
                        Value::record([
                            ("name", Value::from(name.as_str())),
                            ("content", content_to_value(content)),
                        ])
                    })
                    .collect(),
            ),
        )])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "get batch reply")?;
        let fields = fields
            .list("fields")?
            .iter()
            .map(|field| -> CodecResult<(String, FieldContent)> {
                let field = Fields::of(field, "field")?;
                Ok((
                    field.text("name")?.to_string(),
                    content_from_value(field.value("content")?)?,
                ))
            })
            .collect::<CodecResult<_>>()?;
        Ok(Self { fields })
    }
}

/// Deletes a field, or a whole record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    /// The session writing.
    pub session: SessionToken,
    /// Encoded node path to delete.
    pub path: String,
}

impl WireMessage for DeleteRequest {
    fn to_value(&self) -> Value {
        Value::record([
            ("session", self.session.to_value()),
            ("path", Value::from(self.path.as_str())),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let fields = Fields::of(value, "delete request")?;
        Ok(Self {
            session: session_of(&fields)?,
            path: fields.text("path")?.to_string(),
        })
    }
}

/// Acknowledges a call without a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack;

impl WireMessage for Ack {
    fn to_value(&self) -> Value {
        Value::record([("ok", Value::Int(1))])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        Fields::of(value, "ack")?.int("ok").map(|_| Self)
    }
}
