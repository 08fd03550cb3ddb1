//! Replaying put batches.
//!
//! A batch is applied field by field: segments first, then objects, then
//! plain fields, each bucket in the order the client collected it. A field
//! that fails is logged and skipped; the rest of the batch still applies.

use pulse_codec::Value;
use pulse_core::{
    is_shape_field, CoreError, CoreResult, FieldPath, LocalSession, NodePath, ObjectNode,
    Placement, PutKind,
};
use pulse_protocol::{Entry, PutBatch};
use tracing::{debug, warn};

/// The writes a batch replays, addressed by node path.
pub trait BatchTarget {
    /// Opens the write bracket; a full put clears the record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a put is already open on the record.
    fn begin(&self, cpo: &NodePath, kind: &PutKind) -> CoreResult<()>;

    /// Closes the write bracket.
    ///
    /// # Errors
    ///
    /// Returns an error if deferred writes cannot be flushed.
    fn end(&self, cpo: &NodePath) -> CoreResult<()>;

    /// Writes a whole field.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be stored.
    fn put_data(&self, path: &NodePath, value: Value) -> CoreResult<()>;

    /// Appends rows keyed by `times`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the rows do not fit the field.
    fn put_segment(
        &self,
        path: &NodePath,
        time_base: &NodePath,
        rows: &[Value],
        times: &[f64],
    ) -> CoreResult<()>;

    /// Overwrites the last row.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if the field has no rows.
    fn replace_last_slice(&self, path: &NodePath, value: &Value) -> CoreResult<()>;

    /// Stores a whole object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a timed object that is not an array.
    fn put_object(&self, path: &NodePath, object: &ObjectNode, timed: bool) -> CoreResult<()>;

    /// Appends or replaces one object slice.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` when replacing on a field without slices.
    fn put_object_slice(
        &self,
        path: &NodePath,
        slice: &ObjectNode,
        placement: Placement,
    ) -> CoreResult<()>;
}

impl BatchTarget for LocalSession {
    fn begin(&self, cpo: &NodePath, kind: &PutKind) -> CoreResult<()> {
        self.begin_put_at(cpo, kind.clone())
    }

    fn end(&self, cpo: &NodePath) -> CoreResult<()> {
        self.end_put_at(cpo)
    }

    fn put_data(&self, path: &NodePath, value: Value) -> CoreResult<()> {
        self.put_data_at(path, value)
    }

    fn put_segment(
        &self,
        path: &NodePath,
        time_base: &NodePath,
        rows: &[Value],
        times: &[f64],
    ) -> CoreResult<()> {
        self.put_segment_at(path, time_base, rows, times)
    }

    fn replace_last_slice(&self, path: &NodePath, value: &Value) -> CoreResult<()> {
        self.replace_last_slice_at(path, value)
    }

    fn put_object(&self, path: &NodePath, object: &ObjectNode, timed: bool) -> CoreResult<()> {
        self.put_object_at(path, object, timed)
    }

    fn put_object_slice(
        &self,
        path: &NodePath,
        slice: &ObjectNode,
        placement: Placement,
    ) -> CoreResult<()> {
        self.put_object_slice_at(path, slice, placement)
    }
}

/// Outcome of one replayed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries written.
    pub applied: usize,
    /// Entries that failed and were skipped.
    pub failed: usize,
}

/// Replays `batch` against `target`.
///
/// Rows without their own time base use `default_time_base` inside the
/// record. Only a failure to open or close the bracket is returned; field
/// failures are logged and counted.
///
/// # Errors
///
/// Returns an error if the bracket cannot be opened or closed.
pub fn replay(
    target: &dyn BatchTarget,
    batch: &PutBatch,
    default_time_base: &str,
) -> CoreResult<ReplayReport> {
    let cpo = NodePath::from_encoded(&batch.cpo);
    let time_base = match &batch.time_base {
        Some(name) => NodePath::from_encoded(name),
        None => cpo.join(&FieldPath::parse(default_time_base).encode()),
    };

    target.begin(&cpo, &batch.kind)?;
    let mut report = ReplayReport::default();
    let mut record = |entry: &Entry, result: CoreResult<()>| match result {
        Ok(()) => report.applied += 1,
        Err(e) => {
            report.failed += 1;
            warn!(cpo = %cpo, field = %entry.name, error = %e, "batch entry not applied");
        }
    };

    for entry in &batch.segments {
        let path = NodePath::from_encoded(&entry.name);
        let result = match entry.value.as_list() {
            Some(rows) => target.put_segment(&path, &time_base, rows, batch.times_for(entry)),
            None => Err(CoreError::invalid_argument("segment entry does not hold rows")),
        };
        record(entry, result);
    }

    for entry in &batch.objects {
        let path = NodePath::from_encoded(&entry.name);
        record(entry, replay_object(target, &path, entry, &batch.kind));
    }

    for entry in &batch.plain {
        let path = NodePath::from_encoded(&entry.name);
        let result = match &batch.kind {
            PutKind::Full { .. } => target.put_data(&path, entry.value.clone()),
            _ if is_shape_field(&path) => {
                target.put_data(&path, entry.value.clone())
            }
            PutKind::Slice { time } => {
                let time = entry.times.first().copied().unwrap_or(*time);
                target.put_segment(&path, &time_base, std::slice::from_ref(&entry.value), &[time])
            }
            PutKind::ReplaceLast => target.replace_last_slice(&path, &entry.value),
        };
        record(entry, result);
    }

    target.end(&cpo)?;
    debug!(
        cpo = %cpo,
        applied = report.applied,
        failed = report.failed,
        "replayed batch"
    );
    Ok(report)
}

fn replay_object(
    target: &dyn BatchTarget,
    path: &NodePath,
    entry: &Entry,
    kind: &PutKind,
) -> CoreResult<()> {
    let object = ObjectNode::from_value(entry.value.clone());
    if !entry.slice {
        return target.put_object(path, &object, entry.timed);
    }
    let placement = match kind {
        PutKind::ReplaceLast => Placement::ReplaceLast,
        _ => Placement::Append,
    };
    for slot in object.into_slots()? {
        target.put_object_slice(path, &slot, placement)?;
    }
    Ok(())
}
