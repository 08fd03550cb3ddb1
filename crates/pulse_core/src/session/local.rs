//! Sessions on a local backing store.

use super::registry::{SharedTarget, TargetRegistry, TargetState};
use super::{field_node, is_shape_field, record_node, PulseAccess};
use crate::cache::{CacheLevel, CacheScope, FieldInfo, InfoCache, MemoryInfoCache};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::object::{self, ObjectEngine, ObjectNode, Placement};
use crate::path::{FieldPath, NodePath};
use crate::reader::{self, FieldContent, FieldSource};
use crate::sample::{Sample, Series, SlicePolicy};
use crate::segment::{first_descriptor, SegmentDescriptor};
use crate::slice::{self, SliceEngine};
use crate::types::{GetKind, PulseTarget, PutKind, SessionId};
use parking_lot::Mutex;
use pulse_codec::{from_cbor, to_cbor, Value};
use pulse_storage::BackingStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-session state kept under the target lock.
pub(crate) struct SessionState {
    cache: Box<dyn InfoCache>,
    open_puts: HashMap<NodePath, PutKind>,
    time_bases: HashMap<NodePath, NodePath>,
    open_gets: HashMap<NodePath, usize>,
}

impl SessionState {
    pub(crate) fn new(level: CacheLevel) -> Self {
        Self {
            cache: Box::new(MemoryInfoCache::new(level)),
            open_puts: HashMap::new(),
            time_bases: HashMap::new(),
            open_gets: HashMap::new(),
        }
    }
}

/// Reads fields from a store, preferring values held in the session cache.
struct LocalSource<'a> {
    store: &'a dyn BackingStore,
    cache: &'a dyn InfoCache,
}

impl FieldSource for LocalSource<'_> {
    fn content(&self, path: &NodePath) -> CoreResult<FieldContent> {
        if let Some((_, value)) = self.cache.get_info_with_data(path) {
            return Ok(FieldContent::Record(value));
        }
        let node = self
            .store
            .find_node(path.as_str())?
            .ok_or_else(|| CoreError::not_found(path.as_str()))?;
        match first_descriptor(self.store, node)? {
            Some(SegmentDescriptor::Series { .. }) => Ok(FieldContent::Series(
                slice::read_series(self.store, node, path)?,
            )),
            Some(SegmentDescriptor::Objects { .. }) => Ok(FieldContent::Objects(
                object::read_object_slices(self.store, node, path)?,
            )),
            None => match self.store.read_record(node)? {
                Some(bytes) => Ok(FieldContent::Record(from_cbor(&bytes)?)),
                None => Err(CoreError::not_found(path.as_str())),
            },
        }
    }

    fn object_slice(&self, path: &NodePath, index: usize) -> CoreResult<ObjectNode> {
        if let Some(node) = self.store.find_node(path.as_str())? {
            if self.store.segment_count(node)? > 0 {
                return object::read_object_slice(self.store, node, path, index);
            }
        }
        let slots = reader::read_object(self, path)?.into_slots()?;
        slots
            .into_iter()
            .nth(index)
            .ok_or_else(|| CoreError::no_slice(format!("{path} slice {index}")))
    }
}

/// Writes a plain value as the whole record of `path`.
fn write_plain(store: &mut dyn BackingStore, path: &NodePath, value: &Value) -> CoreResult<()> {
    store.delete_node(path.as_str())?;
    if value.is_empty() {
        return Ok(());
    }
    let bytes = to_cbor(value)?;
    let node = store.find_or_create_node(path.as_str())?;
    store.write_record(node, Some(&bytes))?;
    Ok(())
}

/// Writes a whole field, keeping it in the cache when writes are deferred.
fn write_field(
    store: &mut dyn BackingStore,
    session: &mut SessionState,
    path: &NodePath,
    value: Value,
) -> CoreResult<()> {
    session.cache.invalidate(CacheScope::Under(path));
    if session.cache.level() == CacheLevel::Deferred {
        session.cache.put_info_with_data(path, value, true);
        return Ok(());
    }
    write_plain(store, path, &value)?;
    if !value.is_empty() {
        session.cache.put_info_with_data(path, value, false);
    }
    Ok(())
}

fn flush_scope(
    store: &mut dyn BackingStore,
    cache: &mut dyn InfoCache,
    scope: CacheScope<'_>,
) -> CoreResult<()> {
    for (path, value) in cache.flush(scope) {
        write_plain(store, &path, &value)?;
        debug!(%path, "flushed deferred write");
    }
    Ok(())
}

/// A session on a local backing store.
///
/// Sessions opened on the same pulse file share its store and its lock;
/// every operation holds that lock for its whole duration.
///
/// Besides the `(cpo, path)` operations of [`PulseAccess`], the session
/// offers the same operations on already-encoded [`NodePath`]s (the `*_at`
/// methods), which is how a server replays names received from a peer.
pub struct LocalSession {
    id: SessionId,
    shared: Arc<SharedTarget>,
    registry: TargetRegistry,
    config: Config,
    closed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl LocalSession {
    pub(crate) fn new(id: SessionId, shared: Arc<SharedTarget>, registry: TargetRegistry) -> Self {
        let config = registry.config().clone();
        Self {
            id,
            shared,
            registry,
            config,
            closed: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Identifier of this session.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Configuration the session was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Remembers the error of a failed call as the session's last error.
    fn track<R>(&self, result: CoreResult<R>) -> CoreResult<R> {
        if let Err(e) = &result {
            self.record_error(e.to_string());
        }
        result
    }

    fn node(&self, cpo: &str, path: &str) -> CoreResult<NodePath> {
        self.track(field_node(cpo, path))
    }

    fn record(&self, cpo: &str) -> CoreResult<NodePath> {
        self.track(record_node(cpo))
    }

    /// Runs `f` with the store and this session's state under the target
    /// lock. A failure becomes the session's last error.
    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut dyn BackingStore, &mut SessionState) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let result = self.locked(f);
        self.track(result)
    }

    fn locked<R>(
        &self,
        f: impl FnOnce(&mut dyn BackingStore, &mut SessionState) -> CoreResult<R>,
    ) -> CoreResult<R> {
        if self.is_closed() {
            return Err(CoreError::invalid_state(format!("{} is closed", self.id)));
        }
        let mut guard = self.shared.state.lock();
        let TargetState { store, sessions } = &mut *guard;
        let store = store
            .as_deref_mut()
            .ok_or_else(|| CoreError::invalid_state("pulse file is released"))?;
        let session = sessions
            .get_mut(&self.id)
            .ok_or_else(|| CoreError::invalid_state(format!("{} is closed", self.id)))?;
        f(store, session)
    }

    fn read<R>(&self, f: impl FnOnce(&LocalSource<'_>) -> CoreResult<R>) -> CoreResult<R> {
        self.with_state(|store, session| {
            let source = LocalSource {
                store,
                cache: session.cache.as_ref(),
            };
            f(&source)
        })
    }

    /// Opens a write bracket on the record at `cpo`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a put is already open on the record.
    pub fn begin_put_at(&self, cpo: &NodePath, kind: PutKind) -> CoreResult<()> {
        self.with_state(|store, session| {
            if session.open_puts.contains_key(cpo) {
                return Err(CoreError::invalid_state(format!(
                    "put already in progress on {cpo}"
                )));
            }
            if matches!(kind, PutKind::Full { .. }) {
                session.cache.invalidate(CacheScope::Under(cpo));
                store.delete_node(cpo.as_str())?;
            }
            debug!(%cpo, ?kind, "begin put");
            session.open_puts.insert(cpo.clone(), kind);
            Ok(())
        })
    }

    /// Closes the write bracket on `cpo`, flushing its deferred writes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no put is open on the record.
    pub fn end_put_at(&self, cpo: &NodePath) -> CoreResult<()> {
        self.with_state(|store, session| {
            if session.open_puts.remove(cpo).is_none() {
                return Err(CoreError::invalid_state(format!("no put open on {cpo}")));
            }
            session.time_bases.remove(cpo);
            flush_scope(store, session.cache.as_mut(), CacheScope::Under(cpo))
        })
    }

    /// Writes a whole field. With deferred caching the value stays in the
    /// cache until flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded or stored.
    pub fn put_data_at(&self, path: &NodePath, value: Value) -> CoreResult<()> {
        self.with_state(|store, session| write_field(store, session, path, value))
    }

    /// Writes `value` to the field at `path` of record `cpo` the way the
    /// open put replays plain fields: a row at the bracket time inside a
    /// slice put, a replacement of the last row inside a replace-last put,
    /// the whole field otherwise. Shape bookkeeping fields are always
    /// written whole.
    fn put_data_in_bracket(&self, cpo: &NodePath, path: &NodePath, value: Value) -> CoreResult<()> {
        let capacity = self.config.segment_capacity;
        let default_time_base = &self.config.default_time_base;
        self.with_state(|store, session| {
            let kind = session.open_puts.get(cpo).cloned();
            match kind {
                Some(PutKind::Slice { time }) if !is_shape_field(path) => {
                    let time_base = session.time_bases.get(cpo).cloned().unwrap_or_else(|| {
                        cpo.join(&FieldPath::parse(default_time_base).encode())
                    });
                    session.cache.invalidate(CacheScope::Field(path));
                    SliceEngine::new(store, capacity).put_segment(
                        path,
                        time_base.as_str(),
                        std::slice::from_ref(&value),
                        &[time],
                    )
                }
                Some(PutKind::ReplaceLast) if !is_shape_field(path) => {
                    session.cache.invalidate(CacheScope::Field(path));
                    SliceEngine::new(store, capacity).replace_last_slice(path, &value)
                }
                _ => write_field(store, session, path, value),
            }
        })
    }

    /// Appends rows to a field of record `cpo`, declaring `time_base` as the
    /// time base of the put open on the record. The last declaration wins.
    fn put_rows(
        &self,
        cpo: &NodePath,
        path: &NodePath,
        time_base: &NodePath,
        rows: &[Value],
        times: &[f64],
    ) -> CoreResult<()> {
        let capacity = self.config.segment_capacity;
        self.with_state(|store, session| {
            if session.open_puts.contains_key(cpo) {
                if let Some(previous) = session.time_bases.insert(cpo.clone(), time_base.clone()) {
                    if previous != *time_base {
                        debug!(%cpo, %previous, %time_base, "time base redeclared in put");
                    }
                }
            }
            session.cache.invalidate(CacheScope::Field(path));
            SliceEngine::new(store, capacity).put_segment(path, time_base.as_str(), rows, times)
        })
    }

    /// Reads a whole field.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    pub fn get_data_at(&self, path: &NodePath) -> CoreResult<Value> {
        self.with_state(|store, session| {
            let source = LocalSource {
                store,
                cache: session.cache.as_ref(),
            };
            let content = source.content(path)?;
            let value = match content {
                FieldContent::Record(value) => {
                    session.cache.put_info_with_data(path, value.clone(), false);
                    value
                }
                FieldContent::Series(series) => series.stacked()?,
                FieldContent::Objects(slots) => ObjectNode::Array(slots).to_value(),
                FieldContent::Sample(sample) => sample.value,
                FieldContent::ObjectSlice(node) => ObjectNode::Array(vec![node]).to_value(),
            };
            Ok(value)
        })
    }

    /// Existence and dimensions of a field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field cannot be read.
    pub fn get_dimension_at(&self, path: &NodePath) -> CoreResult<FieldInfo> {
        self.with_state(|store, session| {
            if let Some(info) = session.cache.get_info(path) {
                return Ok(info);
            }
            let source = LocalSource {
                store,
                cache: session.cache.as_ref(),
            };
            let info = reader::read_dimension(&source, path)?;
            session.cache.put_info(path, info.clone());
            Ok(info)
        })
    }

    /// What the field at `path` holds.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    pub fn content_at(&self, path: &NodePath) -> CoreResult<FieldContent> {
        self.read(|source| source.content(path))
    }

    /// Deletes the node at `path` and everything below it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn delete_at(&self, path: &NodePath) -> CoreResult<()> {
        self.with_state(|store, session| {
            session.cache.invalidate(CacheScope::Under(path));
            store.delete_node(path.as_str())?;
            Ok(())
        })
    }

    /// Paths, relative to `cpo`, of every field of the record that holds
    /// data. Deferred writes are flushed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn field_nodes(&self, cpo: &NodePath) -> CoreResult<Vec<NodePath>> {
        self.with_state(|store, session| {
            flush_scope(store, session.cache.as_mut(), CacheScope::Under(cpo))?;
            Ok(store
                .data_nodes_under(cpo.as_str())?
                .into_iter()
                .filter_map(|full| NodePath::from_encoded(&full).relative_to(cpo))
                .collect())
        })
    }

    /// Appends rows keyed by `times` to the field at `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the rows do not fit the field.
    pub fn put_segment_at(
        &self,
        path: &NodePath,
        time_base: &NodePath,
        rows: &[Value],
        times: &[f64],
    ) -> CoreResult<()> {
        let capacity = self.config.segment_capacity;
        self.with_state(|store, session| {
            session.cache.invalidate(CacheScope::Field(path));
            SliceEngine::new(store, capacity).put_segment(path, time_base.as_str(), rows, times)
        })
    }

    /// Appends one row keyed by `time`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the row does not fit the field.
    pub fn put_slice_at(
        &self,
        path: &NodePath,
        time_base: &NodePath,
        value: &Value,
        time: f64,
    ) -> CoreResult<()> {
        self.put_segment_at(path, time_base, std::slice::from_ref(value), &[time])
    }

    /// Overwrites the last row of the field at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if the field has no rows.
    pub fn replace_last_slice_at(&self, path: &NodePath, value: &Value) -> CoreResult<()> {
        let capacity = self.config.segment_capacity;
        self.with_state(|store, session| {
            session.cache.invalidate(CacheScope::Field(path));
            SliceEngine::new(store, capacity).replace_last_slice(path, value)
        })
    }

    /// Every row and key of the field at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    pub fn get_all_at(&self, path: &NodePath, time_base: &NodePath) -> CoreResult<Series> {
        self.read(|source| reader::read_all(source, path, time_base))
    }

    /// The field at `path` resolved at `time`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field and `NoSlice` for an empty one.
    pub fn get_slice_at(
        &self,
        path: &NodePath,
        time_base: &NodePath,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<Sample> {
        self.read(|source| reader::read_slice(source, path, time_base, time, policy))
    }

    /// Whether the field at `path` holds time segments.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_sliced_at(&self, path: &NodePath) -> CoreResult<bool> {
        self.with_state(|store, _| slice::is_sliced(store, path))
    }

    /// Stores a whole object at `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a timed object that is not an array.
    pub fn put_object_at(&self, path: &NodePath, object: &ObjectNode, timed: bool) -> CoreResult<()> {
        let config = &self.config;
        self.with_state(|store, session| {
            session.cache.invalidate(CacheScope::Under(path));
            ObjectEngine::new(store, config).put_object(path, object, timed)
        })
    }

    /// Appends or replaces one slice of the object at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` when replacing on a field without slices.
    pub fn put_object_slice_at(
        &self,
        path: &NodePath,
        slice: &ObjectNode,
        placement: Placement,
    ) -> CoreResult<()> {
        let config = &self.config;
        self.with_state(|store, session| {
            session.cache.invalidate(CacheScope::Under(path));
            ObjectEngine::new(store, config).put_object_segment(path, slice, placement)
        })
    }

    /// The whole object at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    pub fn get_object_at(&self, path: &NodePath) -> CoreResult<ObjectNode> {
        self.read(|source| reader::read_object(source, path))
    }

    /// The object slice at `time`.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if nothing is stored at the resolved index.
    pub fn get_object_slice_at(
        &self,
        path: &NodePath,
        time_base: &NodePath,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<ObjectNode> {
        self.read(|source| reader::read_object_slice(source, path, time_base, time, policy))
    }
}

impl PulseAccess for LocalSession {
    fn target(&self) -> &PulseTarget {
        &self.shared.target
    }

    fn begin_put(&self, cpo: &str, kind: PutKind) -> CoreResult<()> {
        self.begin_put_at(&self.record(cpo)?, kind)
    }

    fn end_put(&self, cpo: &str) -> CoreResult<()> {
        self.end_put_at(&self.record(cpo)?)
    }

    fn begin_get(&self, cpo: &str, _kind: GetKind) -> CoreResult<()> {
        let cpo = self.record(cpo)?;
        self.with_state(|_, session| {
            *session.open_gets.entry(cpo).or_insert(0) += 1;
            Ok(())
        })
    }

    fn end_get(&self, cpo: &str) -> CoreResult<()> {
        let cpo = self.record(cpo)?;
        self.with_state(|_, session| match session.open_gets.get_mut(&cpo) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                session.open_gets.remove(&cpo);
                Ok(())
            }
            None => Err(CoreError::invalid_state(format!("no get open on {cpo}"))),
        })
    }

    fn put_data(&self, cpo: &str, path: &str, value: Value) -> CoreResult<()> {
        let node = self.node(cpo, path)?;
        self.put_data_in_bracket(&self.record(cpo)?, &node, value)
    }

    fn get_data(&self, cpo: &str, path: &str) -> CoreResult<Value> {
        self.get_data_at(&self.node(cpo, path)?)
    }

    fn get_dimension(&self, cpo: &str, path: &str) -> CoreResult<FieldInfo> {
        self.get_dimension_at(&self.node(cpo, path)?)
    }

    fn delete_data(&self, cpo: &str, path: &str) -> CoreResult<()> {
        self.delete_at(&self.node(cpo, path)?)
    }

    fn delete_all_fields(&self, cpo: &str) -> CoreResult<()> {
        self.delete_at(&self.record(cpo)?)
    }

    fn put_segment(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        rows: Vec<Value>,
        times: Vec<f64>,
    ) -> CoreResult<()> {
        self.put_rows(
            &self.record(cpo)?,
            &self.node(cpo, path)?,
            &self.node(cpo, time_base)?,
            &rows,
            &times,
        )
    }

    fn put_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        value: Value,
        time: f64,
    ) -> CoreResult<()> {
        self.put_rows(
            &self.record(cpo)?,
            &self.node(cpo, path)?,
            &self.node(cpo, time_base)?,
            std::slice::from_ref(&value),
            &[time],
        )
    }

    fn replace_last_slice(&self, cpo: &str, path: &str, value: Value) -> CoreResult<()> {
        self.replace_last_slice_at(&self.node(cpo, path)?, &value)
    }

    fn get_all(&self, cpo: &str, path: &str, time_base: &str) -> CoreResult<Series> {
        self.get_all_at(&self.node(cpo, path)?, &self.node(cpo, time_base)?)
    }

    fn get_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<Sample> {
        self.get_slice_at(
            &self.node(cpo, path)?,
            &self.node(cpo, time_base)?,
            time,
            policy,
        )
    }

    fn get_range(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        t1: f64,
        t2: f64,
    ) -> CoreResult<Series> {
        let path = self.node(cpo, path)?;
        let time_base = self.node(cpo, time_base)?;
        self.read(|source| reader::read_range(source, &path, &time_base, t1, t2))
    }

    fn is_sliced(&self, cpo: &str, path: &str) -> CoreResult<bool> {
        self.is_sliced_at(&self.node(cpo, path)?)
    }

    fn put_object(
        &self,
        cpo: &str,
        path: &str,
        object: &ObjectNode,
        timed: bool,
    ) -> CoreResult<()> {
        self.put_object_at(&self.node(cpo, path)?, object, timed)
    }

    fn put_object_slice(&self, cpo: &str, path: &str, slice: &ObjectNode) -> CoreResult<()> {
        self.put_object_slice_at(&self.node(cpo, path)?, slice, Placement::Append)
    }

    fn replace_last_object_slice(
        &self,
        cpo: &str,
        path: &str,
        slice: &ObjectNode,
    ) -> CoreResult<()> {
        self.put_object_slice_at(&self.node(cpo, path)?, slice, Placement::ReplaceLast)
    }

    fn get_object(&self, cpo: &str, path: &str) -> CoreResult<ObjectNode> {
        self.get_object_at(&self.node(cpo, path)?)
    }

    fn get_object_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<ObjectNode> {
        self.get_object_slice_at(
            &self.node(cpo, path)?,
            &self.node(cpo, time_base)?,
            time,
            policy,
        )
    }

    fn cache_level(&self) -> CacheLevel {
        self.locked(|_, session| Ok(session.cache.level()))
            .unwrap_or_default()
    }

    fn set_cache_level(&self, level: CacheLevel) -> CoreResult<()> {
        self.with_state(|store, session| {
            if session.cache.level() == CacheLevel::Deferred && level != CacheLevel::Deferred {
                flush_scope(store, session.cache.as_mut(), CacheScope::All)?;
            }
            session.cache.set_level(level);
            debug!(session = %self.id, ?level, "cache level changed");
            Ok(())
        })
    }

    fn flush_cache(&self, cpo: Option<&str>) -> CoreResult<()> {
        let cpo = cpo.map(|cpo| self.record(cpo)).transpose()?;
        self.with_state(|store, session| {
            let scope = cpo.as_ref().map_or(CacheScope::All, CacheScope::Under);
            flush_scope(store, session.cache.as_mut(), scope)
        })
    }

    fn discard_cache(&self, cpo: Option<&str>) -> CoreResult<()> {
        let cpo = cpo.map(|cpo| self.record(cpo)).transpose()?;
        self.with_state(|_, session| {
            let scope = cpo.as_ref().map_or(CacheScope::All, CacheScope::Under);
            session.cache.invalidate(scope);
            Ok(())
        })
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    fn reset_error(&self) {
        *self.last_error.lock() = None;
    }

    fn close(&self) -> CoreResult<()> {
        let flushed = self.with_state(|store, session| {
            flush_scope(store, session.cache.as_mut(), CacheScope::All)
        });
        if self.closed.swap(true, Ordering::AcqRel) {
            return self.track(Err(CoreError::invalid_state(format!(
                "{} is already closed",
                self.id
            ))));
        }
        self.shared.state.lock().sessions.remove(&self.id);
        info!(target = %self.shared.target, session = %self.id, "session closed");
        let released = self.track(self.registry.release(&self.shared.target));
        flushed.and(released)
    }
}

impl std::fmt::Debug for LocalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSession")
            .field("id", &self.id)
            .field("target", &self.shared.target)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryStoreProvider;

    fn session() -> LocalSession {
        TargetRegistry::in_memory()
            .create("test", 1, 0, 0, 0)
            .unwrap()
    }

    fn deferred_session() -> LocalSession {
        let config = Config::default().cache_level(CacheLevel::Deferred);
        TargetRegistry::new(config, MemoryStoreProvider::new())
            .unwrap()
            .create("test", 1, 0, 0, 0)
            .unwrap()
    }

    #[test]
    fn put_and_get_plain_fields() {
        let s = session();
        s.put_data("magnetics", "ip", Value::from(vec![1.0, 2.0])).unwrap();
        assert_eq!(
            s.get_data("magnetics", "ip").unwrap(),
            Value::from(vec![1.0, 2.0])
        );
        assert!(s.get_data("magnetics", "bt").unwrap_err().is_not_found());

        let info = s.get_dimension("magnetics", "ip").unwrap();
        assert!(info.exists);
        assert_eq!(info.dims, vec![2]);
    }

    #[test]
    fn full_put_clears_record() {
        let s = session();
        s.put_data("magnetics", "old", Value::Int(1)).unwrap();
        s.begin_put("magnetics", PutKind::non_timed()).unwrap();
        s.put_data("magnetics", "new", Value::Int(2)).unwrap();
        s.end_put("magnetics").unwrap();

        assert!(s.get_data("magnetics", "old").unwrap_err().is_not_found());
        assert_eq!(s.get_data("magnetics", "new").unwrap(), Value::Int(2));
    }

    #[test]
    fn nested_put_rejected() {
        let s = session();
        s.begin_put("pf_active", PutKind::Slice { time: 1.0 }).unwrap();
        assert!(matches!(
            s.begin_put("pf_active", PutKind::ReplaceLast),
            Err(CoreError::InvalidState { .. })
        ));
        s.end_put("pf_active").unwrap();
        assert!(s.end_put("pf_active").is_err());
    }

    #[test]
    fn put_data_follows_the_open_put() {
        let s = session();
        s.begin_put("eq", PutKind::timed(vec![0.0])).unwrap();
        s.put_segment("eq", "time", "time", vec![Value::Double(0.0)], vec![0.0])
            .unwrap();
        s.put_segment("eq", "ip", "time", vec![Value::Double(1.0)], vec![0.0])
            .unwrap();
        s.end_put("eq").unwrap();

        s.begin_put("eq", PutKind::Slice { time: 1.0 }).unwrap();
        s.put_slice("eq", "time", "time", Value::Double(1.0), 1.0)
            .unwrap();
        s.put_data("eq", "ip", Value::Double(2.0)).unwrap();
        s.put_data("eq", "coil/shape_of", Value::Int(2)).unwrap();
        s.end_put("eq").unwrap();

        let ip = s.get_all("eq", "ip", "time").unwrap();
        assert_eq!(ip.keys, vec![0.0, 1.0]);
        assert_eq!(ip.rows, vec![Value::Double(1.0), Value::Double(2.0)]);
        assert!(!s.is_sliced("eq", "coil/shape_of").unwrap());

        s.begin_put("eq", PutKind::ReplaceLast).unwrap();
        s.put_data("eq", "ip", Value::Double(3.0)).unwrap();
        s.put_data("eq", "coil/shape_of", Value::Int(3)).unwrap();
        s.end_put("eq").unwrap();

        let ip = s.get_all("eq", "ip", "time").unwrap();
        assert_eq!(ip.keys, vec![0.0, 1.0]);
        assert_eq!(ip.rows, vec![Value::Double(1.0), Value::Double(3.0)]);
        assert_eq!(s.get_data("eq", "coil/shape_of").unwrap(), Value::Int(3));

        // Outside a bracket the field is written whole again.
        s.put_data("eq", "ip", Value::Double(4.0)).unwrap();
        assert_eq!(s.get_data("eq", "ip").unwrap(), Value::Double(4.0));
    }

    #[test]
    fn slice_put_without_time_base_uses_default() {
        let s = session();
        s.begin_put("eq", PutKind::Slice { time: 2.5 }).unwrap();
        s.put_data("eq", "ip", Value::Double(7.0)).unwrap();
        s.end_put("eq").unwrap();

        let ip = s.get_all("eq", "ip", "time").unwrap();
        assert_eq!(ip.keys, vec![2.5]);
        assert!(s.is_sliced("eq", "ip").unwrap());
    }

    #[test]
    fn failed_calls_become_last_error() {
        let s = session();
        assert!(s.get_data("eq", "missing").unwrap_err().is_not_found());
        assert!(s.last_error().unwrap().contains("not found"));

        s.reset_error();
        s.put_data("eq", "", Value::Int(1)).unwrap_err();
        assert!(s.last_error().unwrap().contains("empty field path"));

        s.reset_error();
        s.end_put("eq").unwrap_err();
        assert!(s.last_error().unwrap().contains("no put open"));

        s.reset_error();
        s.put_data("eq", "ip", Value::Int(1)).unwrap();
        assert_eq!(s.get_data("eq", "ip").unwrap(), Value::Int(1));
        assert!(s.last_error().is_none());
    }

    #[test]
    fn segments_and_slices() {
        let s = session();
        let rows: Vec<Value> = [0.0, 100.0, 200.0].into_iter().map(Value::Double).collect();
        s.put_segment("eq", "ip", "time", rows, vec![0.0, 10.0, 20.0])
            .unwrap();
        assert!(s.is_sliced("eq", "ip").unwrap());

        let sample = s
            .get_slice("eq", "ip", "time", 5.0, SlicePolicy::Interpolation)
            .unwrap();
        assert_eq!(sample.value, Value::Double(50.0));
        assert_eq!(sample.time, 5.0);

        s.put_slice("eq", "ip", "time", Value::Double(300.0), 30.0)
            .unwrap();
        s.replace_last_slice("eq", "ip", Value::Double(301.0)).unwrap();
        let all = s.get_all("eq", "ip", "time").unwrap();
        assert_eq!(all.keys, vec![0.0, 10.0, 20.0, 30.0]);
        assert_eq!(all.rows[3], Value::Double(301.0));

        let range = s.get_range("eq", "ip", "time", 10.0, 25.0).unwrap();
        assert_eq!(range.keys, vec![10.0, 20.0]);

        assert_eq!(s.get_dimension("eq", "ip").unwrap().dims, vec![4]);
    }

    #[test]
    fn legacy_record_series() {
        let s = session();
        s.put_data("eq", "time", Value::from(vec![0.0, 1.0])).unwrap();
        s.put_data("eq", "ip", Value::from(vec![5.0, 6.0])).unwrap();
        assert!(!s.is_sliced("eq", "ip").unwrap());

        let sample = s
            .get_slice("eq", "ip", "time", 0.9, SlicePolicy::Closest)
            .unwrap();
        assert_eq!(sample.value, Value::Double(6.0));
        assert_eq!(sample.time, 1.0);
    }

    #[test]
    fn objects_round_trip() {
        let s = session();
        let mut object = ObjectNode::with_capacity(2);
        object.put_value("name", 0, Value::from("coil_a"), 2).unwrap();
        object.put_value("name", 1, Value::from("coil_b"), 2).unwrap();

        s.put_object("pf_active", "coil", &object, false).unwrap();
        assert_eq!(s.get_object("pf_active", "coil").unwrap(), object);

        s.put_data("pf_active", "time", Value::from(vec![0.0, 1.0]))
            .unwrap();
        s.put_object("pf_active", "profile", &object, true).unwrap();
        assert_eq!(s.get_object("pf_active", "profile").unwrap(), object);

        let slice = s
            .get_object_slice("pf_active", "profile", "time", 0.7, SlicePolicy::Interpolation)
            .unwrap();
        assert_eq!(slice.child("name"), Some(&ObjectNode::Scalar(Value::from("coil_a"))));

        let slice = s
            .get_object_slice("pf_active", "coil", "time", 1.0, SlicePolicy::Previous)
            .unwrap();
        assert_eq!(slice.child("name"), Some(&ObjectNode::Scalar(Value::from("coil_b"))));
    }

    #[test]
    fn replaced_object_slice_stays_readable() {
        let s = session();
        s.put_data("eq", "time", Value::from(vec![0.0, 1.0])).unwrap();
        let slot = |n: i32| {
            let mut o = ObjectNode::with_capacity(1);
            o.put_value("v", 0, Value::Int(n), 1).unwrap();
            o.into_slots().unwrap().remove(0)
        };
        s.put_object_slice("eq", "ts", &slot(1)).unwrap();
        s.put_object_slice("eq", "ts", &slot(2)).unwrap();
        s.replace_last_object_slice("eq", "ts", &slot(3)).unwrap();

        let read = s
            .get_object_slice("eq", "ts", "time", 1.0, SlicePolicy::Closest)
            .unwrap();
        assert_eq!(read, slot(3));
        assert_eq!(s.get_object("eq", "ts").unwrap().dim().unwrap(), 2);
    }

    #[test]
    fn deferred_writes_wait_for_end_put() {
        let s = deferred_session();
        assert_eq!(s.cache_level(), CacheLevel::Deferred);
        s.begin_put("eq", PutKind::non_timed()).unwrap();
        s.put_data("eq", "ip", Value::Int(3)).unwrap();
        // Readable from the cache before the flush.
        assert_eq!(s.get_data("eq", "ip").unwrap(), Value::Int(3));
        assert_eq!(s.field_nodes(&record_node("eq").unwrap()).unwrap().len(), 1);
        s.end_put("eq").unwrap();

        s.discard_cache(None).unwrap();
        assert_eq!(s.get_data("eq", "ip").unwrap(), Value::Int(3));
    }

    #[test]
    fn discarded_deferred_writes_are_lost() {
        let s = deferred_session();
        s.put_data("eq", "ip", Value::Int(3)).unwrap();
        s.discard_cache(Some("eq")).unwrap();
        assert!(s.get_data("eq", "ip").unwrap_err().is_not_found());
    }

    #[test]
    fn disable_cache_flushes() {
        let s = deferred_session();
        s.put_data("eq", "ip", Value::Int(4)).unwrap();
        s.disable_cache().unwrap();
        assert_eq!(s.cache_level(), CacheLevel::Disabled);
        assert_eq!(s.get_data("eq", "ip").unwrap(), Value::Int(4));
    }

    #[test]
    fn delete_fields() {
        let s = session();
        s.put_data("eq", "a", Value::Int(1)).unwrap();
        s.put_data("eq", "b/c", Value::Int(2)).unwrap();
        s.delete_data("eq", "a").unwrap();
        assert!(s.get_data("eq", "a").unwrap_err().is_not_found());

        let nodes = s.field_nodes(&record_node("eq").unwrap()).unwrap();
        assert_eq!(nodes, vec![NodePath::from_encoded("b0/c0")]);

        s.delete_all_fields("eq").unwrap();
        assert!(s.field_nodes(&record_node("eq").unwrap()).unwrap().is_empty());
    }

    #[test]
    fn closed_session_rejects_calls() {
        let s = session();
        s.close().unwrap();
        assert!(matches!(
            s.get_data("eq", "a"),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(s.close().is_err());
    }

    #[test]
    fn errors_are_remembered_until_reset() {
        let s = session();
        assert!(s.last_error().is_none());
        s.record_error("first".into());
        s.record_error("second".into());
        assert_eq!(s.last_error().as_deref(), Some("second"));
        s.reset_error();
        assert!(s.last_error().is_none());
    }

    #[test]
    fn get_brackets_count() {
        let s = session();
        s.begin_get("eq", GetKind::Full).unwrap();
        s.begin_get("eq", GetKind::Full).unwrap();
        s.end_get("eq").unwrap();
        s.end_get("eq").unwrap();
        assert!(s.end_get("eq").is_err());
    }
}
