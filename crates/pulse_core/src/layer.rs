//! Handle-based entry point.
//!
//! [`AccessLayer`] hands sessions and object trees to callers as integer
//! handles. Sessions may be local (opened through the layer's registry) or
//! any other [`PulseAccess`] implementation attached to it, such as a
//! remote session.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::handle::{Handle, HandleTable};
use crate::object::ObjectNode;
use crate::session::{PulseAccess, TargetRegistry};
use crate::sample::SlicePolicy;
use parking_lot::Mutex;
use pulse_codec::Value;
use std::sync::Arc;
use tracing::warn;

/// Session and object handle tables over a target registry.
pub struct AccessLayer {
    registry: TargetRegistry,
    sessions: HandleTable<Arc<dyn PulseAccess>>,
    objects: HandleTable<ObjectNode>,
    last_error: Mutex<Option<String>>,
}

impl AccessLayer {
    /// Creates a layer sized by the registry's configuration.
    #[must_use]
    pub fn new(registry: TargetRegistry) -> Self {
        let config = registry.config();
        let sessions = HandleTable::new("Too many open pulse files", config.max_sessions);
        let objects = HandleTable::new("objects", config.max_objects);
        Self {
            registry,
            sessions,
            objects,
            last_error: Mutex::new(None),
        }
    }

    /// A layer over in-memory pulse files.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(TargetRegistry::in_memory())
    }

    /// The registry local sessions are opened through.
    #[must_use]
    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    fn config(&self) -> &Config {
        self.registry.config()
    }

    fn remember<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            *self.last_error.lock() = Some(e.to_string());
        }
        result
    }

    /// Opens a local session on an existing pulse file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist and `HandleExhausted`
    /// if too many sessions are open.
    pub fn open(&self, name: &str, shot: i32, run: i32) -> CoreResult<Handle> {
        let result = self
            .registry
            .open(name, shot, run)
            .and_then(|session| self.attach(Arc::new(session)));
        self.remember(result)
    }

    /// Creates a pulse file and opens a local session on it.
    ///
    /// # Errors
    ///
    /// Same as [`AccessLayer::open`], plus `InvalidState` if the file is
    /// open.
    pub fn create(
        &self,
        name: &str,
        shot: i32,
        run: i32,
        ref_shot: i32,
        ref_run: i32,
    ) -> CoreResult<Handle> {
        let result = self
            .registry
            .create(name, shot, run, ref_shot, ref_run)
            .and_then(|session| self.attach(Arc::new(session)));
        self.remember(result)
    }

    /// Hands out a handle for an already open session. The session is
    /// closed if no handle is free.
    ///
    /// # Errors
    ///
    /// Returns `HandleExhausted` if too many sessions are open.
    pub fn attach(&self, session: Arc<dyn PulseAccess>) -> CoreResult<Handle> {
        match self.sessions.acquire(Arc::clone(&session)) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(close) = session.close() {
                    warn!(error = %close, "closing unattached session failed");
                }
                Err(e)
            }
        }
    }

    /// The session behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` for a closed session.
    pub fn session(&self, handle: Handle) -> CoreResult<Arc<dyn PulseAccess>> {
        self.remember(self.sessions.get(handle))
    }

    /// Runs `f` on a session, remembering any error as the session's last
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` for a closed session, or the error of `f`.
    pub fn with_session<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&dyn PulseAccess) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let session = self.session(handle)?;
        let result = f(session.as_ref());
        if let Err(e) = &result {
            session.record_error(e.to_string());
        }
        result
    }

    /// Closes a session and frees its handle.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` for a closed session, or an error if the
    /// session fails to flush.
    pub fn close(&self, handle: Handle) -> CoreResult<()> {
        let session = self.remember(self.sessions.release(handle))?;
        self.remember(session.close())
    }

    /// Number of open session handles.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Last error of a call that had no session to record it on.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Forgets the layer's last error.
    pub fn reset_error(&self) {
        *self.last_error.lock() = None;
    }

    /// Starts an empty object.
    ///
    /// # Errors
    ///
    /// Returns `HandleExhausted` if too many objects are live.
    pub fn begin_object(&self) -> CoreResult<Handle> {
        let object = ObjectNode::with_capacity(self.config().object_slot_chunk);
        self.remember(self.objects.acquire(object))
    }

    /// Inserts a value into slot `index` of an object and returns the
    /// handle to keep using.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` for a released object and
    /// `InvalidArgument` if the path crosses a leaf.
    pub fn put_in_object(
        &self,
        object: Handle,
        rel_path: &str,
        index: usize,
        value: Value,
    ) -> CoreResult<Handle> {
        let chunk = self.config().object_slot_chunk;
        let result = self
            .objects
            .with_mut(object, |node| node.put_value(rel_path, index, value, chunk))
            .and_then(|inserted| inserted)
            .map(|()| object);
        self.remember(result)
    }

    /// Moves the object `subtree` into slot `index` of `object`. The
    /// subtree handle is consumed, even when the insertion fails.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` for a released handle and
    /// `InvalidArgument` if both handles are the same.
    pub fn put_object_in_object(
        &self,
        object: Handle,
        rel_path: &str,
        index: usize,
        subtree: Handle,
    ) -> CoreResult<Handle> {
        let chunk = self.config().object_slot_chunk;
        let result = if object == subtree {
            Err(CoreError::invalid_argument(
                "an object cannot be inserted into itself",
            ))
        } else if !self.objects.contains(object) {
            Err(CoreError::UseAfterRelease {
                handle: object.to_raw(),
            })
        } else {
            self.objects.release(subtree).and_then(|node| {
                self.objects
                    .with_mut(object, |parent| parent.put_object(rel_path, index, node, chunk))
                    .and_then(|inserted| inserted)
                    .map(|()| object)
            })
        };
        self.remember(result)
    }

    /// The value at `rel_path` in slot `index` of an object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slot or path does not exist.
    pub fn get_from_object(&self, object: Handle, rel_path: &str, index: usize) -> CoreResult<Value> {
        let result = self
            .objects
            .with(object, |node| node.get_value(rel_path, index))
            .and_then(|value| value);
        self.remember(result)
    }

    /// A new handle to a copy of the nested object at `rel_path` in slot
    /// `index`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slot or path does not exist.
    pub fn get_object_from_object(
        &self,
        object: Handle,
        rel_path: &str,
        index: usize,
    ) -> CoreResult<Handle> {
        let result = self
            .objects
            .with(object, |node| node.get_object(rel_path, index).cloned())
            .and_then(|nested| nested)
            .and_then(|nested| self.objects.acquire(nested));
        self.remember(result)
    }

    /// Number of slots of an object.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` for a released object.
    pub fn get_object_dim(&self, object: Handle) -> CoreResult<usize> {
        let result = self.objects.with(object, ObjectNode::dim).and_then(|dim| dim);
        self.remember(result)
    }

    /// Releases an object.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` if the object was already released.
    pub fn release_object(&self, object: Handle) -> CoreResult<()> {
        self.remember(self.objects.release(object).map(drop))
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Stores an object at a field. The object handle stays valid.
    ///
    /// # Errors
    ///
    /// Returns the session's error.
    pub fn put_object(
        &self,
        session: Handle,
        cpo: &str,
        path: &str,
        object: Handle,
        timed: bool,
    ) -> CoreResult<()> {
        let node = self.remember(self.objects.get(object))?;
        self.with_session(session, |s| s.put_object(cpo, path, &node, timed))
    }

    /// Appends the single slot of an object as a new slice.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the object holds more than one slot.
    pub fn put_object_slice(
        &self,
        session: Handle,
        cpo: &str,
        path: &str,
        object: Handle,
    ) -> CoreResult<()> {
        let slice = self.remember(self.slice_of(object))?;
        self.with_session(session, |s| s.put_object_slice(cpo, path, &slice))
    }

    /// Replaces the last slice with the single slot of an object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the object holds more than one slot,
    /// `NoSlice` if the field has none.
    pub fn replace_last_object_slice(
        &self,
        session: Handle,
        cpo: &str,
        path: &str,
        object: Handle,
    ) -> CoreResult<()> {
        let slice = self.remember(self.slice_of(object))?;
        self.with_session(session, |s| s.replace_last_object_slice(cpo, path, &slice))
    }

    fn slice_of(&self, object: Handle) -> CoreResult<ObjectNode> {
        let node = self.objects.get(object)?;
        match node {
            ObjectNode::Array(mut slots) if slots.len() == 1 => Ok(slots.remove(0)),
            ObjectNode::Array(slots) => Err(CoreError::invalid_argument(format!(
                "a slice object holds one slot, found {}",
                slots.len()
            ))),
            other => Ok(other),
        }
    }

    /// Reads a whole object into a new handle.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing field.
    pub fn get_object(&self, session: Handle, cpo: &str, path: &str) -> CoreResult<Handle> {
        let node = self.with_session(session, |s| s.get_object(cpo, path))?;
        self.remember(self.objects.acquire(node))
    }

    /// Reads the object slice at `time` into a new one-slot object.
    ///
    /// # Errors
    ///
    /// Returns `NoSlice` if nothing is stored at the resolved index.
    pub fn get_object_slice(
        &self,
        session: Handle,
        cpo: &str,
        path: &str,
        time_base: &str,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<Handle> {
        let node =
            self.with_session(session, |s| s.get_object_slice(cpo, path, time_base, time, policy))?;
        self.remember(self.objects.acquire(ObjectNode::Array(vec![node])))
    }
}

impl std::fmt::Debug for AccessLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLayer")
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .field("objects", &self.objects)
            .finish()
    }
}
