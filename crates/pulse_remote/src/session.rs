//! Remote sessions.
//!
//! A remote session never touches a store. Writes made between `begin_put`
//! and `end_put` are collected into a [`PutBatch`] and sent in one call;
//! `begin_get` fetches a whole record in one call and serves every read of
//! that record from the fetched copy until the matching `end_get`.
//!
//! ```text
//! Idle --begin_put--> Collecting --end_put--> Idle     (one put_batch call)
//! begin_get --> fetched (refs += 1) --end_get--> released at refs == 0
//! ```

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::transport::RemoteTransport;
use parking_lot::Mutex;
use pulse_codec::Value;
use pulse_core::reader::{self, FieldContent, FieldSource};
use pulse_core::{
    field_node, record_node, CacheLevel, CoreError, CoreResult, FieldInfo, GetKind, NodePath,
    ObjectNode, PulseAccess, PulseTarget, PutKind, Sample, Series, SlicePolicy,
};
use pulse_protocol::{
    Ack, CloseRequest, CreateRequest, DeleteRequest, Entry, GetBatchReply, GetBatchRequest,
    OpenRequest, Procedure, PutBatch, SessionReply, SessionToken, WireMessage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A record fetched by `begin_get`.
struct Fetched {
    kind: GetKind,
    refs: usize,
    fields: HashMap<NodePath, FieldContent>,
}

impl FieldSource for Fetched {
    fn content(&self, path: &NodePath) -> CoreResult<FieldContent> {
        self.fields
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::not_found(path.as_str()))
    }
}

#[derive(Default)]
struct Pending {
    puts: HashMap<NodePath, PutBatch>,
    gets: HashMap<NodePath, Fetched>,
    cache_level: CacheLevel,
}

/// A session on a pulse file owned by a peer.
pub struct RemoteSession {
    target: PulseTarget,
    token: SessionToken,
    config: RemoteConfig,
    transport: Arc<dyn RemoteTransport>,
    pending: Mutex<Pending>,
    closed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

fn call<R: WireMessage>(
    transport: &dyn RemoteTransport,
    procedure: Procedure,
    request: &impl WireMessage,
) -> CoreResult<R> {
    let payload = request.encode().map_err(RemoteError::from)?;
    let reply = transport.call(procedure, &payload)?;
    Ok(R::decode(&reply).map_err(RemoteError::from)?)
}

impl RemoteSession {
    /// Opens a session on an existing pulse file of the peer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid shot or run, and
    /// `RemoteProtocol` if the peer refuses.
    pub fn open(
        transport: Arc<dyn RemoteTransport>,
        config: RemoteConfig,
        name: &str,
        shot: i32,
        run: i32,
    ) -> CoreResult<Self> {
        let target = PulseTarget::new(name, shot, run)?;
        let request = OpenRequest {
            name: name.to_string(),
            shot,
            run,
        };
        let reply: SessionReply = call(transport.as_ref(), Procedure::Open, &request)?;
        info!(peer = %config.peer, %target, "opened remote session");
        Ok(Self::new(target, reply.session, config, transport))
    }

    /// Creates a pulse file on the peer and opens a session on it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid shot or run, and
    /// `RemoteProtocol` if the peer refuses.
    pub fn create(
        transport: Arc<dyn RemoteTransport>,
        config: RemoteConfig,
        name: &str,
        shot: i32,
        run: i32,
        ref_shot: i32,
        ref_run: i32,
    ) -> CoreResult<Self> {
        let target = PulseTarget::new(name, shot, run)?;
        let request = CreateRequest {
            name: name.to_string(),
            shot,
            run,
            ref_shot,
            ref_run,
        };
        let reply: SessionReply = call(transport.as_ref(), Procedure::Create, &request)?;
        info!(peer = %config.peer, %target, "created remote pulse file");
        Ok(Self::new(target, reply.session, config, transport))
    }

    fn new(
        target: PulseTarget,
        token: SessionToken,
        config: RemoteConfig,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            target,
            token,
            config,
            transport,
            pending: Mutex::new(Pending::default()),
            closed: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// The token the peer handed out for this session.
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// The configuration of this session.
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Remembers the error of a failed call as the session's last error.
    fn track<R>(&self, result: CoreResult<R>) -> CoreResult<R> {
        if let Err(e) = &result {
            self.record_error(e.to_string());
        }
        result
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return self.track(Err(CoreError::invalid_state("session is closed")));
        }
        Ok(())
    }

    fn node(&self, cpo: &str, path: &str) -> CoreResult<NodePath> {
        self.track(field_node(cpo, path))
    }

    fn record(&self, cpo: &str) -> CoreResult<NodePath> {
        self.track(record_node(cpo))
    }

    /// Runs `f` on the batch collecting for `cpo`.
    fn collect(
        &self,
        cpo: &str,
        f: impl FnOnce(&mut PutBatch) -> CoreResult<()>,
    ) -> CoreResult<()> {
        self.check_open()?;
        let node = self.record(cpo)?;
        let mut pending = self.pending.lock();
        let result = match pending.puts.get_mut(&node) {
            Some(batch) => f(batch),
            None => Err(CoreError::invalid_state(format!("no put open on {node}"))),
        };
        self.track(result)
    }

    /// Runs `f` on the record fetched for `cpo`.
    fn fetched<R>(&self, cpo: &str, f: impl FnOnce(&Fetched) -> CoreResult<R>) -> CoreResult<R> {
        self.check_open()?;
        let node = self.record(cpo)?;
        let pending = self.pending.lock();
        let result = match pending.gets.get(&node) {
            Some(fetched) => f(fetched),
            None => Err(CoreError::remote(format!(
                "{node} was not fetched with begin_get"
            ))),
        };
        self.track(result)
    }

    fn send(&self, batch: &PutBatch) -> CoreResult<()> {
        let _: Ack = self.track(call(self.transport.as_ref(), Procedure::PutBatch, batch))?;
        debug!(cpo = %batch.cpo, entries = batch.len(), "sent put batch");
        Ok(())
    }

    fn delete(&self, path: &NodePath) -> CoreResult<()> {
        self.check_open()?;
        let _pending = self.pending.lock();
        let request = DeleteRequest {
            session: self.token,
            path: path.as_str().to_string(),
        };
        let _: Ack = self.track(call(
            self.transport.as_ref(),
            Procedure::DeleteData,
            &request,
        ))?;
        Ok(())
    }
}

fn declare_time_base(batch: &mut PutBatch, time_base: NodePath) {
    let time_base = time_base.as_str().to_string();
    if let Some(previous) = &batch.time_base {
        if *previous != time_base {
            debug!(cpo = %batch.cpo, %previous, %time_base, "time base redeclared in batch");
        }
    }
    batch.time_base = Some(time_base);
}

fn require_replace(batch: &PutBatch, what: &str) -> CoreResult<()> {
    if batch.kind == PutKind::ReplaceLast {
        Ok(())
    } else {
        Err(CoreError::invalid_state(format!(
            "{what} needs a replace-last put on {}",
            batch.cpo
        )))
    }
}

impl PulseAccess for RemoteSession {
    fn target(&self) -> &PulseTarget {
        &self.target
    }

    fn begin_put(&self, cpo: &str, kind: PutKind) -> CoreResult<()> {
        self.check_open()?;
        let node = self.record(cpo)?;
        let mut pending = self.pending.lock();
        if pending.puts.contains_key(&node) {
            return self.track(Err(CoreError::invalid_state(format!(
                "put already in progress on {node}"
            ))));
        }
        debug!(cpo = %node, ?kind, "collecting put");
        let batch = PutBatch::new(self.token, node.as_str(), kind);
        pending.puts.insert(node, batch);
        Ok(())
    }

    fn end_put(&self, cpo: &str) -> CoreResult<()> {
        self.check_open()?;
        let node = self.record(cpo)?;
        let mut pending = self.pending.lock();
        let batch = self.track(
            pending
                .puts
                .remove(&node)
                .ok_or_else(|| CoreError::invalid_state(format!("no put open on {node}"))),
        )?;
        if batch.is_empty() && !matches!(batch.kind, PutKind::Full { .. }) {
            return Ok(());
        }
        self.send(&batch)
    }

    fn begin_get(&self, cpo: &str, kind: GetKind) -> CoreResult<()> {
        self.check_open()?;
        let node = self.record(cpo)?;
        let mut pending = self.pending.lock();
        if let Some(fetched) = pending.gets.get_mut(&node) {
            if fetched.kind != kind {
                let held = fetched.kind;
                return self.track(Err(CoreError::invalid_state(format!(
                    "{node} already fetched with {held:?}"
                ))));
            }
            fetched.refs += 1;
            return Ok(());
        }
        let request = GetBatchRequest {
            session: self.token,
            cpo: node.as_str().to_string(),
            kind,
        };
        let reply: GetBatchReply =
            self.track(call(self.transport.as_ref(), Procedure::GetBatch, &request))?;
        let fields = reply
            .fields
            .into_iter()
            .map(|(name, content)| (node.join(&NodePath::from_encoded(&name)), content))
            .collect::<HashMap<_, _>>();
        debug!(cpo = %node, fields = fields.len(), "fetched record");
        pending.gets.insert(
            node,
            Fetched {
                kind,
                refs: 1,
                fields,
            },
        );
        Ok(())
    }

    fn end_get(&self, cpo: &str) -> CoreResult<()> {
        self.check_open()?;
        let node = self.record(cpo)?;
        let mut pending = self.pending.lock();
        let Some(fetched) = pending.gets.get_mut(&node) else {
            return self.track(Err(CoreError::invalid_state(format!(
                "no get open on {node}"
            ))));
        };
        fetched.refs -= 1;
        if fetched.refs == 0 {
            pending.gets.remove(&node);
        }
        Ok(())
    }

    fn put_data(&self, cpo: &str, path: &str, value: Value) -> CoreResult<()> {
        let node = self.node(cpo, path)?;
        self.collect(cpo, |batch| {
            batch.plain.push(Entry::plain(node.as_str(), value));
            Ok(())
        })
    }

    fn get_data(&self, cpo: &str, path: &str) -> CoreResult<Value> {
        let node = self.node(cpo, path)?;
        self.fetched(cpo, |fetched| reader::read_data(fetched, &node))
    }

    fn get_dimension(&self, cpo: &str, path: &str) -> CoreResult<FieldInfo> {
        let node = self.node(cpo, path)?;
        self.fetched(cpo, |fetched| reader::read_dimension(fetched, &node))
    }

    fn delete_data(&self, cpo: &str, path: &str) -> CoreResult<()> {
        self.delete(&self.node(cpo, path)?)
    }

    fn delete_all_fields(&self, cpo: &str) -> CoreResult<()> {
        self.delete(&self.record(cpo)?)
    }

    fn put_segment(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        rows: Vec<Value>,
        times: Vec<f64>,
    ) -> CoreResult<()> {
        let node = self.node(cpo, path)?;
        let time_base = self.node(cpo, time_base)?;
        self.collect(cpo, |batch| {
            declare_time_base(batch, time_base);
            batch.segments.push(Entry::rows(node.as_str(), rows, times));
            Ok(())
        })
    }

    fn put_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        value: Value,
        time: f64,
    ) -> CoreResult<()> {
        self.put_segment(cpo, path, time_base, vec![value], vec![time])
    }

    fn replace_last_slice(&self, cpo: &str, path: &str, value: Value) -> CoreResult<()> {
        let node = self.node(cpo, path)?;
        self.collect(cpo, |batch| {
            require_replace(batch, "replace_last_slice")?;
            batch.plain.push(Entry::plain(node.as_str(), value));
            Ok(())
        })
    }

    fn get_all(&self, cpo: &str, path: &str, time_base: &str) -> CoreResult<Series> {
        let node = self.node(cpo, path)?;
        let time_base = self.node(cpo, time_base)?;
        self.fetched(cpo, |fetched| reader::read_all(fetched, &node, &time_base))
    }

    fn get_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<Sample> {
        let node = self.node(cpo, path)?;
        let time_base = self.node(cpo, time_base)?;
        self.fetched(cpo, |fetched| {
            reader::read_slice(fetched, &node, &time_base, time, policy)
        })
    }

    fn get_range(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        t1: f64,
        t2: f64,
    ) -> CoreResult<Series> {
        let node = self.node(cpo, path)?;
        let time_base = self.node(cpo, time_base)?;
        self.fetched(cpo, |fetched| {
            reader::read_range(fetched, &node, &time_base, t1, t2)
        })
    }

    fn is_sliced(&self, cpo: &str, path: &str) -> CoreResult<bool> {
        let node = self.node(cpo, path)?;
        self.fetched(cpo, |fetched| {
            Ok(matches!(
                fetched.fields.get(&node),
                Some(FieldContent::Series(_) | FieldContent::Sample(_))
            ))
        })
    }

    fn put_object(
        &self,
        cpo: &str,
        path: &str,
        object: &ObjectNode,
        timed: bool,
    ) -> CoreResult<()> {
        let node = self.node(cpo, path)?;
        if timed {
            self.track(object.dim())?;
        }
        self.collect(cpo, |batch| {
            batch
                .objects
                .push(Entry::object(node.as_str(), object.to_value(), timed));
            Ok(())
        })
    }

    fn put_object_slice(&self, cpo: &str, path: &str, slice: &ObjectNode) -> CoreResult<()> {
        let node = self.node(cpo, path)?;
        self.collect(cpo, |batch| {
            if batch.kind == PutKind::ReplaceLast {
                return Err(CoreError::invalid_state(format!(
                    "cannot append slices in a replace-last put on {}",
                    batch.cpo
                )));
            }
            batch
                .objects
                .push(Entry::slices(node.as_str(), vec![slice.to_value()]));
            Ok(())
        })
    }

    fn replace_last_object_slice(
        &self,
        cpo: &str,
        path: &str,
        slice: &ObjectNode,
    ) -> CoreResult<()> {
        let node = self.node(cpo, path)?;
        self.collect(cpo, |batch| {
            require_replace(batch, "replace_last_object_slice")?;
            batch
                .objects
                .push(Entry::slices(node.as_str(), vec![slice.to_value()]));
            Ok(())
        })
    }

    fn get_object(&self, cpo: &str, path: &str) -> CoreResult<ObjectNode> {
        let node = self.node(cpo, path)?;
        self.fetched(cpo, |fetched| reader::read_object(fetched, &node))
    }

    fn get_object_slice(
        &self,
        cpo: &str,
        path: &str,
        time_base: &str,
        time: f64,
        policy: SlicePolicy,
    ) -> CoreResult<ObjectNode> {
        let node = self.node(cpo, path)?;
        let time_base = self.node(cpo, time_base)?;
        self.fetched(cpo, |fetched| {
            reader::read_object_slice(fetched, &node, &time_base, time, policy)
        })
    }

    fn cache_level(&self) -> CacheLevel {
        self.pending.lock().cache_level
    }

    fn set_cache_level(&self, level: CacheLevel) -> CoreResult<()> {
        self.check_open()?;
        self.pending.lock().cache_level = level;
        Ok(())
    }

    fn flush_cache(&self, cpo: Option<&str>) -> CoreResult<()> {
        self.check_open()?;
        if let Some(cpo) = cpo {
            self.record(cpo)?;
        }
        Ok(())
    }

    fn discard_cache(&self, cpo: Option<&str>) -> CoreResult<()> {
        self.check_open()?;
        let mut pending = self.pending.lock();
        match cpo {
            Some(cpo) => {
                pending.gets.remove(&self.record(cpo)?);
            }
            None => pending.gets.clear(),
        }
        Ok(())
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
        if self.closed.swap(true, Ordering::SeqCst) {
            return self.track(Err(CoreError::invalid_state("session is already closed")));
        }
        let mut pending = self.pending.lock();
        let unfinished: Vec<PutBatch> = pending.puts.drain().map(|(_, batch)| batch).collect();
        pending.gets.clear();
        let mut flushed = Ok(());
        for batch in unfinished {
            if self.config.flush_on_close {
                warn!(cpo = %batch.cpo, "sending put left open at close");
                if let Err(e) = self.send(&batch) {
                    warn!(cpo = %batch.cpo, error = %e, "put left open at close was refused");
                    flushed = flushed.and(Err(e));
                }
            } else {
                warn!(cpo = %batch.cpo, entries = batch.len(), "dropping put left open at close");
            }
        }
        let request = CloseRequest {
            session: self.token,
        };
        let _: Ack = self.track(call(self.transport.as_ref(), Procedure::Close, &request))?;
        info!(peer = %self.config.peer, target = %self.target, "closed remote session");
        flushed
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("target", &self.target)
            .field("token", &self.token)
            .field("peer", &self.config.peer)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
