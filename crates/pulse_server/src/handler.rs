//! Request handlers for the protocol procedures.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::replay::{self, ReplayReport};
use pulse_core::{
    CoreError, FieldContent, FieldPath, GetKind, Handle, HandleTable, LocalSession, NodePath,
    PulseAccess, TargetRegistry,
};
use pulse_protocol::{
    CloseRequest, CreateRequest, DeleteRequest, GetBatchReply, GetBatchRequest, OpenRequest,
    PutBatch, SessionReply, SessionToken,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Pulse files the server can open.
    pub registry: TargetRegistry,
    /// Sessions opened by clients, keyed by their token.
    sessions: HandleTable<Arc<LocalSession>>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, registry: TargetRegistry) -> Self {
        let capacity = registry.config().max_sessions;
        Self {
            config,
            registry,
            sessions: HandleTable::new("Too many open pulse files", capacity),
        }
    }

    fn register(&self, session: LocalSession) -> ServerResult<SessionToken> {
        let session = Arc::new(session);
        match self.sessions.acquire(Arc::clone(&session)) {
            Ok(handle) => Ok(SessionToken(handle.to_raw())),
            Err(e) => {
                session.close()?;
                Err(e.into())
            }
        }
    }

    fn session(&self, token: SessionToken) -> ServerResult<Arc<LocalSession>> {
        self.sessions
            .get(Handle::from_raw(token.0))
            .map_err(|_| ServerError::UnknownSession(token.0))
    }

    /// Number of sessions clients hold open.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Handler for protocol requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles an open request.
    pub fn handle_open(&self, request: OpenRequest) -> ServerResult<SessionReply> {
        let session = self
            .context
            .registry
            .open(&request.name, request.shot, request.run)?;
        let token = self.context.register(session)?;
        info!(name = %request.name, shot = request.shot, run = request.run, "client opened pulse file");
        Ok(SessionReply { session: token })
    }

    /// Handles a create request.
    pub fn handle_create(&self, request: CreateRequest) -> ServerResult<SessionReply> {
        let session = self.context.registry.create(
            &request.name,
            request.shot,
            request.run,
            request.ref_shot,
            request.ref_run,
        )?;
        let token = self.context.register(session)?;
        info!(name = %request.name, shot = request.shot, run = request.run, "client created pulse file");
        Ok(SessionReply { session: token })
    }

    /// Handles a close request.
    pub fn handle_close(&self, request: CloseRequest) -> ServerResult<()> {
        let session = self
            .context
            .sessions
            .release(Handle::from_raw(request.session.0))
            .map_err(|_| ServerError::UnknownSession(request.session.0))?;
        session.close()?;
        Ok(())
    }

    /// Handles a put batch.
    ///
    /// Field failures are logged and skipped; only a batch that cannot be
    /// opened on its record is an error.
    pub fn handle_put_batch(&self, batch: PutBatch) -> ServerResult<ReplayReport> {
        let max = self.context.config.max_batch_entries;
        if batch.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "Too many entries: {} > {max}",
                batch.len()
            )));
        }
        let session = self.context.session(batch.session)?;
        let default_time_base = &self.context.registry.config().default_time_base;
        Ok(replay::replay(session.as_ref(), &batch, default_time_base)?)
    }

    /// Handles a get batch.
    ///
    /// A sliced get resolves time segments and object slices at the
    /// requested time, except for the record's default time base, which is
    /// returned whole.
    pub fn handle_get_batch(&self, request: GetBatchRequest) -> ServerResult<GetBatchReply> {
        let session = self.context.session(request.session)?;
        let cpo = NodePath::from_encoded(&request.cpo);
        let time_base =
            cpo.join(&FieldPath::parse(&self.context.registry.config().default_time_base).encode());

        let mut fields = Vec::new();
        for relative in session.field_nodes(&cpo)? {
            let path = cpo.join(&relative);
            let content = session.content_at(&path)?;
            let content = match request.kind {
                GetKind::Slice { time, policy } if path != time_base => {
                    match resolve(&session, content, &path, &time_base, time, policy)? {
                        Some(content) => content,
                        None => continue,
                    }
                }
                _ => content,
            };
            fields.push((relative.as_str().to_string(), content));
        }
        debug!(cpo = %cpo, fields = fields.len(), "served get batch");
        Ok(GetBatchReply { fields })
    }

    /// Handles a delete request.
    pub fn handle_delete(&self, request: DeleteRequest) -> ServerResult<()> {
        let session = self.context.session(request.session)?;
        let path = NodePath::from_encoded(&request.path);
        if path.is_empty() {
            return Err(ServerError::InvalidRequest("empty delete path".into()));
        }
        session.delete_at(&path)?;
        Ok(())
    }
}

/// Resolves one field of a sliced get; `None` drops the field.
fn resolve(
    session: &LocalSession,
    content: FieldContent,
    path: &NodePath,
    time_base: &NodePath,
    time: f64,
    policy: pulse_core::SlicePolicy,
) -> ServerResult<Option<FieldContent>> {
    match content {
        FieldContent::Series(series) => match series.sample(time, policy) {
            Ok(sample) => Ok(Some(FieldContent::Sample(sample))),
            Err(CoreError::NoSlice { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        },
        FieldContent::Objects(slots) => {
            match session.get_object_slice_at(path, time_base, time, policy) {
                Ok(slice) => Ok(Some(FieldContent::ObjectSlice(slice))),
                Err(e) => {
                    debug!(%path, error = %e, "object slice left unresolved");
                    Ok(Some(FieldContent::Objects(slots)))
                }
            }
        }
        other => Ok(Some(other)),
    }
}
