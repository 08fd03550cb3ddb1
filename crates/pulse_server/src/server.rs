//! Main pulse server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use pulse_core::TargetRegistry;
use pulse_protocol::{
    Ack, CloseRequest, CreateRequest, DeleteRequest, GetBatchRequest, OpenRequest, Procedure,
    PutBatch, WireMessage,
};
use std::sync::Arc;
use tracing::warn;

/// The pulse server.
///
/// This server owns pulse files on behalf of remote sessions. Each call is
/// a procedure name and a CBOR payload; the reply is a CBOR payload or an
/// error message.
///
/// # Example
///
/// ```
/// use pulse_core::TargetRegistry;
/// use pulse_protocol::{OpenRequest, Procedure, WireMessage};
/// use pulse_server::{PulseServer, ServerConfig};
///
/// let server = PulseServer::new(ServerConfig::default(), TargetRegistry::in_memory());
///
/// let request = OpenRequest { name: "test".into(), shot: 1, run: 0 };
/// let reply = server.handle(Procedure::Open, &request.encode().unwrap());
/// assert!(reply.unwrap_err().contains("not found"));
/// ```
pub struct PulseServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl PulseServer {
    /// Creates a new pulse server over `registry`.
    pub fn new(config: ServerConfig, registry: TargetRegistry) -> Self {
        let context = Arc::new(HandlerContext::new(config, registry));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles one call, mapping failures to their message.
    pub fn handle(&self, procedure: Procedure, payload: &[u8]) -> Result<Vec<u8>, String> {
        self.dispatch(procedure, payload).map_err(|e| {
            if e.is_server_error() {
                warn!(%procedure, error = %e, "call failed");
            }
            e.to_string()
        })
    }

    /// Handles one call by procedure name.
    pub fn handle_named(&self, procedure: &str, payload: &[u8]) -> Result<Vec<u8>, String> {
        match Procedure::from_name(procedure) {
            Ok(procedure) => self.handle(procedure, payload),
            Err(e) => Err(e.to_string()),
        }
    }

    fn dispatch(&self, procedure: Procedure, payload: &[u8]) -> ServerResult<Vec<u8>> {
        let max = self.context.config.max_payload_bytes;
        if payload.len() > max {
            return Err(ServerError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        let reply = match procedure {
            Procedure::Open => self.handler.handle_open(OpenRequest::decode(payload)?)?.encode(),
            Procedure::Create => self
                .handler
                .handle_create(CreateRequest::decode(payload)?)?
                .encode(),
            Procedure::Close => {
                self.handler.handle_close(CloseRequest::decode(payload)?)?;
                Ack.encode()
            }
            Procedure::PutBatch => {
                self.handler.handle_put_batch(PutBatch::decode(payload)?)?;
                Ack.encode()
            }
            Procedure::GetBatch => self
                .handler
                .handle_get_batch(GetBatchRequest::decode(payload)?)?
                .encode(),
            Procedure::DeleteData => {
                self.handler.handle_delete(DeleteRequest::decode(payload)?)?;
                Ack.encode()
            }
        };
        Ok(reply?)
    }

    /// The registry the server opens pulse files from.
    pub fn registry(&self) -> &TargetRegistry {
        &self.context.registry
    }

    /// Returns the number of sessions clients hold open.
    pub fn session_count(&self) -> usize {
        self.context.session_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_codec::Value;
    use pulse_core::{GetKind, PutKind};
    use pulse_protocol::{Entry, GetBatchReply, SessionReply};

    fn create(server: &PulseServer) -> SessionReply {
        let request = CreateRequest {
            name: "test".into(),
            shot: 3,
            run: 1,
            ref_shot: 0,
            ref_run: 0,
        };
        let reply = server
            .handle(Procedure::Create, &request.encode().unwrap())
            .unwrap();
        SessionReply::decode(&reply).unwrap()
    }

    #[test]
    fn server_lifecycle() {
        let server = PulseServer::new(ServerConfig::default(), TargetRegistry::in_memory());
        assert_eq!(server.session_count(), 0);

        let reply = create(&server);
        assert_eq!(server.session_count(), 1);
        assert_eq!(server.registry().open_count(), 1);

        let close = CloseRequest {
            session: reply.session,
        };
        server
            .handle(Procedure::Close, &close.encode().unwrap())
            .unwrap();
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.registry().open_count(), 0);
    }

    #[test]
    fn put_then_get() {
        let server = PulseServer::new(ServerConfig::default(), TargetRegistry::in_memory());
        let session = create(&server).session;

        let mut batch = PutBatch::new(session, "summary", PutKind::non_timed());
        batch.plain.push(Entry::plain("summary/label0", Value::from("ok")));
        server
            .handle_named("put_batch", &batch.encode().unwrap())
            .unwrap();

        let request = GetBatchRequest {
            session,
            cpo: "summary".into(),
            kind: GetKind::Full,
        };
        let reply = server
            .handle(Procedure::GetBatch, &request.encode().unwrap())
            .unwrap();
        let reply = GetBatchReply::decode(&reply).unwrap();
        assert_eq!(reply.fields.len(), 1);
        assert_eq!(reply.fields[0].0, "label0");
    }

    #[test]
    fn bad_calls_report_messages() {
        let server = PulseServer::new(
            ServerConfig::default().with_max_payload_bytes(8),
            TargetRegistry::in_memory(),
        );
        assert_eq!(
            server.handle_named("commit", &[]).unwrap_err(),
            "unknown procedure: commit"
        );
        assert!(server
            .handle(Procedure::Close, &[0xff])
            .unwrap_err()
            .starts_with("codec error"));
        assert!(server
            .handle(Procedure::Close, &[0; 9])
            .unwrap_err()
            .contains("exceeds limit"));
    }
}
