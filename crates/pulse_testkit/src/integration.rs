//! Cross-crate integration test helpers.
//!
//! Pairs a local session with a remote session served by an in-process
//! server, so the same writes can be checked to read back the same way.

use crate::fixtures::{TEST_NAME, TEST_RUN, TEST_SHOT};
use pulse_core::{LocalSession, PulseAccess, SlicePolicy, TargetRegistry};
use pulse_protocol::Procedure;
use pulse_remote::{
    LoopbackTransport, PeerHandler, RecordingTransport, RemoteConfig, RemoteSession,
};
use pulse_server::{PulseServer, ServerConfig};
use std::sync::Arc;

/// Hands calls to an in-process server.
pub struct ServerPeer(pub Arc<PulseServer>);

impl PeerHandler for ServerPeer {
    fn handle(&self, procedure: Procedure, payload: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle(procedure, payload)
    }
}

/// Transport type of [`RemoteHarness`].
pub type HarnessTransport = RecordingTransport<LoopbackTransport<ServerPeer>>;

/// A remote session over a loopback transport to its own server.
pub struct RemoteHarness {
    /// The server answering the session.
    pub server: Arc<PulseServer>,
    /// The transport, recording every call.
    pub transport: Arc<HarnessTransport>,
    /// The remote session.
    pub session: RemoteSession,
}

impl RemoteHarness {
    /// Creates a server on an in-memory registry and a remote session on a
    /// fresh pulse file.
    pub fn new() -> Self {
        Self::with_server_config(ServerConfig::default())
    }

    /// Same as [`RemoteHarness::new`] with a custom server configuration.
    pub fn with_server_config(config: ServerConfig) -> Self {
        let server = Arc::new(PulseServer::new(config, TargetRegistry::in_memory()));
        let peer = ServerPeer(Arc::clone(&server));
        let transport = Arc::new(RecordingTransport::new(LoopbackTransport::new(peer)));
        let session = RemoteSession::create(
            transport.clone(),
            RemoteConfig::new("harness"),
            TEST_NAME,
            TEST_SHOT,
            TEST_RUN,
            0,
            0,
        )
        .expect("Failed to create remote pulse file");
        Self {
            server,
            transport,
            session,
        }
    }

    /// Number of calls of `procedure` made so far.
    pub fn calls(&self, procedure: Procedure) -> usize {
        self.transport.count(procedure)
    }
}

impl Default for RemoteHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A local session on a fresh in-memory pulse file.
pub fn local_session() -> LocalSession {
    TargetRegistry::in_memory()
        .create(TEST_NAME, TEST_SHOT, TEST_RUN, 0, 0)
        .expect("Failed to create pulse file")
}

/// Asserts that two sessions return the same series for `path` and the
/// same sample at each of `times` under every policy.
///
/// The caller opens any get brackets the sessions need.
pub fn assert_same_series(
    a: &dyn PulseAccess,
    b: &dyn PulseAccess,
    cpo: &str,
    path: &str,
    time_base: &str,
    times: &[f64],
) {
    let left = a.get_all(cpo, path, time_base).expect("Failed to read series");
    let right = b.get_all(cpo, path, time_base).expect("Failed to read series");
    assert_eq!(left, right, "series mismatch for {cpo}/{path}");

    for &time in times {
        for policy in [
            SlicePolicy::Closest,
            SlicePolicy::Previous,
            SlicePolicy::Interpolation,
        ] {
            let left = a.get_slice(cpo, path, time_base, time, policy).ok();
            let right = b.get_slice(cpo, path, time_base, time, policy).ok();
            assert_eq!(left, right, "slice mismatch for {cpo}/{path} at {time} ({policy:?})");
        }
    }
}
