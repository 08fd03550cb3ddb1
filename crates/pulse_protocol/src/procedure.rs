//! Remote procedures.

use crate::error::{ProtocolError, ProtocolResult};
use std::fmt;

/// A procedure a client can call on a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    /// Open a session on an existing pulse file.
    Open,
    /// Create a pulse file and open a session on it.
    Create,
    /// Close a session.
    Close,
    /// Replay one collected write batch.
    PutBatch,
    /// Fetch the fields of one record.
    GetBatch,
    /// Delete a field or a whole record.
    DeleteData,
}

impl Procedure {
    /// Every procedure, in protocol order.
    pub const ALL: [Procedure; 6] = [
        Procedure::Open,
        Procedure::Create,
        Procedure::Close,
        Procedure::PutBatch,
        Procedure::GetBatch,
        Procedure::DeleteData,
    ];

    /// Wire name of the procedure.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Procedure::Open => "open",
            Procedure::Create => "create",
            Procedure::Close => "close",
            Procedure::PutBatch => "put_batch",
            Procedure::GetBatch => "get_batch",
            Procedure::DeleteData => "delete_data",
        }
    }

    /// Parses a wire name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProcedure` for names outside the protocol.
    pub fn from_name(name: &str) -> ProtocolResult<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| ProtocolError::unknown_procedure(name))
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
