//! Errors surfaced to the session-creation caller.
//!
//! Creation failures (install, spawn, handshake) propagate; per-request
//! feature failures never reach this type; the protocol client absorbs
//! them into empty results.

use crate::install::InstallError;
use crate::session::SessionId;
use crate::versions::VersionLookupError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The requested or resolved version could not be installed. Rejected
    /// before any process was spawned.
    #[error(transparent)]
    Install(#[from] InstallError),

    /// The npm registry could not answer a version lookup.
    #[error(transparent)]
    VersionLookup(#[from] VersionLookupError),

    /// The session working directory could not be prepared.
    #[error("failed to prepare session workspace")]
    Workspace(#[source] std::io::Error),

    /// The analyzer process could not be started; nothing was registered.
    #[error("failed to spawn analyzer process")]
    Spawn(#[source] std::io::Error),

    /// The process started but the protocol handshake failed; the session
    /// was torn down again.
    #[error("analyzer handshake failed: {0}")]
    Handshake(String),

    /// No active session has this id. A caller-facing bad-request
    /// condition, not a fault.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// A pending request was torn down with its session, or the channel
    /// to the analyzer died mid-request.
    #[error(transparent)]
    Client(#[from] pyground_lsp::ClientError),
}
