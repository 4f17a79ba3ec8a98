//! A single playground session.
//!
//! A session is one analyzer process plus the protocol client bound to
//! it. Sessions are only ever reachable through the registry; holding a
//! `Session` value means holding the process, the client, and the
//! working directory together, so dropping one tears all three down.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use pyground_lsp::LspClient;
use uuid::Uuid;

use crate::options::SessionOptions;
use crate::supervisor::ProcessHandle;
use crate::workdir::Workdir;

/// Opaque session identifier handed out to the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

pub(crate) struct Session {
    pub id: SessionId,
    pub options: SessionOptions,
    pub workdir: Workdir,
    /// Refreshed on every lookup; the sweep recycles sessions that go
    /// stale. Tokio's clock so tests can drive it.
    pub last_access: tokio::time::Instant,
    pub process: ProcessHandle,
    pub client: Arc<LspClient>,
}
