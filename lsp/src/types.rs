//! Public types shared with the session layer.
//!
//! Feature results (hover, completion, signature help) and diagnostic items
//! are deliberately raw `serde_json::Value`s: the service proxies them to
//! its caller unchanged, and typing them here would only strip fields the
//! analyzer may add between versions.

use serde::{Deserialize, Serialize};

/// Zero-based line/character position in the playground document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// A diagnostics set published by the analyzer for one document version.
///
/// Fields are private; the version stamp and the item list must stay
/// consistent, so construction is crate-internal.
#[derive(Debug, Clone)]
pub struct PublishedDiagnostics {
    version: i32,
    items: Vec<serde_json::Value>,
}

impl PublishedDiagnostics {
    pub(crate) fn new(version: i32, items: Vec<serde_json::Value>) -> Self {
        Self { version, items }
    }

    /// Document version these diagnostics were computed against.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Raw diagnostic items, exactly as published.
    #[must_use]
    pub fn items(&self) -> &[serde_json::Value] {
        &self.items
    }

    /// Consume into the raw item list.
    #[must_use]
    pub fn into_items(self) -> Vec<serde_json::Value> {
        self.items
    }
}

/// Failures surfaced by [`crate::LspClient`].
///
/// Feature-request failures are not represented here; those degrade to
/// empty results at the client boundary so exploratory editing never
/// hard-fails.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The channel to the analyzer is gone (process exited or never wrote
    /// a reply).
    #[error("analyzer channel closed")]
    ChannelClosed,

    /// The pending request was canceled because its session is being
    /// recycled or closed.
    #[error("request canceled")]
    Canceled,

    /// The `initialize` handshake was answered with a protocol error.
    #[error("analyzer handshake failed: {0}")]
    Handshake(String),
}
