//! Session lifecycle manager for on-demand pyright analysis processes.
//!
//! The HTTP layer talks to exactly one type here: [`SessionRegistry`].
//! It allocates sessions (reusing pooled analyzer processes where the
//! options allow), proxies per-session protocol requests, and tears
//! sessions down when they close, crash, or idle out.

pub mod config;
pub mod error;
pub mod install;
pub mod options;
pub mod versions;

mod registry;
mod session;
mod supervisor;
mod workdir;

pub use config::ServiceConfig;
pub use error::SessionError;
pub use options::SessionOptions;
pub use registry::{ServiceStatus, SessionRegistry};
pub use session::SessionId;

// Callers pass positions to, and get published diagnostics back from, the
// protocol layer; re-exported so the HTTP layer needs only this crate.
pub use pyground_lsp::{Position, PublishedDiagnostics};
