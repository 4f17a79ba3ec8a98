//! LSP protocol client for a pyright language server over stdio.

pub mod codec;
pub mod types;

pub(crate) mod protocol;

mod client;

pub use client::LspClient;
pub use protocol::DOCUMENT_URI;
pub use types::{ClientError, Position, PublishedDiagnostics};
