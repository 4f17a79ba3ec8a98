//! JSON-RPC envelopes and LSP payload builders for the pyright channel.
//!
//! The playground analyzes exactly one in-memory document, so every
//! text-document payload refers to the fixed [`DOCUMENT_URI`].

use serde::Deserialize;

use crate::types::Position;

/// The single synthetic document every session analyzes.
pub const DOCUMENT_URI: &str = "file:///Untitled.py";

#[derive(Debug)]
pub(crate) struct Request {
    pub id: u64,
    pub method: &'static str,
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self { id, method, params }
    }

    /// Assemble the JSON-RPC frame. `params` is omitted entirely when
    /// absent; a `null` there trips some servers.
    pub fn into_value(self) -> serde_json::Value {
        let mut frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.id,
            "method": self.method,
        });
        if let Some(params) = self.params {
            frame["params"] = params;
        }
        frame
    }
}

#[derive(Debug)]
pub(crate) struct Notification {
    pub method: &'static str,
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self { method, params }
    }

    pub fn into_value(self) -> serde_json::Value {
        let mut frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": self.method,
        });
        if let Some(params) = self.params {
            frame["params"] = params;
        }
        frame
    }
}

/// `initialize` request params. Declares the capabilities the playground
/// actually consumes: tagged + versioned publishDiagnostics, markdown or
/// plaintext hover, signature help.
pub(crate) fn initialize_params(root_uri: &str, locale: Option<&str>) -> serde_json::Value {
    let mut params = serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "publishDiagnostics": {
                    // 1 = Unnecessary, 2 = Deprecated
                    "tagSupport": { "valueSet": [1, 2] },
                    "versionSupport": true
                },
                "hover": {
                    "contentFormat": ["markdown", "plaintext"]
                },
                "signatureHelp": {}
            }
        }
    });

    if let Some(locale) = locale {
        params["locale"] = serde_json::Value::String(locale.to_string());
    }

    params
}

pub(crate) fn did_open_params(version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": DOCUMENT_URI,
            "languageId": "python",
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": DOCUMENT_URI,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

/// Params for the position-based feature requests (hover, completion,
/// signature help) against the playground document.
pub(crate) fn position_params(position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": DOCUMENT_URI },
        "position": { "line": position.line, "character": position.character }
    })
}

/// `textDocument/publishDiagnostics` payload. Diagnostic items stay as raw
/// JSON so they reach the caller exactly as the analyzer produced them.
#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    #[allow(dead_code)]
    pub uri: String,
    pub version: Option<i32>,
    pub diagnostics: Vec<serde_json::Value>,
}

/// Extract the `result` of a response body, treating a JSON-RPC `error`
/// member or a null result as "no result".
pub(crate) fn successful_result(body: &serde_json::Value) -> Option<&serde_json::Value> {
    if body.get("error").is_some() {
        return None;
    }
    body.get("result").filter(|r| !r.is_null())
}
