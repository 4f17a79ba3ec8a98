//! Protocol client for one running pyright process.
//!
//! An [`LspClient`] owns one bidirectional framed channel: a writer task
//! serializes outbound messages, a reader task dispatches replies to
//! pending requests and routes unsolicited notifications. The client keeps
//! the versioned document model for the session's single synthetic
//! document: every distinct text sent to the analyzer bumps the version
//! exactly once, and diagnostics are correlated back by that version.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{self, Notification, PublishDiagnosticsParams, Request};
use crate::types::{ClientError, Position, PublishedDiagnostics};

const WRITER_CHANNEL_CAPACITY: usize = 64;

type DiagnosticsReply = Result<PublishedDiagnostics, ClientError>;
type PendingReplies = Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>;
type PendingDiagnostics = Mutex<HashMap<i32, Vec<oneshot::Sender<DiagnosticsReply>>>>;

/// The session document as the analyzer currently knows it.
struct DocumentState {
    version: i32,
    text: String,
    cached: Option<PublishedDiagnostics>,
}

/// Client for the analyzer protocol over one stdio channel.
///
/// All methods take `&self`; a session shares its client across concurrent
/// proxy calls behind an `Arc`.
pub struct LspClient {
    writer_tx: mpsc::Sender<serde_json::Value>,
    next_id: AtomicU64,
    pending_replies: Arc<PendingReplies>,
    pending_diagnostics: Arc<PendingDiagnostics>,
    document: Arc<Mutex<DocumentState>>,
    #[allow(dead_code)]
    reader_task: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_task: tokio::task::JoinHandle<()>,
}

enum Incoming {
    Reply {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// JSON-RPC discrimination: id + method is a server→client request, id
/// alone is a reply to one of ours, method alone is a notification.
fn classify(frame: serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id").cloned();
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Some(Incoming::ServerRequest { id, method }),
        (Some(id), None) => id.as_u64().map(|id| Incoming::Reply { id, body: frame }),
        (None, Some(method)) => {
            let params = frame.get("params").cloned();
            Some(Incoming::Notification { method, params })
        }
        (None, None) => None,
    }
}

impl LspClient {
    /// Bind a client to the analyzer's stdio channel and start its reader
    /// and writer tasks. `read_half`/`write_half` are the child process's
    /// stdout/stdin in production and a duplex pair in tests.
    pub fn new(
        read_half: impl AsyncRead + Send + Unpin + 'static,
        write_half: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let (writer_tx, mut writer_rx) = mpsc::channel::<serde_json::Value>(WRITER_CHANNEL_CAPACITY);
        let writer_task = tokio::spawn(async move {
            let mut writer = FrameWriter::new(write_half);
            while let Some(message) = writer_rx.recv().await {
                if let Err(e) = writer.write_message(&message).await {
                    tracing::warn!("analyzer write failed: {e:#}");
                    break;
                }
            }
        });

        let pending_replies: Arc<PendingReplies> = Arc::new(Mutex::new(HashMap::new()));
        let pending_diagnostics: Arc<PendingDiagnostics> = Arc::new(Mutex::new(HashMap::new()));
        let document = Arc::new(Mutex::new(DocumentState {
            version: 1,
            text: String::new(),
            cached: None,
        }));

        let reader_replies = pending_replies.clone();
        let reader_diagnostics = pending_diagnostics.clone();
        let reader_document = document.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(read_half);
            loop {
                match reader.read_message().await {
                    Ok(Some(frame)) => {
                        Self::dispatch(
                            frame,
                            &reader_replies,
                            &reader_diagnostics,
                            &reader_document,
                            &reader_writer_tx,
                        )
                        .await;
                    }
                    Ok(None) => {
                        tracing::info!("analyzer closed its output channel");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("analyzer channel read failed: {e:#}");
                        break;
                    }
                }
            }

            // The channel is gone: fail outstanding request/reply pairs by
            // dropping their senders, and give diagnostics waiters an
            // explicit error so nobody parks forever.
            reader_replies.lock().await.clear();
            let waiters: Vec<_> = {
                let mut table = reader_diagnostics.lock().await;
                table.drain().flat_map(|(_, list)| list).collect()
            };
            for tx in waiters {
                let _ = tx.send(Err(ClientError::ChannelClosed));
            }
        });

        Self {
            writer_tx,
            next_id: AtomicU64::new(1),
            pending_replies,
            pending_diagnostics,
            document,
            reader_task,
            writer_task,
        }
    }

    /// Protocol handshake: `initialize`, `initialized`, an empty
    /// configuration push, then `didOpen` for the synthetic document with
    /// its initial (empty) text at version 1.
    pub async fn initialize(&self, root_uri: &str, locale: Option<&str>) -> Result<(), ClientError> {
        let response = self
            .send_request("initialize", Some(protocol::initialize_params(root_uri, locale)))
            .await?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(ClientError::Handshake(message.to_string()));
        }

        self.send_notification("initialized", Some(serde_json::json!({})))
            .await?;
        self.send_notification(
            "workspace/didChangeConfiguration",
            Some(serde_json::json!({ "settings": {} })),
        )
        .await?;

        let document = self.document.lock().await;
        self.send_notification(
            "textDocument/didOpen",
            Some(protocol::did_open_params(document.version, &document.text)),
        )
        .await
    }

    /// Diagnostics for `code`, correlated by document version.
    ///
    /// Identical text with a result already cached for the current version
    /// answers without touching the analyzer. Changed text bumps the
    /// version and sends one `didChange`; concurrent callers for the same
    /// version collapse onto the same pending slot. The reply arrives via
    /// the unsolicited publish notification, not a direct response.
    pub async fn get_diagnostics(&self, code: &str) -> Result<PublishedDiagnostics, ClientError> {
        let rx = {
            let mut document = self.document.lock().await;

            let changed = document.text != code;
            if changed {
                document.version += 1;
                document.text = code.to_string();
            } else {
                let current = document.version;
                if let Some(cached) = document
                    .cached
                    .as_ref()
                    .filter(|cached| cached.version() == current)
                {
                    return Ok(cached.clone());
                }
            }

            let version = document.version;
            let (tx, rx) = oneshot::channel();
            self.pending_diagnostics
                .lock()
                .await
                .entry(version)
                .or_default()
                .push(tx);

            // Unchanged text piggybacks on the didChange (or didOpen) that
            // introduced this version; only a text change sends a new one.
            // The send happens under the document lock so version order on
            // the wire matches assignment order.
            if changed {
                if let Err(err) = self
                    .send_notification(
                        "textDocument/didChange",
                        Some(protocol::did_change_params(version, code)),
                    )
                    .await
                {
                    self.forget_waiter(version).await;
                    return Err(err);
                }
            }

            rx
        };

        rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Hover contents at `position`, or `None` when the analyzer has
    /// nothing to say or the request failed. Failures are swallowed so
    /// exploratory editing stays responsive.
    pub async fn get_hover(
        &self,
        code: &str,
        position: Position,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        self.sync_document(code).await?;
        Ok(self
            .feature_request("textDocument/hover", protocol::position_params(position))
            .await)
    }

    /// Signature help at `position`; failures degrade to `None`.
    pub async fn get_signature_help(
        &self,
        code: &str,
        position: Position,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        self.sync_document(code).await?;
        Ok(self
            .feature_request("textDocument/signatureHelp", protocol::position_params(position))
            .await)
    }

    /// Completion list at `position`; failures degrade to `None`.
    pub async fn get_completion(
        &self,
        code: &str,
        position: Position,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        self.sync_document(code).await?;
        Ok(self
            .feature_request("textDocument/completion", protocol::position_params(position))
            .await)
    }

    /// Resolve a completion item previously returned by [`Self::get_completion`].
    pub async fn resolve_completion(
        &self,
        item: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.feature_request("completionItem/resolve", item).await
    }

    /// Resolve every pending diagnostics waiter with a canceled result and
    /// clear the table. Unconditional: safe to call when the process is
    /// already dead. Used on recycle and close so nobody waits on a
    /// channel that is about to be torn down.
    pub async fn cancel_requests(&self) {
        let waiters: Vec<_> = {
            let mut table = self.pending_diagnostics.lock().await;
            table.drain().flat_map(|(_, list)| list).collect()
        };

        for tx in waiters {
            let _ = tx.send(Err(ClientError::Canceled));
        }
    }

    /// Bring the analyzer's copy of the document up to date with `code`,
    /// bumping the version iff the text changed.
    async fn sync_document(&self, code: &str) -> Result<(), ClientError> {
        let mut document = self.document.lock().await;
        if document.text == code {
            return Ok(());
        }

        document.version += 1;
        document.text = code.to_string();
        let version = document.version;
        self.send_notification(
            "textDocument/didChange",
            Some(protocol::did_change_params(version, code)),
        )
        .await
    }

    /// Direct request whose failure is absorbed into "no result".
    async fn feature_request(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> Option<serde_json::Value> {
        match self.send_request(method, Some(params)).await {
            Ok(body) => protocol::successful_result(&body).cloned(),
            Err(err) => {
                tracing::debug!("{method} request failed: {err}");
                None
            }
        }
    }

    async fn send_request(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_replies.lock().await.insert(id, tx);

        let frame = Request::new(id, method, params).into_value();
        if self.writer_tx.send(frame).await.is_err() {
            self.pending_replies.lock().await.remove(&id);
            return Err(ClientError::ChannelClosed);
        }

        rx.await.map_err(|_| ClientError::ChannelClosed)
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        let frame = Notification::new(method, params).into_value();
        self.writer_tx
            .send(frame)
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    async fn forget_waiter(&self, version: i32) {
        let mut table = self.pending_diagnostics.lock().await;
        if let Some(waiters) = table.get_mut(&version) {
            waiters.pop();
            if waiters.is_empty() {
                table.remove(&version);
            }
        }
    }

    async fn dispatch(
        frame: serde_json::Value,
        pending_replies: &PendingReplies,
        pending_diagnostics: &PendingDiagnostics,
        document: &Mutex<DocumentState>,
        writer_tx: &mpsc::Sender<serde_json::Value>,
    ) {
        let Some(incoming) = classify(frame) else {
            tracing::trace!("ignoring malformed frame from analyzer");
            return;
        };

        match incoming {
            Incoming::Reply { id, body } => {
                let sender = pending_replies.lock().await.remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(body);
                }
            }
            Incoming::ServerRequest { id, method } => {
                Self::answer_server_request(id, &method, writer_tx).await;
            }
            Incoming::Notification { method, params } => {
                Self::handle_notification(&method, params, pending_diagnostics, document).await;
            }
        }
    }

    /// The analyzer blocks on unanswered requests, so everything gets a
    /// reply: configuration pulls get an empty set, the rest MethodNotFound.
    async fn answer_server_request(
        id: serde_json::Value,
        method: &str,
        writer_tx: &mpsc::Sender<serde_json::Value>,
    ) {
        let response = if method == "workspace/configuration" {
            tracing::debug!("analyzer requested configuration; replying with empty set");
            serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": [] })
        } else {
            tracing::debug!("analyzer sent unsupported request {method}");
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {method}") }
            })
        };
        let _ = writer_tx.send(response).await;
    }

    async fn handle_notification(
        method: &str,
        params: Option<serde_json::Value>,
        pending_diagnostics: &PendingDiagnostics,
        document: &Mutex<DocumentState>,
    ) {
        match method {
            "textDocument/publishDiagnostics" => {
                let Some(params) = params else { return };
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(published) => {
                        Self::apply_published(published, pending_diagnostics, document).await;
                    }
                    Err(e) => {
                        tracing::debug!("unparsable publishDiagnostics payload: {e}");
                    }
                }
            }
            "window/logMessage" => {
                let message = params
                    .as_ref()
                    .and_then(|p| p.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("");
                tracing::debug!("analyzer log: {message}");
            }
            _ => {
                tracing::trace!("ignoring analyzer notification {method}");
            }
        }
    }

    /// Cache and waiter bookkeeping for one published diagnostics set.
    ///
    /// Only the newest version is retained as current (a `>=` comparison,
    /// so a re-publish of the current version replaces it). Every waiter
    /// at the published version or older resolves with this set: the
    /// analyzer may coalesce rapid edits and skip straight to a newer
    /// version, and the skipped snapshot can never produce a notification
    /// of its own. Waiters for newer versions stay parked.
    async fn apply_published(
        published: PublishDiagnosticsParams,
        pending_diagnostics: &PendingDiagnostics,
        document: &Mutex<DocumentState>,
    ) {
        let version = published.version.unwrap_or(-1);
        tracing::debug!("diagnostics published for document version {version}");

        let result = PublishedDiagnostics::new(version, published.diagnostics);

        {
            let mut doc = document.lock().await;
            if doc.cached.as_ref().map_or(true, |cached| version >= cached.version()) {
                doc.cached = Some(result.clone());
            }
        }

        let waiters: Vec<_> = {
            let mut table = pending_diagnostics.lock().await;
            let satisfied: Vec<i32> = table
                .keys()
                .copied()
                .filter(|waiting| *waiting <= version)
                .collect();
            satisfied
                .into_iter()
                .filter_map(|v| table.remove(&v))
                .flatten()
                .collect()
        };

        for tx in waiters {
            let _ = tx.send(Ok(result.clone()));
        }
    }

    #[cfg(test)]
    pub(crate) async fn pending_diagnostics_len(&self) -> usize {
        self.pending_diagnostics
            .lock()
            .await
            .values()
            .map(Vec::len)
            .sum()
    }

    #[cfg(test)]
    pub(crate) async fn document_version(&self) -> i32 {
        self.document.lock().await.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// Scripted stand-in for the pyright process on the far end of the
    /// channel. Tests read the frames the client sends and answer them
    /// explicitly, so every ordering assertion is deterministic.
    struct FakeAnalyzer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    impl FakeAnalyzer {
        async fn recv(&mut self) -> serde_json::Value {
            self.reader
                .read_message()
                .await
                .unwrap()
                .expect("client closed the channel")
        }

        async fn send(&mut self, frame: serde_json::Value) {
            self.writer.write_message(&frame).await.unwrap();
        }

        async fn reply(&mut self, request: &serde_json::Value, result: serde_json::Value) {
            self.send(serde_json::json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": result
            }))
            .await;
        }

        async fn reply_error(&mut self, request: &serde_json::Value, message: &str) {
            self.send(serde_json::json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": { "code": -32603, "message": message }
            }))
            .await;
        }

        async fn publish(&mut self, version: i32, items: serde_json::Value) {
            self.send(serde_json::json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {
                    "uri": protocol::DOCUMENT_URI,
                    "version": version,
                    "diagnostics": items
                }
            }))
            .await;
        }
    }

    fn connect() -> (Arc<LspClient>, FakeAnalyzer) {
        let (client_io, analyzer_io) = tokio::io::duplex(256 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let client = Arc::new(LspClient::new(client_read, client_write));
        let (analyzer_read, analyzer_write) = tokio::io::split(analyzer_io);
        let analyzer = FakeAnalyzer {
            reader: FrameReader::new(analyzer_read),
            writer: FrameWriter::new(analyzer_write),
        };
        (client, analyzer)
    }

    /// Spin until `client` has `expected` parked diagnostics waiters.
    async fn wait_for_waiters(client: &LspClient, expected: usize) {
        for _ in 0..1000 {
            if client.pending_diagnostics_len().await == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("never reached {expected} pending waiters");
    }

    #[tokio::test]
    async fn handshake_runs_init_config_open_in_order() {
        let (client, mut analyzer) = connect();
        let handshake = tokio::spawn({
            let client = client.clone();
            async move { client.initialize("file:///tmp/sess", Some("fr")).await }
        });

        let init = analyzer.recv().await;
        assert_eq!(init["method"], "initialize");
        assert_eq!(init["params"]["locale"], "fr");
        assert_eq!(
            init["params"]["capabilities"]["textDocument"]["publishDiagnostics"]["versionSupport"],
            true
        );
        analyzer.reply(&init, serde_json::json!({"capabilities": {}})).await;

        assert_eq!(analyzer.recv().await["method"], "initialized");

        let config = analyzer.recv().await;
        assert_eq!(config["method"], "workspace/didChangeConfiguration");
        assert_eq!(config["params"]["settings"], serde_json::json!({}));

        let open = analyzer.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        assert_eq!(open["params"]["textDocument"]["version"], 1);
        assert_eq!(open["params"]["textDocument"]["text"], "");

        handshake.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handshake_error_reply_is_a_handshake_failure() {
        let (client, mut analyzer) = connect();
        let handshake = tokio::spawn({
            let client = client.clone();
            async move { client.initialize("file:///tmp/sess", None).await }
        });

        let init = analyzer.recv().await;
        analyzer.reply_error(&init, "unsupported client").await;

        match handshake.await.unwrap() {
            Err(ClientError::Handshake(message)) => assert_eq!(message, "unsupported client"),
            other => panic!("expected handshake failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn diagnostics_are_versioned_cached_and_superseded() {
        let (client, mut analyzer) = connect();

        // Initial text is empty, so asking about "" does not change the
        // document: the waiter parks on version 1.
        let first = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("").await }
        });
        wait_for_waiters(&client, 1).await;
        analyzer
            .publish(1, serde_json::json!([{"message": "empty module"}]))
            .await;

        let published = first.await.unwrap().unwrap();
        assert_eq!(published.version(), 1);
        assert_eq!(published.items().len(), 1);

        // Unchanged text answers from the cache with no wire traffic and
        // no version bump.
        let cached = client.get_diagnostics("").await.unwrap();
        assert_eq!(cached.version(), 1);
        assert_eq!(cached.items(), published.items());
        assert_eq!(client.document_version().await, 1);

        // New text bumps to version 2 and sends exactly one didChange.
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("x: int = 'a'").await }
        });
        let change = analyzer.recv().await;
        assert_eq!(change["method"], "textDocument/didChange");
        assert_eq!(change["params"]["textDocument"]["version"], 2);
        assert_eq!(change["params"]["contentChanges"][0]["text"], "x: int = 'a'");
        analyzer
            .publish(2, serde_json::json!([{"message": "type mismatch"}]))
            .await;

        let published = second.await.unwrap().unwrap();
        assert_eq!(published.version(), 2);
        assert_eq!(client.document_version().await, 2);
    }

    #[tokio::test]
    async fn identical_code_issues_at_most_one_did_change() {
        let (client, mut analyzer) = connect();

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("a = 1").await }
        });
        let change = analyzer.recv().await;
        assert_eq!(change["method"], "textDocument/didChange");
        analyzer.publish(2, serde_json::json!([])).await;
        request.await.unwrap().unwrap();

        // Cached repeat: nothing goes over the wire.
        client.get_diagnostics("a = 1").await.unwrap();

        // The very next frame the analyzer sees is the hover request, not
        // a second didChange for the same text.
        let hover = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .get_hover("a = 1", Position { line: 0, character: 0 })
                    .await
            }
        });
        let frame = analyzer.recv().await;
        assert_eq!(frame["method"], "textDocument/hover");
        analyzer.reply(&frame, serde_json::Value::Null).await;
        assert!(hover.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_calls_for_same_text_collapse_onto_one_version() {
        let (client, mut analyzer) = connect();

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("b = 2").await }
        });
        let change = analyzer.recv().await;
        assert_eq!(change["params"]["textDocument"]["version"], 2);

        let second = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("b = 2").await }
        });
        wait_for_waiters(&client, 2).await;

        analyzer.publish(2, serde_json::json!([])).await;

        assert_eq!(first.await.unwrap().unwrap().version(), 2);
        assert_eq!(second.await.unwrap().unwrap().version(), 2);
        assert_eq!(client.pending_diagnostics_len().await, 0);
        assert_eq!(client.document_version().await, 2);
    }

    #[tokio::test]
    async fn cancel_requests_resolves_every_waiter_as_canceled() {
        let (client, mut analyzer) = connect();

        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(tokio::spawn({
                let client = client.clone();
                async move { client.get_diagnostics("c = 3").await }
            }));
        }
        // One didChange for the text change; all three share version 2.
        let change = analyzer.recv().await;
        assert_eq!(change["method"], "textDocument/didChange");
        wait_for_waiters(&client, 3).await;

        client.cancel_requests().await;

        for request in requests {
            match request.await.unwrap() {
                Err(ClientError::Canceled) => {}
                other => panic!("expected canceled, got {other:?}"),
            }
        }
        assert_eq!(client.pending_diagnostics_len().await, 0);
    }

    #[tokio::test]
    async fn newer_published_version_satisfies_older_waiter() {
        let (client, mut analyzer) = connect();

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("d = 4").await }
        });
        let change = analyzer.recv().await;
        assert_eq!(change["params"]["textDocument"]["version"], 2);

        // The analyzer coalesced edits and skipped straight past 2.
        analyzer
            .publish(3, serde_json::json!([{"message": "late"}]))
            .await;

        let published = request.await.unwrap().unwrap();
        assert_eq!(published.version(), 3);
        assert_eq!(client.pending_diagnostics_len().await, 0);
    }

    #[tokio::test]
    async fn stale_publish_never_replaces_newer_cache() {
        let (client, mut analyzer) = connect();

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("e = 5").await }
        });
        analyzer.recv().await;
        analyzer
            .publish(2, serde_json::json!([{"message": "current"}]))
            .await;
        request.await.unwrap().unwrap();

        // A stale set for version 1 arrives after the fact.
        analyzer.publish(1, serde_json::json!([{"message": "stale"}])).await;

        // Round-trip a hover so the stale frame is fully processed first.
        let hover = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .get_hover("e = 5", Position { line: 0, character: 0 })
                    .await
            }
        });
        let frame = analyzer.recv().await;
        analyzer.reply(&frame, serde_json::Value::Null).await;
        hover.await.unwrap().unwrap();

        let cached = client.get_diagnostics("e = 5").await.unwrap();
        assert_eq!(cached.version(), 2);
        assert_eq!(cached.items()[0]["message"], "current");
    }

    #[tokio::test]
    async fn republished_current_version_replaces_cache() {
        let (client, mut analyzer) = connect();

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("f = 6").await }
        });
        analyzer.recv().await;
        analyzer.publish(2, serde_json::json!([{"message": "first pass"}])).await;
        request.await.unwrap().unwrap();

        analyzer
            .publish(
                2,
                serde_json::json!([{"message": "first pass"}, {"message": "second pass"}]),
            )
            .await;

        let hover = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .get_hover("f = 6", Position { line: 0, character: 0 })
                    .await
            }
        });
        let frame = analyzer.recv().await;
        analyzer.reply(&frame, serde_json::Value::Null).await;
        hover.await.unwrap().unwrap();

        let cached = client.get_diagnostics("f = 6").await.unwrap();
        assert_eq!(cached.items().len(), 2);
    }

    #[tokio::test]
    async fn feature_request_error_degrades_to_none() {
        let (client, mut analyzer) = connect();

        let hover = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .get_hover("g = 7", Position { line: 0, character: 2 })
                    .await
            }
        });
        // Text changed, so the hover is preceded by one didChange.
        assert_eq!(analyzer.recv().await["method"], "textDocument/didChange");
        let frame = analyzer.recv().await;
        assert_eq!(frame["method"], "textDocument/hover");
        analyzer.reply_error(&frame, "hover failed").await;

        assert!(hover.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn feature_request_result_passes_through_unchanged() {
        let (client, mut analyzer) = connect();

        let completion = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .get_completion("h.", Position { line: 0, character: 2 })
                    .await
            }
        });
        analyzer.recv().await; // didChange
        let frame = analyzer.recv().await;
        assert_eq!(frame["method"], "textDocument/completion");
        assert_eq!(frame["params"]["position"]["character"], 2);
        analyzer
            .reply(
                &frame,
                serde_json::json!({"isIncomplete": false, "items": [{"label": "hex"}]}),
            )
            .await;

        let result = completion.await.unwrap().unwrap().unwrap();
        assert_eq!(result["items"][0]["label"], "hex");
    }

    #[tokio::test]
    async fn resolve_completion_round_trips_the_item() {
        let (client, mut analyzer) = connect();

        let item = serde_json::json!({"label": "print", "data": 12});
        let resolve = tokio::spawn({
            let client = client.clone();
            let item = item.clone();
            async move { client.resolve_completion(item).await }
        });

        let frame = analyzer.recv().await;
        assert_eq!(frame["method"], "completionItem/resolve");
        assert_eq!(frame["params"], item);
        analyzer
            .reply(
                &frame,
                serde_json::json!({"label": "print", "documentation": "Prints values."}),
            )
            .await;

        let resolved = resolve.await.unwrap().unwrap();
        assert_eq!(resolved["documentation"], "Prints values.");
    }

    #[tokio::test]
    async fn configuration_requests_get_an_empty_reply() {
        let (_client, mut analyzer) = connect();

        analyzer
            .send(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 41,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "python" }] }
            }))
            .await;

        let reply = analyzer.recv().await;
        assert_eq!(reply["id"], 41);
        assert_eq!(reply["result"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn unsupported_server_requests_get_method_not_found() {
        let (_client, mut analyzer) = connect();

        analyzer
            .send(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 42,
                "method": "client/registerCapability",
                "params": {}
            }))
            .await;

        let reply = analyzer.recv().await;
        assert_eq!(reply["id"], 42);
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn log_messages_are_absorbed() {
        let (client, mut analyzer) = connect();

        analyzer
            .send(serde_json::json!({
                "jsonrpc": "2.0",
                "method": "window/logMessage",
                "params": { "type": 3, "message": "background analysis started" }
            }))
            .await;

        // The channel still works afterwards.
        let hover = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .get_hover("", Position { line: 0, character: 0 })
                    .await
            }
        });
        let frame = analyzer.recv().await;
        assert_eq!(frame["method"], "textDocument/hover");
        analyzer.reply(&frame, serde_json::Value::Null).await;
        assert!(hover.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_channel_fails_pending_diagnostics() {
        let (client, mut analyzer) = connect();

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.get_diagnostics("i = 9").await }
        });
        analyzer.recv().await; // didChange went out
        wait_for_waiters(&client, 1).await;

        drop(analyzer);

        match request.await.unwrap() {
            Err(ClientError::ChannelClosed) => {}
            other => panic!("expected channel closed, got {other:?}"),
        }
        assert_eq!(client.pending_diagnostics_len().await, 0);
    }
}
