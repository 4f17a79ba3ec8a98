//! Session lifecycle: allocation, pooling, reuse, and teardown.
//!
//! The registry owns every live session. A session is *active* (visible
//! to callers), *pooled* (invisible, process kept warm for an
//! option-compatible future request), or gone. All shared state sits in
//! one mutex-guarded struct behind an `Arc`. Background tasks (the idle
//! sweep and the process-exit listener) hold weak references so the
//! registry's lifetime stays with its owner. The mutex is never held
//! across a protocol round trip.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use pyground_lsp::{LspClient, Position, PublishedDiagnostics};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use crate::config::ServiceConfig;
use crate::error::SessionError;
use crate::install::Installer;
use crate::options::SessionOptions;
use crate::session::{Session, SessionId};
use crate::supervisor::{self, ProcessEvent, SpawnSpec};
use crate::versions::VersionResolver;
use crate::workdir::Workdir;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Payload for the collaborator's status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub latest_version: String,
    pub versions: Vec<String>,
}

/// Owner of all sessions. Construct one per service process.
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    resolver: VersionResolver,
    installer: Installer,
    state: Mutex<RegistryState>,
    event_tx: mpsc::Sender<ProcessEvent>,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<SessionId, Session>,
    pool: VecDeque<Session>,
    sweep_scheduled: bool,
}

impl SessionRegistry {
    pub fn new(config: ServiceConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let resolver = VersionResolver::new(
            config.registry_base_url.clone(),
            config.latest_version_ttl(),
        );
        let installer = Installer::new(config.install_root.clone(), config.npm_command.clone());
        let inner = Arc::new(Inner {
            config,
            resolver,
            installer,
            state: Mutex::new(RegistryState::default()),
            event_tx,
        });

        tokio::spawn(listen_for_process_exits(Arc::downgrade(&inner), event_rx));

        Self { inner }
    }

    /// Allocate a session and return its id.
    ///
    /// A compatible pooled session is reused as-is: same process, no
    /// spawn. Otherwise the requested (or latest) pyright version is
    /// installed, a fresh process is spawned and handshaken, and the
    /// session registered. Failure anywhere on that path tears down
    /// whatever was already built; no orphaned process or directory
    /// survives a failed create.
    pub async fn create(&self, options: SessionOptions) -> Result<SessionId, SessionError> {
        schedule_sweep(&self.inner).await;

        if let Some(id) = self.inner.reuse_pooled(&options).await {
            return Ok(id);
        }

        let version = match options.pyright_version.clone() {
            Some(version) => version,
            None => {
                let lookup = self.inner.resolver.latest().await?;
                if lookup.changed {
                    // An empty version option now means something else;
                    // pooled sessions matched under the old meaning.
                    self.inner
                        .terminate_pooled("latest pyright version changed")
                        .await;
                }
                lookup.version
            }
        };

        let install_dir = self.inner.installer.ensure_installed(&version).await?;
        let workdir = Workdir::create(&options, &self.inner.config)
            .await
            .map_err(SessionError::Workspace)?;

        let id = SessionId::new();
        let langserver_entry = Installer::langserver_entry(&install_dir);
        let spec = SpawnSpec {
            node_command: &self.inner.config.node_command,
            langserver_entry: &langserver_entry,
            workdir: workdir.path(),
            locale: options.locale.as_deref(),
        };
        let (mut process, stdout, stdin) =
            supervisor::spawn_analyzer(&spec, id, self.inner.event_tx.clone())
                .map_err(SessionError::Spawn)?;

        let client = Arc::new(LspClient::new(stdout, stdin));
        tracing::info!(%id, "spawned pyright {version} for new session");

        if let Err(err) = client
            .initialize(&workdir.root_uri(), options.locale.as_deref())
            .await
        {
            // Dropping `workdir` removes the directory; the kill reaches
            // the monitor task which owns the child.
            process.kill();
            let message = match err {
                pyground_lsp::ClientError::Handshake(message) => message,
                other => other.to_string(),
            };
            return Err(SessionError::Handshake(message));
        }

        let warm_code = options.code.clone();
        let session = Session {
            id,
            options,
            workdir,
            last_access: Instant::now(),
            process,
            client: client.clone(),
        };
        self.inner.state.lock().await.active.insert(id, session);

        if let Some(code) = warm_code {
            warm_up(client, code);
        }

        Ok(id)
    }

    /// Move an active session into the inactive pool for future reuse.
    /// Evicts and terminates the oldest pooled session when the pool runs
    /// over capacity.
    pub async fn recycle(&self, id: SessionId) {
        self.inner.recycle(id).await;
    }

    /// Tear a session down completely: cancel pending requests, kill the
    /// process, remove the working directory. Idempotent: closing an
    /// unknown or already-closed id is a no-op.
    pub async fn close(&self, id: SessionId) {
        self.inner.close(id).await;
    }

    /// Diagnostics for `code` on the given session, tagged with the
    /// document version they were computed against.
    pub async fn get_diagnostics(
        &self,
        id: SessionId,
        code: &str,
    ) -> Result<PublishedDiagnostics, SessionError> {
        let client = self.inner.checkout(id).await?;
        Ok(client.get_diagnostics(code).await?)
    }

    pub async fn get_hover(
        &self,
        id: SessionId,
        code: &str,
        position: Position,
    ) -> Result<Option<serde_json::Value>, SessionError> {
        let client = self.inner.checkout(id).await?;
        Ok(client.get_hover(code, position).await?)
    }

    pub async fn get_signature_help(
        &self,
        id: SessionId,
        code: &str,
        position: Position,
    ) -> Result<Option<serde_json::Value>, SessionError> {
        let client = self.inner.checkout(id).await?;
        Ok(client.get_signature_help(code, position).await?)
    }

    pub async fn get_completion(
        &self,
        id: SessionId,
        code: &str,
        position: Position,
    ) -> Result<Option<serde_json::Value>, SessionError> {
        let client = self.inner.checkout(id).await?;
        Ok(client.get_completion(code, position).await?)
    }

    pub async fn resolve_completion(
        &self,
        id: SessionId,
        item: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, SessionError> {
        let client = self.inner.checkout(id).await?;
        Ok(client.resolve_completion(item).await)
    }

    /// Resolved latest version plus the bounded supported-version list.
    pub async fn status(&self) -> Result<ServiceStatus, SessionError> {
        let lookup = self.inner.resolver.latest().await?;
        if lookup.changed {
            self.inner
                .terminate_pooled("latest pyright version changed")
                .await;
        }
        let versions = self
            .inner
            .resolver
            .list(self.inner.config.max_listed_versions)
            .await?;
        Ok(ServiceStatus {
            latest_version: lookup.version,
            versions,
        })
    }
}

impl Inner {
    /// First pooled session whose options match exactly wins; it is
    /// rebound to the new options (only the transient warm-up code can
    /// differ) and reactivated without touching its process.
    async fn reuse_pooled(&self, options: &SessionOptions) -> Option<SessionId> {
        let (id, client) = {
            let mut state = self.state.lock().await;
            let index = state
                .pool
                .iter()
                .position(|session| session.options.is_compatible_with(options))?;
            let mut session = state.pool.remove(index)?;
            session.last_access = Instant::now();
            session.options = options.clone();
            let id = session.id;
            let client = session.client.clone();
            state.active.insert(id, session);
            (id, client)
        };

        tracing::info!(%id, "reusing compatible pooled session");
        warm_up(client, options.code.clone().unwrap_or_default());
        Some(id)
    }

    /// Hand out the session's client for one proxy call, refreshing its
    /// idle clock.
    async fn checkout(&self, id: SessionId) -> Result<Arc<LspClient>, SessionError> {
        let mut state = self.state.lock().await;
        let session = state
            .active
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        session.last_access = Instant::now();
        Ok(session.client.clone())
    }

    async fn recycle(&self, id: SessionId) {
        let (client, evicted) = {
            let mut state = self.state.lock().await;
            let Some(session) = state.active.remove(&id) else {
                return;
            };
            let client = session.client.clone();
            state.pool.push_back(session);
            let evicted = if state.pool.len() > self.config.max_inactive_sessions {
                state.pool.pop_front()
            } else {
                None
            };
            tracing::info!(%id, "recycled session ({} now pooled)", state.pool.len());
            (client, evicted)
        };

        client.cancel_requests().await;

        if let Some(evicted) = evicted {
            tracing::info!(
                "inactive pool over capacity; terminating oldest session {}",
                evicted.id
            );
            terminate(evicted).await;
        }
    }

    async fn close(&self, id: SessionId) {
        let session = {
            let mut state = self.state.lock().await;
            let from_active = state.active.remove(&id);
            match from_active {
                Some(session) => Some(session),
                None => state
                    .pool
                    .iter()
                    .position(|session| session.id == id)
                    .and_then(|index| state.pool.remove(index)),
            }
        };

        match session {
            Some(session) => terminate(session).await,
            None => tracing::debug!(%id, "close for unknown session ignored"),
        }
    }

    async fn terminate_pooled(&self, reason: &str) {
        let drained: Vec<Session> = {
            let mut state = self.state.lock().await;
            state.pool.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        tracing::info!("terminating {} pooled sessions: {reason}", drained.len());
        for session in drained {
            terminate(session).await;
        }
    }
}

/// Cancel pending requests, kill the process, and let the drop remove the
/// working directory. Every failure on this path is swallowed; teardown
/// always completes.
async fn terminate(mut session: Session) {
    session.client.cancel_requests().await;
    session.process.kill();
    tracing::debug!(
        "removing session workspace {}",
        session.workdir.path().display()
    );
}

/// Fire-and-forget diagnostics pass that gets the analyzer parsing the
/// caller's document before the first real request lands.
fn warm_up(client: Arc<LspClient>, code: String) {
    tokio::spawn(async move {
        match client.get_diagnostics(&code).await {
            Ok(published) => tracing::debug!(
                "warm-up diagnostics arrived for version {}",
                published.version()
            ),
            Err(err) => tracing::debug!("warm-up diagnostics discarded: {err}"),
        }
    });
}

/// Start the idle sweep unless one is already running. The sweep
/// unschedules itself when a pass finds no active sessions, so an idle
/// service keeps no timer alive; the next create() starts a fresh one.
async fn schedule_sweep(inner: &Arc<Inner>) {
    {
        let mut state = inner.state.lock().await;
        if state.sweep_scheduled {
            return;
        }
        state.sweep_scheduled = true;
    }

    let interval = inner.config.sweep_interval();
    let max_idle = inner.config.max_session_idle();
    tokio::spawn(sweep_loop(Arc::downgrade(inner), interval, max_idle));
}

async fn sweep_loop(weak: Weak<Inner>, interval: Duration, max_idle: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(inner) = weak.upgrade() else { return };

        let idle: Vec<SessionId> = {
            let state = inner.state.lock().await;
            state
                .active
                .values()
                .filter(|session| session.last_access.elapsed() > max_idle)
                .map(|session| session.id)
                .collect()
        };

        // Idle sessions are recycled, not closed: their process stays
        // warm for the next compatible request.
        for id in idle {
            tracing::info!(%id, "session idle past limit; recycling");
            inner.recycle(id).await;
        }

        let mut state = inner.state.lock().await;
        if state.active.is_empty() {
            state.sweep_scheduled = false;
            return;
        }
    }
}

/// Force-closes the owning session when its analyzer dies, crash and
/// voluntary exit alike. Sessions the registry already removed are a
/// no-op, which also covers exits triggered by our own kill.
async fn listen_for_process_exits(weak: Weak<Inner>, mut event_rx: mpsc::Receiver<ProcessEvent>) {
    while let Some(event) = event_rx.recv().await {
        let Some(inner) = weak.upgrade() else { return };
        match event {
            ProcessEvent::Exited { session, code } => {
                tracing::warn!(%session, ?code, "analyzer process gone; force-closing session");
                inner.close(session).await;
            }
        }
    }
}

#[cfg(test)]
impl SessionRegistry {
    /// Register a session backed by a detached process handle and a dead
    /// duplex channel: enough substance for lifecycle bookkeeping tests
    /// without spawning anything.
    pub(crate) async fn insert_test_session(&self, options: SessionOptions) -> SessionId {
        let workdir = Workdir::create(&options, &self.inner.config).await.unwrap();
        let (client_io, _far_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client_io);
        let session = Session {
            id: SessionId::new(),
            options,
            workdir,
            last_access: Instant::now(),
            process: supervisor::ProcessHandle::detached(),
            client: Arc::new(LspClient::new(read_half, write_half)),
        };
        let id = session.id;
        self.inner.state.lock().await.active.insert(id, session);
        id
    }

    pub(crate) async fn active_count(&self) -> usize {
        self.inner.state.lock().await.active.len()
    }

    pub(crate) async fn pooled_ids(&self) -> Vec<SessionId> {
        self.inner
            .state
            .lock()
            .await
            .pool
            .iter()
            .map(|session| session.id)
            .collect()
    }

    pub(crate) fn event_sender(&self) -> mpsc::Sender<ProcessEvent> {
        self.inner.event_tx.clone()
    }

    pub(crate) async fn start_sweep(&self) {
        schedule_sweep(&self.inner).await;
    }
}
