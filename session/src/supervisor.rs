//! Spawns and monitors one analyzer process per session.
//!
//! The lifecycle is `Starting → Running → Terminated`. `Starting` ends
//! inside [`spawn_analyzer`] itself: a spawn error rejects the creation
//! and nothing is registered. From `Running` on, a dedicated monitor task
//! owns the child; it reports the exit (voluntary or killed) as a
//! [`ProcessEvent`] on the registry's event channel. stdout/stdin carry
//! the protocol; stderr is drained for logging and never affects state.

use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};

use crate::session::SessionId;

/// Lifecycle notification delivered to the registry's listener task.
#[derive(Debug)]
pub(crate) enum ProcessEvent {
    /// The analyzer process is gone, for any reason.
    Exited {
        session: SessionId,
        code: Option<i32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessState {
    Starting,
    Running,
    Terminated,
}

/// What to launch and where. The entry point is
/// `<install dir>/node_modules/pyright/langserver.index.js`.
pub(crate) struct SpawnSpec<'a> {
    pub node_command: &'a str,
    pub langserver_entry: &'a Path,
    pub workdir: &'a Path,
    pub locale: Option<&'a str>,
}

/// Handle to a running analyzer process.
///
/// The child itself lives in the monitor task; the handle can observe the
/// state and request a kill. Dropping the handle also kills the process,
/// so a dropped `Session` can never leak its child.
pub(crate) struct ProcessHandle {
    #[cfg_attr(not(test), allow(dead_code))]
    state: watch::Receiver<ProcessState>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    /// Ask the monitor to kill the process. Fire-and-forget: a process
    /// that already exited is not an error.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Handle with no process behind it, for registry tests that exercise
    /// pool bookkeeping without spawning anything.
    #[cfg(test)]
    pub fn detached() -> Self {
        let (_state_tx, state) = watch::channel(ProcessState::Running);
        Self {
            state,
            kill_tx: None,
        }
    }
}

/// Spawn the analyzer in stdio mode with the session workdir as cwd.
///
/// Returns the handle plus the protocol halves of the child's stdio. The
/// locale override goes through `LC_ALL`; older analyzer versions ignore
/// the locale passed in the protocol handshake.
pub(crate) fn spawn_analyzer(
    spec: &SpawnSpec<'_>,
    session: SessionId,
    event_tx: mpsc::Sender<ProcessEvent>,
) -> io::Result<(ProcessHandle, ChildStdout, ChildStdin)> {
    let (state_tx, state_rx) = watch::channel(ProcessState::Starting);

    let mut command = Command::new(spec.node_command);
    command
        .arg(spec.langserver_entry)
        .arg("--stdio")
        .arg(format!("--clientProcessId={}", std::process::id()))
        .current_dir(spec.workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(locale) = spec.locale {
        command.env("LC_ALL", locale);
    }

    let mut child = command.spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("analyzer child has no stdout"))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("analyzer child has no stdin"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("analyzer child has no stderr"))?;

    let _ = state_tx.send(ProcessState::Running);

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(%session, "analyzer stderr: {line}");
        }
    });

    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(monitor(child, session, event_tx, state_tx, kill_rx));

    Ok((
        ProcessHandle {
            state: state_rx,
            kill_tx: Some(kill_tx),
        },
        stdout,
        stdin,
    ))
}

/// Owns the child until it dies. A kill request, or the handle being
/// dropped, which closes the kill channel, force-terminates it; either
/// way the exit is reported on the event channel and the registry decides
/// what teardown is still needed.
async fn monitor(
    mut child: Child,
    session: SessionId,
    event_tx: mpsc::Sender<ProcessEvent>,
    state_tx: watch::Sender<ProcessState>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let code = tokio::select! {
        status = child.wait() => status.ok().and_then(|s| s.code()),
        _ = &mut kill_rx => {
            let _ = child.start_kill();
            child.wait().await.ok().and_then(|s| s.code())
        }
    };

    let _ = state_tx.send(ProcessState::Terminated);
    tracing::info!(%session, ?code, "analyzer process exited");
    let _ = event_tx
        .send(ProcessEvent::Exited { session, code })
        .await;
}
