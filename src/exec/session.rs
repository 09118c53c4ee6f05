//! Session state machine and the per-session worker task
//!
//! Each session key owns exactly one worker task, which in turn owns the
//! backend process. All mutation of interpreter state flows through the
//! worker's queue, so cells on one key can never interleave.

use super::backend::BackendLauncher;
use super::manager::{CellResult, CellStatus, ExecError, SessionKey};
use crate::parser::CellId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use uuid::Uuid;

/// Lifecycle of one execution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Starting,
    Ready,
    Executing,
    Terminating,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Executing => "executing",
            SessionState::Terminating => "terminating",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// A cooperative cancellation token for queued cells.
///
/// The submitter sets the token; the worker checks it when the job reaches
/// the front of the queue. Cancelling a job that already started has no
/// effect through this token (use `SessionManager::close_session` to
/// interrupt a running cell).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Observable snapshot of one session, for `session list`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub id: Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

/// One queued cell.
pub(crate) struct Job {
    pub cell: CellId,
    pub source: String,
    pub timeout: Duration,
    pub cancelled: CancellationToken,
    pub reply: oneshot::Sender<Result<CellResult, ExecError>>,
}

pub(crate) enum Command {
    Run(Job),
    Shutdown,
}

/// The manager's view of a live session.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    pub queue: mpsc::UnboundedSender<Command>,
    pub state: Arc<Mutex<SessionState>>,
    pub interrupt: Arc<Notify>,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }
}

fn set_state(state: &Mutex<SessionState>, next: SessionState, key: &SessionKey) {
    *state.lock().expect("session state mutex poisoned") = next;
    tracing::debug!(session = %key, state = %next, "session state");
}

/// Reply `error` to every job still in the queue.
fn drain_queue(queue: &mut mpsc::UnboundedReceiver<Command>, mk_err: impl Fn() -> ExecError) {
    queue.close();
    while let Ok(cmd) = queue.try_recv() {
        if let Command::Run(job) = cmd {
            let _ = job.reply.send(Err(mk_err()));
        }
    }
}

/// Worker task for one session key.
///
/// Owns the backend for its entire life. Exits (removing itself from the
/// session table) on launch failure, cell timeout, interrupt, backend i/o
/// failure, explicit shutdown, or idle expiry.
pub(crate) async fn run_session(
    key: SessionKey,
    id: Uuid,
    launcher: Arc<dyn BackendLauncher>,
    mut queue: mpsc::UnboundedReceiver<Command>,
    state: Arc<Mutex<SessionState>>,
    interrupt: Arc<Notify>,
    idle_timeout: Duration,
    sessions: Arc<DashMap<SessionKey, SessionHandle>>,
) {
    let remove_self = |sessions: &DashMap<SessionKey, SessionHandle>| {
        sessions.remove_if(&key, |_, h| h.id == id);
    };

    set_state(&state, SessionState::Starting, &key);
    let mut backend = match launcher.launch(&key.language).await {
        Ok(backend) => backend,
        Err(e) => {
            tracing::warn!(session = %key, error = %e, "backend launch failed");
            set_state(&state, SessionState::Closed, &key);
            remove_self(&sessions);
            let language = key.language.clone();
            let reason = e.to_string();
            drain_queue(&mut queue, || ExecError::BackendUnavailable {
                language: language.clone(),
                reason: reason.clone(),
            });
            return;
        }
    };
    set_state(&state, SessionState::Ready, &key);

    loop {
        tokio::select! {
            cmd = queue.recv() => {
                let job = match cmd {
                    Some(Command::Run(job)) => job,
                    Some(Command::Shutdown) | None => {
                        set_state(&state, SessionState::Terminating, &key);
                        backend.shutdown().await;
                        set_state(&state, SessionState::Closed, &key);
                        remove_self(&sessions);
                        drain_queue(&mut queue, || ExecError::SessionClosed);
                        return;
                    }
                };
                if job.cancelled.is_cancelled() {
                    let _ = job.reply.send(Err(ExecError::Cancelled));
                    continue;
                }
                set_state(&state, SessionState::Executing, &key);
                tokio::select! {
                    run = tokio::time::timeout(job.timeout, backend.execute(&job.source)) => {
                        match run {
                            Ok(Ok(out)) => {
                                let status = if out.exit_code == 0 {
                                    CellStatus::Success
                                } else {
                                    CellStatus::Failed(out.exit_code)
                                };
                                let _ = job.reply.send(Ok(CellResult {
                                    cell: job.cell,
                                    stdout: out.stdout,
                                    stderr: out.stderr,
                                    status,
                                }));
                                set_state(&state, SessionState::Ready, &key);
                            }
                            Ok(Err(e)) => {
                                // The backend broke mid-cell; it cannot be
                                // trusted for further use.
                                let _ = job.reply.send(Err(ExecError::Backend(e)));
                                set_state(&state, SessionState::Closed, &key);
                                remove_self(&sessions);
                                backend.shutdown().await;
                                drain_queue(&mut queue, || ExecError::SessionClosed);
                                return;
                            }
                            Err(_elapsed) => {
                                tracing::info!(session = %key, cell = %job.cell, "cell timed out; discarding backend");
                                let _ = job.reply.send(Ok(CellResult {
                                    cell: job.cell,
                                    stdout: String::new(),
                                    stderr: String::new(),
                                    status: CellStatus::Timeout,
                                }));
                                set_state(&state, SessionState::Closed, &key);
                                remove_self(&sessions);
                                backend.shutdown().await;
                                drain_queue(&mut queue, || ExecError::SessionClosed);
                                return;
                            }
                        }
                    }
                    _ = interrupt.notified() => {
                        let _ = job.reply.send(Err(ExecError::Cancelled));
                        set_state(&state, SessionState::Closed, &key);
                        remove_self(&sessions);
                        backend.shutdown().await;
                        drain_queue(&mut queue, || ExecError::SessionClosed);
                        return;
                    }
                }
            }
            _ = tokio::time::sleep(idle_timeout) => {
                tracing::debug!(session = %key, "idle session expired");
                set_state(&state, SessionState::Terminating, &key);
                backend.shutdown().await;
                set_state(&state, SessionState::Closed, &key);
                remove_self(&sessions);
                return;
            }
        }
    }
}
