//! SessionManager: serialized execution queues over persistent backends

use super::backend::BackendLauncher;
use super::session::{
    run_session, CancellationToken, Command, Job, SessionHandle, SessionInfo, SessionState,
};
use crate::parser::CellId;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use uuid::Uuid;

/// Default per-cell deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle lifetime of a session with no queued work.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(900);

/// Identity under which interpreter state persists across cell executions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey {
    pub base: String,
    pub language: String,
    pub name: String,
}

impl SessionKey {
    pub fn new(
        base: impl Into<String>,
        language: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into(),
            language: language.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.base, self.language, self.name)
    }
}

/// Terminal status of one cell run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Success,
    Failed(i32),
    /// The cell exceeded its deadline; the backend was discarded.
    Timeout,
}

/// Captured result of one cell run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellResult {
    pub cell: CellId,
    pub stdout: String,
    pub stderr: String,
    pub status: CellStatus,
}

/// Errors from the execution subsystem
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("backend unavailable for '{language}': {reason}")]
    BackendUnavailable { language: String, reason: String },

    #[error("session closed before the cell could run")]
    SessionClosed,

    #[error("cell cancelled before execution")]
    Cancelled,

    #[error(transparent)]
    Backend(#[from] super::backend::BackendError),
}

/// A submitted cell: cancel it while queued, or await its result.
pub struct CellTicket {
    cancel: CancellationToken,
    result: oneshot::Receiver<Result<CellResult, ExecError>>,
}

impl CellTicket {
    /// Flag the cell as cancelled. Effective only while it is still queued;
    /// the worker drops it without side effects.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn await_result(self) -> Result<CellResult, ExecError> {
        self.result.await.unwrap_or(Err(ExecError::SessionClosed))
    }
}

/// Owns every live execution session.
///
/// One worker task per session key: cells submitted to the same key run in
/// submission order with no interleaving; different keys run fully in
/// parallel. Sessions are created lazily on first submission and die on
/// timeout, interrupt, explicit close, or idle expiry.
pub struct SessionManager {
    launcher: Arc<dyn BackendLauncher>,
    sessions: Arc<DashMap<SessionKey, SessionHandle>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BackendLauncher>) -> Self {
        Self {
            launcher,
            sessions: Arc::new(DashMap::new()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Submit a cell for execution, creating the session if needed. Returns
    /// immediately with a ticket; execution order per key is submission
    /// order.
    pub fn submit_cell(
        &self,
        key: &SessionKey,
        cell: CellId,
        source: impl Into<String>,
        timeout: Duration,
    ) -> CellTicket {
        let (reply, result) = oneshot::channel();
        let cancel = CancellationToken::new();
        let mut command = Command::Run(Job {
            cell,
            source: source.into(),
            timeout,
            cancelled: cancel.clone(),
            reply,
        });
        // A handle can be stale if its worker just shut down; drop the dead
        // entry and retry against a fresh session. Bounded to stay safe if
        // workers die as fast as we spawn them.
        for _ in 0..4 {
            let handle = self.ensure_session(key);
            match handle.queue.send(command) {
                Ok(()) => return CellTicket { cancel, result },
                Err(mpsc::error::SendError(returned)) => {
                    self.sessions.remove_if(key, |_, h| h.id == handle.id);
                    command = returned;
                }
            }
        }
        if let Command::Run(job) = command {
            let _ = job.reply.send(Err(ExecError::SessionClosed));
        }
        CellTicket { cancel, result }
    }

    /// Submit a cell and wait for its result.
    pub async fn run_cell(
        &self,
        key: &SessionKey,
        cell: CellId,
        source: impl Into<String>,
        timeout: Duration,
    ) -> Result<CellResult, ExecError> {
        self.submit_cell(key, cell, source, timeout)
            .await_result()
            .await
    }

    /// Close one session: interrupts a running cell, kills the backend, and
    /// fails queued cells with `SessionClosed`. Other sessions are
    /// unaffected.
    pub fn close_session(&self, key: &SessionKey) -> bool {
        match self.sessions.remove(key) {
            Some((_, handle)) => {
                handle.interrupt.notify_waiters();
                let _ = handle.queue.send(Command::Shutdown);
                true
            }
            None => false,
        }
    }

    /// Close every session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter(|k| self.close_session(k)).count()
    }

    /// Current state of a session, if one exists for the key.
    pub fn session_state(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.get(key).map(|h| h.state())
    }

    /// Snapshot of all live sessions, sorted by key.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|e| SessionInfo {
                key: e.key().clone(),
                id: e.value().id,
                state: e.value().state(),
                created_at: e.value().created_at,
            })
            .collect();
        infos.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        infos
    }

    fn ensure_session(&self, key: &SessionKey) -> SessionHandle {
        self.sessions
            .entry(key.clone())
            .or_insert_with(|| self.spawn_session(key))
            .value()
            .clone()
    }

    fn spawn_session(&self, key: &SessionKey) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(SessionState::Uninitialized));
        let interrupt = Arc::new(Notify::new());
        let id = Uuid::new_v4();
        let handle = SessionHandle {
            queue: tx,
            state: state.clone(),
            interrupt: interrupt.clone(),
            id,
            created_at: Utc::now(),
        };
        tracing::info!(session = %key, %id, "starting session");
        tokio::spawn(run_session(
            key.clone(),
            id,
            self.launcher.clone(),
            rx,
            state,
            interrupt,
            self.idle_timeout,
            self.sessions.clone(),
        ));
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::backend::mock::{MockBehavior, MockLauncher};
    use crate::exec::backend::ExecOutput;

    fn key() -> SessionKey {
        SessionKey::new("notes", "python", "default")
    }

    fn manager(behavior: MockBehavior) -> (Arc<MockLauncher>, SessionManager) {
        let launcher = Arc::new(MockLauncher::new(behavior));
        let manager = SessionManager::new(launcher.clone());
        (launcher, manager)
    }

    #[tokio::test]
    async fn run_cell_round_trip() {
        let (_, manager) = manager(MockBehavior::Echo);
        let result = manager
            .run_cell(&key(), CellId::new("python", 0), "print(1)", DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result.stdout, "print(1)\n");
        assert_eq!(result.status, CellStatus::Success);
        assert_eq!(result.cell.as_str(), "python_0");
    }

    #[tokio::test]
    async fn nonzero_exit_code_reports_failed() {
        let (_, manager) = manager(MockBehavior::Scripted(vec![ExecOutput {
            stdout: String::new(),
            stderr: "boom\n".into(),
            exit_code: 2,
        }]));
        let result = manager
            .run_cell(&key(), CellId::new("python", 0), "exit 2", DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result.status, CellStatus::Failed(2));
        assert_eq!(result.stderr, "boom\n");
    }

    #[tokio::test]
    async fn same_key_executes_in_submission_order() {
        let (launcher, manager) = manager(MockBehavior::Delay(Duration::from_millis(20)));
        let k = key();
        let first = manager.submit_cell(&k, CellId::new("python", 0), "c1", DEFAULT_TIMEOUT);
        let second = manager.submit_cell(&k, CellId::new("python", 1), "c2", DEFAULT_TIMEOUT);
        let r1 = first.await_result().await.unwrap();
        let r2 = second.await_result().await.unwrap();
        assert_eq!(r1.cell.as_str(), "python_0");
        assert_eq!(r2.cell.as_str(), "python_1");
        assert_eq!(launcher.executed(), vec!["c1", "c2"]);
        // One session, one backend.
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn different_keys_run_in_parallel() {
        let (launcher, manager) = manager(MockBehavior::Delay(Duration::from_millis(200)));
        let k1 = SessionKey::new("notes", "python", "a");
        let k2 = SessionKey::new("notes", "python", "b");
        let started = tokio::time::Instant::now();
        let (r1, r2) = tokio::join!(
            manager.run_cell(&k1, CellId::new("python", 0), "c1", DEFAULT_TIMEOUT),
            manager.run_cell(&k2, CellId::new("python", 0), "c2", DEFAULT_TIMEOUT),
        );
        r1.unwrap();
        r2.unwrap();
        // Serial execution would need at least 400ms.
        assert!(started.elapsed() < Duration::from_millis(380));
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn timeout_reports_status_and_discards_session() {
        let (launcher, manager) = manager(MockBehavior::Delay(Duration::from_secs(60)));
        let k = key();
        let result = manager
            .run_cell(
                &k,
                CellId::new("python", 0),
                "sleep forever",
                Duration::from_millis(30),
            )
            .await
            .unwrap();
        assert_eq!(result.status, CellStatus::Timeout);

        // The next cell on the same key gets a fresh backend.
        launcher.set_behavior(MockBehavior::Echo);
        let result = manager
            .run_cell(&k, CellId::new("python", 1), "again", DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result.status, CellStatus::Success);
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn launch_failure_surfaces_backend_unavailable() {
        let (_, manager) = manager(MockBehavior::LaunchFails);
        let err = manager
            .run_cell(&key(), CellId::new("python", 0), "x", DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::BackendUnavailable { .. }));
        // No session survives a failed launch.
        assert!(manager.session_state(&key()).is_none() || manager.session_state(&key()) == Some(SessionState::Closed));
    }

    #[tokio::test]
    async fn cancelling_a_queued_cell_has_no_side_effects() {
        let (launcher, manager) = manager(MockBehavior::Delay(Duration::from_millis(100)));
        let k = key();
        let running = manager.submit_cell(&k, CellId::new("python", 0), "c1", DEFAULT_TIMEOUT);
        let queued = manager.submit_cell(&k, CellId::new("python", 1), "c2", DEFAULT_TIMEOUT);
        queued.cancel();
        assert!(running.await_result().await.is_ok());
        assert!(matches!(
            queued.await_result().await,
            Err(ExecError::Cancelled)
        ));
        // The cancelled cell never reached the backend.
        assert_eq!(launcher.executed(), vec!["c1"]);
    }

    #[tokio::test]
    async fn close_session_interrupts_a_running_cell() {
        let (_, manager) = manager(MockBehavior::Delay(Duration::from_secs(60)));
        let k = key();
        let ticket = manager.submit_cell(&k, CellId::new("python", 0), "c1", DEFAULT_TIMEOUT);
        // Let the worker pick the job up before closing.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager.close_session(&k));
        assert!(matches!(
            ticket.await_result().await,
            Err(ExecError::Cancelled)
        ));
        assert!(!manager.close_session(&k));
    }

    #[tokio::test]
    async fn idle_sessions_are_reaped() {
        let launcher = Arc::new(MockLauncher::new(MockBehavior::Echo));
        let manager = SessionManager::new(launcher.clone())
            .with_idle_timeout(Duration::from_millis(150));
        let k = key();
        manager
            .run_cell(&k, CellId::new("python", 0), "x", DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(manager.list_sessions().len(), 1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(manager.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn list_sessions_is_sorted_and_observable() {
        let (_, manager) = manager(MockBehavior::Echo);
        let kb = SessionKey::new("notes", "bash", "default");
        let kp = SessionKey::new("notes", "python", "default");
        manager
            .run_cell(&kp, CellId::new("python", 0), "x", DEFAULT_TIMEOUT)
            .await
            .unwrap();
        manager
            .run_cell(&kb, CellId::new("bash", 0), "y", DEFAULT_TIMEOUT)
            .await
            .unwrap();
        let infos = manager.list_sessions();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].key, kb);
        assert_eq!(infos[1].key, kp);
        assert_eq!(infos[0].state, SessionState::Ready);
        assert_eq!(manager.close_all(), 2);
    }
}
