//! Execution of code cells against persistent interpreter sessions

mod backend;
mod manager;
mod session;

pub use backend::{
    mock, Backend, BackendError, BackendLauncher, ExecOutput, LanguageProfile, ProcessBackend,
    ProcessLauncher, SentinelSyntax,
};
pub use manager::{
    CellResult, CellStatus, CellTicket, ExecError, SessionKey, SessionManager, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_TIMEOUT,
};
pub use session::{CancellationToken, SessionInfo, SessionState};
