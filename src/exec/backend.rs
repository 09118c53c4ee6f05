//! Interpreter backends
//!
//! A backend is one long-lived interpreter process owned by exactly one
//! session. The launcher trait is the injection seam: production code uses
//! `ProcessLauncher`, tests use `mock::MockLauncher` without touching the
//! session machinery.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use uuid::Uuid;

/// Errors from launching or driving a backend process
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to launch backend for '{language}': {source}")]
    Launch {
        language: String,
        source: std::io::Error,
    },

    #[error("no backend profile for language: {0}")]
    UnsupportedLanguage(String),

    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend closed its streams mid-cell")]
    StreamClosed,
}

/// Raw capture from one cell run: the two streams stay separate, and each
/// preserves the order of the cell's own writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// One live interpreter. `execute` runs a single cell and must not be called
/// concurrently; the owning session serializes access.
#[async_trait]
pub trait Backend: Send {
    async fn execute(&mut self, source: &str) -> Result<ExecOutput, BackendError>;

    /// Terminate the process. Idempotent.
    async fn shutdown(&mut self);
}

/// Produces backends for a language. Interpreter selection and installation
/// are the embedder's problem; this crate only defines the contract and a
/// default process-based implementation.
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    async fn launch(&self, language: &str) -> Result<Box<dyn Backend>, BackendError>;
}

/// How to phrase the end-of-cell sentinel in a given interpreter.
///
/// After each cell the backend is asked to print `<marker> <exit-code>` on
/// stdout and `<marker>` on stderr; reading each stream up to its marker
/// delimits the cell's output without restarting the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelSyntax {
    /// POSIX shells: `$?` is the last command's status.
    Shell,
    /// Python REPL: no per-cell exit status, errors arrive via stderr.
    Python,
}

impl SentinelSyntax {
    fn emit(&self, marker: &str) -> String {
        match self {
            SentinelSyntax::Shell => format!(
                "printf '%s %s\\n' '{m}' \"$?\"; printf '%s\\n' '{m}' >&2\n",
                m = marker
            ),
            SentinelSyntax::Python => format!(
                "import sys as _rz; print(\"{m} 0\"); _rz.stderr.write(\"{m}\\n\"); _rz.stderr.flush()\n",
                m = marker
            ),
        }
    }
}

/// Launch recipe for one language.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub program: String,
    pub args: Vec<String>,
    /// Written to stdin once after spawn (e.g. to silence REPL prompts).
    pub prelude: Option<String>,
    pub sentinel: SentinelSyntax,
}

/// Default launcher: real interpreter processes over piped stdio.
pub struct ProcessLauncher {
    profiles: HashMap<String, LanguageProfile>,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        let mut launcher = Self {
            profiles: HashMap::new(),
        };
        let python = LanguageProfile {
            program: "python3".into(),
            args: vec!["-u".into(), "-i".into(), "-q".into()],
            prelude: Some("import sys; sys.ps1 = ''; sys.ps2 = ''".into()),
            sentinel: SentinelSyntax::Python,
        };
        let bash = LanguageProfile {
            program: "bash".into(),
            args: vec![],
            prelude: None,
            sentinel: SentinelSyntax::Shell,
        };
        let sh = LanguageProfile {
            program: "sh".into(),
            args: vec![],
            prelude: None,
            sentinel: SentinelSyntax::Shell,
        };
        for alias in ["python", "py", "python3"] {
            launcher.register(alias, python.clone());
        }
        launcher.register("bash", bash);
        for alias in ["sh", "shell"] {
            launcher.register(alias, sh.clone());
        }
        launcher
    }

    /// Add or replace the profile for a language name.
    pub fn register(&mut self, language: impl Into<String>, profile: LanguageProfile) {
        self.profiles.insert(language.into(), profile);
    }

    pub fn supported_languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.profiles.keys().cloned().collect();
        langs.sort();
        langs
    }
}

#[async_trait]
impl BackendLauncher for ProcessLauncher {
    async fn launch(&self, language: &str) -> Result<Box<dyn Backend>, BackendError> {
        let profile = self
            .profiles
            .get(&language.to_ascii_lowercase())
            .ok_or_else(|| BackendError::UnsupportedLanguage(language.to_string()))?;
        let backend = ProcessBackend::spawn(language, profile).await?;
        Ok(Box::new(backend))
    }
}

/// A live interpreter process with buffered line readers on both streams.
pub struct ProcessBackend {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    sentinel: SentinelSyntax,
}

impl ProcessBackend {
    async fn spawn(language: &str, profile: &LanguageProfile) -> Result<Self, BackendError> {
        let mut child = Command::new(&profile.program)
            .args(&profile.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Launch {
                language: language.to_string(),
                source: e,
            })?;
        let mut stdin = child.stdin.take().ok_or(BackendError::StreamClosed)?;
        let stdout = child.stdout.take().ok_or(BackendError::StreamClosed)?;
        let stderr = child.stderr.take().ok_or(BackendError::StreamClosed)?;
        if let Some(prelude) = &profile.prelude {
            stdin.write_all(prelude.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }
        tracing::debug!(language, program = %profile.program, pid = ?child.id(), "backend spawned");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            sentinel: profile.sentinel,
        })
    }
}

/// Read one stream up to its sentinel line. Returns the captured text and,
/// for stdout, the exit code the sentinel carried.
async fn drain<R: AsyncBufRead + Unpin>(
    lines: &mut Lines<R>,
    marker: &str,
) -> Result<(String, Option<i32>), BackendError> {
    let mut captured = String::new();
    while let Some(line) = lines.next_line().await? {
        if let Some(rest) = line.trim().strip_prefix(marker) {
            return Ok((captured, rest.trim().parse::<i32>().ok()));
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    Err(BackendError::StreamClosed)
}

#[async_trait]
impl Backend for ProcessBackend {
    async fn execute(&mut self, source: &str) -> Result<ExecOutput, BackendError> {
        let marker = format!("__rhizome_{}__", Uuid::new_v4().simple());
        let mut payload = String::from(source);
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        // The extra blank line closes any block a REPL is still reading.
        payload.push('\n');
        payload.push_str(&self.sentinel.emit(&marker));
        self.stdin.write_all(payload.as_bytes()).await?;
        self.stdin.flush().await?;

        let (out, err) = tokio::try_join!(
            drain(&mut self.stdout, &marker),
            drain(&mut self.stderr, &marker)
        )?;
        Ok(ExecOutput {
            stdout: out.0,
            stderr: err.0,
            exit_code: out.1.unwrap_or(0),
        })
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "backend kill failed");
        }
    }
}

pub mod mock {
    //! Mock launcher and backend for tests.
    //!
    //! Lets tests script outputs, delay execution for timeout scenarios, and
    //! fail launches, while recording every executed source across all
    //! backends for ordering assertions.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Behavior of backends produced by a `MockLauncher`.
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Echo the cell source back on stdout with exit code 0.
        Echo,
        /// Return scripted outputs in order; echo once exhausted.
        Scripted(Vec<ExecOutput>),
        /// Sleep before echoing (timeout and queueing scenarios).
        Delay(Duration),
        /// `launch` fails with a spawn error.
        LaunchFails,
    }

    pub struct MockLauncher {
        behavior: Mutex<MockBehavior>,
        executed: Arc<Mutex<Vec<String>>>,
        launches: AtomicUsize,
    }

    impl MockLauncher {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                executed: Arc::new(Mutex::new(Vec::new())),
                launches: AtomicUsize::new(0),
            }
        }

        /// Change behavior for subsequently launched backends.
        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self
                .behavior
                .lock()
                .expect("MockLauncher behavior mutex poisoned") = behavior;
        }

        /// Every source executed so far, across all backends, in execution
        /// order.
        pub fn executed(&self) -> Vec<String> {
            self.executed
                .lock()
                .expect("MockLauncher executed mutex poisoned")
                .clone()
        }

        /// How many backends were launched (for fresh-session assertions).
        pub fn launch_count(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackendLauncher for MockLauncher {
        async fn launch(&self, language: &str) -> Result<Box<dyn Backend>, BackendError> {
            let behavior = self
                .behavior
                .lock()
                .expect("MockLauncher behavior mutex poisoned")
                .clone();
            if matches!(behavior, MockBehavior::LaunchFails) {
                return Err(BackendError::Launch {
                    language: language.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock launch failure"),
                });
            }
            self.launches.fetch_add(1, Ordering::SeqCst);
            let scripted = match &behavior {
                MockBehavior::Scripted(outputs) => outputs.iter().cloned().collect(),
                _ => VecDeque::new(),
            };
            Ok(Box::new(MockBackend {
                behavior,
                scripted,
                executed: self.executed.clone(),
            }))
        }
    }

    struct MockBackend {
        behavior: MockBehavior,
        scripted: VecDeque<ExecOutput>,
        executed: Arc<Mutex<Vec<String>>>,
    }

    fn echo(source: &str) -> ExecOutput {
        ExecOutput {
            stdout: format!("{}\n", source),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn execute(&mut self, source: &str) -> Result<ExecOutput, BackendError> {
            self.executed
                .lock()
                .expect("MockBackend executed mutex poisoned")
                .push(source.to_string());
            match &self.behavior {
                MockBehavior::Delay(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(echo(source))
                }
                MockBehavior::Scripted(_) => Ok(self.scripted.pop_front().unwrap_or_else(|| echo(source))),
                _ => Ok(echo(source)),
            }
        }

        async fn shutdown(&mut self) {}
    }
}
