//! Consumer-facing API layer.
//!
//! `RhizomeApi` is the single entry point for all consumer-facing operations.
//! Transports (the CLI, direct embedding) call `RhizomeApi` methods — they
//! never reach into `GraphEngine`, `SessionManager`, or the reconciler
//! directly.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::exec::{CellResult, ExecError, SessionInfo, SessionKey, SessionManager, DEFAULT_TIMEOUT};
use crate::graph::{BaseStats, BrokenLink, GraphEngine, GraphError, GraphResult, HubEntry};
use crate::notebook::{reconcile, strip_outputs, ReconcileError};
use crate::parser::{Block, CellId, Document};
use crate::store::{DocumentStore, StoreError};
use serde::Serialize;

/// Options for the execute workflows.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Session name; interpreter state persists per (base, language, name).
    pub session: String,
    /// Per-cell deadline.
    pub timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            session: "default".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RunOptions {
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One cell as listed by `list_cells`.
#[derive(Debug, Clone, Serialize)]
pub struct CellSummary {
    pub id: CellId,
    pub language: String,
    pub has_output: bool,
}

/// Single entry point for all consumer-facing operations.
#[derive(Clone)]
pub struct RhizomeApi {
    engine: Arc<GraphEngine>,
    sessions: Arc<SessionManager>,
    store: Arc<dyn DocumentStore>,
}

impl RhizomeApi {
    pub fn new(
        engine: Arc<GraphEngine>,
        sessions: Arc<SessionManager>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            engine,
            sessions,
            store,
        }
    }

    // --- Knowledge bases ---

    pub fn base_create(&self, name: &str) -> GraphResult<()> {
        self.engine.create_base(name)
    }

    pub fn base_remove(&self, name: &str) -> bool {
        self.engine.remove_base(name)
    }

    pub fn base_list(&self) -> Vec<String> {
        self.engine.list_bases()
    }

    pub fn base_stats(&self, name: &str) -> GraphResult<BaseStats> {
        self.engine.stats(name)
    }

    // --- Indexing ---

    /// Load and index one document into a base's graph (incremental
    /// reindex: its previous contribution is replaced).
    pub async fn index_document(
        &self,
        base: &str,
        root: &Path,
        rel_path: &str,
    ) -> Result<(), ExecuteError> {
        let doc = self.load_document(root, rel_path).await?;
        self.engine.index_document(base, &doc)?;
        Ok(())
    }

    /// Index a batch of documents. Returns how many were indexed.
    pub async fn index_documents(
        &self,
        base: &str,
        root: &Path,
        rel_paths: impl IntoIterator<Item = String>,
    ) -> Result<usize, ExecuteError> {
        let mut docs = Vec::new();
        for rel in rel_paths {
            docs.push(self.load_document(root, &rel).await?);
        }
        Ok(self.engine.index_documents(base, docs.iter())?)
    }

    async fn load_document(&self, root: &Path, rel_path: &str) -> Result<Document, ExecuteError> {
        let abs = root.join(rel_path);
        let text = self.store.load(&abs).await?;
        let mut doc = Document::new(rel_path, text);
        // Best effort; stores without filesystem backing have no mtime.
        if let Ok(meta) = tokio::fs::metadata(&abs).await {
            if let Ok(mtime) = meta.modified() {
                doc = doc.with_modified(mtime.into());
            }
        }
        Ok(doc)
    }

    pub fn remove_document(&self, base: &str, rel_path: &str) -> GraphResult<bool> {
        self.engine.remove_document(base, rel_path)
    }

    // --- Graph queries ---

    pub fn backlinks(&self, base: &str, title: &str) -> GraphResult<Vec<String>> {
        self.engine.backlinks(base, title)
    }

    pub fn orphans(&self, base: &str) -> GraphResult<Vec<String>> {
        self.engine.orphans(base)
    }

    pub fn hubs(&self, base: &str, top_n: usize) -> GraphResult<Vec<HubEntry>> {
        self.engine.hubs(base, top_n)
    }

    pub fn broken_links(&self, base: &str) -> GraphResult<Vec<BrokenLink>> {
        self.engine.broken_links(base)
    }

    pub fn tagged(&self, base: &str, tag: &str) -> GraphResult<Vec<String>> {
        self.engine.tagged(base, tag)
    }

    pub fn tags(&self, base: &str) -> GraphResult<Vec<(String, usize)>> {
        self.engine.tags(base)
    }

    // --- Execution ---

    /// Execute one cell and persist its output back into the document.
    ///
    /// The document is saved only after a successful reconcile; no error
    /// path leaves a partially rewritten file behind.
    pub async fn run_cell(
        &self,
        base: &str,
        path: &Path,
        cell: &CellId,
        opts: &RunOptions,
    ) -> Result<CellResult, ExecuteError> {
        let text = self.store.load(path).await?;
        let doc = Document::new(path.to_string_lossy(), text);
        let (language, source) = match doc.cell(cell) {
            Some(Block::CodeCell {
                language, source, ..
            }) => (language.clone(), source.clone()),
            _ => return Err(ExecuteError::CellNotFound(cell.clone())),
        };

        let key = SessionKey::new(base, language, opts.session.clone());
        let result = self
            .sessions
            .run_cell(&key, cell.clone(), source, opts.timeout)
            .await?;

        let updated = reconcile(&doc.text, cell, &result)?;
        self.store.save(path, &updated).await?;
        tracing::info!(%cell, path = %path.display(), status = ?result.status, "cell executed");
        Ok(result)
    }

    /// Execute every cell in a document, in document order, against the same
    /// session name. Stops at the first execution error; completed cells
    /// keep their persisted output.
    pub async fn run_document(
        &self,
        base: &str,
        path: &Path,
        opts: &RunOptions,
    ) -> Result<Vec<CellResult>, ExecuteError> {
        let text = self.store.load(path).await?;
        let ids: Vec<CellId> = Document::new(path.to_string_lossy(), text)
            .cells()
            .filter_map(|b| match b {
                Block::CodeCell { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.run_cell(base, path, &id, opts).await?);
        }
        Ok(results)
    }

    /// List the cells of a document without executing anything.
    pub async fn list_cells(&self, path: &Path) -> Result<Vec<CellSummary>, ExecuteError> {
        let text = self.store.load(path).await?;
        let doc = Document::new(path.to_string_lossy(), text);
        Ok(doc
            .cells()
            .filter_map(|b| match b {
                Block::CodeCell { id, language, .. } => Some(CellSummary {
                    id: id.clone(),
                    language: language.clone(),
                    has_output: doc.output_of(id).is_some(),
                }),
                _ => None,
            })
            .collect())
    }

    /// Remove all persisted output regions from a document.
    pub async fn strip_document(&self, path: &Path) -> Result<(), ExecuteError> {
        let text = self.store.load(path).await?;
        let stripped = strip_outputs(&text);
        if stripped != text {
            self.store.save(path, &stripped).await?;
        }
        Ok(())
    }

    // --- Sessions ---

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list_sessions()
    }

    pub fn close_session(&self, base: &str, language: &str, session: &str) -> bool {
        self.sessions
            .close_session(&SessionKey::new(base, language, session))
    }

    pub fn close_all_sessions(&self) -> usize {
        self.sessions.close_all()
    }
}

/// Error from the execute workflows.
#[derive(Debug)]
pub enum ExecuteError {
    /// The document does not exist in the store.
    DocumentNotFound(String),
    /// The named cell does not parse out of the document.
    CellNotFound(CellId),
    /// Underlying graph error.
    Graph(GraphError),
    /// Underlying execution error.
    Exec(ExecError),
    /// Underlying store error.
    Store(StoreError),
}

impl std::fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DocumentNotFound(path) => write!(f, "document not found: {}", path),
            Self::CellNotFound(id) => write!(f, "cell not found: {}", id),
            Self::Graph(e) => write!(f, "graph error: {}", e),
            Self::Exec(e) => write!(f, "execution error: {}", e),
            Self::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for ExecuteError {}

impl From<GraphError> for ExecuteError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl From<ExecError> for ExecuteError {
    fn from(e: ExecError) -> Self {
        Self::Exec(e)
    }
}

impl From<StoreError> for ExecuteError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => Self::DocumentNotFound(path),
            other => Self::Store(other),
        }
    }
}

impl From<ReconcileError> for ExecuteError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::CellNotFound(id) => Self::CellNotFound(id),
        }
    }
}
