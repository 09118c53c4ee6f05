//! Rhizome: knowledge-base engine with a link graph and executable notebooks
//!
//! A directory of interlinked markdown documents becomes a queryable graph,
//! and fenced code cells inside those documents can be executed against
//! persistent interpreter sessions with their output written back into the
//! file.
//!
//! # Core Concepts
//!
//! - **Documents**: markdown files parsed into ordered, span-tracked blocks
//! - **Knowledge bases**: named collections of documents sharing one link graph
//! - **Sessions**: long-lived interpreter processes keyed by (base, language, name)
//! - **Output regions**: a cell's most recent result, persisted next to it
//!
//! # Example
//!
//! ```
//! use rhizome::{GraphEngine, parser::Document};
//!
//! let engine = GraphEngine::new();
//! engine.create_base("notes").unwrap();
//! let doc = Document::new("a.md", "# A\n\n[[B]] #todo\n");
//! engine.index_document("notes", &doc).unwrap();
//! assert_eq!(engine.backlinks("notes", "B").unwrap(), vec!["A"]);
//! ```

mod api;
pub mod exec;
pub mod graph;
pub mod notebook;
pub mod parser;
pub mod store;

pub use api::{CellSummary, ExecuteError, RhizomeApi, RunOptions};
pub use exec::{
    CellResult, CellStatus, ExecError, ProcessLauncher, SessionInfo, SessionKey, SessionManager,
    SessionState,
};
pub use graph::{BaseStats, BrokenLink, GraphEngine, GraphError, GraphResult, HubEntry};
pub use notebook::{reconcile, strip_outputs, ReconcileError};
pub use parser::{parse, Block, CellId, Document, Span};
pub use store::{DocumentStore, FsStore, MemoryStore, StoreError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
