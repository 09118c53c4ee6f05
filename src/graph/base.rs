//! KnowledgeBase: a named collection of documents sharing one link graph

use super::link_graph::{DocEdges, LinkGraph};
use crate::parser::Document;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregate numbers for one base, for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BaseStats {
    pub documents: usize,
    pub edges: usize,
}

/// A named, independently indexed collection of documents.
///
/// The base owns its link graph; documents are added and removed
/// independently of the base's own lifecycle. The graph is an in-memory
/// cache, rebuilt from the corpus after a restart.
#[derive(Debug)]
pub struct KnowledgeBase {
    pub name: String,
    pub graph: LinkGraph,
    pub created_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
}

impl KnowledgeBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: LinkGraph::new(),
            created_at: Utc::now(),
            indexed_at: None,
        }
    }

    /// Replace one document's graph contribution with a freshly parsed set.
    /// Indexing the same unchanged document twice is a no-op.
    pub fn upsert_document(&mut self, doc: &Document) {
        self.graph.upsert(doc.path.clone(), DocEdges::from(doc));
        self.indexed_at = Some(Utc::now());
    }

    /// Remove a document's contribution. Dangling links to its title remain.
    pub fn remove_document(&mut self, path: &str) -> bool {
        let removed = self.graph.remove(path);
        if removed {
            self.indexed_at = Some(Utc::now());
        }
        removed
    }

    pub fn stats(&self) -> BaseStats {
        BaseStats {
            documents: self.graph.document_count(),
            edges: self.graph.edge_count(),
        }
    }
}
