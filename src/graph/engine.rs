//! GraphEngine: registry of knowledge bases and their link graphs

use super::base::{BaseStats, KnowledgeBase};
use super::link_graph::{BrokenLink, HubEntry};
use crate::parser::Document;
use dashmap::DashMap;
use thiserror::Error;

/// Errors from knowledge-base and graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("knowledge base not found: {0}")]
    BaseNotFound(String),

    #[error("knowledge base already exists: {0}")]
    BaseExists(String),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Registry of named knowledge bases.
///
/// Mutation granularity is one whole base: a reindex of one document takes
/// the base's map entry, so concurrent reindexes of the same document
/// serialize, while queries racing a reindex observe either the previous or
/// the new edge set, never an intermediate one.
#[derive(Debug, Default)]
pub struct GraphEngine {
    bases: DashMap<String, KnowledgeBase>,
}

impl GraphEngine {
    pub fn new() -> Self {
        Self {
            bases: DashMap::new(),
        }
    }

    /// Create a base. Fails if the name is taken.
    pub fn create_base(&self, name: &str) -> GraphResult<()> {
        if self.bases.contains_key(name) {
            return Err(GraphError::BaseExists(name.to_string()));
        }
        self.bases
            .insert(name.to_string(), KnowledgeBase::new(name));
        Ok(())
    }

    /// Remove a base and its graph. Returns false if it did not exist.
    pub fn remove_base(&self, name: &str) -> bool {
        self.bases.remove(name).is_some()
    }

    pub fn has_base(&self, name: &str) -> bool {
        self.bases.contains_key(name)
    }

    /// All base names, sorted.
    pub fn list_bases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bases.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn base_count(&self) -> usize {
        self.bases.len()
    }

    /// Incrementally reindex one document: its previous contribution is
    /// replaced by the freshly parsed set. Idempotent.
    pub fn index_document(&self, base: &str, doc: &Document) -> GraphResult<()> {
        let mut entry = self
            .bases
            .get_mut(base)
            .ok_or_else(|| GraphError::BaseNotFound(base.to_string()))?;
        entry.upsert_document(doc);
        tracing::debug!(base, path = %doc.path, "reindexed document");
        Ok(())
    }

    /// Index a batch of documents into a base.
    pub fn index_documents<'a>(
        &self,
        base: &str,
        docs: impl IntoIterator<Item = &'a Document>,
    ) -> GraphResult<usize> {
        let mut entry = self
            .bases
            .get_mut(base)
            .ok_or_else(|| GraphError::BaseNotFound(base.to_string()))?;
        let mut count = 0;
        for doc in docs {
            entry.upsert_document(doc);
            count += 1;
        }
        tracing::debug!(base, count, "indexed documents");
        Ok(count)
    }

    /// Drop one document from a base's graph.
    pub fn remove_document(&self, base: &str, path: &str) -> GraphResult<bool> {
        let mut entry = self
            .bases
            .get_mut(base)
            .ok_or_else(|| GraphError::BaseNotFound(base.to_string()))?;
        Ok(entry.remove_document(path))
    }

    // --- Queries ---

    pub fn backlinks(&self, base: &str, title: &str) -> GraphResult<Vec<String>> {
        self.read(base, |b| b.graph.backlinks(title))
    }

    pub fn orphans(&self, base: &str) -> GraphResult<Vec<String>> {
        self.read(base, |b| b.graph.orphans())
    }

    pub fn hubs(&self, base: &str, top_n: usize) -> GraphResult<Vec<HubEntry>> {
        self.read(base, |b| b.graph.hubs(top_n))
    }

    pub fn broken_links(&self, base: &str) -> GraphResult<Vec<BrokenLink>> {
        self.read(base, |b| b.graph.broken_links())
    }

    pub fn tagged(&self, base: &str, tag: &str) -> GraphResult<Vec<String>> {
        self.read(base, |b| b.graph.tagged(tag))
    }

    pub fn tags(&self, base: &str) -> GraphResult<Vec<(String, usize)>> {
        self.read(base, |b| b.graph.tags())
    }

    pub fn stats(&self, base: &str) -> GraphResult<BaseStats> {
        self.read(base, |b| b.stats())
    }

    fn read<T>(&self, base: &str, f: impl FnOnce(&KnowledgeBase) -> T) -> GraphResult<T> {
        self.bases
            .get(base)
            .map(|b| f(&b))
            .ok_or_else(|| GraphError::BaseNotFound(base.to_string()))
    }
}
