//! The link graph of one knowledge base
//!
//! Derived entirely from document content, never hand-edited. Each document
//! contributes its title, its outgoing link targets, and its tags; everything
//! else (backlinks, orphans, hubs, broken links) is computed from those
//! contributions at query time. Targets are kept as raw title strings and
//! resolved lazily against the current title set, so a link to a document
//! that does not exist yet survives as a dangling edge instead of an error.

use crate::parser::Document;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// One document's contribution to the graph.
///
/// Outgoing targets are deduplicated per document: linking to the same title
/// three times is one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocEdges {
    pub title: String,
    pub outgoing: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

impl From<&Document> for DocEdges {
    fn from(doc: &Document) -> Self {
        Self {
            title: doc.title.clone(),
            outgoing: doc.link_targets().map(str::to_string).collect(),
            tags: doc.tag_names().map(str::to_string).collect(),
        }
    }
}

/// A ranked entry from the `hubs` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubEntry {
    pub title: String,
    pub degree: usize,
}

/// A link whose target title matches no document in the base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenLink {
    pub source: String,
    pub target: String,
}

/// Directed document-to-document reference graph plus tag memberships.
#[derive(Debug, Default)]
pub struct LinkGraph {
    /// Contribution per document path. Replacing an entry wholesale is the
    /// only mutation, which makes reindexing idempotent.
    docs: HashMap<String, DocEdges>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace (or insert) one document's contribution.
    pub fn upsert(&mut self, path: impl Into<String>, edges: DocEdges) {
        self.docs.insert(path.into(), edges);
    }

    /// Drop one document's contribution. Links *to* its title from elsewhere
    /// remain, as dangling edges.
    pub fn remove(&mut self, path: &str) -> bool {
        self.docs.remove(path).is_some()
    }

    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    /// Total outgoing edges, dangling included.
    pub fn edge_count(&self) -> usize {
        self.docs.values().map(|d| d.outgoing.len()).sum()
    }

    /// Titles of all documents whose outgoing edges name `title`, sorted.
    pub fn backlinks(&self, title: &str) -> Vec<String> {
        let mut sources: Vec<String> = self
            .docs
            .values()
            .filter(|d| d.outgoing.contains(title))
            .map(|d| d.title.clone())
            .collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Titles of documents with zero incoming edges, sorted.
    pub fn orphans(&self) -> Vec<String> {
        let linked: HashSet<&str> = self
            .docs
            .values()
            .flat_map(|d| d.outgoing.iter().map(String::as_str))
            .collect();
        let mut orphans: Vec<String> = self
            .docs
            .values()
            .filter(|d| !linked.contains(d.title.as_str()))
            .map(|d| d.title.clone())
            .collect();
        orphans.sort();
        orphans.dedup();
        orphans
    }

    /// Documents ranked by in-degree + out-degree, descending; ties broken by
    /// title lexical order.
    pub fn hubs(&self, top_n: usize) -> Vec<HubEntry> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for doc in self.docs.values() {
            for target in &doc.outgoing {
                *in_degree.entry(target.as_str()).or_insert(0) += 1;
            }
        }
        let mut entries: Vec<HubEntry> = self
            .docs
            .values()
            .map(|d| HubEntry {
                title: d.title.clone(),
                degree: d.outgoing.len() + in_degree.get(d.title.as_str()).copied().unwrap_or(0),
            })
            .collect();
        entries.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.title.cmp(&b.title)));
        entries.truncate(top_n);
        entries
    }

    /// Edges whose target matches no existing document title, sorted by
    /// (source, target).
    pub fn broken_links(&self) -> Vec<BrokenLink> {
        let titles: HashSet<&str> = self.docs.values().map(|d| d.title.as_str()).collect();
        let mut broken: Vec<BrokenLink> = self
            .docs
            .values()
            .flat_map(|d| {
                d.outgoing
                    .iter()
                    .filter(|t| !titles.contains(t.as_str()))
                    .map(|t| BrokenLink {
                        source: d.title.clone(),
                        target: t.clone(),
                    })
            })
            .collect();
        broken.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.target.cmp(&b.target)));
        broken
    }

    /// Titles of documents carrying the given tag, sorted.
    pub fn tagged(&self, tag: &str) -> Vec<String> {
        let mut titles: Vec<String> = self
            .docs
            .values()
            .filter(|d| d.tags.contains(tag))
            .map(|d| d.title.clone())
            .collect();
        titles.sort();
        titles.dedup();
        titles
    }

    /// All tags with their document counts, highest count first, ties by
    /// name.
    pub fn tags(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for doc in self.docs.values() {
            for tag in &doc.tags {
                *counts.entry(tag.as_str()).or_insert(0) += 1;
            }
        }
        let mut tags: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(t, c)| (t.to_string(), c))
            .collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tags
    }
}
