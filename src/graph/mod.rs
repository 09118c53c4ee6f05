//! Link graph indexing over knowledge bases

mod base;
mod engine;
mod link_graph;

pub use base::{BaseStats, KnowledgeBase};
pub use engine::{GraphEngine, GraphError, GraphResult};
pub use link_graph::{BrokenLink, DocEdges, HubEntry, LinkGraph};
