//! Document parsing: raw markdown text → ordered, span-tracked blocks

mod block;
mod document;

pub use block::{Block, CellId, Span};
pub use document::{parse, Document};

/// Line delimiting the start of a persisted cell output region.
pub const OUTPUT_START: &str = "<!-- rhizome:output:start -->";
/// Line delimiting the end of a persisted cell output region.
pub const OUTPUT_END: &str = "<!-- rhizome:output:end -->";
