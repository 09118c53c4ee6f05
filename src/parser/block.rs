//! Typed blocks produced by the document parser

use serde::{Deserialize, Serialize};

/// Byte range of a block within the original document text.
///
/// `start`/`end` are byte offsets; `end` is exclusive. Spans produced by one
/// parse are non-overlapping and strictly ordered, which is what lets the
/// reconciler splice output regions without touching surrounding bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The span as a slice range.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Stable identity of a code cell within a document.
///
/// Format: `{language}_{ordinal}`, where the ordinal counts cells of that
/// language in document order starting at 0. Edits that do not reorder or
/// remove earlier same-language cells leave the id unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(language: &str, ordinal: usize) -> Self {
        Self(format!("{}_{}", language, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CellId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One ordered element of a parsed document.
///
/// Every variant carries the exact byte span it was parsed from. Malformed
/// constructs never fail the parse; they degrade to `Prose`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Plain text with no recognized structure.
    Prose { text: String, span: Span },
    /// ATX heading, levels 1-6.
    Heading { level: u8, text: String, span: Span },
    /// `#name` tag outside fenced code.
    Tag { name: String, span: Span },
    /// `[[Target]]` / `[[Target|Display]]` wikilink, or a local `.md`
    /// markdown link. The target is a title, resolved lazily at query time.
    LinkRef {
        target: String,
        display: String,
        span: Span,
    },
    /// Fenced code block with a language tag. The span covers the fences.
    CodeCell {
        language: String,
        id: CellId,
        source: String,
        span: Span,
    },
    /// Captured execution output belonging to the immediately preceding cell.
    OutputRegion {
        cell: CellId,
        text: String,
        span: Span,
    },
}

impl Block {
    /// The byte span this block was parsed from.
    pub fn span(&self) -> Span {
        match self {
            Block::Prose { span, .. }
            | Block::Heading { span, .. }
            | Block::Tag { span, .. }
            | Block::LinkRef { span, .. }
            | Block::CodeCell { span, .. }
            | Block::OutputRegion { span, .. } => *span,
        }
    }
}
