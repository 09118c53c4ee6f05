//! Splicing execution results back into document text
//!
//! The reconciler's correctness property is byte-exactness: only the target
//! cell's output region changes, everything else round-trips untouched, and
//! reconciling an identical result twice is a no-op.

use crate::exec::{CellResult, CellStatus};
use crate::parser::{parse, Block, CellId, Span, OUTPUT_END, OUTPUT_START};
use thiserror::Error;

/// Errors from reconciliation
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cell not found: {0}")]
    CellNotFound(CellId),
}

/// Result type for reconciliation
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Captured text must not be able to terminate its own region early.
fn defang(text: &str) -> String {
    text.replace(OUTPUT_END, "<!-- output:end -->")
        .replace(OUTPUT_START, "<!-- output:start -->")
}

/// Render a cell result as a delimited output region.
///
/// Pure function of the result: identical results render to identical bytes,
/// which is what makes reconciliation idempotent. The rendered block carries
/// no trailing newline; the surrounding document supplies it.
pub fn render_output(result: &CellResult) -> String {
    let mut block = String::new();
    block.push_str(OUTPUT_START);
    block.push('\n');
    if result.status == CellStatus::Timeout {
        block.push_str("*execution timed out*\n");
    } else {
        if !result.stdout.is_empty() {
            block.push_str("**Output:**\n```\n");
            block.push_str(defang(result.stdout.trim_end_matches('\n')).as_str());
            block.push_str("\n```\n");
        }
        if !result.stderr.is_empty() {
            block.push_str("**Error:**\n```\n");
            block.push_str(defang(result.stderr.trim_end_matches('\n')).as_str());
            block.push_str("\n```\n");
        }
        if result.stdout.is_empty() && result.stderr.is_empty() {
            block.push_str("*no output*\n");
        }
    }
    block.push_str(OUTPUT_END);
    block
}

/// Merge one cell's result into the document text.
///
/// If the cell already owns an output region, exactly that region's bytes are
/// replaced; otherwise a new region is inserted after the cell's closing
/// fence. On `CellNotFound` the caller keeps the input unmodified; this
/// function never returns a partially rewritten document.
pub fn reconcile(text: &str, cell: &CellId, result: &CellResult) -> ReconcileResult<String> {
    let blocks = parse(text);
    let cell_span = blocks
        .iter()
        .find_map(|b| match b {
            Block::CodeCell { id, span, .. } if id == cell => Some(*span),
            _ => None,
        })
        .ok_or_else(|| ReconcileError::CellNotFound(cell.clone()))?;
    let region_span = blocks.iter().find_map(|b| match b {
        Block::OutputRegion { cell: owner, span, .. } if owner == cell => Some(*span),
        _ => None,
    });

    let rendered = render_output(result);
    let mut out = String::with_capacity(text.len() + rendered.len());
    match region_span {
        Some(span) => {
            out.push_str(&text[..span.start]);
            out.push_str(&rendered);
            out.push_str(&text[span.end..]);
        }
        None => {
            out.push_str(&text[..cell_span.end]);
            out.push_str("\n\n");
            out.push_str(&rendered);
            out.push_str(&text[cell_span.end..]);
        }
    }
    Ok(out)
}

/// Remove every output region, restoring a clean document. The blank-line
/// gap the insert path added is removed with the region.
pub fn strip_outputs(text: &str) -> String {
    let regions: Vec<Span> = parse(text)
        .iter()
        .filter_map(|b| match b {
            Block::OutputRegion { span, .. } => Some(*span),
            _ => None,
        })
        .collect();
    if regions.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in regions {
        let cut_from = text[..span.start]
            .char_indices()
            .rev()
            .find(|(_, c)| !c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        if cut_from > cursor {
            out.push_str(&text[cursor..cut_from]);
        }
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}
