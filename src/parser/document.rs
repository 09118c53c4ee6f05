//! Markdown parsing into ordered, span-tracked blocks
//!
//! `parse` is pure and total: any input yields some block sequence, and
//! malformed constructs (unterminated fences, orphaned output markers,
//! half-open wikilinks) degrade to prose instead of failing.

use super::block::{Block, CellId, Span};
use super::{OUTPUT_END, OUTPUT_START};
use chrono::{DateTime, Utc};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use std::collections::HashMap;
use std::path::Path;

/// A parsed document within a knowledge base.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the knowledge base root.
    pub path: String,
    /// Raw text as loaded.
    pub text: String,
    /// Ordered block sequence.
    pub blocks: Vec<Block>,
    /// First H1 heading, falling back to the file stem.
    pub title: String,
    /// YAML frontmatter, when present and well-formed.
    pub metadata: Option<serde_yaml::Value>,
    /// Last-modified timestamp, when the store knows it.
    pub modified: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        let path = path.into();
        let text = text.into();
        let blocks = parse(&text);
        let title = derive_title(&path, &blocks);
        let metadata = parse_frontmatter(&text);
        Self {
            path,
            text,
            blocks,
            title,
            metadata,
            modified: None,
        }
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// All code cells, in document order.
    pub fn cells(&self) -> impl Iterator<Item = &Block> {
        self.blocks
            .iter()
            .filter(|b| matches!(b, Block::CodeCell { .. }))
    }

    /// Find a cell by its stable identity.
    pub fn cell(&self, id: &CellId) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| matches!(b, Block::CodeCell { id: cid, .. } if cid == id))
    }

    /// The output region owned by the given cell, if present.
    pub fn output_of(&self, id: &CellId) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| matches!(b, Block::OutputRegion { cell, .. } if cell == id))
    }

    /// Outgoing link targets (titles), in document order, duplicates kept.
    pub fn link_targets(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::LinkRef { target, .. } => Some(target.as_str()),
            _ => None,
        })
    }

    /// Tag names, in document order, duplicates kept.
    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Tag { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Title = first H1 heading text, else the file stem.
fn derive_title(path: &str, blocks: &[Block]) -> String {
    for block in blocks {
        if let Block::Heading { level: 1, text, .. } = block {
            return text.clone();
        }
    }
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Leading `---` frontmatter, parsed best-effort. Malformed YAML is ignored.
fn parse_frontmatter(text: &str) -> Option<serde_yaml::Value> {
    let first_nl = text.find('\n')?;
    if text[..first_nl].trim_end() != "---" {
        return None;
    }
    let rest = &text[first_nl + 1..];
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return serde_yaml::from_str(&rest[..offset]).ok();
        }
        offset += line.len();
    }
    None
}

/// Line table entry; `end` excludes the trailing newline.
#[derive(Debug, Clone, Copy)]
struct Line {
    start: usize,
    end: usize,
}

fn split_lines(text: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            lines.push(Line { start, end: i });
            start = i + 1;
        }
    }
    if start < text.len() {
        lines.push(Line {
            start,
            end: text.len(),
        });
    }
    lines
}

fn line_text<'a>(text: &'a str, line: &Line) -> &'a str {
    &text[line.start..line.end]
}

fn is_blank(text: &str, line: &Line) -> bool {
    line_text(text, line).trim().is_empty()
}

/// A fence closer is a line of three or more backticks and nothing else.
fn is_fence_closer(text: &str, line: &Line) -> bool {
    let t = line_text(text, line).trim();
    t.len() >= 3 && t.bytes().all(|b| b == b'`')
}

/// Language token from a fence info string; `None` means an inert fence.
fn fence_language(info: &str) -> Option<String> {
    let token = info.trim().split_whitespace().next()?;
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+')
    {
        return None;
    }
    Some(token.to_string())
}

/// Parse document text into an ordered block sequence.
///
/// Pure and total. Spans are byte offsets into `text`, non-overlapping and
/// strictly ordered; line-trailing newlines are excluded from spans.
pub fn parse(text: &str) -> Vec<Block> {
    let lines = split_lines(text);
    let mut blocks = Vec::new();
    let mut ordinals: HashMap<String, usize> = HashMap::new();
    // Last emitted code cell and its closing-fence line, for output-marker
    // adjacency. Cleared once consumed or once another fence intervenes.
    let mut last_cell: Option<(CellId, usize)> = None;
    let mut plain_run: Vec<usize> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let raw = line_text(text, &lines[i]).trim_end_matches('\r');
        if let Some(info) = raw.trim_start().strip_prefix("```") {
            let closer = ((i + 1)..lines.len()).find(|j| is_fence_closer(text, &lines[*j]));
            match closer {
                Some(j) => {
                    flush_plain(text, &lines, &mut plain_run, &mut blocks);
                    let span = Span::new(lines[i].start, lines[j].end);
                    let source = if j > i + 1 {
                        text[lines[i + 1].start..lines[j - 1].end].to_string()
                    } else {
                        String::new()
                    };
                    match fence_language(info) {
                        Some(language) => {
                            let ordinal = ordinals.entry(language.clone()).or_insert(0);
                            let id = CellId::new(&language, *ordinal);
                            *ordinal += 1;
                            last_cell = Some((id.clone(), j));
                            blocks.push(Block::CodeCell {
                                language,
                                id,
                                source,
                                span,
                            });
                        }
                        None => {
                            // Inert fence: no cell, and tags/links inside
                            // stay plain text.
                            last_cell = None;
                            blocks.push(Block::Prose {
                                text: text[span.range()].to_string(),
                                span,
                            });
                        }
                    }
                    i = j + 1;
                }
                None => {
                    // Unterminated fence: everything from the opener down is
                    // prose.
                    flush_plain(text, &lines, &mut plain_run, &mut blocks);
                    let slice = &text[lines[i].start..];
                    let trimmed = slice.trim_end();
                    if !trimmed.is_empty() {
                        blocks.push(Block::Prose {
                            text: trimmed.to_string(),
                            span: Span::new(lines[i].start, lines[i].start + trimmed.len()),
                        });
                    }
                    return blocks;
                }
            }
        } else if raw.trim() == OUTPUT_START {
            let closer = ((i + 1)..lines.len())
                .find(|j| line_text(text, &lines[*j]).trim_end_matches('\r').trim() == OUTPUT_END);
            match closer {
                Some(j) => {
                    flush_plain(text, &lines, &mut plain_run, &mut blocks);
                    let span = Span::new(lines[i].start, lines[j].end);
                    let adjacent = last_cell.as_ref().is_some_and(|(_, close)| {
                        ((close + 1)..i).all(|k| is_blank(text, &lines[k]))
                    });
                    if adjacent {
                        let (cell, _) = last_cell.take().expect("adjacency implies a cell");
                        let captured = if j > i + 1 {
                            text[lines[i + 1].start..lines[j - 1].end].to_string()
                        } else {
                            String::new()
                        };
                        blocks.push(Block::OutputRegion {
                            cell,
                            text: captured,
                            span,
                        });
                    } else {
                        // Orphaned marker pair: opaque prose.
                        blocks.push(Block::Prose {
                            text: text[span.range()].to_string(),
                            span,
                        });
                    }
                    i = j + 1;
                }
                None => {
                    // Start marker with no end marker: plain line.
                    plain_run.push(i);
                    i += 1;
                }
            }
        } else {
            plain_run.push(i);
            i += 1;
        }
    }
    flush_plain(text, &lines, &mut plain_run, &mut blocks);
    blocks
}

/// Emit blocks for a run of plain lines: headings via the markdown parser,
/// wikilinks/tags/prose from the text between them.
fn flush_plain(text: &str, lines: &[Line], run: &mut Vec<usize>, blocks: &mut Vec<Block>) {
    if run.is_empty() {
        return;
    }
    let first = run[0];
    let last = *run.last().expect("run is non-empty");
    run.clear();

    let base = lines[first].start;
    let chunk = &text[base..lines[last].end];
    if chunk.trim().is_empty() {
        return;
    }

    let mut headings: Vec<(Span, u8, String)> = Vec::new();
    let mut in_heading = false;
    let mut level = 0u8;
    let mut heading_span = Span::new(0, 0);
    let mut heading_text = String::new();
    for (event, range) in Parser::new_ext(chunk, Options::all()).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level: l, .. }) => {
                in_heading = true;
                level = l as u8;
                heading_text.clear();
                let mut end = range.end;
                while end > range.start && matches!(chunk.as_bytes()[end - 1], b'\n' | b'\r') {
                    end -= 1;
                }
                heading_span = Span::new(base + range.start, base + end);
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                headings.push((heading_span, level, heading_text.trim().to_string()));
            }
            Event::Text(t) if in_heading => heading_text.push_str(&t),
            Event::Code(c) if in_heading => heading_text.push_str(&c),
            _ => {}
        }
    }

    let mut cursor = base;
    for (span, level, text_content) in headings {
        if span.start > cursor {
            scan_inline(&text[cursor..span.start], cursor, blocks);
        }
        blocks.push(Block::Heading {
            level,
            text: text_content,
            span,
        });
        cursor = span.end;
    }
    let chunk_end = lines[last].end;
    if cursor < chunk_end {
        scan_inline(&text[cursor..chunk_end], cursor, blocks);
    }
}

/// Scan a prose chunk for wikilinks, local markdown links, and tags. Text
/// between matches becomes `Prose` blocks; whitespace-only gaps are dropped.
fn scan_inline(chunk: &str, base: usize, blocks: &mut Vec<Block>) {
    let bytes = chunk.as_bytes();
    let mut i = 0;
    let mut gap_start = 0;
    while i < bytes.len() {
        if chunk[i..].starts_with("[[") {
            if let Some((target, display, len)) = parse_wikilink(&chunk[i..]) {
                flush_gap(chunk, base, gap_start, i, blocks);
                blocks.push(Block::LinkRef {
                    target,
                    display,
                    span: Span::new(base + i, base + i + len),
                });
                i += len;
                gap_start = i;
                continue;
            }
            i += 1;
        } else if bytes[i] == b'[' {
            match parse_md_link(&chunk[i..]) {
                Some((target, display, len)) => {
                    flush_gap(chunk, base, gap_start, i, blocks);
                    blocks.push(Block::LinkRef {
                        target,
                        display,
                        span: Span::new(base + i, base + i + len),
                    });
                    i += len;
                    gap_start = i;
                    continue;
                }
                None => i += 1,
            }
        } else if bytes[i] == b'#' {
            let at_boundary =
                i == 0 || bytes[i - 1].is_ascii_whitespace() || !bytes[i - 1].is_ascii();
            let name_len = chunk[i + 1..]
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
                .count();
            if at_boundary && name_len > 0 {
                flush_gap(chunk, base, gap_start, i, blocks);
                blocks.push(Block::Tag {
                    name: chunk[i + 1..i + 1 + name_len].to_string(),
                    span: Span::new(base + i, base + i + 1 + name_len),
                });
                i += 1 + name_len;
                gap_start = i;
                continue;
            }
            i += 1;
        } else {
            i += chunk[i..].chars().next().map_or(1, char::len_utf8);
        }
    }
    flush_gap(chunk, base, gap_start, chunk.len(), blocks);
}

/// `[[Target]]` or `[[Target|Display]]`, single line, non-empty target.
fn parse_wikilink(s: &str) -> Option<(String, String, usize)> {
    let close = s[2..].find("]]")?;
    let inner = &s[2..2 + close];
    if inner.contains('\n') || inner.contains('[') {
        return None;
    }
    let (target, display) = match inner.find('|') {
        Some(p) => (inner[..p].trim(), inner[p + 1..].trim()),
        None => (inner.trim(), inner.trim()),
    };
    if target.is_empty() {
        return None;
    }
    let display = if display.is_empty() { target } else { display };
    Some((target.to_string(), display.to_string(), close + 4))
}

/// `[text](local.md)` → link to the target file's stem. Remote URLs and
/// non-markdown targets are left to the prose gap.
fn parse_md_link(s: &str) -> Option<(String, String, usize)> {
    let close_bracket = s[1..].find(']')? + 1;
    let label = &s[1..close_bracket];
    if label.contains('\n') || label.contains('[') {
        return None;
    }
    if s.as_bytes().get(close_bracket + 1) != Some(&b'(') {
        return None;
    }
    let close_paren = s[close_bracket + 2..].find(')')? + close_bracket + 2;
    let url = &s[close_bracket + 2..close_paren];
    if url.contains('\n') || !url.ends_with(".md") || url.starts_with("http") {
        return None;
    }
    let stem = Path::new(url)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())?;
    if stem.is_empty() {
        return None;
    }
    let display = if label.trim().is_empty() {
        stem.clone()
    } else {
        label.trim().to_string()
    };
    Some((stem, display, close_paren + 1))
}

fn flush_gap(chunk: &str, base: usize, from: usize, to: usize, blocks: &mut Vec<Block>) {
    let gap = &chunk[from..to];
    let trimmed = gap.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = gap.len() - gap.trim_start().len();
    blocks.push(Block::Prose {
        text: trimmed.to_string(),
        span: Span::new(base + from + lead, base + from + lead + trimmed.len()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(blocks: &[Block]) -> Vec<&'static str> {
        blocks
            .iter()
            .map(|b| match b {
                Block::Prose { .. } => "prose",
                Block::Heading { .. } => "heading",
                Block::Tag { .. } => "tag",
                Block::LinkRef { .. } => "link",
                Block::CodeCell { .. } => "cell",
                Block::OutputRegion { .. } => "output",
            })
            .collect()
    }

    #[test]
    fn empty_input_parses_to_empty_sequence() {
        assert!(parse("").is_empty());
        assert!(parse("\n\n\n").is_empty());
    }

    #[test]
    fn heading_link_and_tag() {
        let blocks = parse("# A\n\n[[B]] #todo\n");
        assert_eq!(kinds(&blocks), vec!["heading", "link", "tag"]);
        assert!(matches!(
            &blocks[0],
            Block::Heading { level: 1, text, .. } if text == "A"
        ));
        assert!(matches!(
            &blocks[1],
            Block::LinkRef { target, display, .. } if target == "B" && display == "B"
        ));
        assert!(matches!(&blocks[2], Block::Tag { name, .. } if name == "todo"));
    }

    #[test]
    fn wikilink_with_display_text() {
        let blocks = parse("see [[Folder Note|the note]]\n");
        let link = blocks
            .iter()
            .find_map(|b| match b {
                Block::LinkRef {
                    target, display, ..
                } => Some((target.clone(), display.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(link, ("Folder Note".to_string(), "the note".to_string()));
    }

    #[test]
    fn local_markdown_link_becomes_link_ref() {
        let blocks = parse("see [notes](dir/other.md) and [web](https://x.io)\n");
        let links: Vec<_> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::LinkRef { target, .. } => Some(target.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(links, vec!["other"]);
    }

    #[test]
    fn spans_cover_the_brackets() {
        let text = "x [[B|b]] y\n";
        let blocks = parse(text);
        let span = blocks
            .iter()
            .find_map(|b| match b {
                Block::LinkRef { span, .. } => Some(*span),
                _ => None,
            })
            .unwrap();
        assert_eq!(&text[span.range()], "[[B|b]]");
    }

    #[test]
    fn tags_inside_fences_are_inert() {
        let text = "#real\n```\n#fake [[NotALink]]\n```\n";
        let blocks = parse(text);
        let tags: Vec<_> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::Tag { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tags, vec!["real"]);
        assert!(!blocks.iter().any(|b| matches!(b, Block::LinkRef { .. })));
    }

    #[test]
    fn heading_line_is_not_a_tag() {
        let blocks = parse("## Section\n");
        assert_eq!(kinds(&blocks), vec!["heading"]);
    }

    #[test]
    fn code_cell_identity_counts_per_language() {
        let text = "```python\na = 1\n```\n\n```bash\nls\n```\n\n```python\nprint(a)\n```\n";
        let blocks = parse(text);
        let ids: Vec<_> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::CodeCell { id, .. } => Some(id.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["python_0", "bash_0", "python_1"]);
    }

    #[test]
    fn cell_source_and_span() {
        let text = "before\n```python\na = 1\nprint(a)\n```\nafter\n";
        let blocks = parse(text);
        let (source, span) = blocks
            .iter()
            .find_map(|b| match b {
                Block::CodeCell { source, span, .. } => Some((source.clone(), *span)),
                _ => None,
            })
            .unwrap();
        assert_eq!(source, "a = 1\nprint(a)");
        assert_eq!(&text[span.range()], "```python\na = 1\nprint(a)\n```");
    }

    #[test]
    fn fence_without_language_is_not_a_cell() {
        let blocks = parse("```\nplain\n```\n");
        assert!(!blocks.iter().any(|b| matches!(b, Block::CodeCell { .. })));
    }

    #[test]
    fn unterminated_fence_degrades_to_prose() {
        let text = "intro\n```python\na = 1\n#nottag\n";
        let blocks = parse(text);
        assert!(!blocks.iter().any(|b| matches!(b, Block::CodeCell { .. })));
        assert!(!blocks.iter().any(|b| matches!(b, Block::Tag { .. })));
        let prose: Vec<_> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::Prose { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert!(prose.iter().any(|p| p.contains("a = 1")));
    }

    #[test]
    fn output_region_attaches_to_preceding_cell() {
        let text = format!(
            "```python\nprint(4)\n```\n\n{}\n4\n{}\n",
            OUTPUT_START, OUTPUT_END
        );
        let blocks = parse(&text);
        let region = blocks
            .iter()
            .find_map(|b| match b {
                Block::OutputRegion { cell, text, .. } => Some((cell.clone(), text.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(region.0.as_str(), "python_0");
        assert_eq!(region.1, "4");
    }

    #[test]
    fn orphaned_markers_are_prose() {
        let text = format!("no cell here\n\n{}\nstale\n{}\n", OUTPUT_START, OUTPUT_END);
        let blocks = parse(&text);
        assert!(!blocks
            .iter()
            .any(|b| matches!(b, Block::OutputRegion { .. })));
    }

    #[test]
    fn start_marker_without_end_is_prose() {
        let text = format!("```sh\nls\n```\n\n{}\ndangling\n", OUTPUT_START);
        let blocks = parse(&text);
        assert!(!blocks
            .iter()
            .any(|b| matches!(b, Block::OutputRegion { .. })));
    }

    #[test]
    fn markers_separated_by_content_are_prose() {
        let text = format!(
            "```sh\nls\n```\nnot blank\n{}\nold\n{}\n",
            OUTPUT_START, OUTPUT_END
        );
        let blocks = parse(&text);
        assert!(!blocks
            .iter()
            .any(|b| matches!(b, Block::OutputRegion { .. })));
    }

    #[test]
    fn spans_are_ordered_and_disjoint() {
        let text = format!(
            "# T\n\nsome [[A]] prose #x\n\n```py\n1\n```\n\n{}\nout\n{}\ntail\n",
            OUTPUT_START, OUTPUT_END
        );
        let blocks = parse(&text);
        for pair in blocks.windows(2) {
            assert!(pair[0].span().end <= pair[1].span().start);
        }
    }

    #[test]
    fn document_title_prefers_h1() {
        let doc = Document::new("notes/other.md", "# Real Title\n\nbody\n");
        assert_eq!(doc.title, "Real Title");
        let doc = Document::new("notes/other.md", "no heading\n");
        assert_eq!(doc.title, "other");
    }

    #[test]
    fn frontmatter_is_parsed_when_well_formed() {
        let doc = Document::new("a.md", "---\nkind: daily\n---\n# A\n");
        let meta = doc.metadata.unwrap();
        assert_eq!(meta["kind"].as_str(), Some("daily"));
        assert_eq!(doc.title, "A");
    }

    #[test]
    fn malformed_frontmatter_is_ignored() {
        let doc = Document::new("a.md", "---\n: : :\n---\n");
        assert!(doc.metadata.is_none());
    }
}
