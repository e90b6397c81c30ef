//! Content-aware text chunker.
//!
//! Splits a document into overlapping, size-bounded [`Chunk`]s. How the text
//! is cut depends on its [`ChunkMode`]:
//!
//! - **Prose**: sentences are packed greedily; when a chunk closes, the next
//!   one is seeded with trailing sentences that fit in the overlap budget.
//! - **Sectioned**: the text is cut at heading lines first; adjacent small
//!   sections are merged, oversized ones are packed word by word with the
//!   same overlap rule. Each chunk keeps its owning heading; a merged chunk
//!   keeps all of them, joined with `" / "`.
//! - **Code**: the text is cut at top-level definitions; adjacent small
//!   blocks are merged, oversized blocks fall back to the prose algorithm.
//!
//! All cutting works on byte spans of the original text, so chunk offsets
//! always point into the un-chunked input and chunk content is an exact
//! slice of it. Lengths are measured in characters and converted from tokens
//! with a fixed 4 chars/token estimate.
//!
//! # Example
//!
//! ```rust
//! use context_rag::chunk::{chunk_text, ChunkMode};
//!
//! let chunks = chunk_text("Hello world. Second sentence.", 512, 76, ChunkMode::Prose);
//! assert_eq!(chunks.len(), 1);
//! assert!(chunks[0].metadata.is_single);
//! ```

use serde::Serialize;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// How a document is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMode {
    Prose,
    Sectioned,
    Code,
}

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cc", "cpp", "hpp", "cs",
    "rb", "php", "swift", "scala", "lua", "sh", "bash", "zsh",
];

const SECTIONED_EXTENSIONS: &[&str] = &["md", "markdown", "mdx", "rst", "adoc"];

impl ChunkMode {
    /// Pick a mode from the file extension, falling back to content sniffing.
    ///
    /// Markdown-like files are sectioned only if they actually contain a
    /// heading; plain text with several headings is sectioned too.
    pub fn classify(path: &str, content: &str) -> Self {
        let ext = std::path::Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if CODE_EXTENSIONS.contains(&ext.as_str()) {
            return ChunkMode::Code;
        }

        let headings = content.lines().filter(|l| is_heading(l)).count();
        if SECTIONED_EXTENSIONS.contains(&ext.as_str()) {
            if headings > 0 {
                ChunkMode::Sectioned
            } else {
                ChunkMode::Prose
            }
        } else if headings >= 2 {
            ChunkMode::Sectioned
        } else {
            ChunkMode::Prose
        }
    }
}

/// Chunker bound to a size and overlap, usually taken from config.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    pub chunk_size_tokens: usize,
    pub overlap_tokens: usize,
}

impl Chunker {
    pub fn new(chunk_size_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            chunk_size_tokens,
            overlap_tokens,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size_tokens, config.overlap_tokens())
    }

    pub fn chunk(&self, text: &str, mode: ChunkMode) -> Vec<Chunk> {
        chunk_text(text, self.chunk_size_tokens, self.overlap_tokens, mode)
    }
}

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split `text` into ordered chunks.
///
/// # Guarantees
///
/// - Input within the size budget yields exactly one chunk with
///   `is_single = true`.
/// - Indices are contiguous from 0 and `metadata.total_chunks` equals the
///   number of chunks returned.
/// - No chunk exceeds `chunk_size_tokens × 4` characters unless it consists
///   of a single sentence or word that is itself larger.
/// - `content == text[start_offset..end_offset]`.
pub fn chunk_text(
    text: &str,
    chunk_size_tokens: usize,
    overlap_tokens: usize,
    mode: ChunkMode,
) -> Vec<Chunk> {
    let chunk_size_tokens = chunk_size_tokens.max(1);
    let max_chars = chunk_size_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    if estimate_tokens(text) <= chunk_size_tokens {
        let mut chunk = make_chunk(text, Span::new(0, text.len()), 0, None);
        chunk.metadata.total_chunks = 1;
        chunk.metadata.is_single = true;
        return vec![chunk];
    }

    let whole = Span::new(0, text.len());
    let pieces: Vec<(Span, Option<String>)> = match mode {
        ChunkMode::Prose => pack(text, &sentence_spans(text, whole), max_chars, overlap_chars)
            .into_iter()
            .map(|s| (s, None))
            .collect(),
        ChunkMode::Sectioned => split_sectioned(text, max_chars, overlap_chars),
        ChunkMode::Code => split_code(text, max_chars, overlap_chars),
    };

    let mut chunks: Vec<Chunk> = pieces
        .into_iter()
        .filter(|(span, _)| !span.is_empty())
        .enumerate()
        .map(|(i, (span, section))| make_chunk(text, span, i, section))
        .collect();

    if chunks.is_empty() {
        chunks.push(make_chunk(text, whole, 0, None));
    }

    // Second pass: the total is only known once the split is complete.
    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.metadata.total_chunks = total;
    }
    chunks
}

fn make_chunk(text: &str, span: Span, index: usize, section: Option<String>) -> Chunk {
    Chunk {
        content: text[span.start..span.end].to_string(),
        index,
        start_offset: span.start,
        end_offset: span.end,
        metadata: ChunkMetadata {
            section,
            ..Default::default()
        },
    }
}

// ============ Spans ============

/// Byte range into the original text. Always on char boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

fn char_len(text: &str, start: usize, end: usize) -> usize {
    text[start..end].chars().count()
}

/// Shrink a span so it starts and ends on non-whitespace.
fn trim_span(text: &str, span: Span) -> Span {
    let slice = &text[span.start..span.end];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    Span::new(span.start + lead, span.start + lead + trimmed.len())
}

// ============ Packing ============

/// Greedily pack units into spans of at most `max_chars`.
///
/// When a span closes, the next one starts with the trailing units that fit
/// in `overlap_chars`. The first unit of a closed span is never replayed, so
/// every new span contains at least one unit not seen before.
fn pack(text: &str, units: &[Span], max_chars: usize, overlap_chars: usize) -> Vec<Span> {
    let mut out = Vec::new();
    let mut current: Vec<Span> = Vec::new();

    for unit in units {
        if let Some(&first) = current.first() {
            if char_len(text, first.start, unit.end) > max_chars {
                let last = current[current.len() - 1];
                out.push(Span::new(first.start, last.end));
                current = trailing_overlap(text, &current, overlap_chars);
                if let Some(&seed) = current.first() {
                    if char_len(text, seed.start, unit.end) > max_chars {
                        current.clear();
                    }
                }
            }
        }
        current.push(*unit);
    }

    if let (Some(first), Some(last)) = (current.first(), current.last()) {
        out.push(Span::new(first.start, last.end));
    }
    out
}

fn trailing_overlap(text: &str, current: &[Span], overlap_chars: usize) -> Vec<Span> {
    if overlap_chars == 0 || current.len() < 2 {
        return Vec::new();
    }
    let last_end = current[current.len() - 1].end;
    let mut keep_from = None;
    for i in (1..current.len()).rev() {
        if char_len(text, current[i].start, last_end) <= overlap_chars {
            keep_from = Some(i);
        } else {
            break;
        }
    }
    keep_from
        .map(|i| current[i..].to_vec())
        .unwrap_or_default()
}

// ============ Unit splitting ============

/// Sentence spans within `range`. A sentence ends at `.`, `!`, `?` or `…`
/// followed by whitespace, or at a blank line.
fn sentence_spans(text: &str, range: Span) -> Vec<Span> {
    let slice = &text[range.start..range.end];
    let chars: Vec<(usize, char)> = slice.char_indices().collect();
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (k, &(i, c)) in chars.iter().enumerate() {
        let Some(s) = start else {
            if !c.is_whitespace() {
                start = Some(i);
            }
            continue;
        };
        let next = chars.get(k + 1).map(|&(_, n)| n);
        let terminal = matches!(c, '.' | '!' | '?' | '…') && next.map_or(true, char::is_whitespace);
        let blank_line = c == '\n' && next == Some('\n');

        if terminal {
            spans.push(Span::new(range.start + s, range.start + i + c.len_utf8()));
            start = None;
        } else if blank_line {
            let span = trim_span(text, Span::new(range.start + s, range.start + i));
            if !span.is_empty() {
                spans.push(span);
            }
            start = None;
        }
    }

    if let Some(s) = start {
        let span = trim_span(text, Span::new(range.start + s, range.end));
        if !span.is_empty() {
            spans.push(span);
        }
    }
    spans
}

/// Whitespace-delimited word spans within `range`.
fn word_spans(text: &str, range: Span) -> Vec<Span> {
    let slice = &text[range.start..range.end];
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in slice.char_indices() {
        match (start, c.is_whitespace()) {
            (None, false) => start = Some(i),
            (Some(s), true) => {
                spans.push(Span::new(range.start + s, range.start + i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(Span::new(range.start + s, range.end));
    }
    spans
}

/// Byte offsets of every line start paired with the line (newline included).
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_inclusive('\n').scan(0usize, |offset, line| {
        let start = *offset;
        *offset += line.len();
        Some((start, line))
    })
}

// ============ Sectioned ============

fn is_heading(line: &str) -> bool {
    let t = line.trim_start();
    let hashes = t.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes) && t[hashes..].starts_with(' ')
}

fn heading_text(line: &str) -> String {
    line.trim().trim_start_matches('#').trim().to_string()
}

fn split_sectioned(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<(Span, Option<String>)> {
    // (span, heading) per section; text before the first heading has none.
    let mut sections: Vec<(Span, Option<String>)> = Vec::new();
    let mut current_start = 0usize;
    let mut current_heading: Option<String> = None;

    for (offset, line) in lines_with_offsets(text) {
        if is_heading(line) {
            if offset > current_start {
                sections.push((Span::new(current_start, offset), current_heading.take()));
            }
            current_start = offset;
            current_heading = Some(heading_text(line));
        }
    }
    sections.push((Span::new(current_start, text.len()), current_heading));

    let sections: Vec<(Span, Option<String>)> = sections
        .into_iter()
        .map(|(span, heading)| (trim_span(text, span), heading))
        .filter(|(span, _)| !span.is_empty())
        .collect();

    let mut out = Vec::new();
    let mut group: Option<(Span, Option<String>)> = None;

    for (span, heading) in sections {
        if char_len(text, span.start, span.end) > max_chars {
            if let Some(g) = group.take() {
                out.push(g);
            }
            for piece in pack(text, &word_spans(text, span), max_chars, overlap_chars) {
                out.push((piece, heading.clone()));
            }
            continue;
        }
        group = match group.take() {
            Some((g, g_heading)) if char_len(text, g.start, span.end) <= max_chars => {
                Some((Span::new(g.start, span.end), merge_headings(g_heading, heading)))
            }
            Some(g) => {
                out.push(g);
                Some((span, heading))
            }
            None => Some((span, heading)),
        };
    }
    if let Some(g) = group {
        out.push(g);
    }
    out
}

/// A chunk built from several sections lists every heading it owns.
fn merge_headings(first: Option<String>, next: Option<String>) -> Option<String> {
    match (first, next) {
        (Some(a), Some(b)) if a != b => Some(format!("{} / {}", a, b)),
        (Some(a), _) => Some(a),
        (None, b) => b,
    }
}

// ============ Code ============

const DEFINITION_PREFIXES: &[&str] = &[
    "fn ", "pub fn ", "pub(crate) fn ", "async fn ", "pub async fn ", "const fn ", "impl ",
    "impl<", "struct ", "pub struct ", "enum ", "pub enum ", "trait ", "pub trait ", "mod ",
    "pub mod ", "def ", "async def ", "class ", "function ", "async function ", "export ",
    "func ", "interface ", "public ", "private ", "protected ", "module ", "package ",
];

fn is_attribute(line: &str) -> bool {
    line.starts_with('@') || line.starts_with("#[")
}

fn is_top_level_definition(line: &str) -> bool {
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    is_attribute(line) || DEFINITION_PREFIXES.iter().any(|p| line.starts_with(p))
}

fn split_code(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<(Span, Option<String>)> {
    let mut boundaries = vec![0usize];
    let mut prev_was_attribute = false;
    for (offset, line) in lines_with_offsets(text) {
        let definition = is_top_level_definition(line);
        // An attribute or decorator stays glued to the definition below it.
        if definition && !prev_was_attribute && offset > 0 {
            boundaries.push(offset);
        }
        if !line.trim().is_empty() {
            prev_was_attribute = is_attribute(line);
        }
    }
    boundaries.push(text.len());

    let blocks: Vec<Span> = boundaries
        .windows(2)
        .map(|w| trim_span(text, Span::new(w[0], w[1])))
        .filter(|s| !s.is_empty())
        .collect();

    let mut out = Vec::new();
    let mut group: Option<Span> = None;
    for block in blocks {
        if char_len(text, block.start, block.end) > max_chars {
            if let Some(g) = group.take() {
                out.push((g, None));
            }
            for piece in pack(text, &sentence_spans(text, block), max_chars, overlap_chars) {
                out.push((piece, None));
            }
            continue;
        }
        group = match group.take() {
            Some(g) if char_len(text, g.start, block.end) <= max_chars => {
                Some(Span::new(g.start, block.end))
            }
            Some(g) => {
                out.push((g, None));
                Some(block)
            }
            None => Some(block),
        };
    }
    if let Some(g) = group {
        out.push((g, None));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 60 sentences of exactly 39 chars, joined by single spaces: 2399 chars.
    fn forty_char_doc() -> String {
        (0..60)
            .map(|i| format!("Sentence {:02} explains the docker deploy.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn normalize(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Rebuild the text from chunk spans, dropping overlapped bytes.
    fn reconstruct(text: &str, chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for c in chunks {
            assert!(c.start_offset >= covered || c.end_offset > covered);
            let from = c.start_offset.max(covered);
            if from > covered {
                assert!(text[covered..from].trim().is_empty(), "gap lost content");
                out.push(' ');
            }
            if c.end_offset > from {
                out.push_str(&text[from..c.end_offset]);
                covered = c.end_offset;
            }
        }
        out
    }

    fn assert_indices(chunks: &[Chunk]) {
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.metadata.total_chunks, chunks.len());
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 100, 15, ChunkMode::Prose);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].metadata.is_single);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 13);
    }

    #[test]
    fn test_prose_chunk_count_and_overlap() {
        let text = forty_char_doc();
        let chunks = chunk_text(&text, 100, 15, ChunkMode::Prose);
        assert!((6..=7).contains(&chunks.len()), "got {} chunks", chunks.len());
        assert_indices(&chunks);
        for c in &chunks {
            assert!(c.content.chars().count() <= 400);
            assert!(!c.metadata.is_single);
            assert_eq!(&text[c.start_offset..c.end_offset], c.content);
        }
        // Each later chunk replays the last sentence of its predecessor.
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset);
            let overlap = &text[pair[1].start_offset..pair[0].end_offset];
            assert!(overlap.chars().count() <= 60);
        }
    }

    #[test]
    fn test_prose_reconstructs_source() {
        let text = forty_char_doc();
        let chunks = chunk_text(&text, 100, 15, ChunkMode::Prose);
        assert_eq!(normalize(&reconstruct(&text, &chunks)), normalize(&text));
    }

    #[test]
    fn test_oversized_sentence_emitted_whole() {
        let long = "word ".repeat(200);
        let text = format!("Short one. {}end. Another short one.", long);
        let chunks = chunk_text(&text, 50, 5, ChunkMode::Prose);
        assert!(chunks.iter().any(|c| c.content.chars().count() > 200));
        for c in &chunks {
            assert!(!c.content.starts_with("ord"));
            assert_eq!(&text[c.start_offset..c.end_offset], c.content);
        }
        assert_eq!(normalize(&reconstruct(&text, &chunks)), normalize(&text));
    }

    #[test]
    fn test_sectioned_keeps_headings() {
        let body = "Traefik routes requests to containers. ".repeat(5);
        let text = format!(
            "# Install\n\n{body}\n\n# Configure\n\n{body}\n\n# Troubleshoot\n\n{body}"
        );
        let chunks = chunk_text(&text, 60, 9, ChunkMode::Sectioned);
        assert_indices(&chunks);
        let headings: Vec<_> = chunks
            .iter()
            .map(|c| c.metadata.section.clone().unwrap_or_default())
            .collect();
        assert_eq!(headings, vec!["Install", "Configure", "Troubleshoot"]);
        assert!(chunks[1].content.starts_with("# Configure"));
    }

    #[test]
    fn test_merged_sections_keep_every_heading() {
        let body = "lorem ipsum dolor sit amet ".repeat(20);
        let text = format!("# Alpha\n\nOne line.\n\n# Beta\n\nTwo line.\n\n# Gamma\n\n{body}");
        let chunks = chunk_text(&text, 50, 10, ChunkMode::Sectioned);
        assert_indices(&chunks);
        assert_eq!(chunks[0].metadata.section.as_deref(), Some("Alpha / Beta"));
        assert!(chunks[0].content.contains("# Beta"));
        assert!(!chunks[0].content.contains("# Gamma"));
        assert!(chunks[1..]
            .iter()
            .all(|c| c.metadata.section.as_deref() == Some("Gamma")));
    }

    #[test]
    fn test_sectioned_oversized_section_packs_words() {
        let body = "lorem ipsum dolor sit amet ".repeat(60);
        let text = format!("# Big\n\n{body}\n\n## Small\n\nTail text here.");
        let chunks = chunk_text(&text, 50, 10, ChunkMode::Sectioned);
        assert!(chunks.len() > 3);
        for c in &chunks {
            assert!(c.content.chars().count() <= 200);
        }
        assert_eq!(chunks.last().unwrap().metadata.section.as_deref(), Some("Small"));
        assert!(chunks[..chunks.len() - 1]
            .iter()
            .all(|c| c.metadata.section.as_deref() == Some("Big")));
        assert_eq!(normalize(&reconstruct(&text, &chunks)), normalize(&text));
    }

    #[test]
    fn test_code_splits_on_definitions() {
        let func = |name: &str| {
            format!(
                "fn {name}() {{\n    let value = compute_something_long();\n    println!(\"{{}}\", value);\n}}\n\n"
            )
        };
        let text: String = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"]
            .iter()
            .map(|n| func(n))
            .collect();
        let chunks = chunk_text(&text, 40, 6, ChunkMode::Code);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.starts_with("fn "), "chunk cut mid-function: {:?}", c.content);
            assert!(c.content.chars().count() <= 160);
        }
        assert_eq!(normalize(&reconstruct(&text, &chunks)), normalize(&text));
    }

    #[test]
    fn test_code_attribute_stays_with_definition() {
        let text = format!(
            "use std::io;\n\n#[derive(Debug)]\nstruct Item {{\n    id: u32,\n}}\n\n{}",
            "fn filler() {\n    let x = 1;\n}\n\n".repeat(12)
        );
        let chunks = chunk_text(&text, 20, 0, ChunkMode::Code);
        assert!(!chunks.iter().any(|c| c.content.ends_with("#[derive(Debug)]")));
    }

    #[test]
    fn test_classify() {
        assert_eq!(ChunkMode::classify("src/main.rs", ""), ChunkMode::Code);
        assert_eq!(ChunkMode::classify("guide.md", "# Title\n\nbody"), ChunkMode::Sectioned);
        assert_eq!(ChunkMode::classify("notes.md", "just text"), ChunkMode::Prose);
        assert_eq!(ChunkMode::classify("notes.txt", "plain prose."), ChunkMode::Prose);
        assert_eq!(
            ChunkMode::classify("notes.txt", "# A\ntext\n## B\ntext"),
            ChunkMode::Sectioned
        );
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Élément évalué à côté du château. ".repeat(40);
        let chunks = chunk_text(&text, 30, 5, ChunkMode::Prose);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert_eq!(&text[c.start_offset..c.end_offset], c.content);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = forty_char_doc();
        let a = chunk_text(&text, 100, 15, ChunkMode::Prose);
        let b = chunk_text(&text, 100, 15, ChunkMode::Prose);
        assert_eq!(a, b);
    }
}
