/// Heading-aware, overlap-preserving chunker.
///
/// Chunks are exact slices of the sanitised text. `char_start..char_end` are
/// byte offsets into that text (always on char boundaries), so every chunk's
/// content can be recovered with `&text[chunk.char_start..chunk.char_end]`.
/// Consecutive chunks overlap: chunk `n + 1` starts up to `overlap_tokens * 4`
/// characters before chunk `n` ends. Outside the overlap, every byte of the
/// text belongs to exactly one chunk.
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOKENS_PER_CHUNK: usize = 4000;
pub const DEFAULT_OVERLAP_TOKENS: usize = 200;

/// Estimated characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Blank line: newline, optional horizontal whitespace, newline.
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t\r]*\n").expect("valid paragraph regex"));

static NUMBERED_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)*\.?\s+[A-Z]").expect("valid section regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub char_start: usize,
    pub char_end: usize,
    pub section_heading: Option<String>,
    pub token_estimate: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_tokens_per_chunk: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: DEFAULT_MAX_TOKENS_PER_CHUNK,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

/// `ceil(chars / 4)`.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Detect a section heading on the first non-empty line of a paragraph.
///
/// Recognises markdown `#` headings, short ALL-CAPS lines, and numbered
/// sections such as `4.2 Access Reviews`.
#[must_use]
pub fn detect_heading(paragraph: &str) -> Option<String> {
    let line = paragraph.lines().map(str::trim).find(|l| !l.is_empty())?;

    if line.starts_with('#') {
        let title = line.trim_start_matches('#').trim();
        return (!title.is_empty()).then(|| title.to_string());
    }

    let len = line.chars().count();
    if (3..=100).contains(&len)
        && line.chars().any(char::is_alphabetic)
        && !line.chars().any(char::is_lowercase)
    {
        return Some(line.to_string());
    }

    if len < 120 && NUMBERED_SECTION.is_match(line) {
        return Some(line.to_string());
    }

    None
}

/// Split `text` into chunks of at most `max_tokens_per_chunk` estimated tokens.
///
/// Returns no chunks for text that is empty after trimming.
#[must_use]
pub fn chunk_text(text: &str, options: ChunkOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let max_chars = options.max_tokens_per_chunk.max(1) * CHARS_PER_TOKEN;
    // Overlap must leave room for new content in every chunk.
    let overlap_chars = (options.overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    if estimate_tokens(text) <= options.max_tokens_per_chunk {
        return vec![Chunk {
            index: 0,
            content: text.to_string(),
            char_start: 0,
            char_end: text.len(),
            section_heading: paragraph_spans(text)
                .into_iter()
                .find_map(|(s, e)| detect_heading(&text[s..e])),
            token_estimate: estimate_tokens(text),
        }];
    }

    let mut builder = ChunkBuilder {
        text,
        max_chars,
        overlap_chars,
        chunks: Vec::new(),
        start: 0,
        core_start: 0,
        end: 0,
        heading: None,
    };
    let mut current_heading: Option<String> = None;

    for (para_start, para_end) in paragraph_spans(text) {
        if let Some(heading) = detect_heading(&text[para_start..para_end]) {
            current_heading = Some(heading);
        }
        builder.push_paragraph(para_end, &current_heading);
    }

    builder.finish()
}

/// Spans of paragraphs including their trailing blank-line separator, so the
/// spans tile the whole text.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for sep in PARAGRAPH_BREAK.find_iter(text) {
        spans.push((start, sep.end()));
        start = sep.end();
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

struct ChunkBuilder<'a> {
    text: &'a str,
    max_chars: usize,
    overlap_chars: usize,
    chunks: Vec<Chunk>,
    /// Start of the current buffer, including any carried overlap.
    start: usize,
    /// Start of content that no earlier chunk covers.
    core_start: usize,
    /// End of the current buffer.
    end: usize,
    heading: Option<String>,
}

impl ChunkBuilder<'_> {
    fn has_new_content(&self) -> bool {
        self.end > self.core_start
    }

    fn chars_between(&self, from: usize, to: usize) -> usize {
        self.text[from..to].chars().count()
    }

    /// Extend the buffer up to `para_end`, closing chunks as the budget demands.
    fn push_paragraph(&mut self, para_end: usize, current_heading: &Option<String>) {
        if !self.has_new_content() {
            self.heading.clone_from(current_heading);
        }

        while self.end < para_end {
            if self.chars_between(self.start, para_end) <= self.max_chars {
                self.end = para_end;
                return;
            }

            if self.has_new_content() {
                // The paragraph does not fit; close what we have and retry it.
                self.close();
                self.heading.clone_from(current_heading);
                continue;
            }

            // A single paragraph larger than the budget: cut inside it.
            let limit = advance_chars(self.text, self.start, self.max_chars);
            self.end = self.preferred_cut(limit);
            self.close();
            self.heading.clone_from(current_heading);
        }
    }

    /// Latest whitespace boundary in the second half of `[core_start, limit)`,
    /// or `limit` itself.
    fn preferred_cut(&self, limit: usize) -> usize {
        let mut window_start = self.core_start + (limit - self.core_start) / 2;
        while !self.text.is_char_boundary(window_start) {
            window_start += 1;
        }
        self.text[window_start..limit]
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| window_start + i + c.len_utf8())
            .filter(|&cut| cut > self.core_start)
            .unwrap_or(limit)
    }

    fn close(&mut self) {
        let content = &self.text[self.start..self.end];
        self.chunks.push(Chunk {
            index: self.chunks.len(),
            content: content.to_string(),
            char_start: self.start,
            char_end: self.end,
            section_heading: self.heading.clone(),
            token_estimate: estimate_tokens(content),
        });

        // The overlap never reaches back past the chunk just closed.
        self.start = retreat_chars(self.text, self.end, self.overlap_chars).max(self.start);
        self.core_start = self.end;
    }

    fn finish(mut self) -> Vec<Chunk> {
        if self.has_new_content() {
            self.close();
        }
        self.chunks
    }
}

/// Byte offset `n` characters after `from`, clamped to the end of `text`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map_or(text.len(), |(i, _)| from + i)
}

/// Byte offset `n` characters before `from`, clamped to 0.
fn retreat_chars(text: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(0, |(i, _)| i)
}
