//! Splits documents into bounded segments for embedding and storage.
//! Prefers paragraph boundaries; falls back to sentences, then whitespace, then hard cuts.
//!
//! Segments are exact spans of the source: leading overlap is recorded so that
//! trimming it from every segment after the first and concatenating gives the
//! original text back.

use std::ops::Range;

use crate::error::ConfigurationError;
use crate::metadata::Metadata;

/// Default maximum characters per segment. Keeps segments small enough for embedding models.
pub const DEFAULT_MAX_CHARS: usize = 512;
/// Default characters repeated from the previous segment.
pub const DEFAULT_OVERLAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Upper bound on a segment's length in chars, overlap included.
    pub max_length: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_CHARS,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkParams {
    pub fn new(max_length: usize, overlap: usize) -> Result<Self, ConfigurationError> {
        let params = Self { max_length, overlap };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_length == 0 {
            return Err(ConfigurationError::InvalidChunkSize);
        }
        if self.overlap >= self.max_length {
            return Err(ConfigurationError::InvalidOverlap {
                overlap: self.overlap,
                max_length: self.max_length,
            });
        }
        Ok(())
    }
}

/// A span of a source document, ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    /// Caller-side identifier of the source document, when known.
    pub source: Option<String>,
    /// Position of this segment within its document (0, 1, 2, …).
    pub index: usize,
    /// Byte offset of `text` within the source.
    pub offset: usize,
    /// Leading bytes of `text` repeated from the previous segment.
    pub overlap: usize,
    pub tags: Metadata,
}

impl Segment {
    /// The part of the segment not shared with its predecessor.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap..]
    }
}

/// Chunk a text into segments of at most `max_length` chars.
pub fn chunk(text: &str, max_length: usize, overlap: usize) -> Result<Vec<Segment>, ConfigurationError> {
    let params = ChunkParams::new(max_length, overlap)?;
    Ok(split(text, params)
        .into_iter()
        .enumerate()
        .map(|(index, (span, overlap))| Segment {
            text: text[span.clone()].to_string(),
            source: None,
            index,
            offset: span.start,
            overlap,
            tags: Metadata::new(),
        })
        .collect())
}

/// Chunk a document, stamping every segment with its source id and tags.
pub fn chunk_document(
    source: &str,
    text: &str,
    tags: &Metadata,
    params: ChunkParams,
) -> Result<Vec<Segment>, ConfigurationError> {
    let mut segments = chunk(text, params.max_length, params.overlap)?;
    for segment in &mut segments {
        segment.source = Some(source.to_string());
        segment.tags = tags.clone();
    }
    Ok(segments)
}

/// Inverse of chunking: drops each segment's overlap and concatenates.
pub fn reassemble(segments: &[Segment]) -> String {
    segments.iter().map(Segment::fresh_text).collect()
}

/// Returns `(span, overlap_bytes)` per segment.
fn split(text: &str, params: ChunkParams) -> Vec<(Range<usize>, usize)> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let budget = params.max_length - params.overlap;
    let units = units(text, budget);

    let mut segments = Vec::new();
    let mut seg_start = 0;
    let mut fresh_start = 0;
    let mut end = 0;
    let mut len = 0;
    for unit in units {
        let unit_len = char_len(&text[unit.clone()]);
        if end > fresh_start && len + unit_len > params.max_length {
            segments.push((seg_start..end, fresh_start - seg_start));
            seg_start = back_chars(text, end, params.overlap);
            fresh_start = end;
            len = char_len(&text[seg_start..fresh_start]);
        }
        end = unit.end;
        len += unit_len;
    }
    segments.push((seg_start..end, fresh_start - seg_start));
    segments
}

/// Cuts the whole text into pieces of at most `budget` chars, trying
/// paragraphs first, then sentences, then whitespace-bounded windows. A
/// whitespace run longer than `budget` stays attached to its neighbour, so
/// only such pieces can exceed it.
fn units(text: &str, budget: usize) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    for para in split_runs(text, 0..text.len(), |_, run| run.matches('\n').count() >= 2) {
        if char_len(&text[para.clone()]) <= budget {
            units.push(para);
            continue;
        }
        for sentence in split_runs(text, para, |prev, run| {
            matches!(prev, '.' | '!' | '?') || run.contains('\n')
        }) {
            if char_len(&text[sentence.clone()]) <= budget {
                units.push(sentence);
            } else {
                units.extend(hard_split(text, sentence, budget));
            }
        }
    }
    absorb_blank(text, units)
}

/// Whitespace-only pieces join the piece before them; leading ones join the
/// piece after. Pieces are contiguous, so spans stay exact.
fn absorb_blank(text: &str, units: Vec<Range<usize>>) -> Vec<Range<usize>> {
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(units.len());
    let mut leading: Option<usize> = None;
    for unit in units {
        if text[unit.clone()].trim().is_empty() {
            match merged.last_mut() {
                Some(prev) => prev.end = unit.end,
                None => {
                    leading.get_or_insert(unit.start);
                }
            }
            continue;
        }
        let start = leading.take().unwrap_or(unit.start);
        merged.push(start..unit.end);
    }
    merged
}

/// Splits `span` before each non-whitespace char whose preceding whitespace
/// run is a boundary. Each piece keeps its trailing whitespace; the first
/// keeps any leading whitespace.
fn split_runs(
    text: &str,
    span: Range<usize>,
    is_boundary: impl Fn(char, &str) -> bool,
) -> Vec<Range<usize>> {
    let slice = &text[span.clone()];
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut last_content: Option<char> = None;
    let mut run_start: Option<usize> = None;
    for (i, c) in slice.char_indices() {
        if c.is_whitespace() {
            run_start.get_or_insert(i);
            continue;
        }
        if let (Some(rs), Some(prev)) = (run_start, last_content) {
            if is_boundary(prev, &slice[rs..i]) {
                pieces.push(span.start + start..span.start + i);
                start = i;
            }
        }
        run_start = None;
        last_content = Some(c);
    }
    pieces.push(span.start + start..span.end);
    pieces
}

/// Prefer a cut right after the last whitespace in the window; else hard cut.
fn hard_split(text: &str, span: Range<usize>, budget: usize) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = span.start;
    while char_len(&text[start..span.end]) > budget {
        let window_end = forward_chars(text, start, budget);
        let window = &text[start..window_end];
        let cut = window
            .char_indices()
            .rev()
            .find(|&(i, c)| c.is_whitespace() && !window[..i].trim().is_empty())
            .map(|(i, c)| start + i + c.len_utf8())
            .unwrap_or(window_end);
        pieces.push(start..cut);
        start = cut;
    }
    if start < span.end {
        pieces.push(start..span.end);
    }
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte index `n` chars after `from`, clamped to the end of `text`.
fn forward_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Byte index `n` chars before `to`, clamped to 0.
fn back_chars(text: &str, to: usize, n: usize) -> usize {
    if n == 0 {
        return to;
    }
    text[..to]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}
