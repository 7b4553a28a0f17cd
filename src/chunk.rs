//! Recursive-separator text chunker.
//!
//! Splits contract text into overlapping [`Chunk`]s of at most `chunk_size`
//! characters. Splitting prefers the most significant separator present in
//! the text (paragraph break first) and only falls through to finer
//! separators (line, sentence punctuation, comma, space, single character)
//! for pieces that are still too large.
//!
//! Separators stay attached to the start of the piece that follows them, so
//! every chunk is a contiguous slice of the input. When a chunk is emitted,
//! pieces from its tail totalling at most `chunk_overlap` characters are
//! carried into the head of the next chunk. Each chunk records its character
//! offset, which makes the original text recoverable from the chunks.
//!
//! Each chunk receives a fresh random UUID and the list of function
//! declarations found in its text.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkMetadata, CHUNK_SOURCE};

/// Separators tried in order, most significant first. The empty separator
/// means "split into single characters".
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ".", "!", "?", ",", " ", ""];

/// `function name(params) [visibility] [mutability] [returns (...)]`
static FUNCTION_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"function\s+(\w+)\s*\([^)]*\)\s*(?:public|private|internal|external)?\s*(?:view|pure|payable)?\s*(?:returns\s*\([^)]*\))?",
    )
    .expect("function signature pattern is valid")
});

/// Byte range into the text being split.
type Span = Range<usize>;

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Chunker {
    /// Fails when `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::validation("chunk_size must be > 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split `text` into contract chunks with metadata.
    ///
    /// Returns an empty list for empty input.
    pub fn process(
        &self,
        text: &str,
        contract_name: &str,
        contract_address: Option<&str>,
        network: Option<&str>,
    ) -> Vec<Chunk> {
        let spans = self.split_spans(text);
        let total_chunks = spans.len();
        let timestamp = Utc::now().to_rfc3339();

        // Spans start in non-decreasing order, so character offsets can be
        // counted incrementally.
        let mut byte_cursor = 0usize;
        let mut char_cursor = 0usize;

        spans
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| {
                char_cursor += text[byte_cursor..span.start].chars().count();
                byte_cursor = span.start;

                let chunk_text = &text[span];
                Chunk {
                    id: Uuid::new_v4().to_string(),
                    text: chunk_text.to_string(),
                    metadata: ChunkMetadata {
                        contract_name: contract_name.to_string(),
                        chunk_index,
                        total_chunks,
                        start_offset: char_cursor,
                        source: CHUNK_SOURCE.to_string(),
                        timestamp: timestamp.clone(),
                        contract_address: contract_address.map(str::to_string),
                        network: network.map(str::to_string),
                        functions: extract_function_signatures(chunk_text),
                    },
                }
            })
            .collect()
    }

    /// Split `text` into plain string pieces (no metadata).
    pub fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.split_spans(text)
            .into_iter()
            .map(|span| &text[span])
            .collect()
    }

    fn split_spans(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        if !text.is_empty() {
            self.split_recursive(text, 0..text.len(), &self.separators, &mut out);
        }
        out
    }

    fn split_recursive(&self, text: &str, span: Span, separators: &[String], out: &mut Vec<Span>) {
        let piece = &text[span.clone()];

        // Pick the first separator present in this piece; finer separators
        // are kept for pieces that are still too large.
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if piece.contains(sep.as_str()) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut good: Vec<Span> = Vec::new();
        for split in split_keeping_separator(piece, separator) {
            let split = (split.start + span.start)..(split.end + span.start);
            if char_len(text, &split) < self.chunk_size {
                good.push(split);
                continue;
            }

            if !good.is_empty() {
                self.merge_splits(text, &good, out);
                good.clear();
            }
            if finer.is_empty() {
                out.push(split);
            } else {
                self.split_recursive(text, split, finer, out);
            }
        }

        if !good.is_empty() {
            self.merge_splits(text, &good, out);
        }
    }

    /// Greedily merge consecutive splits into chunks of at most `chunk_size`
    /// characters, carrying up to `chunk_overlap` characters forward.
    fn merge_splits(&self, text: &str, splits: &[Span], out: &mut Vec<Span>) {
        let mut current: VecDeque<(Span, usize)> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(text, split);

            if total + len > self.chunk_size {
                if let Some(span) = joined_span(&current) {
                    out.push(span);
                }
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }

            current.push_back((split.clone(), len));
            total += len;
        }

        if let Some(span) = joined_span(&current) {
            out.push(span);
        }
    }
}

/// Splits are consecutive, so the merged chunk is the range from the first
/// split's start to the last split's end.
fn joined_span(current: &VecDeque<(Span, usize)>) -> Option<Span> {
    match (current.front(), current.back()) {
        (Some((first, _)), Some((last, _))) => Some(first.start..last.end),
        _ => None,
    }
}

fn char_len(text: &str, span: &Span) -> usize {
    text[span.clone()].chars().count()
}

/// Split `piece` on `separator`, attaching each separator to the start of
/// the following piece. Empty pieces are dropped. Spans are relative to
/// `piece`.
fn split_keeping_separator(piece: &str, separator: &str) -> Vec<Span> {
    if separator.is_empty() {
        return piece
            .char_indices()
            .map(|(i, c)| i..i + c.len_utf8())
            .collect();
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    for (pos, _) in piece.match_indices(separator) {
        if pos > start {
            spans.push(start..pos);
        }
        start = pos;
    }
    if start < piece.len() {
        spans.push(start..piece.len());
    }
    spans
}

/// All function declarations in `text`, in order of appearance.
pub fn extract_function_signatures(text: &str) -> Vec<String> {
    FUNCTION_SIGNATURE
        .find_iter(text)
        .map(|m| m.as_str().trim_end().to_string())
        .collect()
}
