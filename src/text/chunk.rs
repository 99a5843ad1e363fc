//! Fixed-size overlapping character windows.

use serde::{Deserialize, Serialize};

/// One window of a message body, with its position in the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
    pub total: usize,
}

/// Split `text` into windows of `size` characters, each overlapping the
/// previous by `overlap` characters.
///
/// The input is trimmed once before windowing. `size` is floored at 1 and
/// `overlap` at 0. An overlap that would stall the walk (`overlap >= size`)
/// is replaced with `size / 4`. Windows are trimmed and blank ones dropped.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let size = size.max(1);
    let overlap = if overlap >= size { size / 4 } else { overlap };

    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < n {
        let end = (start + size).min(n);
        let window = text[bounds[start]..bounds[end]].trim();
        if !window.is_empty() {
            chunks.push(window.to_string());
        }
        if end == n {
            break;
        }
        start = end.saturating_sub(overlap);
    }

    chunks
}

/// `chunk_text` with index/total bookkeeping attached.
pub fn split_into_chunks(text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let pieces = chunk_text(text, size, overlap);
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { text, index, total })
        .collect()
}
