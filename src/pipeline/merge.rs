//! Reassembly of chunk outputs in index order.
//!
//! Text chunks often repeat a few words at their boundary (especially
//! transcripts of audio cut mid-sentence). The merger drops the longest run
//! of words that the accumulated text ends with and the next chunk starts
//! with.

use crate::defaults;
use crate::pipeline::types::{ChunkOutput, OutputKind};
use tracing::debug;

/// Boundary deduplication and gap marker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    /// Trailing words of the merged text compared against the next chunk.
    pub overlap_window: usize,
    /// Shortest overlap that gets removed.
    pub min_overlap: usize,
    /// Insert `[chunk K failed]` where a chunk is missing.
    pub gap_markers: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            overlap_window: defaults::OVERLAP_WINDOW_WORDS,
            min_overlap: defaults::MIN_OVERLAP_WORDS,
            gap_markers: false,
        }
    }
}

/// Marker inserted for a missing chunk when gap markers are on.
pub fn gap_marker(index: usize) -> String {
    format!("[chunk {index} failed]")
}

enum Piece<'a> {
    Text(&'a str),
    Gap(usize),
}

/// Merge text outputs. `parts` may arrive in any order; `failed` lists the
/// indices that produced nothing.
pub fn merge_text(parts: &[(usize, String)], failed: &[usize], config: &MergeConfig) -> String {
    let mut pieces: Vec<(usize, Piece<'_>)> = parts
        .iter()
        .map(|(index, text)| (*index, Piece::Text(text.as_str())))
        .collect();
    if config.gap_markers {
        pieces.extend(failed.iter().map(|&index| (index, Piece::Gap(index))));
    }
    pieces.sort_by_key(|(index, _)| *index);

    let mut merged = String::new();
    let mut dedup_next = false;
    let mut removed = 0;

    for (_, piece) in pieces {
        match piece {
            Piece::Gap(index) => {
                append(&mut merged, &gap_marker(index));
                dedup_next = false;
            }
            Piece::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if dedup_next {
                    let words: Vec<&str> = text.split_whitespace().collect();
                    let overlap = overlap_len(&merged, &words, config);
                    removed += overlap;
                    append(&mut merged, &words[overlap..].join(" "));
                } else {
                    append(&mut merged, text);
                }
                dedup_next = true;
            }
        }
    }

    if removed > 0 {
        debug!("Removed {} repeated boundary words while merging", removed);
    }
    collapse_whitespace(&merged)
}

/// Concatenate byte outputs in index order.
pub fn merge_binary(parts: &[(usize, Vec<u8>)]) -> Vec<u8> {
    let mut ordered: Vec<&(usize, Vec<u8>)> = parts.iter().collect();
    ordered.sort_by_key(|(index, _)| *index);

    let total: usize = ordered.iter().map(|(_, bytes)| bytes.len()).sum();
    let mut merged = Vec::with_capacity(total);
    for (_, bytes) in ordered {
        merged.extend_from_slice(bytes);
    }
    merged
}

/// Merge successful outputs of the given kind. Outputs of another kind are
/// skipped.
pub fn merge_outputs(
    kind: OutputKind,
    successes: Vec<(usize, ChunkOutput)>,
    failed: &[usize],
    config: &MergeConfig,
) -> ChunkOutput {
    match kind {
        OutputKind::Text => {
            let parts: Vec<(usize, String)> = successes
                .into_iter()
                .filter_map(|(index, output)| match output {
                    ChunkOutput::Text(text) => Some((index, text)),
                    ChunkOutput::Audio(_) => None,
                })
                .collect();
            ChunkOutput::Text(merge_text(&parts, failed, config))
        }
        OutputKind::Audio => {
            let parts: Vec<(usize, Vec<u8>)> = successes
                .into_iter()
                .filter_map(|(index, output)| match output {
                    ChunkOutput::Audio(bytes) => Some((index, bytes)),
                    ChunkOutput::Text(_) => None,
                })
                .collect();
            ChunkOutput::Audio(merge_binary(&parts))
        }
    }
}

/// Number of leading `next` words that repeat the tail of `merged`.
pub fn overlap_len(merged: &str, next: &[&str], config: &MergeConfig) -> usize {
    let mut tail: Vec<String> = merged
        .split_whitespace()
        .rev()
        .take(config.overlap_window)
        .map(normalize)
        .collect();
    tail.reverse();

    let longest = config.overlap_window.min(tail.len()).min(next.len());
    let shortest = config.min_overlap.max(1);

    for len in (shortest..=longest).rev() {
        let suffix = &tail[tail.len() - len..];
        if suffix
            .iter()
            .zip(next.iter())
            .all(|(a, b)| *a == normalize(b))
        {
            return len;
        }
    }
    0
}

/// Lowercase and keep only letters and digits.
fn normalize(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn append(merged: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !merged.is_empty() {
        merged.push(' ');
    }
    merged.push_str(text);
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
