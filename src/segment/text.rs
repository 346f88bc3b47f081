//! Text segmentation at natural boundaries.

use crate::pipeline::types::{Chunk, Payload, Span};
use crate::segment::SegmentError;
use tracing::debug;

/// Splits text into chunks of at most `max_chars` characters.
#[derive(Debug, Clone, Copy)]
pub struct TextSegmenter {
    max_chars: usize,
}

impl TextSegmenter {
    pub fn new(max_chars: usize) -> Result<Self, SegmentError> {
        if max_chars == 0 {
            return Err(SegmentError::InvalidLimit);
        }
        Ok(Self { max_chars })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Segment `text` into trimmed, non-empty chunks.
    ///
    /// Spans are character offsets into `text`. Whitespace discarded between
    /// chunks is attributed to the following chunk and trailing whitespace to
    /// the last one, so the spans tile the whole input.
    pub fn segment(&self, text: &str) -> Result<Vec<Chunk>, SegmentError> {
        if text.trim().is_empty() {
            return Err(SegmentError::EmptyInput);
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();

        if total <= self.max_chars {
            return Ok(vec![Chunk::new(
                0,
                Payload::Text(text.trim().to_string()),
                Span::new(0, total),
            )]);
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut span_start = 0;
        let mut pos = 0;

        while pos < total {
            let cut = if total - pos <= self.max_chars {
                total
            } else {
                find_cut(&chars, pos, self.max_chars)
            };

            let piece: String = chars[pos..cut].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(Chunk::new(
                    chunks.len(),
                    Payload::Text(trimmed.to_string()),
                    Span::new(span_start, cut),
                ));
                span_start = cut;
            }
            pos = cut;
        }

        if let Some(last) = chunks.last_mut() {
            last.span.end = total;
        }

        debug!(
            "Segmented {} chars into {} chunks (limit {})",
            total,
            chunks.len(),
            self.max_chars
        );
        Ok(chunks)
    }
}

/// Segment text with the given character limit.
pub fn segment_text(text: &str, max_chars: usize) -> Result<Vec<Chunk>, SegmentError> {
    TextSegmenter::new(max_chars)?.segment(text)
}

fn is_sentence_end(chars: &[char], i: usize) -> bool {
    match chars[i] {
        '\n' => true,
        '.' | '!' | '?' => chars.get(i + 1).is_some_and(|c| c.is_whitespace()),
        _ => false,
    }
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Find where to end the segment starting at `pos`. Requires `pos + max < len`.
///
/// The returned offset is always greater than `pos`.
fn find_cut(chars: &[char], pos: usize, max: usize) -> usize {
    let limit = pos + max;

    if let Some(i) = (pos..limit).rev().find(|&i| is_sentence_end(chars, i)) {
        return skip_whitespace(chars, i + 1);
    }

    if let Some(i) = (pos + 1..=limit).rev().find(|&i| chars[i].is_whitespace()) {
        return skip_whitespace(chars, i);
    }

    limit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks
            .iter()
            .map(|c| match &c.payload {
                Payload::Text(t) => t.as_str(),
                Payload::Audio(_) => panic!("expected text payload"),
            })
            .collect()
    }

    fn assert_tiles(chunks: &[Chunk], total: usize) {
        assert_eq!(chunks.first().map(|c| c.span.start), Some(0));
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].span.end, pair[1].span.start, "gap or overlap");
        }
        assert_eq!(chunks.last().map(|c| c.span.end), Some(total));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(segment_text("", 100), Err(SegmentError::EmptyInput));
        assert_eq!(segment_text("  \n\t ", 100), Err(SegmentError::EmptyInput));
    }

    #[test]
    fn zero_limit_is_rejected() {
        assert_eq!(segment_text("hello", 0), Err(SegmentError::InvalidLimit));
    }

    #[test]
    fn short_input_is_single_trimmed_chunk() {
        let chunks = segment_text("  Hello there, world.  ", 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(texts(&chunks), vec!["Hello there, world."]);
        assert_eq!(chunks[0].span, Span::new(0, 23));
    }

    #[test]
    fn input_exactly_at_limit_is_single_chunk() {
        let text = "abcde";
        let chunks = segment_text(text, 5).unwrap();
        assert_eq!(texts(&chunks), vec!["abcde"]);
    }

    #[test]
    fn cuts_at_sentence_boundary() {
        let text = "One two three. Four five six. Seven eight.";
        let chunks = segment_text(text, 20).unwrap();
        assert_eq!(
            texts(&chunks),
            vec!["One two three.", "Four five six.", "Seven eight."]
        );
        assert_tiles(&chunks, text.chars().count());
    }

    #[test]
    fn prefers_latest_sentence_boundary_in_window() {
        let text = "A b. C d. E f g h i j k l m n o p";
        let chunks = segment_text(text, 12).unwrap();
        assert_eq!(texts(&chunks)[0], "A b. C d.");
    }

    #[test]
    fn newline_counts_as_boundary() {
        let text = "first line here\nsecond line here";
        let chunks = segment_text(text, 20).unwrap();
        assert_eq!(texts(&chunks), vec!["first line here", "second line here"]);
    }

    #[test]
    fn terminator_without_whitespace_is_not_a_boundary() {
        // "3.14" must not be split after the dot
        let text = "pi is 3.14159 roughly yes";
        let chunks = segment_text(text, 12).unwrap();
        assert!(texts(&chunks).iter().all(|t| !t.ends_with('.')));
    }

    #[test]
    fn falls_back_to_word_boundary() {
        let text = "alpha beta gamma delta epsilon";
        let chunks = segment_text(text, 12).unwrap();
        assert_eq!(
            texts(&chunks),
            vec!["alpha beta", "gamma delta", "epsilon"]
        );
        assert_tiles(&chunks, text.chars().count());
    }

    #[test]
    fn hard_cut_when_no_boundary() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = segment_text(text, 10).unwrap();
        assert_eq!(texts(&chunks), vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
        assert_tiles(&chunks, 26);
    }

    #[test]
    fn no_chunk_exceeds_limit() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(40);
        let chunks = segment_text(&text, 100).unwrap();
        for chunk in &chunks {
            assert!(chunk.payload.size() <= 100);
        }
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let text = "word ".repeat(200);
        let chunks = segment_text(&text, 50).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn whitespace_runs_are_discarded_but_covered() {
        let text = format!("start here.{}end here.", " ".repeat(30));
        let chunks = segment_text(&text, 12).unwrap();
        assert_eq!(texts(&chunks), vec!["start here.", "end here."]);
        assert_tiles(&chunks, text.chars().count());
    }

    #[test]
    fn multibyte_text_is_split_on_chars() {
        let text = "héllo wörld ünïcode çhars ñice";
        let chunks = segment_text(text, 12).unwrap();
        assert_tiles(&chunks, text.chars().count());
        assert!(texts(&chunks).iter().all(|t| t.chars().count() <= 12));
    }

    #[test]
    fn twelve_thousand_chars_make_three_chunks() {
        let sentence = "The quick brown fox jumps over the lazy dog near the river. ";
        let text: String = sentence.repeat(300).chars().take(12_000).collect();
        let chunks = segment_text(&text, 5000).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_tiles(&chunks, 12_000);
        for chunk in &chunks[..2] {
            match &chunk.payload {
                Payload::Text(t) => assert!(t.ends_with('.')),
                Payload::Audio(_) => unreachable!(),
            }
        }
    }
}
