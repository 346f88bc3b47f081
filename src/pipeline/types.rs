//! Data types shared by the chunk pipeline.

use serde::Serialize;
use std::fmt;

/// Half-open range `[start, end)` of a chunk in its source.
///
/// Units are characters for text and samples for audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Content sent to the inference API for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    /// Encoded audio (a standalone WAV file).
    Audio(Vec<u8>),
}

impl Payload {
    /// Size in source-independent terms: characters or bytes.
    pub fn size(&self) -> usize {
        match self {
            Payload::Text(text) => text.chars().count(),
            Payload::Audio(bytes) => bytes.len(),
        }
    }
}

/// One bounded unit of a larger input.
///
/// Indices are assigned once at segmentation time, zero-based and contiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub payload: Payload,
    pub span: Span,
}

impl Chunk {
    pub fn new(index: usize, payload: Payload, span: Span) -> Self {
        Self {
            index,
            payload,
            span,
        }
    }
}

/// Kind of output a request is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Text,
    Audio,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Text => write!(f, "text"),
            OutputKind::Audio => write!(f, "audio"),
        }
    }
}

/// Result produced by the inference API for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutput {
    Text(String),
    Audio(Vec<u8>),
}

impl ChunkOutput {
    pub fn kind(&self) -> OutputKind {
        match self {
            ChunkOutput::Text(_) => OutputKind::Text,
            ChunkOutput::Audio(_) => OutputKind::Audio,
        }
    }

    /// Short description for progress reporting.
    pub fn summary(&self) -> String {
        match self {
            ChunkOutput::Text(text) => {
                let words = text.split_whitespace().count();
                let preview: String = text.chars().take(40).collect();
                if preview.len() < text.len() {
                    format!("{words} words: \"{preview}…\"")
                } else {
                    format!("{words} words: \"{preview}\"")
                }
            }
            ChunkOutput::Audio(bytes) => format!("{} bytes of audio", bytes.len()),
        }
    }
}
