//! Error types for the chunk pipeline.

use crate::api::ApiError;
use crate::pipeline::types::OutputKind;
use crate::segment::SegmentError;
use std::fmt;
use thiserror::Error;

/// Terminal error for a single chunk.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("cancelled")]
    Cancelled,

    #[error("expected {expected} output, got {actual}")]
    UnexpectedOutput {
        expected: OutputKind,
        actual: OutputKind,
    },

    #[error("worker task failed: {message}")]
    TaskFailed { message: String },
}

impl ChunkError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChunkError::Cancelled)
    }
}

/// Final failure recorded for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFailure {
    pub index: usize,
    pub error: ChunkError,
    /// API calls made before giving up (0 if cancelled before the first).
    pub attempts: u32,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {} failed after {} attempt{}: {}",
            self.index,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.error
        )
    }
}

/// Errors that abort a whole pipeline request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("segmentation failed: {0}")]
    SegmentationFailed(#[from] SegmentError),

    #[error("{}", all_failed(.0))]
    AllChunksFailed(Vec<ChunkFailure>),

    #[error("cancelled")]
    Cancelled,
}

fn all_failed(failures: &[ChunkFailure]) -> String {
    match failures.first() {
        Some(first) => format!(
            "all {} chunks failed (first: {})",
            failures.len(),
            first.error
        ),
        None => "all chunks failed".to_string(),
    }
}
