//! Splitting large inputs into bounded, indexed chunks.
//!
//! Text is cut at sentence, then word, then hard boundaries. Audio is cut by
//! an [`AudioBoundaryDetector`], by default the energy-based
//! [`SilenceSplitter`].

pub mod audio;
pub mod text;

pub use audio::{AudioBoundaryDetector, AudioClip, SilenceSplitter, SilenceSplitterConfig, segment_audio};
pub use text::{TextSegmenter, segment_text};

use thiserror::Error;

/// Errors produced while segmenting an input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegmentError {
    #[error("input is empty")]
    EmptyInput,

    #[error("chunk size limit must be positive")]
    InvalidLimit,

    #[error("failed to decode audio: {message}")]
    AudioDecode { message: String },

    #[error("failed to encode audio chunk: {message}")]
    AudioEncode { message: String },

    #[error("audio boundaries do not cover the clip: {message}")]
    InvalidBoundaries { message: String },
}
