//! longform - Run long inputs through size-limited inference APIs
//!
//! Splits long text or audio into bounded chunks, dispatches them with
//! bounded concurrency, retries and a shared rate-limit pause, then merges
//! the per-chunk results back into one output.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
#[cfg(feature = "cli")]
pub mod output;
pub mod pipeline;
pub mod segment;

// Composition root for the binary
#[cfg(feature = "cli")]
pub mod app;

// API boundary
pub use api::{ApiError, Credential, InferenceClient, ModelSelector, ScriptedClient};

// Pipeline
pub use pipeline::{
    Chunk, ChunkOutput, OutputKind, Payload, Pipeline, PipelineConfig, PipelineError,
    PipelineReport, ProgressObserver, RateLimitCoordinator, Span,
};

// Segmentation
pub use segment::{AudioClip, SegmentError, TextSegmenter};

// Error handling
pub use error::{LongformError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
