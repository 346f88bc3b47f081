//! Chunk pipeline for long inputs.
//!
//! A request is segmented into chunks, each chunk is sent to the inference
//! API by a [`ChunkWorker`] under a bounded [`Scheduler`], outcomes are
//! collected in a [`ResultAccumulator`], and the successful outputs are
//! merged back together in index order. A shared [`RateLimitCoordinator`]
//! pauses every worker when the API signals a rate limit.

pub mod accumulator;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod progress;
pub mod rate_limit;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use accumulator::ResultAccumulator;
pub use error::{ChunkError, ChunkFailure, PipelineError};
pub use merge::{MergeConfig, merge_binary, merge_outputs, merge_text};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineReport};
pub use progress::{
    CollectingObserver, NoopObserver, ProgressDispatcher, ProgressEvent, ProgressObserver,
    ProgressSender,
};
pub use rate_limit::{RateLimitConfig, RateLimitCoordinator, RateLimitEvent};
pub use scheduler::Scheduler;
pub use types::{Chunk, ChunkOutput, OutputKind, Payload, Span};
pub use worker::{ChunkOutcome, ChunkSuccess, ChunkWorker, RetryPolicy};
