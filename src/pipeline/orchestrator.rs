//! Request-level pipeline: segment, dispatch, collect, merge.

use crate::api::{Credential, InferenceClient, ModelSelector};
use crate::defaults;
use crate::pipeline::accumulator::ResultAccumulator;
use crate::pipeline::error::{ChunkFailure, PipelineError};
use crate::pipeline::merge::{MergeConfig, merge_outputs};
use crate::pipeline::progress::{
    ProgressDispatcher, ProgressEvent, ProgressObserver, ProgressSender,
};
use crate::pipeline::rate_limit::{RateLimitConfig, RateLimitCoordinator};
use crate::pipeline::scheduler::Scheduler;
use crate::pipeline::types::{Chunk, ChunkOutput, OutputKind};
use crate::pipeline::worker::{ChunkWorker, RetryPolicy};
use crate::segment::{
    AudioClip, SegmentError, SilenceSplitter, SilenceSplitterConfig, TextSegmenter,
    segment_audio,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Configuration for the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Longest text chunk in characters
    pub max_chunk_chars: usize,
    /// Audio splitting
    pub audio: SilenceSplitterConfig,
    /// Chunks in flight at once
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub merge: MergeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: defaults::MAX_CHUNK_CHARS,
            audio: SilenceSplitterConfig::default(),
            concurrency: defaults::CONCURRENCY,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

/// Outcome of a request that produced at least some output.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    /// Merged output of every successful chunk.
    pub output: ChunkOutput,
    /// Chunks that failed, in index order. Empty on full success.
    pub failures: Vec<ChunkFailure>,
    pub total_chunks: usize,
}

impl PipelineReport {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }

    /// Some chunks failed but the output covers the rest.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn text(&self) -> Option<&str> {
        match &self.output {
            ChunkOutput::Text(text) => Some(text),
            ChunkOutput::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&[u8]> {
        match &self.output {
            ChunkOutput::Audio(bytes) => Some(bytes),
            ChunkOutput::Text(_) => None,
        }
    }
}

/// Long-input front end for an inference API.
///
/// A `Pipeline` is meant to be shared: its rate-limit coordinator pauses
/// every request made through it.
pub struct Pipeline {
    client: Arc<dyn InferenceClient>,
    coordinator: Arc<RateLimitCoordinator>,
    model: ModelSelector,
    credential: Credential,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        model: ModelSelector,
        credential: Credential,
        config: PipelineConfig,
    ) -> Self {
        let coordinator = Arc::new(RateLimitCoordinator::new(config.rate_limit.clone()));
        Self {
            client,
            coordinator,
            model,
            credential,
            config,
        }
    }

    /// Share an existing coordinator, e.g. between pipelines for different
    /// models on the same account.
    pub fn with_coordinator(mut self, coordinator: Arc<RateLimitCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn coordinator(&self) -> &Arc<RateLimitCoordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Audio in, transcript out.
    pub async fn transcribe_audio(
        &self,
        clip: &AudioClip,
        cancel: CancellationToken,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<PipelineReport, PipelineError> {
        let splitter = SilenceSplitter::new(self.config.audio.clone());
        let chunks = segment_audio(clip, &splitter)?;
        self.run(chunks, OutputKind::Text, cancel, observer).await
    }

    /// Text in, text out (translation, cleanup, summarization per chunk).
    pub async fn process_text(
        &self,
        text: &str,
        cancel: CancellationToken,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<PipelineReport, PipelineError> {
        let chunks = self.segment_text(text)?;
        self.run(chunks, OutputKind::Text, cancel, observer).await
    }

    /// Text in, synthesized audio out.
    pub async fn synthesize_text(
        &self,
        text: &str,
        cancel: CancellationToken,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<PipelineReport, PipelineError> {
        let chunks = self.segment_text(text)?;
        self.run(chunks, OutputKind::Audio, cancel, observer).await
    }

    fn segment_text(&self, text: &str) -> Result<Vec<Chunk>, PipelineError> {
        let segmenter = TextSegmenter::new(self.config.max_chunk_chars)?;
        Ok(segmenter.segment(text)?)
    }

    /// Dispatch pre-segmented chunks and merge the results.
    pub async fn run(
        &self,
        chunks: Vec<Chunk>,
        expected: OutputKind,
        cancel: CancellationToken,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<PipelineReport, PipelineError> {
        if chunks.is_empty() {
            return Err(PipelineError::SegmentationFailed(SegmentError::EmptyInput));
        }
        let total = chunks.len();
        let (progress, dispatcher) = match observer {
            Some(observer) => {
                let (sender, dispatcher) =
                    ProgressDispatcher::spawn(observer, Some(self.coordinator.subscribe()));
                (sender, Some(dispatcher))
            }
            None => (ProgressSender::disabled(), None),
        };

        info!("Processing {} chunk(s) into {} output", total, expected);
        progress.send(ProgressEvent::ChunkingStarted { total });

        let worker = ChunkWorker::new(
            self.client.clone(),
            self.coordinator.clone(),
            self.model.clone(),
            self.credential.clone(),
            expected,
        )
        .with_retry(self.config.retry.clone())
        .with_progress(progress.clone())
        .with_cancellation(cancel.clone());

        let accumulator = ResultAccumulator::new(total);
        Scheduler::new(self.config.concurrency)
            .run(chunks, Arc::new(worker), &accumulator, &progress)
            .await;

        let result = self.collect(expected, &accumulator, &cancel, &progress);

        drop(progress);
        if let Some(dispatcher) = dispatcher {
            dispatcher.finish().await;
        }
        result
    }

    fn collect(
        &self,
        expected: OutputKind,
        accumulator: &ResultAccumulator,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<PipelineReport, PipelineError> {
        let successes = accumulator.successes();
        let failures = accumulator.failures();

        if cancel.is_cancelled() {
            info!(
                "Cancelled with {} of {} chunks done",
                successes.len(),
                accumulator.total()
            );
        }

        // Decided on recorded outcomes only, so a real failure is never
        // hidden behind a cancel.
        if successes.is_empty() {
            if !failures.is_empty() && failures.iter().all(|f| f.error.is_cancelled()) {
                return Err(PipelineError::Cancelled);
            }
            warn!("All {} chunks failed", failures.len());
            return Err(PipelineError::AllChunksFailed(failures));
        }

        progress.send(ProgressEvent::MergingStarted);
        let failed: Vec<usize> = failures.iter().map(|f| f.index).collect();
        let output = merge_outputs(expected, successes, &failed, &self.config.merge);

        if failures.is_empty() {
            info!("Merged {} chunks", accumulator.total());
        } else {
            warn!(
                "Partial result: {} of {} chunks failed ({:?})",
                failures.len(),
                accumulator.total(),
                failed
            );
        }

        Ok(PipelineReport {
            output,
            failures,
            total_chunks: accumulator.total(),
        })
    }
}
