//! Per-chunk retry loop around the inference client.

use crate::api::{ApiError, Credential, InferenceClient, ModelSelector};
use crate::defaults;
use crate::pipeline::error::{ChunkError, ChunkFailure};
use crate::pipeline::progress::{ProgressEvent, ProgressSender};
use crate::pipeline::rate_limit::RateLimitCoordinator;
use crate::pipeline::types::{Chunk, ChunkOutput, OutputKind};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times to call the API for one chunk and how long to back off
/// between transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay: defaults::millis(defaults::BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Sleep after a transient failure on `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Output of one chunk that went through.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSuccess {
    pub index: usize,
    pub output: ChunkOutput,
    pub attempts: u32,
}

/// Terminal outcome of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Success(ChunkSuccess),
    Failure(ChunkFailure),
}

impl ChunkOutcome {
    pub fn index(&self) -> usize {
        match self {
            ChunkOutcome::Success(success) => success.index,
            ChunkOutcome::Failure(failure) => failure.index,
        }
    }

    pub fn cancelled(index: usize, attempts: u32) -> Self {
        ChunkOutcome::Failure(ChunkFailure {
            index,
            error: ChunkError::Cancelled,
            attempts,
        })
    }
}

/// Drives one chunk through the API until it succeeds, fails for good, runs
/// out of attempts, or is cancelled.
pub struct ChunkWorker {
    client: Arc<dyn InferenceClient>,
    coordinator: Arc<RateLimitCoordinator>,
    model: ModelSelector,
    credential: Credential,
    expected: OutputKind,
    retry: RetryPolicy,
    progress: ProgressSender,
    cancel: CancellationToken,
}

impl ChunkWorker {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        coordinator: Arc<RateLimitCoordinator>,
        model: ModelSelector,
        credential: Credential,
        expected: OutputKind,
    ) -> Self {
        Self {
            client,
            coordinator,
            model,
            credential,
            expected,
            retry: RetryPolicy::default(),
            progress: ProgressSender::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn process(&self, chunk: &Chunk) -> ChunkOutcome {
        let index = chunk.index;
        let max_attempts = self.retry.max_attempts.max(1);
        self.progress.send(ProgressEvent::ChunkStarted { index });

        let mut attempt = 0;
        loop {
            if self.coordinator.wait_if_needed(&self.cancel).await.is_err()
                || self.cancel.is_cancelled()
            {
                debug!("Chunk {} cancelled before attempt {}", index, attempt + 1);
                return ChunkOutcome::cancelled(index, attempt);
            }

            attempt += 1;
            debug!(
                "Chunk {} attempt {}/{} ({} units)",
                index,
                attempt,
                max_attempts,
                chunk.payload.size()
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return ChunkOutcome::cancelled(index, attempt);
                }
                result = self.client.invoke(&chunk.payload, &self.model, &self.credential) => result,
            };

            let error = match result {
                Ok(output) => {
                    self.coordinator.report_success();
                    return self.accept(index, output, attempt);
                }
                Err(error) => error,
            };

            if error.is_rate_limit() {
                self.coordinator.report_rate_limited(error.retry_after());
            }

            if !error.is_retryable() || attempt >= max_attempts {
                warn!(
                    "Chunk {} failed after {} attempt(s): {}",
                    index, attempt, error
                );
                return ChunkOutcome::Failure(ChunkFailure {
                    index,
                    error: error.into(),
                    attempts: attempt,
                });
            }

            let delay = self.retry_delay(&error, attempt);
            self.progress.send(ProgressEvent::ChunkFailed {
                index,
                error: ChunkError::Api(error),
                will_retry: true,
            });

            // Rate limits wait on the shared pause at the top of the loop.
            if let Some(delay) = delay {
                debug!(
                    "Chunk {} retrying in {}",
                    index,
                    humantime::format_duration(delay)
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        return ChunkOutcome::cancelled(index, attempt);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    fn retry_delay(&self, error: &ApiError, attempt: u32) -> Option<Duration> {
        if error.is_rate_limit() {
            return None;
        }
        Some(
            error
                .retry_after()
                .unwrap_or_else(|| self.retry.backoff(attempt)),
        )
    }

    fn accept(&self, index: usize, output: ChunkOutput, attempts: u32) -> ChunkOutcome {
        if output.kind() != self.expected {
            warn!(
                "Chunk {} returned {} output, expected {}",
                index,
                output.kind(),
                self.expected
            );
            return ChunkOutcome::Failure(ChunkFailure {
                index,
                error: ChunkError::UnexpectedOutput {
                    expected: self.expected,
                    actual: output.kind(),
                },
                attempts,
            });
        }

        ChunkOutcome::Success(ChunkSuccess {
            index,
            output,
            attempts,
        })
    }
}
