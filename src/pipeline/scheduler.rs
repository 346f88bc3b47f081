//! Bounded fan-out of chunk workers and fan-in of their outcomes.

use crate::defaults;
use crate::pipeline::accumulator::ResultAccumulator;
use crate::pipeline::error::{ChunkError, ChunkFailure};
use crate::pipeline::progress::{ProgressEvent, ProgressSender};
use crate::pipeline::types::Chunk;
use crate::pipeline::worker::{ChunkOutcome, ChunkWorker};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Runs one worker per chunk with at most `concurrency` in flight.
#[derive(Debug, Clone)]
pub struct Scheduler {
    concurrency: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(defaults::CONCURRENCY)
    }
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every chunk and record each outcome in `accumulator`.
    ///
    /// Returns once every chunk has a terminal outcome.
    pub async fn run(
        &self,
        chunks: Vec<Chunk>,
        worker: Arc<ChunkWorker>,
        accumulator: &ResultAccumulator,
        progress: &ProgressSender,
    ) {
        let total = chunks.len();

        if total == 1 {
            for chunk in chunks {
                let outcome = worker.process(&chunk).await;
                fan_in(outcome, accumulator, progress);
            }
            return;
        }

        info!(
            "Scheduling {} chunks ({} concurrent)",
            total, self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut task_chunks = HashMap::with_capacity(total);

        for chunk in chunks {
            let index = chunk.index;
            let semaphore = semaphore.clone();
            let worker = worker.clone();

            let handle = tasks.spawn(async move {
                let cancel = worker.cancel_token().clone();
                // The permit is held for the whole retry loop of this chunk.
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return ChunkOutcome::cancelled(index, 0),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return ChunkOutcome::cancelled(index, 0),
                    },
                };
                worker.process(&chunk).await
            });
            task_chunks.insert(handle.id(), index);
        }
        drop(worker);

        while let Some(joined) = tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((_, outcome)) => outcome,
                Err(join_error) => {
                    let Some(index) = task_chunks.get(&join_error.id()).copied() else {
                        error!("Unknown chunk task failed: {}", join_error);
                        continue;
                    };
                    error!("Chunk {} task failed: {}", index, join_error);
                    ChunkOutcome::Failure(ChunkFailure {
                        index,
                        error: ChunkError::TaskFailed {
                            message: join_error.to_string(),
                        },
                        attempts: 0,
                    })
                }
            };
            fan_in(outcome, accumulator, progress);
        }
    }
}

fn fan_in(outcome: ChunkOutcome, accumulator: &ResultAccumulator, progress: &ProgressSender) {
    let index = outcome.index();
    let recorded = match outcome {
        ChunkOutcome::Success(success) => {
            let summary = success.output.summary();
            let recorded = accumulator.record_success(success.index, success.output);
            if recorded {
                debug!(
                    "Chunk {} done after {} attempt(s): {}",
                    success.index, success.attempts, summary
                );
                progress.send(ProgressEvent::ChunkCompleted {
                    index: success.index,
                    summary,
                });
            }
            recorded
        }
        ChunkOutcome::Failure(failure) => {
            let error = failure.error.clone();
            let recorded = accumulator.record_failure(failure);
            if recorded {
                progress.send(ProgressEvent::ChunkFailed {
                    index,
                    error,
                    will_retry: false,
                });
            }
            recorded
        }
    };

    if recorded {
        let completed = accumulator.increment_and_get_completed();
        progress.send(ProgressEvent::ProgressUpdated {
            completed,
            total: accumulator.total(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, Credential, ModelSelector, ScriptedClient, ScriptedResponse};
    use crate::pipeline::progress::{CollectingObserver, ProgressDispatcher};
    use crate::pipeline::rate_limit::RateLimitCoordinator;
    use crate::pipeline::types::{ChunkOutput, OutputKind, Payload, Span};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| {
                let text = format!("chunk {i}");
                let len = text.len();
                Chunk::new(i, Payload::Text(text), Span::new(i * 10, i * 10 + len))
            })
            .collect()
    }

    fn worker(client: Arc<ScriptedClient>) -> ChunkWorker {
        ChunkWorker::new(
            client,
            Arc::new(RateLimitCoordinator::default()),
            ModelSelector::new("mock"),
            Credential::new("test"),
            OutputKind::Text,
        )
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        assert_eq!(Scheduler::new(0).concurrency(), 1);
        assert_eq!(Scheduler::default().concurrency(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_never_exceeds_limit() {
        let client =
            Arc::new(ScriptedClient::new(OutputKind::Text).with_latency(Duration::from_millis(100)));
        let accumulator = ResultAccumulator::new(10);

        Scheduler::new(3)
            .run(
                chunks(10),
                Arc::new(worker(client.clone())),
                &accumulator,
                &ProgressSender::disabled(),
            )
            .await;

        assert_eq!(client.calls(), 10);
        assert_eq!(client.peak_in_flight(), 3);
        assert_eq!(accumulator.successes().len(), 10);
        assert_eq!(accumulator.completed(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_block_later_chunks() {
        let client = Arc::new(
            ScriptedClient::new(OutputKind::Text)
                .with_latency(Duration::from_millis(50))
                .with_script(
                    "chunk 2",
                    vec![ScriptedResponse::Fail(ApiError::InvalidRequest {
                        message: "rejected".into(),
                    })],
                ),
        );
        let accumulator = ResultAccumulator::new(5);

        Scheduler::new(2)
            .run(
                chunks(5),
                Arc::new(worker(client)),
                &accumulator,
                &ProgressSender::disabled(),
            )
            .await;

        let succeeded: Vec<usize> = accumulator.successes().iter().map(|(i, _)| *i).collect();
        assert_eq!(succeeded, vec![0, 1, 3, 4]);
        let failures = accumulator.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn single_chunk_runs_inline() {
        let client = Arc::new(ScriptedClient::new(OutputKind::Text));
        let accumulator = ResultAccumulator::new(1);

        Scheduler::new(4)
            .run(
                chunks(1),
                Arc::new(worker(client.clone())),
                &accumulator,
                &ProgressSender::disabled(),
            )
            .await;

        assert_eq!(
            accumulator.successes(),
            vec![(0, ChunkOutput::Text("chunk 0".into()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn queued_chunks_cancel_without_calls() {
        let client = Arc::new(
            ScriptedClient::new(OutputKind::Text)
                .with_script("chunk", vec![ScriptedResponse::Hang; 3]),
        );
        let cancel = CancellationToken::new();
        let worker = worker(client.clone()).with_cancellation(cancel.clone());
        let accumulator = Arc::new(ResultAccumulator::new(3));

        let run = {
            let accumulator = accumulator.clone();
            tokio::spawn(async move {
                Scheduler::new(1)
                    .run(chunks(3), Arc::new(worker), &accumulator, &ProgressSender::disabled())
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        run.await.unwrap();

        assert_eq!(client.calls(), 1);
        let failures = accumulator.failures();
        assert_eq!(failures.len(), 3);
        assert!(failures.iter().all(|f| f.error.is_cancelled()));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_counts_every_outcome() {
        let client = Arc::new(ScriptedClient::new(OutputKind::Text));
        let observer = Arc::new(CollectingObserver::new());
        let (sender, dispatcher) = ProgressDispatcher::spawn(observer.clone(), None);
        let accumulator = ResultAccumulator::new(4);

        Scheduler::new(2)
            .run(
                chunks(4),
                Arc::new(worker(client).with_progress(sender.clone())),
                &accumulator,
                &sender,
            )
            .await;
        drop(sender);
        dispatcher.finish().await;

        let mut completed: Vec<usize> = observer
            .events()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::ProgressUpdated { completed, total } => {
                    assert_eq!(*total, 4);
                    Some(*completed)
                }
                _ => None,
            })
            .collect();
        completed.sort();
        assert_eq!(completed, vec![1, 2, 3, 4]);

        let finished = observer
            .events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::ChunkCompleted { .. }))
            .count();
        assert_eq!(finished, 4);
    }
}
